//! Wire messages exchanged by client and server.
//!
//! Encoding and decoding only; which message is legal when is decided by
//! the state machines in [`super::client`] and [`super::server`].

use super::reader::{ReadError, ReadResult, Reader};
use super::types::{ClientMessageType, ServerMessageType};
use super::varchar::{self, max_value_for_width, write_uint};
use super::{
    Channel, Message, MAX_CHANNEL_NAME_LENGTH, MAX_LIST_CHANNEL_LENGTH_BYTES,
    MAX_LIST_MESSAGE_LENGTH_BYTES, MAX_MESSAGE_LENGTH, MAX_NICK_LENGTH,
};
use crate::error::{Error, Result};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `[tag, version:u8]`
    Hello {
        /// Client protocol version.
        version: u8,
    },
    /// `[tag, version:u8, nick:varchar]`
    Authenticate {
        /// Client protocol version, repeated from the hello.
        version: u8,
        /// Requested nickname.
        nick: String,
    },
    /// `[tag, channel_name:varchar, content:varchar]`
    Post {
        /// Target channel.
        channel_name: String,
        /// Message text.
        content: String,
    },
    /// `[tag]`
    ListChannels,
    /// `[tag, channel_name:varchar, before:u64, after:u64]`, 0 meaning unset.
    ListMessages {
        /// Channel to read.
        channel_name: String,
        /// Lower id bound.
        before: Option<u64>,
        /// Upper id bound.
        after: Option<u64>,
    },
}

impl ClientMessage {
    /// Tag of this message.
    pub fn message_type(&self) -> ClientMessageType {
        match self {
            ClientMessage::Hello { .. } => ClientMessageType::Hello,
            ClientMessage::Authenticate { .. } => ClientMessageType::Authenticate,
            ClientMessage::Post { .. } => ClientMessageType::SendMessage,
            ClientMessage::ListChannels => ClientMessageType::ListChannels,
            ClientMessage::ListMessages { .. } => ClientMessageType::ListMessages,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.message_type().to_byte()];
        match self {
            ClientMessage::Hello { version } => out.push(*version),
            ClientMessage::Authenticate { version, nick } => {
                out.push(*version);
                varchar::write_into(&mut out, nick, MAX_NICK_LENGTH)?;
            }
            ClientMessage::Post {
                channel_name,
                content,
            } => {
                varchar::write_into(&mut out, channel_name, MAX_CHANNEL_NAME_LENGTH)?;
                varchar::write_into(&mut out, content, MAX_MESSAGE_LENGTH)?;
            }
            ClientMessage::ListChannels => {}
            ClientMessage::ListMessages {
                channel_name,
                before,
                after,
            } => {
                varchar::write_into(&mut out, channel_name, MAX_CHANNEL_NAME_LENGTH)?;
                out.extend_from_slice(&before.unwrap_or(0).to_be_bytes());
                out.extend_from_slice(&after.unwrap_or(0).to_be_bytes());
            }
        }
        Ok(out)
    }

    /// Decode one message, tag included.
    pub fn read_from(reader: &mut Reader<'_>) -> ReadResult<Self> {
        let message_type = ClientMessageType::from_byte(reader.read_u8()?)?;
        let message = match message_type {
            ClientMessageType::Hello => ClientMessage::Hello {
                version: reader.read_u8()?,
            },
            ClientMessageType::Authenticate => ClientMessage::Authenticate {
                version: reader.read_u8()?,
                nick: reader.read_varchar(MAX_NICK_LENGTH)?,
            },
            ClientMessageType::SendMessage => ClientMessage::Post {
                channel_name: reader.read_varchar(MAX_CHANNEL_NAME_LENGTH)?,
                content: reader.read_varchar(MAX_MESSAGE_LENGTH)?,
            },
            ClientMessageType::ListChannels => ClientMessage::ListChannels,
            ClientMessageType::ListMessages => ClientMessage::ListMessages {
                channel_name: reader.read_varchar(MAX_CHANNEL_NAME_LENGTH)?,
                before: non_zero(reader.read_u64()?),
                after: non_zero(reader.read_u64()?),
            },
        };
        Ok(message)
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// `[tag, using_ssl:u8]`
    Hello {
        /// Whether the stream upgrades to TLS next.
        using_ssl: bool,
    },
    /// `[tag, required_version:u8]`
    IncompatibleVersion {
        /// Version the server speaks.
        required: u8,
    },
    /// `[tag, success:u8]`
    AcknowledgeAuthentication {
        /// Whether the nickname was accepted.
        success: bool,
    },
    /// `[tag, message]`
    Post {
        /// The broadcast message.
        message: Message,
    },
    /// `[tag, total_length, channel...]`
    ListChannels {
        /// Known channels.
        channels: Vec<Channel>,
    },
    /// `[tag, total_length, message...]`
    ListMessages {
        /// Requested history.
        messages: Vec<Message>,
    },
}

impl ServerMessage {
    /// Tag of this message.
    pub fn message_type(&self) -> ServerMessageType {
        match self {
            ServerMessage::Hello { .. } => ServerMessageType::Hello,
            ServerMessage::IncompatibleVersion { .. } => ServerMessageType::IncompatibleVersion,
            ServerMessage::AcknowledgeAuthentication { .. } => {
                ServerMessageType::AcknowledgeAuthentication
            }
            ServerMessage::Post { .. } => ServerMessageType::SendMessage,
            ServerMessage::ListChannels { .. } => ServerMessageType::ListChannels,
            ServerMessage::ListMessages { .. } => ServerMessageType::ListMessages,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.message_type().to_byte()];
        match self {
            ServerMessage::Hello { using_ssl } => out.push(u8::from(*using_ssl)),
            ServerMessage::IncompatibleVersion { required } => out.push(*required),
            ServerMessage::AcknowledgeAuthentication { success } => out.push(u8::from(*success)),
            ServerMessage::Post { message } => message.write_into(&mut out)?,
            ServerMessage::ListChannels { channels } => {
                let mut body = Vec::new();
                for channel in channels {
                    channel.write_into(&mut body)?;
                }
                write_batch(&mut out, &body, MAX_LIST_CHANNEL_LENGTH_BYTES)?;
            }
            ServerMessage::ListMessages { messages } => {
                let mut body = Vec::new();
                for message in messages {
                    message.write_into(&mut body)?;
                }
                write_batch(&mut out, &body, MAX_LIST_MESSAGE_LENGTH_BYTES)?;
            }
        }
        Ok(out)
    }

    /// Decode one message, tag included.
    pub fn read_from(reader: &mut Reader<'_>) -> ReadResult<Self> {
        let message_type = ServerMessageType::from_byte(reader.read_u8()?)?;
        let message = match message_type {
            ServerMessageType::Hello => ServerMessage::Hello {
                using_ssl: reader.read_bool()?,
            },
            ServerMessageType::IncompatibleVersion => ServerMessage::IncompatibleVersion {
                required: reader.read_u8()?,
            },
            ServerMessageType::AcknowledgeAuthentication => {
                ServerMessage::AcknowledgeAuthentication {
                    success: reader.read_bool()?,
                }
            }
            ServerMessageType::SendMessage => ServerMessage::Post {
                message: Message::read_from(reader)?,
            },
            ServerMessageType::ListChannels => ServerMessage::ListChannels {
                channels: read_batch(reader, MAX_LIST_CHANNEL_LENGTH_BYTES, Channel::read_from)?,
            },
            ServerMessageType::ListMessages => ServerMessage::ListMessages {
                messages: read_batch(reader, MAX_LIST_MESSAGE_LENGTH_BYTES, Message::read_from)?,
            },
        };
        Ok(message)
    }
}

fn non_zero(value: u64) -> Option<u64> {
    (value != 0).then_some(value)
}

/// Write `body` behind a byte-length prefix `width` bytes wide.
fn write_batch(out: &mut Vec<u8>, body: &[u8], width: usize) -> Result<()> {
    let max = max_value_for_width(width);
    if body.len() as u64 > max {
        return Err(Error::InvalidLength {
            length: body.len(),
            max_length: usize::try_from(max).unwrap_or(usize::MAX),
        });
    }
    write_uint(out, body.len() as u64, width);
    out.extend_from_slice(body);
    Ok(())
}

/// Read a byte-length-prefixed batch of records.
///
/// The whole batch must be buffered before any record is decoded. A record
/// that runs past the end of the batch is corrupt, not incomplete.
fn read_batch<T, F>(reader: &mut Reader<'_>, width: usize, mut read_item: F) -> ReadResult<Vec<T>>
where
    F: FnMut(&mut Reader<'_>) -> ReadResult<T>,
{
    let length = reader.read_uint(width)?;
    let length = usize::try_from(length)
        .map_err(|_| Error::MalformedData(format!("batch length {} too large", length)))?;
    let body = reader.read_exact(length)?;

    let mut items = Vec::new();
    let mut batch = Reader::new(body);
    while !batch.is_empty() {
        match read_item(&mut batch) {
            Ok(item) => items.push(item),
            Err(ReadError::Incomplete { .. }) => {
                return Err(Error::MalformedData(format!(
                    "batch record truncated at byte {} of {}",
                    batch.position(),
                    length
                ))
                .into())
            }
            Err(e) => return Err(e),
        }
    }
    Ok(items)
}
