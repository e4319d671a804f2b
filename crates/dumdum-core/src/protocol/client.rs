//! Client side of the protocol.

use super::messages::{ClientMessage, ServerMessage};
use super::reader::{read_transaction, ReadError};
use super::{
    ensure_state, extend_limited_buffer, validate_channel_name, validate_nick, Channel, Message,
    Parsed, Protocol, ProtocolState, DEFAULT_BUFFER_SIZE, PROTOCOL_VERSION,
};
use crate::error::{Error, Result};

/// Where the client is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Hello sent (or about to be), waiting for the server's hello.
    AwaitingHello,
    /// Handshake done, nickname not yet accepted.
    AwaitingAuthentication,
    /// Authenticated; chat operations are allowed.
    Ready,
}

impl ProtocolState for ClientState {
    const MACHINE: &'static str = "Client";

    fn name(self) -> &'static str {
        match self {
            ClientState::AwaitingHello => "AWAITING_HELLO",
            ClientState::AwaitingAuthentication => "AWAITING_AUTHENTICATION",
            ClientState::Ready => "READY",
        }
    }
}

/// Something the server told the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The server accepted our version.
    Hello {
        /// The stream must be upgraded to TLS before authenticating.
        using_ssl: bool,
    },
    /// The server refused our version. The connection should be closed.
    IncompatibleVersion {
        /// Version the server requires.
        server_version: u8,
        /// Version we offered.
        client_version: u8,
    },
    /// The server answered our nickname claim.
    Authentication {
        /// Whether the nickname was accepted.
        success: bool,
    },
    /// Someone posted to a channel.
    MessageReceived {
        /// The posted message.
        message: Message,
    },
    /// Reply to [`Client::list_channels`].
    ChannelsListed {
        /// Channels on the server.
        channels: Vec<Channel>,
    },
    /// Reply to [`Client::list_messages`].
    MessagesListed {
        /// Matching history, oldest first.
        messages: Vec<Message>,
    },
}

/// Sans-I/O client protocol machine.
///
/// Methods that send return the bytes to write; [`Client::receive_bytes`]
/// turns bytes read from the server into [`ClientEvent`]s.
#[derive(Debug)]
pub struct Client {
    nick: String,
    protocol_version: u8,
    buffer_size: Option<usize>,
    buffer: Vec<u8>,
    state: ClientState,
}

impl Client {
    /// Create a client that will authenticate as `nick`.
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            protocol_version: PROTOCOL_VERSION,
            buffer_size: Some(DEFAULT_BUFFER_SIZE),
            buffer: Vec::new(),
            state: ClientState::AwaitingHello,
        }
    }

    /// Set the input ceiling; `None` disables it.
    pub fn with_buffer_size(mut self, buffer_size: Option<usize>) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Speak a different protocol version.
    pub fn with_protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Nickname this client authenticates as.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Protocol version this client offers.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Bytes received but not yet parsed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Offer our protocol version.
    ///
    /// State does not change until the server replies.
    pub fn hello(&self) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ClientState::AwaitingHello])?;
        ClientMessage::Hello {
            version: self.protocol_version,
        }
        .to_bytes()
    }

    /// Claim our nickname.
    pub fn authenticate(&self) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ClientState::AwaitingAuthentication])?;
        validate_nick(&self.nick)?;
        ClientMessage::Authenticate {
            version: self.protocol_version,
            nick: self.nick.clone(),
        }
        .to_bytes()
    }

    /// Post `content` to a channel.
    pub fn send_message(&self, channel_name: &str, content: &str) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ClientState::Ready])?;
        validate_channel_name(channel_name)?;
        ClientMessage::Post {
            channel_name: channel_name.to_owned(),
            content: content.to_owned(),
        }
        .to_bytes()
    }

    /// Ask for the channel list.
    pub fn list_channels(&self) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ClientState::Ready])?;
        ClientMessage::ListChannels.to_bytes()
    }

    /// Ask for channel history.
    ///
    /// `before` and `after` are snowflake bounds and must be at least 1
    /// when given, since 0 means "unset" on the wire.
    pub fn list_messages(
        &self,
        channel_name: &str,
        before: Option<u64>,
        after: Option<u64>,
    ) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ClientState::Ready])?;
        validate_channel_name(channel_name)?;
        for (name, bound) in [("before", before), ("after", after)] {
            if bound == Some(0) {
                return Err(Error::InvalidArgument(format!(
                    "{} must be at least 1",
                    name
                )));
            }
        }
        ClientMessage::ListMessages {
            channel_name: channel_name.to_owned(),
            before,
            after,
        }
        .to_bytes()
    }

    /// Buffer `data` and parse every complete message now available.
    pub fn receive_bytes(&mut self, data: &[u8]) -> Result<Parsed<ClientEvent>> {
        extend_limited_buffer(&mut self.buffer, data, self.buffer_size)?;

        let mut parsed = Parsed::empty();
        let Self {
            buffer,
            state,
            protocol_version,
            ..
        } = self;
        while !buffer.is_empty() {
            let step = read_transaction(buffer, |reader| {
                let message = ServerMessage::read_from(reader)?;
                Ok(apply(state, *protocol_version, message)?)
            });
            match step {
                Ok(step) => parsed.extend(step),
                Err(ReadError::Incomplete { .. }) => break,
                Err(ReadError::Fatal(e)) => return Err(e),
            }
        }
        Ok(parsed)
    }
}

impl Protocol for Client {
    type Event = ClientEvent;

    fn receive_bytes(&mut self, data: &[u8]) -> Result<Parsed<ClientEvent>> {
        Client::receive_bytes(self, data)
    }
}

/// Check `message` against the current state and advance it.
fn apply(
    state: &mut ClientState,
    protocol_version: u8,
    message: ServerMessage,
) -> Result<Parsed<ClientEvent>> {
    let event = match message {
        ServerMessage::Hello { using_ssl } => {
            ensure_state(*state, &[ClientState::AwaitingHello])?;
            *state = ClientState::AwaitingAuthentication;
            ClientEvent::Hello { using_ssl }
        }
        ServerMessage::IncompatibleVersion { required } => {
            ensure_state(*state, &[ClientState::AwaitingHello])?;
            ClientEvent::IncompatibleVersion {
                server_version: required,
                client_version: protocol_version,
            }
        }
        ServerMessage::AcknowledgeAuthentication { success } => {
            ensure_state(*state, &[ClientState::AwaitingAuthentication])?;
            if success {
                *state = ClientState::Ready;
            }
            ClientEvent::Authentication { success }
        }
        ServerMessage::Post { message } => {
            ensure_state(*state, &[ClientState::Ready])?;
            ClientEvent::MessageReceived { message }
        }
        ServerMessage::ListChannels { channels } => {
            ensure_state(*state, &[ClientState::Ready])?;
            ClientEvent::ChannelsListed { channels }
        }
        ServerMessage::ListMessages { messages } => {
            ensure_state(*state, &[ClientState::Ready])?;
            ClientEvent::MessagesListed { messages }
        }
    };
    Ok(Parsed::event(event))
}
