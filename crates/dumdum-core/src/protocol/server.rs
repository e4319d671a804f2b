//! Server side of the protocol, one instance per connection.
//!
//! The machine holds no chat data. It reports what the client asked for
//! as [`ServerEvent`]s and the connection manager answers through
//! [`Server::hello`], [`Server::authenticate`] and the reply methods.

use super::messages::{ClientMessage, ServerMessage};
use super::reader::{read_transaction, ReadError};
use super::{
    ensure_state, extend_limited_buffer, Channel, Message, Parsed, Protocol, ProtocolState,
    DEFAULT_BUFFER_SIZE, PROTOCOL_VERSION,
};
use crate::error::{Error, Result};

/// Where a connection is in its lifecycle, seen from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerProtocolState {
    /// Waiting for the client to offer a version.
    AwaitingClientHello,
    /// Version accepted, the manager has not replied yet.
    AwaitingServerHello,
    /// Waiting for a nickname claim or its verdict.
    AwaitingAuthentication,
    /// Authenticated; chat traffic flows.
    Ready,
}

impl ProtocolState for ServerProtocolState {
    const MACHINE: &'static str = "Server";

    fn name(self) -> &'static str {
        match self {
            ServerProtocolState::AwaitingClientHello => "AWAITING_CLIENT_HELLO",
            ServerProtocolState::AwaitingServerHello => "AWAITING_SERVER_HELLO",
            ServerProtocolState::AwaitingAuthentication => "AWAITING_AUTHENTICATION",
            ServerProtocolState::Ready => "READY",
        }
    }
}

/// Something a client asked of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The client's version matches; call [`Server::hello`].
    Hello,
    /// The client's version does not match. The refusal is already in
    /// [`Parsed::outgoing`].
    IncompatibleVersion {
        /// Version the client offered.
        client_version: u8,
        /// Version this server speaks.
        server_version: u8,
    },
    /// The client claims a nickname; call [`Server::authenticate`].
    Authentication {
        /// Requested nickname.
        nick: String,
    },
    /// The client posted to a channel.
    MessageReceived {
        /// Target channel.
        channel_name: String,
        /// Message text.
        content: String,
    },
    /// The client wants the channel list.
    ListChannels,
    /// The client wants channel history.
    ListMessages {
        /// Channel to read.
        channel_name: String,
        /// Lower id bound, inclusive.
        before: Option<u64>,
        /// Upper id bound, inclusive.
        after: Option<u64>,
    },
}

/// Sans-I/O server protocol machine.
#[derive(Debug)]
pub struct Server {
    protocol_version: u8,
    buffer_size: Option<usize>,
    buffer: Vec<u8>,
    state: ServerProtocolState,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Create a machine for a freshly accepted connection.
    pub fn new() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            buffer_size: Some(DEFAULT_BUFFER_SIZE),
            buffer: Vec::new(),
            state: ServerProtocolState::AwaitingClientHello,
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
    pub fn state(&self) -> ServerProtocolState {
        self.state
    }

    /// Protocol version this server requires.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Bytes received but not yet parsed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Answer an accepted client hello.
    ///
    /// With `using_ssl` the caller must upgrade the stream to TLS right
    /// after writing the returned bytes.
    pub fn hello(&mut self, using_ssl: bool) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ServerProtocolState::AwaitingServerHello])?;
        let bytes = ServerMessage::Hello { using_ssl }.to_bytes()?;
        self.state = ServerProtocolState::AwaitingAuthentication;
        Ok(bytes)
    }

    /// Deliver the verdict on a nickname claim.
    pub fn authenticate(&mut self, success: bool) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ServerProtocolState::AwaitingAuthentication])?;
        let bytes = ServerMessage::AcknowledgeAuthentication { success }.to_bytes()?;
        if success {
            self.state = ServerProtocolState::Ready;
        }
        Ok(bytes)
    }

    /// Forward a posted message to this client.
    pub fn send_message(&self, message: &Message) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ServerProtocolState::Ready])?;
        ServerMessage::Post {
            message: message.clone(),
        }
        .to_bytes()
    }

    /// Reply with the channel list.
    pub fn list_channels(&self, channels: &[Channel]) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ServerProtocolState::Ready])?;
        ServerMessage::ListChannels {
            channels: channels.to_vec(),
        }
        .to_bytes()
    }

    /// Reply with channel history.
    pub fn list_messages(&self, messages: &[Message]) -> Result<Vec<u8>> {
        ensure_state(self.state, &[ServerProtocolState::Ready])?;
        ServerMessage::ListMessages {
            messages: messages.to_vec(),
        }
        .to_bytes()
    }

    /// Buffer `data` and parse every complete message now available.
    pub fn receive_bytes(&mut self, data: &[u8]) -> Result<Parsed<ServerEvent>> {
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
                let message = ClientMessage::read_from(reader)?;
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

impl Protocol for Server {
    type Event = ServerEvent;

    fn receive_bytes(&mut self, data: &[u8]) -> Result<Parsed<ServerEvent>> {
        Server::receive_bytes(self, data)
    }
}

fn apply(
    state: &mut ServerProtocolState,
    protocol_version: u8,
    message: ClientMessage,
) -> Result<Parsed<ServerEvent>> {
    let parsed = match message {
        ClientMessage::Hello { version } => {
            ensure_state(*state, &[ServerProtocolState::AwaitingClientHello])?;
            if version != protocol_version {
                let reply = ServerMessage::IncompatibleVersion {
                    required: protocol_version,
                }
                .to_bytes()?;
                Parsed::with_reply(
                    ServerEvent::IncompatibleVersion {
                        client_version: version,
                        server_version: protocol_version,
                    },
                    reply,
                )
            } else {
                *state = ServerProtocolState::AwaitingServerHello;
                Parsed::event(ServerEvent::Hello)
            }
        }
        ClientMessage::Authenticate { version, nick } => {
            ensure_state(*state, &[ServerProtocolState::AwaitingAuthentication])?;
            if version != protocol_version {
                return Err(Error::MalformedData(format!(
                    "authenticate carries version {}, handshake agreed on {}",
                    version, protocol_version
                )));
            }
            Parsed::event(ServerEvent::Authentication { nick })
        }
        ClientMessage::Post {
            channel_name,
            content,
        } => {
            ensure_state(*state, &[ServerProtocolState::Ready])?;
            Parsed::event(ServerEvent::MessageReceived {
                channel_name,
                content,
            })
        }
        ClientMessage::ListChannels => {
            ensure_state(*state, &[ServerProtocolState::Ready])?;
            Parsed::event(ServerEvent::ListChannels)
        }
        ClientMessage::ListMessages {
            channel_name,
            before,
            after,
        } => {
            ensure_state(*state, &[ServerProtocolState::Ready])?;
            Parsed::event(ServerEvent::ListMessages {
                channel_name,
                before,
                after,
            })
        }
    };
    Ok(parsed)
}
