//! Wire protocol for dumdum.
//!
//! A length-prefixed binary protocol over a byte stream. The [`Client`]
//! and [`Server`] state machines are sans-I/O: they turn API calls into
//! bytes and incoming bytes into typed events, and never touch a socket.
//!
//! ## Message Structure
//!
//! ```text
//! ┌─────────┬──────────────────────────────────────────┐
//! │  Type   │  Payload (fixed fields and varchars)     │
//! │ (1 byte)│  integers big-endian                     │
//! └─────────┴──────────────────────────────────────────┘
//! ```
//!
//! A varchar is a big-endian length prefix followed by UTF-8 bytes; the
//! prefix is just wide enough to hold the field's maximum length.
//!
//! ## Handshake
//!
//! ```text
//! client                         server
//!   │── Hello(version) ───────────▶│
//!   │◀─────────── Hello(using_ssl)─│   (or IncompatibleVersion)
//!   │      [optional TLS upgrade]  │
//!   │── Authenticate(nick) ───────▶│
//!   │◀──── AcknowledgeAuthentication│
//!   │          READY               │
//! ```

mod channel;
pub mod client;
mod message;
mod messages;
mod reader;
pub mod server;
pub mod snowflake;
mod types;
pub mod varchar;

pub use channel::Channel;
pub use client::{Client, ClientEvent, ClientState};
pub use message::Message;
pub use messages::{ClientMessage, ServerMessage};
pub use reader::{read_transaction, ReadError, ReadResult, Reader};
pub use server::{Server, ServerEvent, ServerProtocolState};
pub use snowflake::create_snowflake;
pub use types::{ClientMessageType, ServerMessageType};

use crate::error::{Error, Result};

/// Current protocol version, spoken by both sides.
pub const PROTOCOL_VERSION: u8 = 2;

/// Maximum nickname length in bytes.
pub const MAX_NICK_LENGTH: usize = 32;

/// Maximum channel name length in bytes.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 64;

/// Maximum message content length in bytes.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Width of the byte-length prefix on a channel list reply.
pub const MAX_LIST_CHANNEL_LENGTH_BYTES: usize = 2;

/// Width of the byte-length prefix on a message list reply.
pub const MAX_LIST_MESSAGE_LENGTH_BYTES: usize = 3;

/// Default ceiling on unparsed input held by one protocol instance (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Output of one `receive_bytes` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed<E> {
    /// Events decoded from complete messages, in wire order.
    pub events: Vec<E>,
    /// Bytes that must be written back to the peer immediately.
    pub outgoing: Vec<u8>,
}

impl<E> Parsed<E> {
    /// Nothing parsed.
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// A single event with no reply.
    pub fn event(event: E) -> Self {
        Self {
            events: vec![event],
            outgoing: Vec::new(),
        }
    }

    /// A single event with an immediate reply.
    pub fn with_reply(event: E, outgoing: Vec<u8>) -> Self {
        Self {
            events: vec![event],
            outgoing,
        }
    }

    /// Append another step's output.
    pub fn extend(&mut self, other: Parsed<E>) {
        self.events.extend(other.events);
        self.outgoing.extend(other.outgoing);
    }
}

impl<E> Default for Parsed<E> {
    fn default() -> Self {
        Self::empty()
    }
}

/// A side of the protocol that consumes bytes from its peer.
pub trait Protocol {
    /// Event type produced by this side.
    type Event;

    /// Buffer `data` and parse every complete message now available.
    ///
    /// Partial messages stay buffered for the next call. Errors are fatal
    /// and the connection must be closed.
    fn receive_bytes(&mut self, data: &[u8]) -> Result<Parsed<Self::Event>>;
}

/// State enums of the protocol machines.
pub(crate) trait ProtocolState: Copy + PartialEq {
    /// Name of the machine, used in error messages.
    const MACHINE: &'static str;

    /// Wire-style state name.
    fn name(self) -> &'static str;
}

/// Fail with `InvalidState` unless `current` is one of `expected`.
pub(crate) fn ensure_state<S: ProtocolState>(current: S, expected: &[S]) -> Result<()> {
    if expected.contains(&current) {
        return Ok(());
    }
    Err(Error::InvalidState {
        machine: S::MACHINE,
        current: current.name(),
        expected: expected.iter().map(|s| s.name()).collect(),
    })
}

/// Append `data` to `buffer` unless that would exceed `limit`.
pub fn extend_limited_buffer(buffer: &mut Vec<u8>, data: &[u8], limit: Option<usize>) -> Result<()> {
    if let Some(limit) = limit {
        if buffer.len() + data.len() > limit {
            return Err(Error::BufferOverflow {
                limit,
                buffered: buffer.len(),
                incoming: data.len(),
            });
        }
    }
    buffer.extend_from_slice(data);
    Ok(())
}

/// Validate a nickname before it goes on the wire.
pub fn validate_nick(nick: &str) -> Result<()> {
    if nick.is_empty() {
        return Err(Error::InvalidArgument("nickname cannot be empty".into()));
    }
    if nick.len() > MAX_NICK_LENGTH {
        return Err(Error::InvalidLength {
            length: nick.len(),
            max_length: MAX_NICK_LENGTH,
        });
    }
    Ok(())
}

/// Validate a channel name before it goes on the wire.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("channel name cannot be empty".into()));
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err(Error::InvalidLength {
            length: name.len(),
            max_length: MAX_CHANNEL_NAME_LENGTH,
        });
    }
    Ok(())
}
