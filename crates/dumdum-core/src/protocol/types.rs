//! Message type tags.
//!
//! Every message starts with one of these bytes. Client and server tags
//! share numbering where the messages correspond.

use crate::error::{Error, Result};

/// Tags of messages sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientMessageType {
    /// Protocol version offer.
    Hello = 0,
    /// Nickname claim.
    Authenticate = 2,
    /// Post to a channel.
    SendMessage = 3,
    /// Request the channel list.
    ListChannels = 4,
    /// Request channel history.
    ListMessages = 5,
}

impl ClientMessageType {
    /// Parse a tag byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Hello),
            2 => Ok(Self::Authenticate),
            3 => Ok(Self::SendMessage),
            4 => Ok(Self::ListChannels),
            5 => Ok(Self::ListMessages),
            _ => Err(Error::MalformedData(format!(
                "unknown client message type: {:#04x}",
                byte
            ))),
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Tags of messages sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerMessageType {
    /// Version accepted, with the TLS flag.
    Hello = 0,
    /// Version refused.
    IncompatibleVersion = 1,
    /// Nickname accepted or refused.
    AcknowledgeAuthentication = 2,
    /// Broadcast of a posted message.
    SendMessage = 3,
    /// Channel list reply.
    ListChannels = 4,
    /// Message history reply.
    ListMessages = 5,
}

impl ServerMessageType {
    /// Parse a tag byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Hello),
            1 => Ok(Self::IncompatibleVersion),
            2 => Ok(Self::AcknowledgeAuthentication),
            3 => Ok(Self::SendMessage),
            4 => Ok(Self::ListChannels),
            5 => Ok(Self::ListMessages),
            _ => Err(Error::MalformedData(format!(
                "unknown server message type: {:#04x}",
                byte
            ))),
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}
