//! Chat channel.

use super::reader::{ReadResult, Reader};
use super::{varchar, MAX_CHANNEL_NAME_LENGTH};
use crate::error::Result;
use serde::Serialize;
use std::fmt;

/// A channel, identified by its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Channel {
    name: String,
}

impl Channel {
    /// Create a channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append the wire encoding (a varchar) to `out`.
    pub fn write_into(&self, out: &mut Vec<u8>) -> Result<()> {
        varchar::write_into(out, &self.name, MAX_CHANNEL_NAME_LENGTH)
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        varchar::dumps(&self.name, MAX_CHANNEL_NAME_LENGTH)
    }

    /// Decode one channel.
    pub fn read_from(reader: &mut Reader<'_>) -> ReadResult<Self> {
        let name = reader.read_varchar(MAX_CHANNEL_NAME_LENGTH)?;
        Ok(Self { name })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_encoding() {
        let channel = Channel::new("general");
        let bytes = channel.to_bytes().expect("encode");
        assert_eq!(bytes, b"\x07general");

        let parsed = Channel::read_from(&mut Reader::new(&bytes)).expect("decode");
        assert_eq!(parsed, channel);
        assert_eq!(parsed.to_string(), "#general");
    }

    #[test]
    fn test_channel_name_too_long() {
        let channel = Channel::new("c".repeat(MAX_CHANNEL_NAME_LENGTH + 1));
        assert!(channel.to_bytes().is_err());
    }
}
