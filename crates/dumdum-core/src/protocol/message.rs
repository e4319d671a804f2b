//! Chat message record.

use super::reader::{ReadResult, Reader};
use super::{snowflake, varchar, MAX_CHANNEL_NAME_LENGTH, MAX_MESSAGE_LENGTH, MAX_NICK_LENGTH};
use crate::error::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// A posted message. Ordered by its snowflake `id`.
///
/// Wire layout: `id:u64 | channel_name:varchar | nick:varchar | content:varchar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Message {
    id: u64,
    channel_name: String,
    nick: String,
    content: String,
}

impl Message {
    /// Create a message.
    pub fn new(
        id: u64,
        channel_name: impl Into<String>,
        nick: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            channel_name: channel_name.into(),
            nick: nick.into(),
            content: content.into(),
        }
    }

    /// Snowflake id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Channel the message was posted to.
    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Author's nickname.
    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Message text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Creation time recovered from the snowflake id.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(snowflake::timestamp_ms(self.id)).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Append the wire encoding to `out`.
    pub fn write_into(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.id.to_be_bytes());
        varchar::write_into(out, &self.channel_name, MAX_CHANNEL_NAME_LENGTH)?;
        varchar::write_into(out, &self.nick, MAX_NICK_LENGTH)?;
        varchar::write_into(out, &self.content, MAX_MESSAGE_LENGTH)
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + 3 + self.channel_name.len() + self.nick.len() + self.content.len() + 2);
        self.write_into(&mut out)?;
        Ok(out)
    }

    /// Decode one message.
    pub fn read_from(reader: &mut Reader<'_>) -> ReadResult<Self> {
        let id = reader.read_u64()?;
        let channel_name = reader.read_varchar(MAX_CHANNEL_NAME_LENGTH)?;
        let nick = reader.read_varchar(MAX_NICK_LENGTH)?;
        let content = reader.read_varchar(MAX_MESSAGE_LENGTH)?;
        Ok(Self {
            id,
            channel_name,
            nick,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReadError;

    #[test]
    fn test_message_layout() {
        let message = Message::new(0x0102, "general", "alice", "hi");
        let bytes = message.to_bytes().expect("encode");

        let mut expected = vec![0, 0, 0, 0, 0, 0, 0x01, 0x02];
        expected.extend_from_slice(b"\x07general\x05alice\x00\x02hi");
        assert_eq!(bytes, expected);

        let parsed = Message::read_from(&mut Reader::new(&bytes)).expect("decode");
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_truncated_message_is_incomplete() {
        let bytes = Message::new(7, "general", "alice", "hello there").to_bytes().expect("encode");
        for cut in 0..bytes.len() {
            let result = Message::read_from(&mut Reader::new(&bytes[..cut]));
            assert!(
                matches!(result, Err(ReadError::Incomplete { .. })),
                "cut at {} should be incomplete",
                cut
            );
        }
    }

    #[test]
    fn test_content_bound() {
        let message = Message::new(1, "general", "alice", "x".repeat(MAX_MESSAGE_LENGTH + 1));
        assert!(message.to_bytes().is_err());
    }

    #[test]
    fn test_created_at() {
        let id = snowflake::compose(1_700_000_000_000, 5, 9).expect("compose");
        let message = Message::new(id, "general", "alice", "hi");
        let created = message.created_at().expect("valid timestamp");
        assert_eq!(created.timestamp_millis(), 1_700_000_000_000);
    }
}
