//! Bounded per-channel message history.

use crate::protocol::Message;
use std::collections::{HashMap, VecDeque};

/// Default number of messages retained per channel.
pub const DEFAULT_MAX_MESSAGES: usize = 1000;

/// Default number of messages returned by one history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// In-memory message history, kept sorted by id within each channel.
///
/// Once a channel holds `max_messages`, each insert first evicts the
/// oldest entry.
#[derive(Debug)]
pub struct MessageCache {
    max_messages: usize,
    channels: HashMap<String, VecDeque<Message>>,
}

impl Default for MessageCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl MessageCache {
    /// Create a cache retaining up to `max_messages` per channel.
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            channels: HashMap::new(),
        }
    }

    /// Per-channel capacity.
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Insert `message` in id order.
    pub fn add_message(&mut self, message: Message) {
        if self.max_messages == 0 {
            return;
        }
        let messages = self
            .channels
            .entry(message.channel_name().to_owned())
            .or_insert_with(|| VecDeque::with_capacity(self.max_messages.min(64)));

        if messages.len() >= self.max_messages {
            messages.pop_front();
        }
        let index = messages.partition_point(|m| m.id() <= message.id());
        messages.insert(index, message);
    }

    /// Find a message by exact id.
    pub fn get_message(&self, channel_name: &str, id: u64) -> Option<&Message> {
        let messages = self.channels.get(channel_name)?;
        let index = messages.partition_point(|m| m.id() < id);
        messages.get(index).filter(|m| m.id() == id)
    }

    /// Query a channel's history.
    ///
    /// `before` keeps ids at or above it and `after` keeps ids at or below
    /// it. Of what remains, only the newest `limit` are returned, oldest
    /// first.
    pub fn get_messages(
        &self,
        channel_name: &str,
        before: Option<u64>,
        after: Option<u64>,
        limit: usize,
    ) -> Vec<Message> {
        let Some(messages) = self.channels.get(channel_name) else {
            return Vec::new();
        };

        let start = before.map_or(0, |before| messages.partition_point(|m| m.id() < before));
        let end = after.map_or(messages.len(), |after| {
            messages.partition_point(|m| m.id() <= after)
        });
        if start >= end {
            return Vec::new();
        }

        let start = start.max(end.saturating_sub(limit));
        messages.range(start..end).cloned().collect()
    }

    /// Remove a message by exact id.
    pub fn remove_message(&mut self, channel_name: &str, id: u64) -> Option<Message> {
        let messages = self.channels.get_mut(channel_name)?;
        let index = messages.partition_point(|m| m.id() < id);
        if messages.get(index)?.id() != id {
            return None;
        }
        messages.remove(index)
    }

    /// Drop a channel's history.
    pub fn clear_channel(&mut self, channel_name: &str) {
        self.channels.remove(channel_name);
    }

    /// Number of messages held for a channel.
    pub fn count(&self, channel_name: &str) -> usize {
        self.channels.get(channel_name).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u64) -> Message {
        Message::new(id, "general", "alice", format!("message {}", id))
    }

    fn ids(messages: &[Message]) -> Vec<u64> {
        messages.iter().map(Message::id).collect()
    }

    fn filled(count: u64) -> MessageCache {
        let mut cache = MessageCache::new(1000);
        for id in 0..count {
            cache.add_message(message(id));
        }
        cache
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let mut cache = MessageCache::new(10);
        for id in 0..25 {
            cache.add_message(message(id));
        }
        assert_eq!(cache.count("general"), 10);
        assert_eq!(
            ids(&cache.get_messages("general", None, None, 100)),
            (15..25).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_out_of_order_insert_stays_sorted() {
        let mut cache = MessageCache::new(10);
        for id in [5, 1, 9, 3, 7] {
            cache.add_message(message(id));
        }
        assert_eq!(ids(&cache.get_messages("general", None, None, 100)), [1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_range_query() {
        let cache = filled(100);
        assert_eq!(
            ids(&cache.get_messages("general", Some(10), Some(20), 100)),
            (10..=20).collect::<Vec<_>>()
        );
        assert_eq!(
            ids(&cache.get_messages("general", Some(10), Some(20), 3)),
            [18, 19, 20]
        );
        assert_eq!(
            ids(&cache.get_messages("general", None, None, 100)),
            (0..100).collect::<Vec<_>>()
        );
        assert_eq!(
            ids(&cache.get_messages("general", Some(95), None, 100)),
            [95, 96, 97, 98, 99]
        );
        assert_eq!(ids(&cache.get_messages("general", None, Some(2), 100)), [0, 1, 2]);
    }

    #[test]
    fn test_default_limit_truncates_oldest() {
        let cache = filled(150);
        let messages = cache.get_messages("general", None, None, DEFAULT_HISTORY_LIMIT);
        assert_eq!(messages.len(), 100);
        assert_eq!(messages[0].id(), 50);
        assert_eq!(messages[99].id(), 149);
    }

    #[test]
    fn test_empty_ranges() {
        let cache = filled(100);
        assert!(cache.get_messages("general", Some(50), Some(40), 100).is_empty());
        assert!(cache.get_messages("general", Some(500), None, 100).is_empty());
        assert!(cache.get_messages("general", None, None, 0).is_empty());
        assert!(cache.get_messages("random", None, None, 100).is_empty());
    }

    #[test]
    fn test_get_and_remove_message() {
        let mut cache = filled(10);
        assert_eq!(cache.get_message("general", 4).map(Message::id), Some(4));
        assert!(cache.get_message("general", 42).is_none());
        assert!(cache.get_message("random", 4).is_none());

        assert_eq!(cache.remove_message("general", 4).map(|m| m.id()), Some(4));
        assert!(cache.remove_message("general", 4).is_none());
        assert!(cache.get_message("general", 4).is_none());
        assert_eq!(cache.count("general"), 9);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut cache = MessageCache::new(0);
        cache.add_message(message(1));
        assert_eq!(cache.count("general"), 0);
    }
}
