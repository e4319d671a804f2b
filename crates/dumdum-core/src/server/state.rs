//! Chat state shared by every connection on a server.

use super::cache::MessageCache;
use crate::protocol::{Channel, Message};
use std::collections::BTreeMap;

/// Channels, online users and message history.
///
/// Nothing here is persisted; a restart starts from the configured
/// channels with no history.
#[derive(Debug, Default)]
pub struct ServerState {
    channels: BTreeMap<String, Channel>,
    users: BTreeMap<String, String>,
    messages: MessageCache,
}

impl ServerState {
    /// Create an empty state retaining `max_messages` per channel.
    pub fn new(max_messages: usize) -> Self {
        Self {
            channels: BTreeMap::new(),
            users: BTreeMap::new(),
            messages: MessageCache::new(max_messages),
        }
    }

    /// Create a state with the given channels already open.
    pub fn with_channels<I, S>(channels: I, max_messages: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::new(max_messages);
        for name in channels {
            state.add_channel(Channel::new(name));
        }
        state
    }

    /// All channels, sorted by name.
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.values().cloned().collect()
    }

    /// Open a channel, replacing any with the same name.
    pub fn add_channel(&mut self, channel: Channel) {
        self.channels.insert(channel.name().to_owned(), channel);
    }

    /// Look up a channel.
    pub fn get_channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// Close a channel and drop its history.
    pub fn remove_channel(&mut self, name: &str) -> Option<Channel> {
        let channel = self.channels.remove(name)?;
        self.messages.clear_channel(name);
        Some(channel)
    }

    /// Nicknames currently online, sorted.
    pub fn users(&self) -> Vec<String> {
        self.users.values().cloned().collect()
    }

    /// Mark a nickname as online.
    pub fn add_user(&mut self, nick: impl Into<String>) {
        let nick = nick.into();
        self.users.insert(nick.clone(), nick);
    }

    /// Look up an online nickname.
    pub fn get_user(&self, nick: &str) -> Option<&str> {
        self.users.get(nick).map(String::as_str)
    }

    /// Release a nickname.
    pub fn remove_user(&mut self, nick: &str) -> Option<String> {
        self.users.remove(nick)
    }

    /// Claim `nick` if nobody holds it. Returns whether the claim succeeded.
    pub fn claim_user(&mut self, nick: &str) -> bool {
        if self.users.contains_key(nick) {
            return false;
        }
        self.add_user(nick);
        true
    }

    /// Store a message in its channel's history.
    pub fn add_message(&mut self, message: Message) {
        self.messages.add_message(message);
    }

    /// Find a message by id.
    pub fn get_message(&self, channel_name: &str, id: u64) -> Option<&Message> {
        self.messages.get_message(channel_name, id)
    }

    /// Query channel history. See [`MessageCache::get_messages`].
    pub fn get_messages(
        &self,
        channel_name: &str,
        before: Option<u64>,
        after: Option<u64>,
        limit: usize,
    ) -> Vec<Message> {
        self.messages.get_messages(channel_name, before, after, limit)
    }

    /// Delete a message by id.
    pub fn remove_message(&mut self, channel_name: &str, id: u64) -> Option<Message> {
        self.messages.remove_message(channel_name, id)
    }

    /// Per-channel history capacity.
    pub fn max_messages(&self) -> usize {
        self.messages.max_messages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        let mut state = ServerState::with_channels(["random", "general"], 10);
        let names: Vec<_> = state.channels().iter().map(|c| c.name().to_owned()).collect();
        assert_eq!(names, ["general", "random"]);

        assert!(state.get_channel("general").is_some());
        assert!(state.get_channel("missing").is_none());

        state.add_message(Message::new(1, "general", "alice", "hi"));
        assert!(state.remove_channel("general").is_some());
        assert!(state.remove_channel("general").is_none());

        // Reopening does not resurrect old history.
        state.add_channel(Channel::new("general"));
        assert!(state.get_messages("general", None, None, 100).is_empty());
    }

    #[test]
    fn test_nickname_claims() {
        let mut state = ServerState::default();
        assert!(state.claim_user("alice"));
        assert!(!state.claim_user("alice"));
        assert!(state.claim_user("bob"));
        assert_eq!(state.users(), ["alice", "bob"]);

        assert_eq!(state.remove_user("alice").as_deref(), Some("alice"));
        assert!(state.get_user("alice").is_none());
        assert!(state.claim_user("alice"));
    }

    #[test]
    fn test_message_delegation() {
        let mut state = ServerState::new(2);
        for id in 1..=3 {
            state.add_message(Message::new(id, "general", "alice", "hi"));
        }
        assert!(state.get_message("general", 1).is_none());
        assert_eq!(state.get_message("general", 3).map(Message::id), Some(3));
        assert_eq!(state.remove_message("general", 2).map(|m| m.id()), Some(2));
        assert_eq!(state.get_messages("general", None, None, 100).len(), 1);
        assert_eq!(state.max_messages(), 2);
    }
}
