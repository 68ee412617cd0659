//! Conversation data model
//!
//! Messages live in an insertion-ordered arena keyed by [`MessageId`]. The
//! history sent to the chat endpoint is a projection of the log, never a
//! second copy of it.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short prefix for display
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Content is still arriving; frozen once false
    pub streaming: bool,
}

impl Message {
    /// A finalized user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            streaming: false,
        }
    }

    /// An empty assistant message awaiting streamed content
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            created_at: Utc::now(),
            streaming: true,
        }
    }

    /// Append a streamed fragment; returns false if the message is frozen
    pub fn append(&mut self, fragment: &str) -> bool {
        if !self.streaming {
            return false;
        }
        self.content.push_str(fragment);
        true
    }

    /// Replace content with the final text and freeze it; returns false if
    /// the message is already frozen
    pub fn finalize(&mut self, text: String) -> bool {
        if !self.streaming {
            return false;
        }
        self.content = text;
        self.streaming = false;
        true
    }
}

/// Role/content pair sent to the chat endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Ordered message log owned by the controller
#[derive(Debug, Default)]
pub struct ConversationLog {
    messages: IndexMap<MessageId, Message>,
}

impl ConversationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, returning its id
    pub fn push(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.insert(id, message);
        id
    }

    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.get(&id)
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.get_mut(&id)
    }

    /// Remove a message keeping the order of the rest
    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        self.messages.shift_remove(&id)
    }

    /// Look up by 1-based display position
    #[must_use]
    pub fn nth(&self, position: usize) -> Option<&Message> {
        position
            .checked_sub(1)
            .and_then(|index| self.messages.get_index(index))
            .map(|(_, message)| message)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages still receiving content
    #[must_use]
    pub fn streaming_count(&self) -> usize {
        self.messages.values().filter(|m| m.streaming).count()
    }

    /// History projection for the chat endpoint
    ///
    /// Streaming messages and blank content are never included.
    #[must_use]
    pub fn history(&self) -> Vec<ChatHistoryEntry> {
        self.messages
            .values()
            .filter(|m| !m.streaming && !m.content.trim().is_empty())
            .map(|m| ChatHistoryEntry {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_preserves_order() {
        let mut log = ConversationLog::new();
        let a = log.push(Message::user("a"));
        let b = log.push(Message::user("b"));
        let c = log.push(Message::user("c"));

        assert!(log.remove(b).is_some());
        let ids: Vec<_> = log.iter().map(|m| m.id).collect();
        assert_eq!(ids, [a, c]);
        assert_eq!(log.nth(2).map(|m| m.id), Some(c));
        assert!(log.nth(0).is_none());
        assert!(log.nth(3).is_none());
    }

    #[test]
    fn history_skips_placeholder_and_blank() {
        let mut log = ConversationLog::new();
        log.push(Message::user("hello"));
        let mut blank = Message::placeholder();
        blank.finalize("  ".to_string());
        log.push(blank);
        log.push(Message::placeholder());

        let history = log.history();
        assert_eq!(
            history,
            [ChatHistoryEntry {
                role: Role::User,
                content: "hello".to_string()
            }]
        );
    }

    #[test]
    fn finalized_message_is_frozen() {
        let mut message = Message::placeholder();
        assert!(message.append("Hel"));
        assert!(message.finalize("Hello".to_string()));
        assert!(!message.append("!"));
        assert!(!message.finalize("Goodbye".to_string()));
        assert_eq!(message.content, "Hello");
        assert!(!message.streaming);
    }

    #[test]
    fn user_message_cannot_be_finalized() {
        let mut message = Message::user("typed");
        assert!(!message.finalize("rewritten".to_string()));
        assert_eq!(message.content, "typed");
    }

    #[test]
    fn role_serializes_lowercase() {
        let entry = ChatHistoryEntry {
            role: Role::Assistant,
            content: "hi".to_string(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }
}
