//! Local conversation message list.
//!
//! Holds what the user currently sees for the active session. History
//! restoration replaces it wholesale; sends append optimistically and roll
//! back by id. Uses a fixed-capacity ring buffer to prevent unbounded growth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Typed or spoken by the user.
    User,
    /// Produced by the AI.
    Assistant,
    /// Injected by the system (nudges, notices).
    System,
}

/// A single message in the local list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier; generated on push when empty.
    #[serde(default)]
    pub id: String,
    /// Author.
    pub role: ChatRole,
    /// Text content.
    pub content: String,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build a message stamped now, with an id assigned on push.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Message list with fixed capacity.
#[derive(Debug, Clone)]
pub struct MessageLog {
    /// Messages in insertion order (oldest first).
    messages: VecDeque<ChatMessage>,
    /// Maximum number of messages to retain.
    max_messages: usize,
    /// Counter for generating local message ids.
    next_id: u64,
}

impl MessageLog {
    /// Create a list with the given capacity.
    #[must_use]
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_messages: max_messages.max(1),
            next_id: 1,
        }
    }

    /// Push a message, evicting the oldest if at capacity. Returns its id.
    pub fn push(&mut self, mut message: ChatMessage) -> String {
        if message.id.is_empty() {
            message.id = format!("local_{}", self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
        }
        if self.messages.len() >= self.max_messages {
            self.messages.pop_front();
        }
        let id = message.id.clone();
        self.messages.push_back(message);
        id
    }

    /// Remove a message by id. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// Replace the whole list, keeping only the newest `max_messages`.
    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.messages.clear();
        let skip = messages.len().saturating_sub(self.max_messages);
        for message in messages.into_iter().skip(skip) {
            self.push(message);
        }
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// All messages in chronological order.
    #[must_use]
    pub fn all_messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    /// Most recent message, if any.
    #[must_use]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.back()
    }

    /// Number of messages stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(500)
    }
}
