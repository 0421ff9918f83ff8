//! Conversation history shared with the completion endpoint
//!
//! The buffer is append-only and bounded: every exchange sends the whole
//! history, so once it is full the session cannot continue the conversation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text;
use crate::{CONTEXT_CAPACITY, MAX_MESSAGE_LEN};

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Notes injected by the client itself, such as captured command output.
    Developer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Developer => "developer",
        }
    }
}

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("conversation context is full ({capacity} messages)")]
    Full { capacity: usize },

    #[error("serialized conversation context exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to encode message {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ContextBuffer {
    messages: Vec<Message>,
    capacity: usize,
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBuffer {
    pub fn new() -> Self {
        Self::with_capacity(CONTEXT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Vec::new(),
            capacity,
        }
    }

    /// Record a message at the end of the history.
    ///
    /// Content longer than [`MAX_MESSAGE_LEN`] bytes is cut on a char
    /// boundary. A full buffer rejects the message and stays unchanged.
    pub fn append(&mut self, content: &str, role: Role) -> Result<(), ContextError> {
        if self.is_full() {
            return Err(ContextError::Full {
                capacity: self.capacity,
            });
        }

        let kept = text::truncate(content, MAX_MESSAGE_LEN);
        if kept.len() < content.len() {
            tracing::debug!(
                role = role.as_str(),
                original = content.len(),
                kept = kept.len(),
                "truncated message"
            );
        }

        self.messages.push(Message {
            role,
            content: kept.to_string(),
        });
        Ok(())
    }

    /// Encode the history as comma-joined `{"role":..,"content":..}` objects,
    /// ready to be placed inside a JSON array.
    ///
    /// The running size is checked after every message so an oversized
    /// history fails as soon as it crosses `capacity`.
    pub fn serialize(&self, capacity: usize) -> Result<String, ContextError> {
        let mut out = String::new();

        for (index, message) in self.messages.iter().enumerate() {
            let encoded = serde_json::to_string(message)
                .map_err(|source| ContextError::Encode { index, source })?;
            let separator = usize::from(index > 0);

            if out.len() + separator + encoded.len() > capacity {
                return Err(ContextError::TooLarge { limit: capacity });
            }

            if separator > 0 {
                out.push(',');
            }
            out.push_str(&encoded);
        }

        Ok(out)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
