//! Chat Message Data Structure
//!
//! Represents a persisted direct message between two marketplace users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a marketplace user (farmer, buyer or admin)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Stable, globally unique message identifier assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A persisted message. Only `is_read` changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    /// Server-assigned; ties across messages are possible
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    /// Listing the conversation was started from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_product_id: Option<String>,
    /// Order the conversation refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_order_id: Option<String>,
}

impl Message {
    /// Whether `user` is the sender or the receiver
    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }

    /// Whether the message was sent to `user`
    pub fn is_addressed_to(&self, user: &UserId) -> bool {
        &self.receiver_id == user
    }

    /// The participant that is not `observer`, or `None` when the
    /// observer is not part of this message
    pub fn other_participant(&self, observer: &UserId) -> Option<&UserId> {
        if &self.sender_id == observer {
            Some(&self.receiver_id)
        } else if &self.receiver_id == observer {
            Some(&self.sender_id)
        } else {
            None
        }
    }

    /// Get a preview of the message (first N characters)
    pub fn preview(&self, max_len: usize) -> String {
        if self.content.chars().count() <= max_len {
            self.content.clone()
        } else {
            let mut preview: String = self
                .content
                .chars()
                .take(max_len.saturating_sub(3))
                .collect();
            preview.push_str("...");
            preview
        }
    }
}
