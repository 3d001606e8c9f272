//! Conversation Summary
//!
//! Materialized view of one direct conversation as seen by one
//! observing user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::message::{Message, UserId};

/// Key shared by both participants of a conversation.
///
/// Derived from the sorted id pair, so either side can compute it
/// before the first message exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}:{}", low, high))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marketplace role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKind {
    Farmer,
    Buyer,
    Admin,
}

/// Display information for the other participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnippet {
    pub display_name: Option<String>,
    #[serde(rename = "user_type")]
    pub kind: Option<UserKind>,
    pub avatar_url: Option<String>,
}

impl ProfileSnippet {
    /// True when nothing about the user is known yet
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.kind.is_none() && self.avatar_url.is_none()
    }
}

/// One entry of the observing user's conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub other_user_id: UserId,
    pub other_user: ProfileSnippet,
    pub last_message_content: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_sender_id: Option<UserId>,
    /// Messages to the observer with `is_read = false`
    pub unread_count: u32,
}

impl ConversationSummary {
    /// Empty summary for a conversation with no known messages
    pub fn new(observer: &UserId, other: UserId, other_user: ProfileSnippet) -> Self {
        Self {
            conversation_id: ConversationId::for_pair(observer, &other),
            other_user_id: other,
            other_user,
            last_message_content: String::new(),
            last_message_at: None,
            last_message_sender_id: None,
            unread_count: 0,
        }
    }

    /// Whether `message` may take the last-message slot.
    ///
    /// Equal timestamps favour the later arrival.
    pub fn accepts_as_latest(&self, message: &Message) -> bool {
        match self.last_message_at {
            Some(current) => message.created_at >= current,
            None => true,
        }
    }

    /// Update the last message
    pub fn update_last_message(&mut self, message: &Message, preview_len: usize) {
        self.last_message_content = message.preview(preview_len);
        self.last_message_at = Some(message.created_at);
        self.last_message_sender_id = Some(message.sender_id.clone());
    }
}
