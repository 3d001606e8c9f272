//! Change Events
//!
//! Raw notifications as delivered by the store's change feed, and the
//! canonical tagged event that every other component consumes.

use serde::{Deserialize, Serialize};

use super::conversation::ProfileSnippet;
use super::message::{Message, UserId};

/// Kind of row change reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// A change notification exactly as the store delivers it.
///
/// `record` is the loosely typed message row, possibly with expanded
/// `sender` / `receiver` profile snippets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub record: serde_json::Value,
}

impl RawChangeEvent {
    pub fn insert(record: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            record,
        }
    }

    pub fn update(record: serde_json::Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            record,
        }
    }

    /// Encode a typed message as a change row
    pub fn from_message(kind: ChangeKind, message: &Message) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            record: serde_json::to_value(message)?,
        })
    }
}

/// Canonical event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageCreated,
    MessageRead,
}

/// Event after normalization; the only event type business logic sees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub message: Message,
    /// Sender and receiver, the users whose projectors may care
    pub observers: [UserId; 2],
    pub sender_profile: Option<ProfileSnippet>,
    pub receiver_profile: Option<ProfileSnippet>,
}

impl NormalizedEvent {
    pub fn created(message: Message) -> Self {
        Self::with_kind(EventKind::MessageCreated, message)
    }

    pub fn read(message: Message) -> Self {
        Self::with_kind(EventKind::MessageRead, message)
    }

    fn with_kind(kind: EventKind, message: Message) -> Self {
        let observers = [message.sender_id.clone(), message.receiver_id.clone()];
        Self {
            kind,
            message,
            observers,
            sender_profile: None,
            receiver_profile: None,
        }
    }

    /// Profile snippet describing `user`, if the event carried one
    pub fn profile_of(&self, user: &UserId) -> Option<&ProfileSnippet> {
        if &self.message.sender_id == user {
            self.sender_profile.as_ref()
        } else if &self.message.receiver_id == user {
            self.receiver_profile.as_ref()
        } else {
            None
        }
    }
}
