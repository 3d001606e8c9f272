//! Messaging Module
//!
//! This module contains the data model of the direct-messaging system:
//!
//! - `Message` - A persisted message between two users
//! - `ConversationSummary` - One row of a user's conversation list
//! - `RawChangeEvent` / `NormalizedEvent` - Change feed payloads
//!
//! # Usage
//!
//! ```rust
//! use farmchat::shared::messaging::{ConversationId, UserId};
//!
//! let id = ConversationId::for_pair(&UserId::new("u2"), &UserId::new("u1"));
//! assert_eq!(id.as_str(), "u1:u2");
//! ```

pub mod conversation;
pub mod event;
pub mod message;

// Re-export all types
pub use conversation::{ConversationId, ConversationSummary, ProfileSnippet, UserKind};
pub use event::{ChangeKind, EventKind, NormalizedEvent, RawChangeEvent};
pub use message::{Message, MessageId, UserId};
