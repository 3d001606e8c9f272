//! Message Store Gateway
//!
//! The sync core talks to the managed backend only through the traits in
//! this module. Persistence and notification delivery live behind them.
//!
//! - **`MessageStore`** - conversations, messages, sends, read marks and
//!   change feeds
//! - **`ProfileDirectory`** - resolves a user id to display information
//! - **`memory`** - in-process implementation used by tests and the
//!   simulation binary

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

use crate::shared::error::SyncResult;
use crate::shared::messaging::{
    ConversationSummary, Message, MessageId, ProfileSnippet, RawChangeEvent, UserId,
};

pub mod memory;

pub use memory::{MemoryMessageStore, MemoryProfileDirectory};

/// Boxed change feed returned by [`MessageStore::subscribe`].
///
/// Delivery is at-least-once. An `Err` item means the connection dropped.
pub type RawEventStream = Pin<Box<dyn Stream<Item = SyncResult<RawChangeEvent>> + Send>>;

/// Which changes a feed carries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionFilter {
    /// Every message the user sends or receives
    InvolvingUser(UserId),
    /// Messages between exactly these two users
    Between(UserId, UserId),
}

impl SubscriptionFilter {
    /// Whether a message between `sender` and `receiver` passes the filter
    pub fn matches(&self, sender: &UserId, receiver: &UserId) -> bool {
        match self {
            Self::InvolvingUser(user) => user == sender || user == receiver,
            Self::Between(a, b) => {
                (a == sender && b == receiver) || (a == receiver && b == sender)
            }
        }
    }
}

/// Marketplace context attached to an outgoing message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendContext {
    pub related_product_id: Option<String>,
    pub related_order_id: Option<String>,
}

/// Persistence and change-notification backend
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Conversation list of `user`, most recent first
    async fn fetch_conversations(&self, user: &UserId) -> SyncResult<Vec<ConversationSummary>>;

    /// Messages exchanged between `user` and `other`, oldest first
    async fn fetch_messages(&self, user: &UserId, other: &UserId) -> SyncResult<Vec<Message>>;

    /// Persist a new message and return the stored record
    async fn send_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: &str,
        context: &SendContext,
    ) -> SyncResult<Message>;

    async fn mark_read(&self, message_id: &MessageId) -> SyncResult<()>;

    /// Mark every message from `other` to `user` read in one update
    async fn mark_conversation_read(&self, user: &UserId, other: &UserId) -> SyncResult<()>;

    /// Open a change feed. Dropping the stream closes it.
    async fn subscribe(&self, filter: SubscriptionFilter) -> SyncResult<RawEventStream>;
}

/// Resolves user ids to display information
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn lookup(&self, user: &UserId) -> SyncResult<Option<ProfileSnippet>>;
}
