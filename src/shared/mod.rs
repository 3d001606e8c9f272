//! Shared Module
//!
//! Types used by every layer of the sync engine: the messaging data
//! model, the error taxonomy and configuration.

/// Messaging data model and change events
pub mod messaging;

/// Shared error types
pub mod error;

/// Engine configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, RetryPolicy, SendPolicy, SyncConfig, SyncConfigBuilder};
pub use error::{SyncError, SyncResult};
pub use messaging::{
    ConversationId, ConversationSummary, EventKind, Message, MessageId, NormalizedEvent,
    ProfileSnippet, RawChangeEvent, UserId,
};
