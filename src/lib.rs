//! FarmChat Sync - Main Library
//!
//! Real-time conversation synchronization for a marketplace where farmers
//! and buyers message each other directly. The library keeps each user's
//! conversation list, unread counts and open thread consistent while
//! change notifications arrive late, twice, or out of order.
//!
//! # Overview
//!
//! - Normalization of raw store change rows into one canonical event type
//! - A reference-counted registry that shares one upstream feed per key
//! - A single-writer projector per observing user
//! - Single-flight, rate-limited sending with stale-lock recovery
//! - Batched read receipts
//!
//! # Module Structure
//!
//! - **`shared`** - Data model, errors and configuration
//! - **`gateway`** - Traits for the message store and profile directory,
//!   plus an in-memory implementation
//! - **`realtime`** - Normalizer, subscription registry, backoff
//! - **`projection`** - Reducer and its actor
//! - **`delivery`** - Send coordinator and read-receipt tracker
//! - **`session`** - Wiring for one observing user
//! - **`metrics`** - Counters
//!
//! # Usage
//!
//! ```rust,no_run
//! use farmchat::gateway::{MemoryMessageStore, MemoryProfileDirectory, SendContext};
//! use farmchat::session::{SyncDeps, SyncSession};
//! use farmchat::shared::SyncConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> farmchat::shared::SyncResult<()> {
//! let config = SyncConfig::from_env().unwrap_or_default();
//! let store = Arc::new(MemoryMessageStore::new(config.feed_buffer));
//! let deps = SyncDeps::new(store, Arc::new(MemoryProfileDirectory::new()), &config);
//!
//! let buyer = SyncSession::start("buyer-1".into(), &deps, config).await?;
//! buyer
//!     .send(&"farmer-7".into(), "Do you have eggs this week?", &SendContext::default())
//!     .await?;
//! println!("{:?}", buyer.snapshot().conversations);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! - Projector state is owned by one task per user and changed only
//!   through its command channel
//! - The registry's key map is guarded by a mutex never held across
//!   `.await`; feed opening is serialized per key
//! - Send state is private to each user's coordinator
//!
//! # Error Handling
//!
//! Fallible operations return [`shared::SyncResult`]. Malformed events and
//! duplicate deliveries never surface as errors; they are logged and
//! counted in [`metrics::SyncMetrics`].

/// Shared types and data structures
pub mod shared;

/// Message store and profile directory collaborators
pub mod gateway;

/// Change feed plumbing
pub mod realtime;

/// Per-user conversation state
pub mod projection;

/// Sending and read receipts
pub mod delivery;

/// Per-user wiring
pub mod session;

pub mod metrics;

pub use projection::{ApplyEffect, ProjectionSnapshot, ProjectorHandle};
pub use realtime::{FeedStatus, SubscriptionKey, SubscriptionRegistry};
pub use session::{SyncDeps, SyncSession};
pub use shared::{SyncConfig, SyncError, SyncResult};
