//! Real-time Module
//!
//! Everything between the store's change feeds and the projectors:
//! normalization of raw rows, the shared subscription registry and the
//! backoff used to (re)open feeds.

pub mod normalizer;
pub mod registry;
pub mod retry;

pub use normalizer::normalize;
pub use registry::{Dispatch, FeedStatus, Scope, SubscriptionHandle, SubscriptionKey, SubscriptionRegistry};
pub use retry::{retry_with_backoff, Backoff};
