//! Sync Error Types
//!
//! This module defines the error taxonomy shared by every component of the
//! synchronization core.
//!
//! # Error Categories
//!
//! - `TransientIo` - Store or network failures, safe to retry with backoff
//! - `Busy` - A send is already in flight for this user
//! - `RateLimited` - A send was attempted inside the spacing window
//! - `MalformedEvent` - A raw change event is missing required fields
//! - `Validation` - Caller input rejected before any I/O
//! - `Closed` - The component the caller talked to has shut down
//!
//! Duplicate deliveries are not errors. The projector reports them as
//! [`ApplyEffect::DuplicateIgnored`](crate::projection::ApplyEffect).
//!
//! # Usage
//!
//! ```rust
//! use farmchat::shared::error::SyncError;
//!
//! let error = SyncError::validation("content", "message cannot be empty");
//! assert!(!error.is_retryable());
//! ```
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the synchronization core
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Store or network failure
    #[error("Transient I/O error: {message}")]
    TransientIo {
        /// Human-readable error message
        message: String,
    },

    /// A send is already outstanding for this observing user
    #[error("A send is already in flight")]
    Busy,

    /// A send landed inside the minimum spacing window
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the window elapses
        retry_after: Duration,
    },

    /// A raw change event could not be normalized
    #[error("Malformed event: {reason}")]
    MalformedEvent {
        /// What was missing or inconsistent
        reason: String,
    },

    /// Caller input failed validation
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// The target component has stopped
    #[error("{component} is closed")]
    Closed {
        /// Name of the stopped component
        component: &'static str,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },
}

impl SyncError {
    /// Create a new transient I/O error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo {
            message: message.into(),
        }
    }

    /// Create a new malformed-event error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            reason: reason.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new closed error
    pub fn closed(component: &'static str) -> Self {
        Self::Closed { component }
    }

    /// Whether retrying the same operation later can succeed.
    ///
    /// Only store failures are retried automatically (at the registry
    /// boundary). `Busy` and `RateLimited` are left to the caller, which
    /// should disable its submit action rather than queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }

    /// Suggested wait before the caller re-enables input
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON error: {}", err),
        }
    }
}

/// Result alias used throughout the crate
pub type SyncResult<T> = Result<T, SyncError>;
