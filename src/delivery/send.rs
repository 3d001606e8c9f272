//! Send Coordinator
//!
//! Sends messages for one observing user with single-flight and spacing
//! guarantees:
//!
//! - one send in flight at a time; a second concurrent call gets `Busy`
//! - successful sends are spaced by at least `min_interval`
//! - the same content to the same receiver inside `duplicate_window` is
//!   collapsed into the first send
//! - an in-flight marker older than `stale_after` is treated as lost and
//!   cleared, so a crashed or dropped attempt cannot lock the user out
//!
//! The persisted message is folded into the observer's projector before
//! `send` returns. The feed's later echo of the same id is a duplicate.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;

use crate::gateway::{MessageStore, SendContext};
use crate::metrics::SyncMetrics;
use crate::projection::ProjectorHandle;
use crate::shared::config::SendPolicy;
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::messaging::{Message, NormalizedEvent, UserId};

#[derive(Debug, Clone)]
struct SendAttempt {
    token: u64,
    attempt_at: Instant,
    receiver: UserId,
    content_hash: u64,
}

#[derive(Debug, Default)]
struct SendState {
    in_flight: Option<SendAttempt>,
    last_success: Option<Instant>,
    /// Successful sends still inside the duplicate window
    recent: VecDeque<SendAttempt>,
}

/// Per-observer send path
pub struct SendCoordinator {
    observer: UserId,
    store: Arc<dyn MessageStore>,
    projector: ProjectorHandle,
    policy: SendPolicy,
    metrics: Arc<SyncMetrics>,
    state: Mutex<SendState>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for SendCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendCoordinator")
            .field("observer", &self.observer)
            .field("policy", &self.policy)
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

impl SendCoordinator {
    pub fn new(
        store: Arc<dyn MessageStore>,
        projector: ProjectorHandle,
        policy: SendPolicy,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            observer: projector.observer().clone(),
            store,
            projector,
            policy,
            metrics,
            state: Mutex::new(SendState::default()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Send `content` to `receiver`.
    ///
    /// On error nothing was persisted by this call; callers keep the
    /// user's input so it can be retried.
    pub async fn send(
        &self,
        receiver: &UserId,
        content: &str,
        context: &SendContext,
    ) -> SyncResult<Message> {
        let content = content.trim();
        if content.is_empty() {
            self.metrics.record_send(false);
            return Err(SyncError::validation("content", "message cannot be empty"));
        }
        if receiver == &self.observer {
            self.metrics.record_send(false);
            return Err(SyncError::validation("receiver_id", "cannot message yourself"));
        }

        let content_hash = hash_content(content);
        let token = match self.begin(receiver, content_hash) {
            Ok(token) => token,
            Err(e) => {
                self.metrics.record_send(false);
                tracing::debug!(observer = %self.observer, "[Send] Rejected: {}", e);
                return Err(e);
            }
        };

        let result = self
            .store
            .send_message(&self.observer, receiver, content, context)
            .await;
        self.finish(token, result.is_ok());

        match result {
            Ok(message) => {
                self.metrics.record_send(true);
                tracing::info!(
                    observer = %self.observer,
                    message_id = %message.id,
                    "[Send] Message sent"
                );
                if let Err(e) = self.projector.apply(NormalizedEvent::created(message.clone())).await {
                    tracing::warn!(message_id = %message.id, "[Send] Could not fold sent message: {}", e);
                }
                Ok(message)
            }
            Err(e) => {
                self.metrics.record_send(false);
                tracing::warn!(observer = %self.observer, "[Send] Store rejected send: {}", e);
                Err(e)
            }
        }
    }

    /// Whether a send is currently outstanding
    pub fn is_in_flight(&self) -> bool {
        self.lock_state().in_flight.is_some()
    }

    fn begin(&self, receiver: &UserId, content_hash: u64) -> SyncResult<u64> {
        let now = Instant::now();
        let mut state = self.lock_state();

        if let Some(attempt) = &state.in_flight {
            let age = now.saturating_duration_since(attempt.attempt_at);
            if age < self.policy.stale_after {
                return Err(SyncError::Busy);
            }
            tracing::warn!(
                observer = %self.observer,
                ?age,
                "[Send] Clearing stale in-flight send"
            );
            state.in_flight = None;
        }

        if let Some(last) = state.last_success {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.policy.min_interval {
                return Err(SyncError::RateLimited {
                    retry_after: self.policy.min_interval - elapsed,
                });
            }
        }

        let window = self.policy.duplicate_window;
        state
            .recent
            .retain(|a| now.saturating_duration_since(a.attempt_at) < window);
        if let Some(previous) = state
            .recent
            .iter()
            .find(|a| &a.receiver == receiver && a.content_hash == content_hash)
        {
            return Err(SyncError::RateLimited {
                retry_after: window - now.saturating_duration_since(previous.attempt_at),
            });
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        state.in_flight = Some(SendAttempt {
            token,
            attempt_at: now,
            receiver: receiver.clone(),
            content_hash,
        });
        Ok(token)
    }

    fn finish(&self, token: u64, succeeded: bool) {
        let now = Instant::now();
        let mut state = self.lock_state();
        // A stale attempt may have been replaced while this one was running
        if state.in_flight.as_ref().map(|a| a.token) != Some(token) {
            return;
        }
        let Some(mut attempt) = state.in_flight.take() else {
            return;
        };
        if succeeded {
            attempt.attempt_at = now;
            state.last_success = Some(now);
            state.recent.push_back(attempt);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn hash_content(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}
