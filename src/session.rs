//! # Sync Session
//!
//! One observing user's view of the messaging system. A session owns the
//! user's projector actor, send coordinator and read-receipt tracker, and
//! holds registry handles for the feeds it needs:
//!
//! - `AllMessages` for the whole session, feeding the conversation list
//! - `Conversation(other)` while a conversation is open
//!
//! The registry and the gateway are injected through [`SyncDeps`], so
//! several sessions in one process share feeds instead of opening their
//! own.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use farmchat::gateway::{MemoryMessageStore, MemoryProfileDirectory, SendContext};
//! use farmchat::session::{SyncDeps, SyncSession};
//! use farmchat::shared::SyncConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> farmchat::shared::SyncResult<()> {
//! let config = SyncConfig::default();
//! let deps = SyncDeps::new(
//!     Arc::new(MemoryMessageStore::new(config.feed_buffer)),
//!     Arc::new(MemoryProfileDirectory::new()),
//!     &config,
//! );
//! let session = SyncSession::start("u2".into(), &deps, config).await?;
//! session.open_conversation(&"u1".into()).await?;
//! session.send(&"u1".into(), "Still have eggs?", &SendContext::default()).await?;
//! session.shutdown();
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::delivery::{ReadReceiptTracker, SendCoordinator};
use crate::gateway::{MessageStore, ProfileDirectory, SendContext};
use crate::metrics::SyncMetrics;
use crate::projection::{ProjectionSnapshot, ProjectorActor, ProjectorHandle, ReadBatch};
use crate::realtime::registry::{FeedStatus, SubscriptionHandle, SubscriptionKey, SubscriptionRegistry};
use crate::realtime::retry::retry_with_backoff;
use crate::shared::config::SyncConfig;
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::messaging::{Message, UserId};

/// Collaborators shared by every session of a process
#[derive(Clone)]
pub struct SyncDeps {
    pub store: Arc<dyn MessageStore>,
    pub directory: Arc<dyn ProfileDirectory>,
    pub registry: SubscriptionRegistry,
    pub metrics: Arc<SyncMetrics>,
}

impl SyncDeps {
    /// Build a registry and metrics over the given gateway
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ProfileDirectory>,
        config: &SyncConfig,
    ) -> Self {
        let metrics = Arc::new(SyncMetrics::new());
        let registry = SubscriptionRegistry::new(Arc::clone(&store), config.retry, Arc::clone(&metrics));
        Self {
            store,
            directory,
            registry,
            metrics,
        }
    }
}

#[derive(Default)]
struct Feeds {
    all: Option<SubscriptionHandle>,
    conversation: Option<(UserId, SubscriptionHandle)>,
}

/// Live sync state for one observing user
pub struct SyncSession {
    observer: UserId,
    config: SyncConfig,
    deps: SyncDeps,
    projector: ProjectorHandle,
    sender: SendCoordinator,
    receipts: ReadReceiptTracker,
    feeds: Mutex<Feeds>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSession")
            .field("observer", &self.observer)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl SyncSession {
    /// Spawn the projector, subscribe to the observer's messages and load
    /// the conversation list.
    pub async fn start(observer: UserId, deps: &SyncDeps, config: SyncConfig) -> SyncResult<Self> {
        if observer.as_str().trim().is_empty() {
            return Err(SyncError::validation("observer", "user id cannot be empty"));
        }
        config
            .validate()
            .map_err(|e| SyncError::validation("config", e.to_string()))?;

        let (projector, _task) = ProjectorActor::spawn(
            observer.clone(),
            Arc::clone(&deps.store),
            Arc::clone(&deps.directory),
            Arc::clone(&deps.metrics),
            &config,
        );
        let sender = SendCoordinator::new(
            Arc::clone(&deps.store),
            projector.clone(),
            config.send,
            Arc::clone(&deps.metrics),
        );
        let receipts = ReadReceiptTracker::new(Arc::clone(&deps.store), projector.clone());
        let session = Self {
            observer,
            config,
            deps: deps.clone(),
            projector,
            sender,
            receipts,
            feeds: Mutex::new(Feeds::default()),
            closed: AtomicBool::new(false),
        };

        // Subscribe before fetching so nothing persisted in between is
        // missed; the overlap is absorbed as duplicates. Dropping the
        // session on error shuts the actor down.
        let handle = session
            .acquire(SubscriptionKey::all_messages(session.observer.clone()))
            .await?;
        session.lock_feeds().all = Some(handle);

        let summaries = session.deps.store.fetch_conversations(&session.observer).await?;
        tracing::info!(
            observer = %session.observer,
            conversations = summaries.len(),
            "[Session] Conversation list loaded"
        );
        session.projector.hydrate(summaries).await?;
        tracing::info!(observer = %session.observer, "[Session] Started");
        Ok(session)
    }

    pub fn observer(&self) -> &UserId {
        &self.observer
    }

    /// Open the conversation with `other`, follow its feed, and mark it read.
    pub async fn open_conversation(&self, other: &UserId) -> SyncResult<ReadBatch> {
        self.ensure_open()?;
        if other == &self.observer {
            return Err(SyncError::validation("other_user_id", "cannot open a conversation with yourself"));
        }

        // Open empty first so arrivals during the fetch land in the thread,
        // then merge the history in
        self.projector.open_conversation(other.clone(), Vec::new()).await?;
        let messages = self.deps.store.fetch_messages(&self.observer, other).await?;
        self.projector.open_conversation(other.clone(), messages).await?;

        let already_following = matches!(&self.lock_feeds().conversation, Some((current, _)) if current == other);
        if !already_following {
            let handle = self
                .acquire(SubscriptionKey::conversation(self.observer.clone(), other.clone()))
                .await?;
            let previous = self.lock_feeds().conversation.replace((other.clone(), handle));
            if let Some((_, previous)) = previous {
                previous.release();
            }
        }

        self.projector.set_viewing(true)?;
        tracing::debug!(observer = %self.observer, other = %other, "[Session] Conversation opened");
        self.receipts.mark_conversation_read(other).await
    }

    /// Stop viewing the open conversation and release its feed
    pub fn close_conversation(&self) -> SyncResult<()> {
        self.ensure_open()?;
        self.projector.set_viewing(false)?;
        self.projector.close_conversation()?;
        let previous = self.lock_feeds().conversation.take();
        if let Some((other, handle)) = previous {
            handle.release();
            tracing::debug!(observer = %self.observer, other = %other, "[Session] Conversation closed");
        }
        Ok(())
    }

    pub async fn send(&self, receiver: &UserId, content: &str, context: &SendContext) -> SyncResult<Message> {
        self.ensure_open()?;
        self.sender.send(receiver, content, context).await
    }

    pub async fn mark_conversation_read(&self, other: &UserId) -> SyncResult<ReadBatch> {
        self.ensure_open()?;
        self.receipts.mark_conversation_read(other).await
    }

    pub fn snapshot(&self) -> ProjectionSnapshot {
        self.projector.snapshot()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<ProjectionSnapshot> {
        self.projector.subscribe()
    }

    /// Health of the session-wide feed
    pub fn feed_status(&self) -> Option<FeedStatus> {
        self.lock_feeds().all.as_ref().map(SubscriptionHandle::status)
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.deps.metrics
    }

    /// Release every feed and stop the projector. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let feeds = std::mem::take(&mut *self.lock_feeds());
        if let Some((_, handle)) = feeds.conversation {
            handle.release();
        }
        if let Some(handle) = feeds.all {
            handle.release();
        }
        self.projector.shutdown();
        tracing::info!(observer = %self.observer, "[Session] Shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn acquire(&self, key: SubscriptionKey) -> SyncResult<SubscriptionHandle> {
        let dispatch = self.projector.dispatcher();
        let registry = &self.deps.registry;
        retry_with_backoff(self.config.retry, "subscribe", move || {
            registry.acquire(key.clone(), Arc::clone(&dispatch))
        })
        .await
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.is_closed() {
            Err(SyncError::closed("session"))
        } else {
            Ok(())
        }
    }

    fn lock_feeds(&self) -> MutexGuard<'_, Feeds> {
        self.feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
