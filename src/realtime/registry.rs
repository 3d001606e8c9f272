//! Subscription Registry
//!
//! Keeps at most one live upstream feed per [`SubscriptionKey`] and fans
//! its normalized events out to every consumer that acquired the key.
//!
//! # Lifecycle
//!
//! - The first `acquire` for a key opens the feed; later ones share it and
//!   bump the reference count.
//! - `release` drops one reference. The last release aborts the pump and
//!   removes the entry before returning, so no further event reaches any
//!   consumer of that key.
//! - Releasing the same handle twice is a no-op. Dropping an unreleased
//!   handle releases it.
//!
//! # Concurrency
//!
//! Each key has an async gate that serializes feed opening, so concurrent
//! `acquire` calls for one key open exactly one feed. A caller that waited
//! on the gate of a slot removed in the meantime starts over with a fresh
//! slot. The key map itself sits behind a short-lived std mutex that is
//! never held across an `.await`, and the pump holds only a weak reference
//! to its slot while it waits.
//!
//! # Failures
//!
//! A failed open returns the store error and leaves nothing registered;
//! callers retry (see [`retry_with_backoff`](super::retry::retry_with_backoff)).
//! A feed that drops after it was live is reopened with backoff. When the
//! retries run out the key is marked [`FeedStatus::Degraded`] and one error
//! is logged.

use futures_util::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::normalizer::normalize;
use super::retry::Backoff;
use crate::gateway::{MessageStore, RawEventStream, SubscriptionFilter};
use crate::metrics::SyncMetrics;
use crate::shared::config::RetryPolicy;
use crate::shared::error::SyncResult;
use crate::shared::messaging::{NormalizedEvent, RawChangeEvent, UserId};

/// What part of a user's traffic a feed covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every message the observer sends or receives
    AllMessages,
    /// Messages between the observer and this user
    Conversation(UserId),
}

/// Registry key: one observing user plus a scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub observer: UserId,
    pub scope: Scope,
}

impl SubscriptionKey {
    pub fn all_messages(observer: UserId) -> Self {
        Self {
            observer,
            scope: Scope::AllMessages,
        }
    }

    pub fn conversation(observer: UserId, other: UserId) -> Self {
        Self {
            observer,
            scope: Scope::Conversation(other),
        }
    }

    /// Upstream filter for this key
    pub fn filter(&self) -> SubscriptionFilter {
        match &self.scope {
            Scope::AllMessages => SubscriptionFilter::InvolvingUser(self.observer.clone()),
            Scope::Conversation(other) => {
                SubscriptionFilter::Between(self.observer.clone(), other.clone())
            }
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::AllMessages => write!(f, "{}/all", self.observer),
            Scope::Conversation(other) => write!(f, "{}/with:{}", self.observer, other),
        }
    }
}

/// Health of the feed behind a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Live,
    Reconnecting { attempt: u32 },
    /// Reconnection gave up; acquiring the key again reopens it
    Degraded,
}

/// Callback receiving every normalized event of a key
pub type Dispatch = Arc<dyn Fn(NormalizedEvent) + Send + Sync>;

struct Consumer {
    id: u64,
    dispatch: Dispatch,
}

struct FeedTask {
    feed_id: u64,
    pump: JoinHandle<()>,
}

struct SlotState {
    feed: Option<FeedTask>,
    consumers: Vec<Consumer>,
    status: watch::Sender<FeedStatus>,
}

struct KeySlot {
    key: SubscriptionKey,
    gate: Arc<tokio::sync::Mutex<()>>,
    state: Mutex<SlotState>,
}

impl KeySlot {
    fn new(key: SubscriptionKey) -> Self {
        let (status, _) = watch::channel(FeedStatus::Live);
        Self {
            key,
            gate: Arc::new(tokio::sync::Mutex::new(())),
            state: Mutex::new(SlotState {
                feed: None,
                consumers: Vec::new(),
                status,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct RegistryInner {
    store: Arc<dyn MessageStore>,
    retry: RetryPolicy,
    metrics: Arc<SyncMetrics>,
    slots: Mutex<HashMap<SubscriptionKey, Arc<KeySlot>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, Arc<KeySlot>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn release_consumer(&self, key: &SubscriptionKey, consumer_id: u64) {
        let mut slots = self.lock_slots();
        let Some(slot) = slots.get(key) else {
            return;
        };
        let remove = {
            let mut state = slot.lock_state();
            state.consumers.retain(|c| c.id != consumer_id);
            tracing::debug!(
                key = %key,
                ref_count = state.consumers.len(),
                "[Registry] Reference released"
            );
            if state.consumers.is_empty() {
                if let Some(feed) = state.feed.take() {
                    feed.pump.abort();
                    self.metrics.record_feed_closed();
                    tracing::info!(key = %key, "[Registry] Feed closed");
                }
                // A held gate means an acquirer is opening a feed in this
                // slot. Acquirers still waiting on it re-check the map.
                slot.gate.try_lock().is_ok()
            } else {
                false
            }
        };
        if remove {
            slots.remove(key);
        }
    }

    /// Drop a slot whose open failed, unless it has consumers. Called
    /// with the slot's gate held.
    fn discard_if_unused(&self, slot: &Arc<KeySlot>) {
        let mut slots = self.lock_slots();
        let unused = match slots.get(&slot.key) {
            Some(current) if Arc::ptr_eq(current, slot) => {
                let state = slot.lock_state();
                state.consumers.is_empty() && state.feed.is_none()
            }
            _ => false,
        };
        if unused {
            slots.remove(&slot.key);
        }
    }

    /// Whether `slot` is still the registered slot for its key
    fn is_current(&self, slot: &Arc<KeySlot>) -> bool {
        self.lock_slots()
            .get(&slot.key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }
}

/// Reference-counted registry of upstream feeds. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &self.inner.lock_slots().len())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn MessageStore>, retry: RetryPolicy, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store,
                retry,
                metrics,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `dispatch` for `key`, opening the upstream feed if no
    /// consumer holds it yet.
    pub async fn acquire(
        &self,
        key: SubscriptionKey,
        dispatch: Dispatch,
    ) -> SyncResult<SubscriptionHandle> {
        let (slot, _gate) = loop {
            let slot = {
                let mut slots = self.inner.lock_slots();
                Arc::clone(
                    slots
                        .entry(key.clone())
                        .or_insert_with(|| Arc::new(KeySlot::new(key.clone()))),
                )
            };
            let gate = Arc::clone(&slot.gate).lock_owned().await;
            // The slot may have been removed while this call waited
            if self.inner.is_current(&slot) {
                break (slot, gate);
            }
        };
        let consumer_id = self.inner.next_id();

        {
            let mut state = slot.lock_state();
            if state.feed.is_some() {
                state.consumers.push(Consumer {
                    id: consumer_id,
                    dispatch,
                });
                tracing::debug!(
                    key = %key,
                    ref_count = state.consumers.len(),
                    "[Registry] Sharing existing feed"
                );
                return Ok(self.handle(key, consumer_id, state.status.subscribe()));
            }
        }

        tracing::info!(key = %key, "[Registry] Opening feed");
        let stream = match self.inner.store.subscribe(key.filter()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(key = %key, "[Registry] Failed to open feed: {}", e);
                self.inner.discard_if_unused(&slot);
                return Err(e);
            }
        };

        let feed_id = self.inner.next_id();
        let mut state = slot.lock_state();
        state.consumers.push(Consumer {
            id: consumer_id,
            dispatch,
        });
        state.status.send_replace(FeedStatus::Live);
        let pump = tokio::spawn(run_pump(
            Arc::downgrade(&slot),
            feed_id,
            stream,
            Arc::clone(&self.inner.store),
            self.inner.retry,
            Arc::clone(&self.inner.metrics),
        ));
        state.feed = Some(FeedTask { feed_id, pump });
        self.inner.metrics.record_feed_opened();
        Ok(self.handle(key, consumer_id, state.status.subscribe()))
    }

    /// Drop one reference. Idempotent per handle.
    pub fn release(&self, handle: &SubscriptionHandle) {
        handle.release();
    }

    /// Consumers currently holding `key`
    pub fn ref_count(&self, key: &SubscriptionKey) -> usize {
        self.inner
            .lock_slots()
            .get(key)
            .map(|slot| slot.lock_state().consumers.len())
            .unwrap_or(0)
    }

    /// Keys with a running pump
    pub fn live_feeds(&self) -> usize {
        self.inner
            .lock_slots()
            .values()
            .filter(|slot| slot.lock_state().feed.is_some())
            .count()
    }

    pub fn status(&self, key: &SubscriptionKey) -> Option<FeedStatus> {
        self.inner
            .lock_slots()
            .get(key)
            .map(|slot| *slot.lock_state().status.borrow())
    }

    fn handle(
        &self,
        key: SubscriptionKey,
        consumer_id: u64,
        status: watch::Receiver<FeedStatus>,
    ) -> SubscriptionHandle {
        SubscriptionHandle {
            key,
            consumer_id,
            released: AtomicBool::new(false),
            status,
            registry: Arc::downgrade(&self.inner),
        }
    }
}

/// One consumer's reference to a shared feed
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    consumer_id: u64,
    released: AtomicBool,
    status: watch::Receiver<FeedStatus>,
    registry: Weak<RegistryInner>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("consumer_id", &self.consumer_id)
            .field("released", &self.is_released())
            .finish()
    }
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn status(&self) -> FeedStatus {
        *self.status.borrow()
    }

    /// Watch feed health; changes once per transition
    pub fn status_receiver(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            tracing::debug!(key = %self.key, "[Registry] Handle already released");
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            inner.release_consumer(&self.key, self.consumer_id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if !self.is_released() {
            self.release();
        }
    }
}

/// Forward one raw change to every consumer of the slot
fn dispatch_raw(slot: &KeySlot, raw: &RawChangeEvent, metrics: &SyncMetrics) {
    match normalize(raw) {
        Ok(Some(event)) => {
            // Holding the lock keeps a concurrent release from racing the fan-out
            let state = slot.lock_state();
            for consumer in &state.consumers {
                (consumer.dispatch)(event.clone());
            }
        }
        Ok(None) => {
            tracing::trace!(key = %slot.key, "[Registry] Change carried no event");
        }
        Err(e) => {
            metrics.record_malformed();
            tracing::warn!(key = %slot.key, "[Normalizer] Dropping event: {}", e);
        }
    }
}

fn set_status(slot: &KeySlot, status: FeedStatus) {
    slot.lock_state().status.send_replace(status);
}

async fn run_pump(
    slot: Weak<KeySlot>,
    feed_id: u64,
    mut stream: RawEventStream,
    store: Arc<dyn MessageStore>,
    retry: RetryPolicy,
    metrics: Arc<SyncMetrics>,
) {
    let mut backoff = Backoff::new(retry);
    loop {
        let item = stream.next().await;
        let Some(current) = slot.upgrade() else {
            return;
        };
        match item {
            Some(Ok(raw)) => {
                backoff.reset();
                dispatch_raw(&current, &raw, &metrics);
                continue;
            }
            Some(Err(e)) => {
                tracing::warn!(key = %current.key, "[Registry] Feed dropped: {}", e);
            }
            None => {
                tracing::warn!(key = %current.key, "[Registry] Feed ended");
            }
        }
        let key = current.key.clone();
        drop(current);

        match reconnect(&slot, &key, feed_id, store.as_ref(), &mut backoff, &metrics).await {
            Some(reopened) => stream = reopened,
            None => return,
        }
    }
}

/// Reopen a dropped feed. Only a weak reference to the slot is held
/// across `.await`, so releasing the key meanwhile removes it at once.
async fn reconnect(
    slot: &Weak<KeySlot>,
    key: &SubscriptionKey,
    feed_id: u64,
    store: &dyn MessageStore,
    backoff: &mut Backoff,
    metrics: &SyncMetrics,
) -> Option<RawEventStream> {
    let filter = key.filter();
    loop {
        let Some(delay) = backoff.next_delay() else {
            tracing::error!(
                key = %key,
                attempts = backoff.attempts(),
                "[Registry] Feed degraded, giving up on reconnection"
            );
            if let Some(slot) = slot.upgrade() {
                let mut state = slot.lock_state();
                state.status.send_replace(FeedStatus::Degraded);
                if state.feed.as_ref().map(|f| f.feed_id) == Some(feed_id) {
                    state.feed = None;
                }
            }
            return None;
        };
        set_status(
            &*slot.upgrade()?,
            FeedStatus::Reconnecting {
                attempt: backoff.attempts(),
            },
        );
        tokio::time::sleep(delay).await;
        match store.subscribe(filter.clone()).await {
            Ok(reopened) => {
                set_status(&*slot.upgrade()?, FeedStatus::Live);
                metrics.record_reconnect();
                tracing::info!(key = %key, "[Registry] Feed reconnected");
                return Some(reopened);
            }
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    attempt = backoff.attempts(),
                    "[Registry] Reconnect failed: {}",
                    e
                );
            }
        }
    }
}
