//! In-memory Message Store
//!
//! A process-local [`MessageStore`] whose change feeds are fanned out with
//! `tokio::sync::broadcast`, the same way per-conversation SSE channels are
//! shared on a server. It records call counts and supports injected
//! latency, failures and disconnects so the sync core can be exercised
//! without a backend.
//!
//! # Usage
//!
//! ```rust,no_run
//! use farmchat::gateway::{MemoryMessageStore, MessageStore, SendContext};
//!
//! # async fn example() -> farmchat::shared::SyncResult<()> {
//! let store = MemoryMessageStore::new(256);
//! store
//!     .send_message(&"u1".into(), &"u2".into(), "Hello", &SendContext::default())
//!     .await?;
//! assert_eq!(store.message_count(), 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{MessageStore, ProfileDirectory, RawEventStream, SendContext, SubscriptionFilter};
use crate::shared::error::{SyncError, SyncResult};
use crate::shared::messaging::{
    ChangeKind, ConversationId, ConversationSummary, Message, MessageId, ProfileSnippet,
    RawChangeEvent, UserId,
};

/// Item carried on the internal broadcast channel
#[derive(Debug, Clone)]
enum FeedItem {
    Change(RawChangeEvent),
    Disconnect,
}

#[derive(Debug, Default)]
struct StoreState {
    messages: Vec<Message>,
    profiles: HashMap<UserId, ProfileSnippet>,
    next_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_subscribes: u32,
    failing_sends: u32,
    subscribe_latency: Option<Duration>,
    send_latency: Option<Duration>,
    history_latency: Option<Duration>,
}

/// Call counters, readable from tests
#[derive(Debug, Default)]
pub struct StoreCounters {
    pub subscribe_calls: AtomicUsize,
    pub send_calls: AtomicUsize,
    pub mark_read_calls: AtomicUsize,
    pub mark_conversation_read_calls: AtomicUsize,
    open_feeds: Arc<AtomicUsize>,
}

impl StoreCounters {
    /// Feeds handed out and not yet dropped
    pub fn open_feeds(&self) -> usize {
        self.open_feeds.load(Ordering::SeqCst)
    }
}

/// In-memory message store
#[derive(Debug)]
pub struct MemoryMessageStore {
    state: Mutex<StoreState>,
    faults: Mutex<Faults>,
    changes: broadcast::Sender<FeedItem>,
    counters: StoreCounters,
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryMessageStore {
    /// Create a store whose feeds buffer up to `feed_buffer` changes
    pub fn new(feed_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(feed_buffer.max(1));
        Self {
            state: Mutex::new(StoreState::default()),
            faults: Mutex::new(Faults::default()),
            changes,
            counters: StoreCounters::default(),
        }
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    pub fn message_count(&self) -> usize {
        self.lock_state().messages.len()
    }

    /// Register display information embedded in this user's change rows
    pub fn register_profile(&self, user: UserId, profile: ProfileSnippet) {
        self.lock_state().profiles.insert(user, profile);
    }

    /// Pin the timestamp of the next stored message. Each send advances
    /// the pinned clock by one second.
    pub fn set_clock(&self, next: DateTime<Utc>) {
        self.lock_state().next_timestamp = Some(next);
    }

    /// Store a message without emitting a change
    pub fn seed(&self, message: Message) {
        self.lock_state().messages.push(message);
    }

    /// Deliver a raw change to every open feed, bypassing persistence
    pub fn publish(&self, raw: RawChangeEvent) -> usize {
        self.changes.send(FeedItem::Change(raw)).unwrap_or(0)
    }

    /// Publish a typed message as a change row
    pub fn publish_message(&self, kind: ChangeKind, message: &Message) -> SyncResult<usize> {
        let raw = self.raw_for(kind, message)?;
        Ok(self.publish(raw))
    }

    /// Make every open feed yield an error and end
    pub fn disconnect_feeds(&self) {
        let _ = self.changes.send(FeedItem::Disconnect);
    }

    pub fn fail_next_subscribes(&self, count: u32) {
        self.lock_faults().failing_subscribes = count;
    }

    pub fn fail_next_sends(&self, count: u32) {
        self.lock_faults().failing_sends = count;
    }

    pub fn set_subscribe_latency(&self, latency: Option<Duration>) {
        self.lock_faults().subscribe_latency = latency;
    }

    pub fn set_send_latency(&self, latency: Option<Duration>) {
        self.lock_faults().send_latency = latency;
    }

    /// Delay message history responses. The history is read before the
    /// delay, so changes made meanwhile are missing from it.
    pub fn set_history_latency(&self, latency: Option<Duration>) {
        self.lock_faults().history_latency = latency;
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.lock_state().messages.iter().find(|m| &m.id == id).cloned()
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn raw_for(&self, kind: ChangeKind, message: &Message) -> SyncResult<RawChangeEvent> {
        let mut raw = RawChangeEvent::from_message(kind, message)?;
        let state = self.lock_state();
        if let Some(record) = raw.record.as_object_mut() {
            if let Some(profile) = state.profiles.get(&message.sender_id) {
                record.insert("sender".to_string(), serde_json::to_value(profile)?);
            }
            if let Some(profile) = state.profiles.get(&message.receiver_id) {
                record.insert("receiver".to_string(), serde_json::to_value(profile)?);
            }
        }
        Ok(raw)
    }

    fn emit(&self, kind: ChangeKind, message: &Message) {
        match self.raw_for(kind, message) {
            Ok(raw) => {
                let delivered = self.publish(raw);
                tracing::debug!(
                    message_id = %message.id,
                    delivered,
                    "[MemoryStore] Change emitted"
                );
            }
            Err(e) => tracing::error!("[MemoryStore] Failed to encode change: {}", e),
        }
    }

    fn summarize(&self, user: &UserId) -> Vec<ConversationSummary> {
        let state = self.lock_state();
        let mut by_other: HashMap<UserId, ConversationSummary> = HashMap::new();
        for message in state.messages.iter().filter(|m| m.involves(user)) {
            let Some(other) = message.other_participant(user) else {
                continue;
            };
            let summary = by_other.entry(other.clone()).or_insert_with(|| {
                let profile = state.profiles.get(other).cloned().unwrap_or_default();
                ConversationSummary::new(user, other.clone(), profile)
            });
            if summary.accepts_as_latest(message) {
                summary.update_last_message(message, usize::MAX);
            }
            if message.is_addressed_to(user) && !message.is_read {
                summary.unread_count += 1;
            }
        }
        let mut summaries: Vec<_> = by_other.into_values().collect();
        summaries.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        summaries
    }
}

/// Decrements the open-feed counter when the stream is dropped
#[derive(Debug)]
struct FeedGuard(Arc<AtomicUsize>);

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FeedState {
    rx: broadcast::Receiver<FeedItem>,
    filter: SubscriptionFilter,
    finished: bool,
    _guard: FeedGuard,
}

/// Rows without readable participant ids are passed through so the
/// normalizer can reject them.
fn passes(filter: &SubscriptionFilter, raw: &RawChangeEvent) -> bool {
    let sender = raw.record.get("sender_id").and_then(|v| v.as_str());
    let receiver = raw.record.get("receiver_id").and_then(|v| v.as_str());
    match (sender, receiver) {
        (Some(s), Some(r)) => filter.matches(&UserId::new(s), &UserId::new(r)),
        _ => true,
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn fetch_conversations(&self, user: &UserId) -> SyncResult<Vec<ConversationSummary>> {
        Ok(self.summarize(user))
    }

    async fn fetch_messages(&self, user: &UserId, other: &UserId) -> SyncResult<Vec<Message>> {
        let conversation = ConversationId::for_pair(user, other);
        let mut messages: Vec<Message> = self
            .lock_state()
            .messages
            .iter()
            .filter(|m| ConversationId::for_pair(&m.sender_id, &m.receiver_id) == conversation)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let latency = self.lock_faults().history_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(messages)
    }

    async fn send_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: &str,
        context: &SendContext,
    ) -> SyncResult<Message> {
        self.counters.send_calls.fetch_add(1, Ordering::SeqCst);
        let latency = {
            let mut faults = self.lock_faults();
            if faults.failing_sends > 0 {
                faults.failing_sends -= 1;
                return Err(SyncError::transient("injected send failure"));
            }
            faults.send_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let message = {
            let mut state = self.lock_state();
            let created_at = match state.next_timestamp {
                Some(pinned) => {
                    state.next_timestamp = Some(pinned + ChronoDuration::seconds(1));
                    pinned
                }
                None => Utc::now(),
            };
            let message = Message {
                id: MessageId::new(Uuid::new_v4().to_string()),
                sender_id: sender.clone(),
                receiver_id: receiver.clone(),
                content: content.to_string(),
                created_at,
                is_read: false,
                related_product_id: context.related_product_id.clone(),
                related_order_id: context.related_order_id.clone(),
            };
            state.messages.push(message.clone());
            message
        };
        self.emit(ChangeKind::Insert, &message);
        Ok(message)
    }

    async fn mark_read(&self, message_id: &MessageId) -> SyncResult<()> {
        self.counters.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        let updated = {
            let mut state = self.lock_state();
            state
                .messages
                .iter_mut()
                .find(|m| &m.id == message_id && !m.is_read)
                .map(|m| {
                    m.is_read = true;
                    m.clone()
                })
        };
        if let Some(message) = updated {
            self.emit(ChangeKind::Update, &message);
        }
        Ok(())
    }

    async fn mark_conversation_read(&self, user: &UserId, other: &UserId) -> SyncResult<()> {
        self.counters
            .mark_conversation_read_calls
            .fetch_add(1, Ordering::SeqCst);
        let updated: Vec<Message> = {
            let mut state = self.lock_state();
            state
                .messages
                .iter_mut()
                .filter(|m| &m.sender_id == other && &m.receiver_id == user && !m.is_read)
                .map(|m| {
                    m.is_read = true;
                    m.clone()
                })
                .collect()
        };
        for message in &updated {
            self.emit(ChangeKind::Update, message);
        }
        Ok(())
    }

    async fn subscribe(&self, filter: SubscriptionFilter) -> SyncResult<RawEventStream> {
        self.counters.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.lock_faults().subscribe_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        {
            let mut faults = self.lock_faults();
            if faults.failing_subscribes > 0 {
                faults.failing_subscribes -= 1;
                return Err(SyncError::transient("injected subscribe failure"));
            }
        }

        self.counters.open_feeds.fetch_add(1, Ordering::SeqCst);
        let feed = FeedState {
            rx: self.changes.subscribe(),
            filter,
            finished: false,
            _guard: FeedGuard(Arc::clone(&self.counters.open_feeds)),
        };

        let stream = stream::unfold(feed, |mut feed| async move {
            if feed.finished {
                return None;
            }
            loop {
                match feed.rx.recv().await {
                    Ok(FeedItem::Change(raw)) => {
                        if !passes(&feed.filter, &raw) {
                            continue;
                        }
                        return Some((Ok(raw), feed));
                    }
                    Ok(FeedItem::Disconnect) => {
                        feed.finished = true;
                        return Some((Err(SyncError::transient("feed disconnected")), feed));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("[MemoryStore] Feed lagged, skipped {} changes", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// In-memory profile directory
#[derive(Debug, Default)]
pub struct MemoryProfileDirectory {
    profiles: Mutex<HashMap<UserId, ProfileSnippet>>,
    lookups: AtomicUsize,
}

impl MemoryProfileDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserId, profile: ProfileSnippet) {
        self.profiles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(user, profile);
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileDirectory for MemoryProfileDirectory {
    async fn lookup(&self, user: &UserId) -> SyncResult<Option<ProfileSnippet>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .profiles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(user)
            .cloned())
    }
}
