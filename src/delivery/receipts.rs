//! Read-receipt tracking for one observing user.
//!
//! Marking a conversation read updates the projector first and then
//! persists the whole conversation in one store call. Calls with nothing
//! unread skip the store, so repeating the call is cheap.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::gateway::MessageStore;
use crate::projection::{ProjectorHandle, ReadBatch};
use crate::shared::error::SyncResult;
use crate::shared::messaging::UserId;

pub struct ReadReceiptTracker {
    observer: UserId,
    store: Arc<dyn MessageStore>,
    projector: ProjectorHandle,
    /// Conversations cleared locally whose persistence failed
    unpersisted: Mutex<HashSet<UserId>>,
}

impl std::fmt::Debug for ReadReceiptTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadReceiptTracker")
            .field("observer", &self.observer)
            .finish()
    }
}

impl ReadReceiptTracker {
    pub fn new(store: Arc<dyn MessageStore>, projector: ProjectorHandle) -> Self {
        Self {
            observer: projector.observer().clone(),
            store,
            projector,
            unpersisted: Mutex::new(HashSet::new()),
        }
    }

    /// Read everything `other` sent to the observer.
    ///
    /// A failed persistence is returned to the caller and retried by the
    /// next call for the same conversation even though the local state is
    /// already clear.
    pub async fn mark_conversation_read(&self, other: &UserId) -> SyncResult<ReadBatch> {
        let batch = self.projector.mark_conversation_read(other.clone()).await?;
        let retrying = self.lock_unpersisted().contains(other);
        if batch.is_empty() && !retrying {
            tracing::debug!(observer = %self.observer, other = %other, "[Receipts] Nothing unread");
            return Ok(batch);
        }

        if let Err(e) = self.store.mark_conversation_read(&self.observer, other).await {
            tracing::warn!(
                observer = %self.observer,
                other = %other,
                "[Receipts] Failed to persist read state: {}",
                e
            );
            self.lock_unpersisted().insert(other.clone());
            return Err(e);
        }
        self.lock_unpersisted().remove(other);
        tracing::info!(
            observer = %self.observer,
            other = %other,
            messages = batch.message_ids.len(),
            cleared = batch.cleared,
            "[Receipts] Conversation marked read"
        );
        Ok(batch)
    }

    fn lock_unpersisted(&self) -> MutexGuard<'_, HashSet<UserId>> {
        self.unpersisted.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
