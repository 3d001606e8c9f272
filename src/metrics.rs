//! # Sync Metrics
//!
//! Counters describing how the sync engine is behaving: how many events
//! were folded, how many deliveries were duplicates, how often feeds had
//! to reconnect and how sends fared.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared, lock-free counters
#[derive(Debug, Default)]
pub struct SyncMetrics {
    events_applied: AtomicU64,
    duplicates_ignored: AtomicU64,
    malformed_dropped: AtomicU64,
    feeds_opened: AtomicU64,
    feeds_closed: AtomicU64,
    reconnects: AtomicU64,
    sends_accepted: AtomicU64,
    sends_rejected: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_applied: u64,
    pub duplicates_ignored: u64,
    pub malformed_dropped: u64,
    pub feeds_opened: u64,
    pub feeds_closed: u64,
    pub reconnects: u64,
    pub sends_accepted: u64,
    pub sends_rejected: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feed_opened(&self) {
        self.feeds_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_feed_closed(&self) {
        self.feeds_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send(&self, accepted: bool) {
        if accepted {
            self.sends_accepted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sends_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_applied: self.events_applied.load(Ordering::Relaxed),
            duplicates_ignored: self.duplicates_ignored.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            feeds_opened: self.feeds_opened.load(Ordering::Relaxed),
            feeds_closed: self.feeds_closed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            sends_accepted: self.sends_accepted.load(Ordering::Relaxed),
            sends_rejected: self.sends_rejected.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Share of folded events that were duplicate deliveries
    pub fn duplicate_rate(&self) -> f64 {
        let total = self.events_applied + self.duplicates_ignored;
        if total == 0 {
            0.0
        } else {
            self.duplicates_ignored as f64 / total as f64
        }
    }
}
