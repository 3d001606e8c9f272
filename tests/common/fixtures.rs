//! Shared fixtures: an in-memory world and message builders

use chrono::{TimeZone, Utc};
use farmchat::gateway::{MemoryMessageStore, MemoryProfileDirectory};
use farmchat::projection::ProjectionSnapshot;
use farmchat::session::{SyncDeps, SyncSession};
use farmchat::shared::messaging::{Message, MessageId, ProfileSnippet, UserId, UserKind};
use farmchat::shared::SyncConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Config with short windows so tests run quickly on the real clock
pub fn fast_config() -> SyncConfig {
    SyncConfig::builder()
        .min_send_interval(Duration::from_millis(20))
        .send_stale_after(Duration::from_millis(500))
        .duplicate_window(Duration::from_millis(100))
        .retry_base_delay(Duration::from_millis(5))
        .retry_max_delay(Duration::from_millis(20))
        .retry_max_attempts(3)
        .build()
        .expect("valid test config")
}

/// One process worth of collaborators shared by several sessions
pub struct TestWorld {
    pub store: Arc<MemoryMessageStore>,
    pub directory: Arc<MemoryProfileDirectory>,
    pub deps: SyncDeps,
    pub config: SyncConfig,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        let store = Arc::new(MemoryMessageStore::new(config.feed_buffer));
        let directory = Arc::new(MemoryProfileDirectory::new());
        let deps = SyncDeps::new(store.clone(), directory.clone(), &config);
        Self {
            store,
            directory,
            deps,
            config,
        }
    }

    /// Pin message timestamps, starting at `secs` since the epoch
    pub fn pin_clock(&self, secs: i64) {
        self.store.set_clock(Utc.timestamp_opt(secs, 0).unwrap());
    }

    pub fn register_farmer(&self, id: &str, name: &str) {
        let profile = ProfileSnippet {
            display_name: Some(name.to_string()),
            kind: Some(UserKind::Farmer),
            avatar_url: None,
        };
        self.store.register_profile(id.into(), profile.clone());
        self.directory.insert(id.into(), profile);
    }

    pub async fn session(&self, user: &str) -> SyncSession {
        assert_ok!(
            SyncSession::start(user.into(), &self.deps, self.config.clone()).await,
            "session start"
        )
    }
}

/// Unread message from `from` to `to` created at `at` seconds
pub fn message(id: &str, from: &str, to: &str, content: &str, at: i64) -> Message {
    Message {
        id: MessageId::new(id),
        sender_id: UserId::new(from),
        receiver_id: UserId::new(to),
        content: content.to_string(),
        created_at: Utc.timestamp_opt(at, 0).unwrap(),
        is_read: false,
        related_product_id: None,
        related_order_id: None,
    }
}

/// Wait until a published snapshot satisfies `done`
pub async fn wait_for(
    view: &mut watch::Receiver<ProjectionSnapshot>,
    done: impl Fn(&ProjectionSnapshot) -> bool,
) -> ProjectionSnapshot {
    let wait = async {
        loop {
            let current = view.borrow_and_update().clone();
            if done(&current) {
                return current;
            }
            view.changed().await.expect("projector stopped");
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for snapshot")
}

/// Let spawned tasks run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
