//! FarmChat simulation
//!
//! Runs a farmer/buyer exchange over the in-memory store and logs what
//! the buyer's projector shows after each step.

use chrono::{TimeZone, Utc};
use farmchat::gateway::{MemoryMessageStore, MemoryProfileDirectory, SendContext};
use farmchat::session::{SyncDeps, SyncSession};
use farmchat::shared::messaging::{ProfileSnippet, UserId, UserKind};
use farmchat::shared::SyncConfig;
use farmchat::ProjectionSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config = SyncConfig::from_env()?;
    tracing::info!(?config, "[Sim] Configuration loaded");

    let farmer = UserId::new("u1");
    let buyer = UserId::new("u2");

    let store = Arc::new(MemoryMessageStore::new(config.feed_buffer));
    store.set_clock(Utc.timestamp_opt(100, 0).single().ok_or("invalid start time")?);
    store.register_profile(
        farmer.clone(),
        ProfileSnippet {
            display_name: Some("Green Acres Farm".into()),
            kind: Some(UserKind::Farmer),
            avatar_url: None,
        },
    );
    let directory = Arc::new(MemoryProfileDirectory::new());
    directory.insert(
        buyer.clone(),
        ProfileSnippet {
            display_name: Some("Corner Grocer".into()),
            kind: Some(UserKind::Buyer),
            avatar_url: None,
        },
    );

    let deps = SyncDeps::new(store.clone(), directory, &config);
    let farmer_session = SyncSession::start(farmer.clone(), &deps, config.clone()).await?;
    let buyer_session = SyncSession::start(buyer.clone(), &deps, config.clone()).await?;
    let mut buyer_view = buyer_session.subscribe_snapshots();

    farmer_session
        .send(&buyer, "Hello", &SendContext::default())
        .await?;
    let snapshot = wait_for(&mut buyer_view, |s| s.total_unread() == 1).await?;
    report("message received", &snapshot);

    let batch = buyer_session.open_conversation(&farmer).await?;
    tracing::info!(cleared = batch.cleared, "[Sim] Buyer opened the conversation");
    report("conversation opened", &buyer_session.snapshot());

    tokio::time::sleep(config.send.min_interval).await;
    farmer_session
        .send(
            &buyer,
            "Still there?",
            &SendContext {
                related_product_id: Some("eggs-dozen".into()),
                related_order_id: None,
            },
        )
        .await?;
    let snapshot = wait_for(&mut buyer_view, |s| {
        s.open.as_ref().map(|o| o.messages.len()) == Some(2)
    })
    .await?;
    report("second message while viewing", &snapshot);

    let metrics = deps.metrics.snapshot();
    tracing::info!(
        applied = metrics.events_applied,
        duplicates = metrics.duplicates_ignored,
        duplicate_rate = metrics.duplicate_rate(),
        feeds_opened = metrics.feeds_opened,
        "[Sim] Metrics"
    );

    buyer_session.shutdown();
    farmer_session.shutdown();
    tracing::info!(live_feeds = deps.registry.live_feeds(), "[Sim] Done");
    Ok(())
}

async fn wait_for(
    view: &mut watch::Receiver<ProjectionSnapshot>,
    done: impl Fn(&ProjectionSnapshot) -> bool,
) -> Result<ProjectionSnapshot, Box<dyn std::error::Error>> {
    let wait = async {
        loop {
            let current = view.borrow_and_update().clone();
            if done(&current) {
                return Ok::<_, watch::error::RecvError>(current);
            }
            view.changed().await?;
        }
    };
    Ok(tokio::time::timeout(Duration::from_secs(5), wait).await??)
}

fn report(step: &str, snapshot: &ProjectionSnapshot) {
    for summary in &snapshot.conversations {
        tracing::info!(
            step,
            with = %summary.other_user_id,
            name = summary.other_user.display_name.as_deref().unwrap_or("?"),
            last = %summary.last_message_content,
            unread = summary.unread_count,
            "[Sim] Conversation"
        );
    }
    if let Some(open) = &snapshot.open {
        tracing::info!(
            step,
            with = %open.other_user_id,
            messages = open.messages.len(),
            viewing = open.viewing,
            "[Sim] Open thread"
        );
    }
}
