//! Farmer/buyer exchange from first message to a read conversation

use crate::common::*;
use farmchat::gateway::SendContext;
use farmchat::shared::messaging::UserId;
use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_message_open_and_live_read() {
    let world = TestWorld::new();
    world.pin_clock(100);
    world.register_farmer("u1", "Green Acres");

    let farmer = world.session("u1").await;
    let buyer = world.session("u2").await;
    let mut buyer_view = buyer.subscribe_snapshots();

    assert_ok!(farmer.send(&"u2".into(), "Hello", &SendContext::default()).await);
    let snapshot = wait_for(&mut buyer_view, |s| s.total_unread() == 1).await;
    assert_eq!(snapshot.conversations.len(), 1);
    let summary = &snapshot.conversations[0];
    assert_eq!(summary.other_user_id, UserId::new("u1"));
    assert_eq!(summary.last_message_content, "Hello");
    assert_eq!(summary.other_user.display_name.as_deref(), Some("Green Acres"));
    assert_unread!(snapshot, "u1", 1);

    let batch = assert_ok!(buyer.open_conversation(&"u1".into()).await);
    assert_eq!(batch.cleared, 1);
    assert_unread!(buyer.snapshot(), "u1", 0);
    assert_eq!(
        world.store.counters().mark_conversation_read_calls.load(Ordering::SeqCst),
        1
    );

    // Record every unread total the buyer publishes from here on
    let observed = Arc::new(Mutex::new(Vec::new()));
    let watcher = {
        let observed = observed.clone();
        let mut view = buyer.subscribe_snapshots();
        tokio::spawn(async move {
            while view.changed().await.is_ok() {
                let total = view.borrow_and_update().total_unread();
                observed.lock().unwrap().push(total);
            }
        })
    };

    tokio::time::sleep(world.config.send.min_interval).await;
    let second = assert_ok!(farmer.send(&"u2".into(), "Still there?", &SendContext::default()).await);
    let snapshot = wait_for(&mut buyer_view, |s| {
        s.open.as_ref().map(|o| o.messages.len()) == Some(2)
    })
    .await;

    let open = snapshot.open.as_ref().unwrap();
    assert!(open.viewing);
    assert!(open.messages.iter().all(|m| m.is_read));
    assert_unread!(snapshot, "u1", 0);
    assert_eq!(snapshot.conversations[0].last_message_content, "Still there?");

    // The self-emitted read is persisted
    for _ in 0..100 {
        if world.store.message(&second.id).map(|m| m.is_read) == Some(true) {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(world.store.message(&second.id).unwrap().is_read);

    settle().await;
    watcher.abort();
    assert!(observed.lock().unwrap().iter().all(|total| *total == 0));
}

#[tokio::test]
async fn test_sender_sees_own_message_once() {
    let world = TestWorld::new();
    let farmer = world.session("u1").await;
    let mut view = farmer.subscribe_snapshots();

    let sent = assert_ok!(farmer.send(&"u2".into(), "Fresh eggs", &SendContext::default()).await);
    let snapshot = farmer.snapshot();
    assert_eq!(snapshot.conversations.len(), 1);
    assert_unread!(snapshot, "u2", 0);

    // The feed echo arrives later and is absorbed
    for _ in 0..100 {
        if world.deps.metrics.snapshot().duplicates_ignored >= 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(world.deps.metrics.snapshot().duplicates_ignored, 1);
    let after = wait_for(&mut view, |s| s.conversations.len() == 1).await;
    assert_eq!(after.conversations[0].last_message_sender_id, Some(sent.sender_id));
    assert_unread!(after, "u2", 0);
}
