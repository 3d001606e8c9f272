//! Out-of-order, repeated, malformed and racing deliveries through live feeds

use crate::common::*;
use farmchat::gateway::SendContext;
use farmchat::shared::messaging::{ChangeKind, RawChangeEvent};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn test_late_older_message_does_not_regress_preview() {
    let world = TestWorld::new();
    let buyer = world.session("u2").await;
    let mut view = buyer.subscribe_snapshots();

    let later = message("m2", "u1", "u2", "Pick-up moved to Friday", 200);
    let earlier = message("m1", "u1", "u2", "Pick-up is Thursday", 100);
    assert_ok!(world.store.publish_message(ChangeKind::Insert, &later));
    assert_ok!(world.store.publish_message(ChangeKind::Insert, &earlier));

    let snapshot = wait_for(&mut view, |s| s.total_unread() == 2).await;
    let summary = snapshot.conversation_with(&"u1".into()).unwrap();
    assert_eq!(summary.last_message_content, "Pick-up moved to Friday");
    assert_eq!(summary.last_message_at, Some(later.created_at));
}

#[tokio::test]
async fn test_redelivered_events_are_absorbed() {
    let world = TestWorld::new();
    let buyer = world.session("u2").await;
    let mut view = buyer.subscribe_snapshots();

    let hello = message("m1", "u1", "u2", "Hello", 100);
    for _ in 0..3 {
        assert_ok!(world.store.publish_message(ChangeKind::Insert, &hello));
    }
    let marker = message("m2", "u3", "u2", "marker", 101);
    assert_ok!(world.store.publish_message(ChangeKind::Insert, &marker));

    let snapshot = wait_for(&mut view, |s| s.conversation_with(&"u3".into()).is_some()).await;
    assert_unread!(snapshot, "u1", 1);
    assert_eq!(world.deps.metrics.snapshot().duplicates_ignored, 2);
}

#[tokio::test]
async fn test_repeated_reads_never_go_negative() {
    let world = TestWorld::new();
    let buyer = world.session("u2").await;
    let mut view = buyer.subscribe_snapshots();

    let mut hello = message("m1", "u1", "u2", "Hello", 100);
    assert_ok!(world.store.publish_message(ChangeKind::Insert, &hello));
    hello.is_read = true;
    for _ in 0..4 {
        assert_ok!(world.store.publish_message(ChangeKind::Update, &hello));
    }
    let marker = message("m2", "u3", "u2", "marker", 101);
    assert_ok!(world.store.publish_message(ChangeKind::Insert, &marker));

    let snapshot = wait_for(&mut view, |s| s.conversation_with(&"u3".into()).is_some()).await;
    assert_unread!(snapshot, "u1", 0);
    assert_unread!(snapshot, "u3", 1);
}

#[tokio::test]
async fn test_malformed_event_does_not_halt_feed() {
    let world = TestWorld::new();
    let buyer = world.session("u2").await;
    let mut view = buyer.subscribe_snapshots();

    world.store.publish(RawChangeEvent::insert(serde_json::json!({
        "sender_id": "u1",
        "receiver_id": "u2",
        "content": "no id"
    })));
    assert_ok!(world
        .store
        .publish_message(ChangeKind::Insert, &message("m1", "u1", "u2", "Hello", 100)));

    let snapshot = wait_for(&mut view, |s| s.total_unread() == 1).await;
    assert_eq!(snapshot.conversations.len(), 1);
    assert_eq!(world.deps.metrics.snapshot().malformed_dropped, 1);
}

#[tokio::test]
async fn test_feed_recovers_after_disconnect() {
    let world = TestWorld::new();
    let buyer = world.session("u2").await;
    let mut view = buyer.subscribe_snapshots();

    world.store.disconnect_feeds();
    for _ in 0..100 {
        if world.deps.metrics.snapshot().reconnects >= 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(buyer.feed_status(), Some(farmchat::FeedStatus::Live));

    assert_ok!(world
        .store
        .publish_message(ChangeKind::Insert, &message("m1", "u1", "u2", "Back online", 100)));
    let snapshot = wait_for(&mut view, |s| s.total_unread() == 1).await;
    assert_eq!(snapshot.conversations[0].last_message_content, "Back online");
}

#[tokio::test]
async fn test_message_sent_while_subscribing_is_not_lost() {
    let world = TestWorld::new();
    let farmer = world.session("u1").await;
    world.store.set_subscribe_latency(Some(Duration::from_millis(50)));

    let send_meanwhile = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        farmer.send(&"u2".into(), "Hello", &SendContext::default()).await
    };
    let (buyer, sent) = tokio::join!(world.session("u2"), send_meanwhile);
    assert_ok!(sent);

    let snapshot = buyer.snapshot();
    assert_unread!(snapshot, "u1", 1);
    assert_eq!(snapshot.conversations[0].last_message_content, "Hello");
}

#[tokio::test]
async fn test_message_arriving_while_history_loads_joins_thread() {
    let world = TestWorld::new();
    let farmer = world.session("u1").await;
    let buyer = world.session("u2").await;
    let mut view = buyer.subscribe_snapshots();
    world.store.set_history_latency(Some(Duration::from_millis(50)));

    let send_meanwhile = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        farmer.send(&"u2".into(), "Just picked", &SendContext::default()).await
    };
    let other: farmchat::shared::messaging::UserId = "u1".into();
    let (opened, sent) = tokio::join!(buyer.open_conversation(&other), send_meanwhile);
    assert_ok!(opened);
    let sent = assert_ok!(sent);

    let snapshot = wait_for(&mut view, |s| {
        s.open
            .as_ref()
            .is_some_and(|o| o.messages.iter().any(|m| m.id == sent.id && m.is_read))
    })
    .await;
    assert_eq!(snapshot.open.as_ref().map(|o| o.messages.len()), Some(1));
    assert_unread!(snapshot, "u1", 0);
}
