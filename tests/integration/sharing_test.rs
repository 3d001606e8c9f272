//! Feed sharing between consumers of the same key

use crate::common::*;
use farmchat::gateway::SendContext;
use farmchat::realtime::{Dispatch, SubscriptionKey};
use farmchat::shared::messaging::NormalizedEvent;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn noop() -> Dispatch {
    Arc::new(|_event: NormalizedEvent| {})
}

#[tokio::test]
async fn test_concurrent_acquire_shares_one_feed() {
    let world = TestWorld::new();
    world.store.set_subscribe_latency(Some(Duration::from_millis(20)));
    let key = SubscriptionKey::conversation("u2".into(), "u1".into());
    let registry = &world.deps.registry;

    let (a, b) = tokio::join!(registry.acquire(key.clone(), noop()), registry.acquire(key.clone(), noop()));
    let (a, b) = (assert_ok!(a), assert_ok!(b));
    assert_eq!(world.store.counters().subscribe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(registry.ref_count(&key), 2);

    registry.release(&a);
    settle().await;
    assert_eq!(world.store.counters().open_feeds(), 1);

    registry.release(&b);
    registry.release(&b);
    settle().await;
    assert_eq!(world.store.counters().open_feeds(), 0);
    assert_eq!(registry.live_feeds(), 0);
}

#[tokio::test]
async fn test_two_views_of_one_user_share_feeds() {
    let world = TestWorld::new();
    let phone = world.session("u2").await;
    let laptop = world.session("u2").await;
    assert_ok!(phone.open_conversation(&"u1".into()).await);
    assert_ok!(laptop.open_conversation(&"u1".into()).await);

    let registry = &world.deps.registry;
    assert_eq!(registry.live_feeds(), 2);
    assert_eq!(registry.ref_count(&SubscriptionKey::all_messages("u2".into())), 2);
    assert_eq!(
        registry.ref_count(&SubscriptionKey::conversation("u2".into(), "u1".into())),
        2
    );
    assert_eq!(world.store.counters().subscribe_calls.load(Ordering::SeqCst), 2);

    let farmer = world.session("u1").await;
    let mut phone_view = phone.subscribe_snapshots();
    let mut laptop_view = laptop.subscribe_snapshots();
    assert_ok!(farmer.send(&"u2".into(), "Harvest is in", &SendContext::default()).await);
    for view in [&mut phone_view, &mut laptop_view] {
        let snapshot = wait_for(view, |s| s.open.as_ref().map(|o| o.messages.len()) == Some(1)).await;
        assert_unread!(snapshot, "u1", 0);
    }

    phone.shutdown();
    assert_eq!(registry.ref_count(&SubscriptionKey::all_messages("u2".into())), 1);
    laptop.shutdown();
    assert_eq!(registry.ref_count(&SubscriptionKey::all_messages("u2".into())), 0);
    assert_eq!(registry.live_feeds(), 1);

    farmer.shutdown();
    settle().await;
    assert_eq!(registry.live_feeds(), 0);
    assert_eq!(world.store.counters().open_feeds(), 0);
}

#[tokio::test]
async fn test_dropped_session_releases_feeds() {
    let world = TestWorld::new();
    {
        let buyer = world.session("u2").await;
        assert_ok!(buyer.open_conversation(&"u1".into()).await);
        assert_eq!(world.deps.registry.live_feeds(), 2);
    }
    assert_eq!(world.deps.registry.live_feeds(), 0);
}
