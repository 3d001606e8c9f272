//! Send path through a full session

use crate::common::*;
use farmchat::gateway::SendContext;
use farmchat::shared::SyncError;
use std::time::Duration;

#[tokio::test]
async fn test_double_submit_sends_once() {
    let world = TestWorld::new();
    world.store.set_send_latency(Some(Duration::from_millis(30)));
    let buyer = world.session("u2").await;

    let receiver: farmchat::shared::messaging::UserId = "u1".into();
    let context = SendContext::default();
    let (first, second) = tokio::join!(
        buyer.send(&receiver, "Two dozen please", &context),
        buyer.send(&receiver, "Two dozen please", &context)
    );
    assert_ok!(first);
    assert_err!(second, SyncError::Busy);
    assert_eq!(world.store.message_count(), 1);
}

#[tokio::test]
async fn test_rapid_resend_is_rate_limited() {
    let world = TestWorld::new();
    let buyer = world.session("u2").await;

    assert_ok!(buyer.send(&"u1".into(), "Hello", &SendContext::default()).await);
    let rejected = buyer.send(&"u1".into(), "Anyone?", &SendContext::default()).await;
    assert_err!(rejected, SyncError::RateLimited { .. });

    tokio::time::sleep(world.config.send.min_interval).await;
    assert_ok!(buyer.send(&"u1".into(), "Anyone?", &SendContext::default()).await);
    assert_eq!(world.store.message_count(), 2);
}

#[tokio::test]
async fn test_failed_send_leaves_state_untouched() {
    let world = TestWorld::new();
    let buyer = world.session("u2").await;
    world.store.fail_next_sends(1);

    let failed = buyer.send(&"u1".into(), "Hello", &SendContext::default()).await;
    assert_err!(failed, SyncError::TransientIo { .. });
    assert!(buyer.snapshot().conversations.is_empty());

    let sent = assert_ok!(buyer.send(&"u1".into(), "Hello", &SendContext::default()).await);
    assert_eq!(sent.content, "Hello");
    assert_eq!(buyer.snapshot().conversations.len(), 1);
}

#[tokio::test]
async fn test_send_carries_order_context() {
    let world = TestWorld::new();
    let buyer = world.session("u2").await;
    let context = SendContext {
        related_product_id: None,
        related_order_id: Some("order-981".into()),
    };
    let sent = assert_ok!(buyer.send(&"u1".into(), "About my order", &context).await);
    let stored = world.store.message(&sent.id).unwrap();
    assert_eq!(stored.related_order_id.as_deref(), Some("order-981"));
}
