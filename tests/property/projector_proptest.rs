//! Property-based tests for the conversation projector
//!
//! Messages are derived from a small id space so generated sequences hit
//! redeliveries, overtaking reads and timestamp ties often.

use chrono::{TimeZone, Utc};
use farmchat::projection::ConversationProjector;
use farmchat::shared::messaging::{Message, MessageId, NormalizedEvent, UserId};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

const OTHERS: [&str; 3] = ["farmer-a", "farmer-b", "buyer-c"];
const OBSERVER: &str = "me";

#[derive(Debug, Clone, Copy)]
enum Op {
    Create(u8),
    Read(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..12).prop_map(Op::Create),
        2 => (0u8..12).prop_map(Op::Read),
    ]
}

fn other_of(i: u8) -> &'static str {
    OTHERS[i as usize % OTHERS.len()]
}

fn incoming(i: u8) -> bool {
    i % 2 == 0
}

fn message_for(i: u8) -> Message {
    let other = UserId::new(other_of(i));
    let me = UserId::new(OBSERVER);
    let (sender_id, receiver_id) = if incoming(i) { (other, me) } else { (me, other) };
    Message {
        id: MessageId::new(format!("m{i}")),
        sender_id,
        receiver_id,
        content: format!("message {i}"),
        created_at: Utc.timestamp_opt(i64::from(i) * 7 % 11, 0).unwrap(),
        is_read: i % 5 == 0,
        related_product_id: None,
        related_order_id: None,
    }
}

fn event_for(op: Op) -> NormalizedEvent {
    match op {
        Op::Create(i) => NormalizedEvent::created(message_for(i)),
        Op::Read(i) => {
            let mut message = message_for(i);
            message.is_read = true;
            NormalizedEvent::read(message)
        }
    }
}

fn run(ops: &[Op]) -> ConversationProjector {
    let mut projector = ConversationProjector::with_limits(OBSERVER.into(), 64, 40);
    for op in ops {
        projector.apply(event_for(*op));
    }
    projector
}

proptest! {
    #[test]
    fn test_unread_matches_model(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let projector = run(&ops);

        let created: HashSet<u8> = ops.iter().filter_map(|op| match op {
            Op::Create(i) => Some(*i),
            Op::Read(_) => None,
        }).collect();
        let read: HashSet<u8> = ops.iter().filter_map(|op| match op {
            Op::Read(i) => Some(*i),
            Op::Create(_) => None,
        }).collect();

        let mut expected: HashMap<&str, u32> = HashMap::new();
        for i in &created {
            if incoming(*i) && i % 5 != 0 && !read.contains(i) {
                *expected.entry(other_of(*i)).or_default() += 1;
            }
        }

        for other in OTHERS {
            let actual = projector.summary(&other.into()).map_or(0, |s| s.unread_count);
            prop_assert_eq!(actual, expected.get(other).copied().unwrap_or(0), "unread with {}", other);
        }
    }

    #[test]
    fn test_last_message_is_latest_created(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let projector = run(&ops);

        for other in OTHERS {
            let latest = ops.iter().filter_map(|op| match op {
                Op::Create(i) if other_of(*i) == other => Some(message_for(*i).created_at),
                _ => None,
            }).max();
            let summary = projector.summary(&other.into());
            prop_assert_eq!(summary.and_then(|s| s.last_message_at), latest);
        }
    }

    #[test]
    fn test_one_summary_per_user(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let projector = run(&ops);
        let mut seen = HashSet::new();
        for summary in projector.conversations() {
            prop_assert!(seen.insert(summary.other_user_id.clone()));
        }
    }

    #[test]
    fn test_redelivery_is_absorbed(
        ops in prop::collection::vec(op_strategy(), 0..40),
        last in op_strategy(),
    ) {
        let mut once = ops.clone();
        once.push(last);
        let mut twice = once.clone();
        twice.push(last);

        prop_assert_eq!(run(&once).snapshot(), run(&twice).snapshot());
    }
}
