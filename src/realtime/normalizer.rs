//! Event Normalizer
//!
//! Turns loosely typed change rows into [`NormalizedEvent`]s. This is a
//! pure function: the same raw event always yields the same result and
//! no shared state is touched.
//!
//! | Raw kind | `is_read` | Result |
//! |---|---|---|
//! | `INSERT` | any | `MessageCreated` |
//! | `UPDATE` | `true` | `MessageRead` |
//! | `UPDATE` | `false` | no event |

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::shared::error::{SyncError, SyncResult};
use crate::shared::messaging::{
    ChangeKind, Message, MessageId, NormalizedEvent, ProfileSnippet, RawChangeEvent, UserId,
};

/// Normalize one raw change.
///
/// Returns `Ok(None)` for updates that carry no read transition and
/// `Err(SyncError::MalformedEvent)` when required fields are missing.
pub fn normalize(raw: &RawChangeEvent) -> SyncResult<Option<NormalizedEvent>> {
    let record = raw
        .record
        .as_object()
        .ok_or_else(|| SyncError::malformed("record is not an object"))?;

    let id = required_str(record, "id")?;
    let sender_id = required_str(record, "sender_id")?;
    let receiver_id = required_str(record, "receiver_id")?;
    if sender_id == receiver_id {
        return Err(SyncError::malformed(format!(
            "message {} has identical sender and receiver",
            id
        )));
    }

    let created_at = match (raw.kind, parse_timestamp(record.get("created_at"))) {
        (_, Some(ts)) => ts,
        (ChangeKind::Insert, None) => {
            return Err(SyncError::malformed(format!(
                "insert of message {} has no valid created_at",
                id
            )))
        }
        // Reads only need the id and the participants
        (ChangeKind::Update, None) => DateTime::<Utc>::UNIX_EPOCH,
    };

    let is_read = record.get("is_read").and_then(Value::as_bool).unwrap_or(false);
    let message = Message {
        id: MessageId::new(id),
        sender_id: UserId::new(sender_id),
        receiver_id: UserId::new(receiver_id),
        content: optional_str(record, "content").unwrap_or_default(),
        created_at,
        is_read,
        related_product_id: optional_str(record, "related_product_id"),
        related_order_id: optional_str(record, "related_order_id"),
    };

    let mut event = match raw.kind {
        ChangeKind::Insert => NormalizedEvent::created(message),
        ChangeKind::Update if is_read => NormalizedEvent::read(message),
        ChangeKind::Update => return Ok(None),
    };
    event.sender_profile = profile(record.get("sender"));
    event.receiver_profile = profile(record.get("receiver"));
    Ok(Some(event))
}

fn required_str(record: &Map<String, Value>, field: &str) -> SyncResult<String> {
    optional_str(record, field)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SyncError::malformed(format!("missing required field '{}'", field)))
}

/// Strings are taken as-is; numeric ids are accepted in decimal form.
fn optional_str(record: &Map<String, Value>, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// A snippet that fails to parse or carries nothing is treated as absent
fn profile(value: Option<&Value>) -> Option<ProfileSnippet> {
    let value = value?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value::<ProfileSnippet>(value.clone())
        .ok()
        .filter(|snippet| !snippet.is_empty())
}
