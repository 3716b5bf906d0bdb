//! Content fingerprints.
//!
//! An event's fingerprint covers its type and payload only, so the same
//! interaction observed twice at different times collapses to one entry.
//! Payload keys are hashed in sorted order (serde_json maps are ordered),
//! which makes the digest independent of the producer's key order.
//!
//! Insight ids use the same digest over a normalised `(pattern, action)`
//! pair so regenerating an insight upserts instead of duplicating.

use crate::event::Event;
use sha2::{Digest, Sha256};

/// Separator that cannot appear in normalised text
const FIELD_SEPARATOR: u8 = 0x1f;

/// Hex length kept for insight ids
const INSIGHT_ID_LEN: usize = 24;

/// Full SHA-256 fingerprint of an event's semantic content
pub fn fingerprint(event: &Event) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.event_type.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    // Map<String, Value> serialises with sorted keys at every depth
    let payload = serde_json::Value::Object(event.payload.clone()).to_string();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic insight id from its pattern and action.
/// Case and surrounding/repeated whitespace do not change the id.
pub fn insight_id(pattern: &str, action: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(pattern).as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(normalize(action).as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("ins_{}", &digest[..INSIGHT_ID_LEN])
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
