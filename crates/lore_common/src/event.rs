//! Interaction events and batches.
//!
//! Events are produced by external collaborators (chat handlers, scheduled
//! ticks, correction submissions) and are never mutated once ingested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single interaction event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: &str, payload: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Builder-style timestamp override
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builder-style payload field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Stable content fingerprint (ignores the timestamp)
    pub fn fingerprint(&self) -> String {
        crate::fingerprint::fingerprint(self)
    }
}

/// A deduplicated, size-capped set of events ready for analysis.
/// Only `EventBatcher` constructs these, so `events` is never empty.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub events: Vec<Event>,
    pub collected_at: DateTime<Utc>,
}

impl Batch {
    pub(crate) fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            collected_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
