//! Evidence Loop
//!
//! Turns batches of interaction events into confidence-scored insights:
//!
//! ingest -> analyze -> generate -> persist -> apply
//!
//! `EvidenceLoop::run_once` executes the five stages for one batch and is
//! safe to call directly in tests. `EvidenceOrchestrator` adds the
//! single-flight + cooldown guarantee, and `spawn_evidence_worker` feeds it
//! from a channel.

mod analyzer;
mod batcher;
mod engine;
mod generator;
mod orchestrator;
mod store;
mod tracker;

pub use analyzer::PatternAnalyzer;
pub use batcher::EventBatcher;
pub use engine::EvidenceLoop;
pub use generator::{build_prompt, parse_insights, Generation, InsightGenerator};
pub use orchestrator::{spawn_evidence_worker, EvidenceOrchestrator, WorkerHandle};
pub use store::{InsightStore, PersistReport, INSIGHT_LABEL};
pub use tracker::ApplicationTracker;

use crate::event::Event;
use crate::fingerprint::insight_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Occurrences of one event type within a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSummary {
    pub event_type: String,
    pub count: usize,
    /// First few events of this type, in batch order
    pub samples: Vec<Event>,
}

/// A confidence-scored behavioral insight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    pub pattern: String,
    pub action: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    /// New insight; the id depends only on `(pattern, action)` and
    /// confidence is clamped into [0, 1]
    pub fn new(pattern: &str, action: &str, confidence: f64) -> Self {
        Self {
            id: insight_id(pattern, action),
            pattern: pattern.trim().to_string(),
            action: action.trim().to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }

    /// Graph node properties
    pub fn to_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("id".into(), Value::String(self.id.clone()));
        props.insert("pattern".into(), Value::String(self.pattern.clone()));
        props.insert("action".into(), Value::String(self.action.clone()));
        props.insert("confidence".into(), Value::from(self.confidence));
        props.insert("created_at".into(), Value::String(self.created_at.to_rfc3339()));
        props
    }
}

/// Outcome of one evidence loop run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub insights_generated: usize,
    pub insights_persisted: usize,
    pub insights_applied: usize,
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopStage {
    #[default]
    Idle,
    Collecting,
    Analyzing,
    Generating,
    Persisting,
    Applying,
}

impl LoopStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStage::Idle => "idle",
            LoopStage::Collecting => "collecting",
            LoopStage::Analyzing => "analyzing",
            LoopStage::Generating => "generating",
            LoopStage::Persisting => "persisting",
            LoopStage::Applying => "applying",
        }
    }
}

impl std::fmt::Display for LoopStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
