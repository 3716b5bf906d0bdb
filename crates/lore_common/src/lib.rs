//! Lore Common - evidence loop and query router
//!
//! Two independent subsystems sharing one ambient stack:
//!
//! - `evidence`: turns interaction events into confidence-scored insights
//!   and persists the confident ones to a graph store.
//! - `router`: answers free-text queries from vector, full-text and
//!   analytic backends.
//!
//! Every external collaborator (LLM, graph store, retrieval backends) is
//! injected behind a trait. Fakes for tests live next to the real clients.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod evidence;
pub mod fingerprint;
pub mod graph;
pub mod llm;
pub mod metrics;
pub mod retry;
pub mod router;

pub use cancel::{cancel_pair, with_deadline, CancelHandle, CancelSignal, Interrupt};
pub use config::{EvidenceSettings, LoreConfig, RouterSettings};
pub use error::{LoreError, Result};
pub use event::{Batch, Event};
pub use evidence::{
    spawn_evidence_worker, EvidenceLoop, EvidenceOrchestrator, Insight, LoopStage, RunSummary,
};
pub use fingerprint::{fingerprint, insight_id};
pub use graph::{GraphStore, MemoryGraphStore, SqliteGraphStore};
pub use llm::{FakeLlmClient, HttpLlmClient, LlmCaller, LlmConfig, LlmError};
pub use metrics::LoreMetrics;
pub use retry::RetryPolicy;
pub use router::{Mode, Query, QueryRouter, RouteResponse, RoutingDecision, SourceAdapter, SourceResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
