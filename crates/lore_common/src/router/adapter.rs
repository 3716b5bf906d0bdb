//! Source adapter capability and shared result type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

pub const VECTOR_SOURCE: &str = "vector";
pub const FULLTEXT_SOURCE: &str = "fulltext";
pub const ANALYTIC_SOURCE: &str = "analytic";

/// Maximum excerpt length in characters
pub const EXCERPT_CHARS: usize = 280;

/// One hit from one source. `score` only orders hits of the same source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: String,
    pub score: f64,
    pub excerpt: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Why an adapter produced no answer. An empty result list is not an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// Failure reported by a backing store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("store query failed: {0}")]
    Query(String),
}

impl From<StoreError> for AdapterError {
    fn from(e: StoreError) -> Self {
        AdapterError::Unavailable(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// A retrieval backend behind a uniform search interface
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry name, also used as `SourceResult::source`
    fn name(&self) -> &str;

    async fn search(&self, text: &str) -> Result<Vec<SourceResult>, AdapterError>;
}

/// Trim `text` to `EXCERPT_CHARS` characters on a char boundary
pub fn excerpt(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.char_indices();
    match chars.nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

// ============================================================================
// Static adapter (testing)
// ============================================================================

/// Adapter with a fixed response and call counting
pub struct StaticAdapter {
    name: String,
    response: Result<Vec<SourceResult>, AdapterError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl StaticAdapter {
    /// Returns results built from `(score, excerpt)` pairs
    pub fn with_hits(name: &str, hits: &[(f64, &str)]) -> Self {
        let results = hits
            .iter()
            .map(|(score, text)| SourceResult {
                source: name.to_string(),
                score: *score,
                excerpt: text.to_string(),
                metadata: Map::new(),
            })
            .collect();
        Self::new(name, Ok(results))
    }

    /// Always `Unavailable`
    pub fn unavailable(name: &str) -> Self {
        Self::new(name, Err(AdapterError::Unavailable("backend down".into())))
    }

    pub fn new(name: &str, response: Result<Vec<SourceResult>, AdapterError>) -> Self {
        Self {
            name: name.to_string(),
            response,
            delay: None,
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering (to exercise deadlines)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, text: &str) -> Result<Vec<SourceResult>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(text.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }
}
