//! Vector-similarity adapter.
//!
//! Wraps an external embedding/vector service. Scores are whatever the
//! service reports (usually cosine similarity) and are only compared with
//! other vector hits.

use super::adapter::{excerpt, AdapterError, SourceAdapter, SourceResult, StoreError, VECTOR_SOURCE};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// One nearest-neighbour hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub document: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// External vector store: `query(text, k) -> [(document, score, metadata)]`
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<VectorHit>, StoreError>;
}

pub struct VectorAdapter {
    store: Arc<dyn VectorStore>,
    top_k: usize,
}

impl VectorAdapter {
    pub fn new(store: Arc<dyn VectorStore>, top_k: usize) -> Self {
        Self {
            store,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl SourceAdapter for VectorAdapter {
    fn name(&self) -> &str {
        VECTOR_SOURCE
    }

    async fn search(&self, text: &str) -> Result<Vec<SourceResult>, AdapterError> {
        let hits = self.store.query(text, self.top_k).await?;
        Ok(hits
            .into_iter()
            .filter(|hit| hit.score.is_finite())
            .map(|hit| SourceResult {
                source: VECTOR_SOURCE.to_string(),
                score: hit.score,
                excerpt: excerpt(&hit.document),
                metadata: hit.metadata,
            })
            .collect())
    }
}

// ============================================================================
// HTTP vector store
// ============================================================================

/// Vector service speaking `POST {endpoint}/query {"text", "k"}` and
/// answering `[{document, score, metadata}]`
pub struct HttpVectorStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpVectorStore {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unreachable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<VectorHit>, StoreError> {
        let url = format!("{}/query", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "text": text, "k": k }))
            .send()
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Unreachable(format!(
                "HTTP {} from vector store",
                response.status()
            )));
        }

        response
            .json::<Vec<VectorHit>>()
            .await
            .map_err(|e| StoreError::Query(format!("Invalid vector store response: {}", e)))
    }
}
