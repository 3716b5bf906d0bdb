use super::Insight;
use crate::cancel::{with_deadline, CancelSignal, Interrupt};
use crate::error::{LoreError, Result};
use crate::graph::GraphStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Graph label for persisted insights
pub const INSIGHT_LABEL: &str = "Insight";

/// What happened to each candidate
#[derive(Debug, Default)]
pub struct PersistReport {
    pub persisted: Vec<Insight>,
    /// Below the confidence threshold
    pub discarded: usize,
    /// Write failures, one per affected insight
    pub failures: Vec<LoreError>,
}

/// Confidence gate in front of the graph store
pub struct InsightStore {
    graph: Arc<dyn GraphStore>,
    threshold: f64,
    write_timeout: Duration,
}

impl InsightStore {
    pub fn new(graph: Arc<dyn GraphStore>, threshold: f64, write_timeout: Duration) -> Self {
        Self {
            graph,
            threshold,
            write_timeout,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn qualifies(&self, insight: &Insight) -> bool {
        insight.confidence >= self.threshold
    }

    /// Upsert every qualifying candidate independently. A failed write is
    /// recorded and the remaining candidates are still attempted;
    /// cancellation stops the stage with an error.
    pub async fn persist(&self, candidates: &[Insight], cancel: &CancelSignal) -> Result<PersistReport> {
        let mut report = PersistReport::default();

        for insight in candidates {
            if !self.qualifies(insight) {
                debug!(id = %insight.id, confidence = insight.confidence, "Below threshold, discarded");
                report.discarded += 1;
                continue;
            }

            let props = insight.to_properties();
            let write = self.graph.upsert_node(INSIGHT_LABEL, &props);
            match with_deadline(write, self.write_timeout, cancel).await {
                Ok(Ok(())) => report.persisted.push(insight.clone()),
                Ok(Err(e)) => {
                    warn!(id = %insight.id, error = %e, "Insight write failed");
                    report.failures.push(LoreError::PersistenceFailure {
                        insight_id: insight.id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(Interrupt::Timeout(d)) => {
                    warn!(id = %insight.id, timeout = ?d, "Insight write timed out");
                    report.failures.push(LoreError::PersistenceFailure {
                        insight_id: insight.id.clone(),
                        reason: LoreError::Timeout(d).to_string(),
                    });
                }
                Err(Interrupt::Cancelled) => return Err(LoreError::Cancelled),
            }
        }

        Ok(report)
    }
}
