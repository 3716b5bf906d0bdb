use super::{Insight, RunSummary};

/// Reports how many persisted insights are eligible for application.
/// Advisory only: acting on insights belongs to whoever reads the graph.
#[derive(Debug, Clone)]
pub struct ApplicationTracker {
    threshold: f64,
}

impl ApplicationTracker {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn summarize(&self, generated: usize, persisted: &[Insight]) -> RunSummary {
        let applied = persisted
            .iter()
            .filter(|i| i.confidence >= self.threshold)
            .count();
        RunSummary {
            insights_generated: generated,
            insights_persisted: persisted.len(),
            insights_applied: applied,
        }
    }
}
