//! Prometheus metrics for the evidence loop and the query router.
//!
//! A `LoreMetrics` is created by the host and handed to the components that
//! record into it; there is no process-global registry.

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, Encoder,
    IntCounter, IntCounterVec, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct LoreMetrics {
    pub runs_total: IntCounter,
    pub insights_generated_total: IntCounter,
    pub insights_persisted_total: IntCounter,
    pub generation_failures_total: IntCounter,
    pub persistence_failures_total: IntCounter,
    pub route_requests_total: IntCounterVec,
    pub adapter_unavailable_total: IntCounterVec,

    registry: Arc<Registry>,
}

impl LoreMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs_total = register_int_counter_with_registry!(
            "lore_runs_total",
            "Evidence loop runs completed",
            registry
        )?;
        let insights_generated_total = register_int_counter_with_registry!(
            "lore_insights_generated_total",
            "Candidate insights returned by the LLM",
            registry
        )?;
        let insights_persisted_total = register_int_counter_with_registry!(
            "lore_insights_persisted_total",
            "Insights written to the graph store",
            registry
        )?;
        let generation_failures_total = register_int_counter_with_registry!(
            "lore_generation_failures_total",
            "Runs whose generation stage exhausted its retries",
            registry
        )?;
        let persistence_failures_total = register_int_counter_with_registry!(
            "lore_persistence_failures_total",
            "Insight writes rejected by the graph store",
            registry
        )?;
        let route_requests_total = register_int_counter_vec_with_registry!(
            "lore_route_requests_total",
            "Routed queries by resolved mode",
            &["mode"],
            registry
        )?;
        let adapter_unavailable_total = register_int_counter_vec_with_registry!(
            "lore_adapter_unavailable_total",
            "Adapter calls that failed, timed out or were cancelled",
            &["source"],
            registry
        )?;

        Ok(Self {
            runs_total,
            insights_generated_total,
            insights_persisted_total,
            generation_failures_total,
            persistence_failures_total,
            route_requests_total,
            adapter_unavailable_total,
            registry: Arc::new(registry),
        })
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = LoreMetrics::new().unwrap();
        metrics.runs_total.inc();
        metrics
            .adapter_unavailable_total
            .with_label_values(&["vector"])
            .inc();

        let text = metrics.render();
        assert!(text.contains("lore_runs_total 1"));
        assert!(text.contains("lore_adapter_unavailable_total{source=\"vector\"} 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = LoreMetrics::new().unwrap();
        let b = LoreMetrics::new().unwrap();
        a.runs_total.inc();
        assert_eq!(a.runs_total.get(), 1);
        assert_eq!(b.runs_total.get(), 0);
    }
}
