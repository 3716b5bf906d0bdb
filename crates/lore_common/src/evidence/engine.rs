use super::{
    ApplicationTracker, EventBatcher, InsightGenerator, InsightStore, LoopStage, PatternAnalyzer,
    RunSummary,
};
use crate::cancel::CancelSignal;
use crate::config::EvidenceSettings;
use crate::error::Result;
use crate::event::Event;
use crate::graph::GraphStore;
use crate::llm::LlmCaller;
use crate::metrics::LoreMetrics;
use crate::retry::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Default deadline for a single graph write
const GRAPH_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// The five-stage evidence pipeline with injected collaborators
pub struct EvidenceLoop {
    batcher: EventBatcher,
    analyzer: PatternAnalyzer,
    generator: InsightGenerator,
    store: InsightStore,
    tracker: ApplicationTracker,
    stage: Mutex<LoopStage>,
    metrics: Option<LoreMetrics>,
}

impl EvidenceLoop {
    pub fn new(
        settings: &EvidenceSettings,
        llm: Arc<dyn LlmCaller>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self::with_retry_policy(settings, settings.retry_policy(), llm, graph)
    }

    /// Same as `new` with an explicit retry policy
    pub fn with_retry_policy(
        settings: &EvidenceSettings,
        retry: RetryPolicy,
        llm: Arc<dyn LlmCaller>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        let threshold = settings.effective_threshold();
        Self {
            batcher: EventBatcher::new(settings.effective_batch_size()),
            analyzer: PatternAnalyzer::default(),
            generator: InsightGenerator::new(llm, retry, settings.llm_timeout()),
            store: InsightStore::new(graph, threshold, GRAPH_WRITE_TIMEOUT),
            tracker: ApplicationTracker::new(threshold),
            stage: Mutex::new(LoopStage::Idle),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.batcher.max_batch_size()
    }

    pub fn threshold(&self) -> f64 {
        self.store.threshold()
    }

    /// Current pipeline stage
    pub fn stage(&self) -> LoopStage {
        self.stage.lock().map(|s| *s).unwrap_or_default()
    }

    fn enter(&self, stage: LoopStage) {
        if let Ok(mut current) = self.stage.lock() {
            *current = stage;
        }
    }

    /// Run all five stages over `events`
    pub async fn run_once(&self, events: Vec<Event>) -> Result<RunSummary> {
        self.run_once_with(events, &CancelSignal::never()).await
    }

    /// `run_once` with a cancellation signal for the external calls
    pub async fn run_once_with(&self, events: Vec<Event>, cancel: &CancelSignal) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("evidence_run", %run_id);
        let _idle = IdleOnExit(self);
        self.run_stages(events, cancel).instrument(span).await
    }

    async fn run_stages(&self, events: Vec<Event>, cancel: &CancelSignal) -> Result<RunSummary> {
        self.enter(LoopStage::Collecting);
        let batch = self.batcher.build_batch(events)?;

        self.enter(LoopStage::Analyzing);
        let summaries = self.analyzer.analyze(&batch);
        info!(events = batch.len(), patterns = summaries.len(), "Batch analyzed");

        self.enter(LoopStage::Generating);
        let generation = self.generator.generate(&summaries, cancel).await?;

        self.enter(LoopStage::Persisting);
        let report = self.store.persist(&generation.insights, cancel).await?;

        self.enter(LoopStage::Applying);
        let summary = self
            .tracker
            .summarize(generation.insights.len(), &report.persisted);

        if let Some(m) = &self.metrics {
            m.runs_total.inc();
            m.insights_generated_total.inc_by(summary.insights_generated as u64);
            m.insights_persisted_total.inc_by(summary.insights_persisted as u64);
            m.persistence_failures_total.inc_by(report.failures.len() as u64);
            if generation.failure.is_some() {
                m.generation_failures_total.inc();
            }
        }

        info!(
            generated = summary.insights_generated,
            persisted = summary.insights_persisted,
            discarded = report.discarded,
            failed_writes = report.failures.len(),
            applied = summary.insights_applied,
            "Evidence run complete"
        );
        Ok(summary)
    }
}

/// Puts the loop back to `Idle` however the run ends
struct IdleOnExit<'a>(&'a EvidenceLoop);

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        self.0.enter(LoopStage::Idle);
    }
}
