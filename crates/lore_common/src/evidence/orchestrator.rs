//! Single-flight + cooldown around the evidence loop, and a channel-fed
//! background worker.
//!
//! `run_once` itself holds no timing state; the cooldown lives here so
//! tests can drive the loop directly.

use super::{EventBatcher, EvidenceLoop, RunSummary};
use crate::error::{LoreError, Result};
use crate::event::Event;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Guards an `EvidenceLoop` so at most one run is in flight and runs are
/// at least `cooldown` apart
pub struct EvidenceOrchestrator {
    evidence: Arc<EvidenceLoop>,
    cooldown: Duration,
    /// Completion time of the last run that did work
    last_completed: Mutex<Option<Instant>>,
}

impl EvidenceOrchestrator {
    pub fn new(evidence: Arc<EvidenceLoop>, cooldown: Duration) -> Self {
        Self {
            evidence,
            cooldown,
            last_completed: Mutex::new(None),
        }
    }

    pub fn evidence(&self) -> &EvidenceLoop {
        &self.evidence
    }

    /// Time left before the next run may start (zero if none, or if a run
    /// is in flight and the answer is unknown)
    pub fn remaining_cooldown(&self) -> Duration {
        match self.last_completed.try_lock() {
            Ok(last) => self.remaining_after(*last),
            Err(_) => Duration::ZERO,
        }
    }

    fn remaining_after(&self, last: Option<Instant>) -> Duration {
        last.map(|done| self.cooldown.saturating_sub(done.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Run now, or refuse with `RunInFlight` / `CoolingDown`.
    /// Runs rejected as invalid input do not start a cooldown.
    pub async fn try_run(&self, events: Vec<Event>) -> Result<RunSummary> {
        let mut last = self
            .last_completed
            .try_lock()
            .map_err(|_| LoreError::RunInFlight)?;

        let remaining = self.remaining_after(*last);
        if !remaining.is_zero() {
            return Err(LoreError::CoolingDown { remaining });
        }

        let result = self.evidence.run_once(events).await;
        if !matches!(&result, Err(e) if e.is_client_error()) {
            *last = Some(Instant::now());
        }
        result
    }
}

// ============================================================================
// Background worker
// ============================================================================

/// Handle to a running evidence worker
pub struct WorkerHandle {
    /// Push events here; dropping every sender stops the worker after a
    /// final flush
    pub events: mpsc::Sender<Event>,
    /// One summary per completed run
    pub summaries: mpsc::Receiver<RunSummary>,
    pub task: JoinHandle<()>,
}

/// Spawn a worker that buffers incoming events and runs the loop whenever
/// events are pending and the cooldown has elapsed
pub fn spawn_evidence_worker(orchestrator: Arc<EvidenceOrchestrator>, capacity: usize) -> WorkerHandle {
    let (event_tx, mut event_rx) = mpsc::channel::<Event>(capacity.max(1));
    let (summary_tx, summary_rx) = mpsc::channel::<RunSummary>(capacity.max(1));
    let max_batch_size = orchestrator.evidence().max_batch_size();

    let task = tokio::spawn(async move {
        let mut batcher = EventBatcher::new(max_batch_size);
        info!(max_batch_size, "Evidence worker started");

        loop {
            let wait = orchestrator.remaining_cooldown();
            tokio::select! {
                maybe = event_rx.recv() => match maybe {
                    Some(event) => {
                        if !batcher.push(event) {
                            debug!("Duplicate event ignored");
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep(wait), if batcher.pending_len() > 0 => {
                    run_pending(&orchestrator, &mut batcher, &summary_tx).await;
                }
            }
        }

        // Channel closed: flush what is left once the cooldown allows
        if batcher.pending_len() > 0 {
            tokio::time::sleep(orchestrator.remaining_cooldown()).await;
            run_pending(&orchestrator, &mut batcher, &summary_tx).await;
        }
        info!("Evidence worker stopped");
    });

    WorkerHandle {
        events: event_tx,
        summaries: summary_rx,
        task,
    }
}

async fn run_pending(
    orchestrator: &EvidenceOrchestrator,
    batcher: &mut EventBatcher,
    summaries: &mpsc::Sender<RunSummary>,
) {
    let events = batcher.take_pending();
    match orchestrator.try_run(events.clone()).await {
        Ok(summary) => {
            // Nobody listening is fine
            let _ = summaries.send(summary).await;
        }
        Err(LoreError::CoolingDown { .. }) | Err(LoreError::RunInFlight) => {
            debug!("Run deferred, re-queueing events");
            for event in events {
                batcher.push(event);
            }
        }
        Err(e) => warn!(error = %e, "Evidence run failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvidenceSettings;
    use crate::graph::MemoryGraphStore;
    use crate::llm::FakeLlmClient;
    use serde_json::Map;

    fn orchestrator(cooldown: Duration) -> Arc<EvidenceOrchestrator> {
        let evidence = EvidenceLoop::new(
            &EvidenceSettings::default(),
            Arc::new(FakeLlmClient::always("[]")),
            Arc::new(MemoryGraphStore::new()),
        );
        Arc::new(EvidenceOrchestrator::new(Arc::new(evidence), cooldown))
    }

    fn event(q: &str) -> Event {
        Event::new("chat", Map::new()).with("q", q)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_blocks_second_run() {
        let orch = orchestrator(Duration::from_secs(60));
        orch.try_run(vec![event("a")]).await.unwrap();

        match orch.try_run(vec![event("b")]).await {
            Err(LoreError::CoolingDown { remaining }) => {
                assert_eq!(remaining, Duration::from_secs(60))
            }
            other => panic!("expected cooldown, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(orch.try_run(vec![event("b")]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_does_not_start_cooldown() {
        let orch = orchestrator(Duration::from_secs(60));
        assert!(matches!(
            orch.try_run(vec![]).await,
            Err(LoreError::InvalidInput(_))
        ));
        assert_eq!(orch.remaining_cooldown(), Duration::ZERO);
        assert!(orch.try_run(vec![event("a")]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_runs_and_flushes() {
        let orch = orchestrator(Duration::from_secs(60));
        let mut handle = spawn_evidence_worker(orch.clone(), 16);

        handle.events.send(event("a")).await.unwrap();
        handle.events.send(event("b")).await.unwrap();
        let first = handle.summaries.recv().await.unwrap();
        assert_eq!(first.insights_generated, 0);

        // Arrives during cooldown; flushed after the channel closes
        handle.events.send(event("c")).await.unwrap();
        drop(handle.events);
        assert!(handle.summaries.recv().await.is_some());
        handle.task.await.unwrap();
    }
}
