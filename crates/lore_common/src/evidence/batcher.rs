//! Event batching: fingerprint dedup + size cap, oldest events overflow first.

use crate::error::{LoreError, Result};
use crate::event::{Batch, Event};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Builds batches from raw events and buffers events between runs
#[derive(Debug)]
pub struct EventBatcher {
    max_batch_size: usize,
    pending: VecDeque<(String, Event)>,
    pending_fingerprints: HashSet<String>,
}

impl EventBatcher {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            pending: VecDeque::new(),
            pending_fingerprints: HashSet::new(),
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Dedup `events` by fingerprint and keep at most `max_batch_size` of
    /// the newest. Duplicates collapse onto their most recent occurrence.
    /// The returned batch is ordered oldest to newest.
    pub fn build_batch(&self, mut events: Vec<Event>) -> Result<Batch> {
        if events.is_empty() {
            return Err(LoreError::InvalidInput("event batch is empty".into()));
        }
        let received = events.len();

        // Stable: equal timestamps keep arrival order
        events.sort_by_key(|e| e.timestamp);

        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(self.max_batch_size.min(events.len()));
        for event in events.into_iter().rev() {
            if kept.len() == self.max_batch_size {
                break;
            }
            if seen.insert(event.fingerprint()) {
                kept.push(event);
            }
        }
        kept.reverse();

        debug!(received, kept = kept.len(), "Built event batch");
        Ok(Batch::new(kept))
    }

    /// Buffer one event. Returns false if an identical event is already
    /// pending. When full, the oldest pending event is dropped.
    pub fn push(&mut self, event: Event) -> bool {
        let fp = event.fingerprint();
        if self.pending_fingerprints.contains(&fp) {
            return false;
        }
        if self.pending.len() == self.max_batch_size {
            if let Some((old_fp, _)) = self.pending.pop_front() {
                self.pending_fingerprints.remove(&old_fp);
            }
        }
        self.pending_fingerprints.insert(fp.clone());
        self.pending.push_back((fp, event));
        true
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drain every buffered event, oldest first
    pub fn take_pending(&mut self) -> Vec<Event> {
        self.pending_fingerprints.clear();
        self.pending.drain(..).map(|(_, e)| e).collect()
    }
}
