use super::PatternSummary;
use crate::event::Batch;
use std::collections::HashMap;

/// Samples kept per event type
pub const DEFAULT_SAMPLE_SIZE: usize = 3;

/// Groups a batch by event type
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    sample_size: usize,
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

impl PatternAnalyzer {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    /// One summary per distinct type, most frequent first; ties keep the
    /// order in which the type first appeared in the batch.
    pub fn analyze(&self, batch: &Batch) -> Vec<PatternSummary> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut summaries: Vec<PatternSummary> = Vec::new();

        for event in &batch.events {
            let slot = *index.entry(event.event_type.as_str()).or_insert_with(|| {
                summaries.push(PatternSummary {
                    event_type: event.event_type.clone(),
                    count: 0,
                    samples: Vec::new(),
                });
                summaries.len() - 1
            });
            let summary = &mut summaries[slot];
            summary.count += 1;
            if summary.samples.len() < self.sample_size {
                summary.samples.push(event.clone());
            }
        }

        // Stable sort preserves first-appearance order among equal counts
        summaries.sort_by(|a, b| b.count.cmp(&a.count));
        summaries
    }
}
