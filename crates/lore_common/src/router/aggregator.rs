//! Merges results from several adapters without comparing their scores.
//!
//! Each source group is sorted by its own score, then groups are
//! interleaved round-robin in source-priority order.

use super::adapter::SourceResult;
use super::rules::FALLBACK_ORDER;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct ResultAggregator {
    priority: Vec<String>,
    limit: Option<usize>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(FALLBACK_ORDER.iter().map(|s| s.to_string()).collect())
    }
}

impl ResultAggregator {
    pub fn new(priority: Vec<String>) -> Self {
        Self {
            priority,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Sources not in the priority list rank after it, by name
    fn rank(&self, source: &str) -> (usize, String) {
        match self.priority.iter().position(|p| p == source) {
            Some(i) => (i, String::new()),
            None => (self.priority.len(), source.to_string()),
        }
    }

    pub fn merge(&self, results: Vec<SourceResult>) -> Vec<SourceResult> {
        let mut groups: Vec<(String, Vec<SourceResult>)> = Vec::new();
        for result in results {
            match groups.iter_mut().find(|(name, _)| *name == result.source) {
                Some((_, group)) => group.push(result),
                None => groups.push((result.source.clone(), vec![result])),
            }
        }

        groups.sort_by_key(|(name, _)| self.rank(name));
        for (_, group) in groups.iter_mut() {
            group.sort_by(|a, b| by_score_desc(a.score, b.score));
        }

        let total: usize = groups.iter().map(|(_, g)| g.len()).sum();
        let cap = self.limit.map_or(total, |l| l.min(total));
        let mut iters: Vec<_> = groups.into_iter().map(|(_, g)| g.into_iter()).collect();
        let mut merged = Vec::with_capacity(cap);

        while merged.len() < cap {
            let mut progressed = false;
            for it in iters.iter_mut() {
                if merged.len() == cap {
                    break;
                }
                if let Some(r) = it.next() {
                    merged.push(r);
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        merged
    }
}

/// Descending, NaN last
fn by_score_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
