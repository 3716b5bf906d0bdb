//! QueryRouter: dispatches a query to one, a fallback chain of, or all
//! registered source adapters.

use super::adapter::{AdapterError, SourceAdapter, SourceResult};
use super::aggregator::ResultAggregator;
use super::query::{Mode, Query, RouteResponse, RoutingDecision};
use super::rules::{default_rules, select_target, RoutingRule, FALLBACK_ORDER};
use crate::cancel::{with_deadline, CancelSignal, Interrupt};
use crate::error::{LoreError, Result};
use crate::metrics::LoreMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome of calling one adapter under the router's deadline
type CallResult = std::result::Result<Vec<SourceResult>, AdapterError>;

/// Routes queries over a registry of source adapters
pub struct QueryRouter {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    rules: Vec<RoutingRule>,
    fallback_order: Vec<String>,
    aggregator: ResultAggregator,
    limit: Option<usize>,
    timeout: Duration,
    metrics: Option<LoreMetrics>,
}

impl QueryRouter {
    /// Empty registry, default rules, `timeout` per adapter call
    pub fn new(timeout: Duration) -> Self {
        let fallback_order: Vec<String> = FALLBACK_ORDER.iter().map(|s| s.to_string()).collect();
        Self {
            adapters: Vec::new(),
            rules: default_rules(),
            aggregator: ResultAggregator::new(fallback_order.clone()),
            fallback_order,
            limit: None,
            timeout,
            metrics: None,
        }
    }

    /// Add an adapter; one with the same name is replaced
    pub fn register(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        match self
            .adapters
            .iter_mut()
            .find(|a| a.name() == adapter.name())
        {
            Some(slot) => *slot = adapter,
            None => self.adapters.push(adapter),
        }
        self
    }

    pub fn with_rules(mut self, rules: Vec<RoutingRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Fallback order for Auto mode; also the interleave order for merged
    /// results
    pub fn with_fallback_order(mut self, order: Vec<String>) -> Self {
        self.fallback_order = order;
        self.rebuild_aggregator();
        self
    }

    /// Cap on merged results (`None` = unlimited)
    pub fn with_result_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self.rebuild_aggregator();
        self
    }

    pub fn with_metrics(mut self, metrics: LoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn rebuild_aggregator(&mut self) {
        self.aggregator = ResultAggregator::new(self.fallback_order.clone()).with_limit(self.limit);
    }

    /// Registered adapter names, in registration order
    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    fn adapter(&self, name: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    pub async fn route(&self, query: &Query) -> Result<RouteResponse> {
        self.route_with(query, &CancelSignal::never()).await
    }

    /// Validate and route in one step
    pub async fn route_text(&self, text: &str, mode: Mode) -> Result<RouteResponse> {
        let query = Query::new(text, mode)?;
        self.route(&query).await
    }

    /// Route `query`. Adapter failures are recorded in the decision's
    /// reasoning; only an unknown source, invalid input or cancellation is
    /// an error.
    pub async fn route_with(&self, query: &Query, cancel: &CancelSignal) -> Result<RouteResponse> {
        if query.text.trim().is_empty() {
            return Err(LoreError::InvalidInput("query text is empty".to_string()));
        }
        if let Some(m) = &self.metrics {
            m.route_requests_total
                .with_label_values(&[query.mode.kind()])
                .inc();
        }

        let response = match &query.mode {
            Mode::Source(name) => self.route_source(name, &query.text, cancel).await?,
            Mode::All => self.route_all(&query.text, cancel).await?,
            Mode::Auto => self.route_auto(&query.text, cancel).await?,
        };

        info!(
            mode = %query.mode,
            resolved = %response.decision.mode_resolved,
            sources = ?response.decision.sources_queried,
            results = response.answer_sources.len(),
            "Query routed"
        );
        Ok(response)
    }

    async fn call(&self, adapter: &Arc<dyn SourceAdapter>, text: &str, cancel: &CancelSignal) -> CallResult {
        call_adapter(Arc::clone(adapter), text.to_string(), self.timeout, cancel.clone()).await
    }

    /// Record a failed call; cancellation aborts the whole request
    fn note_failure(&self, name: &str, err: AdapterError, notes: &mut Vec<String>) -> Result<()> {
        if err == AdapterError::Cancelled {
            return Err(LoreError::Cancelled);
        }
        warn!(source = name, error = %err, "Source adapter unavailable");
        if let Some(m) = &self.metrics {
            m.adapter_unavailable_total.with_label_values(&[name]).inc();
        }
        notes.push(
            LoreError::SourceUnavailable {
                source_name: name.to_string(),
                reason: err.to_string(),
            }
            .to_string(),
        );
        Ok(())
    }

    async fn route_source(&self, name: &str, text: &str, cancel: &CancelSignal) -> Result<RouteResponse> {
        let adapter = self
            .adapter(name)
            .ok_or_else(|| LoreError::UnknownSource(name.to_string()))?;

        let mut notes = vec![format!("explicit source '{}'", name)];
        let results = match self.call(adapter, text, cancel).await {
            Ok(results) => results,
            Err(e) => {
                self.note_failure(name, e, &mut notes)?;
                Vec::new()
            }
        };

        Ok(RouteResponse {
            answer_sources: self.aggregator.merge(results),
            decision: RoutingDecision {
                mode_resolved: Mode::Source(name.to_string()).to_string(),
                sources_queried: vec![name.to_string()],
                reasoning: notes.join("; "),
            },
        })
    }

    async fn route_all(&self, text: &str, cancel: &CancelSignal) -> Result<RouteResponse> {
        let names = self.adapter_names();
        if names.is_empty() {
            return Ok(RouteResponse {
                answer_sources: Vec::new(),
                decision: RoutingDecision {
                    mode_resolved: Mode::All.to_string(),
                    sources_queried: Vec::new(),
                    reasoning: "no adapters registered".to_string(),
                },
            });
        }

        let mut set = JoinSet::new();
        for (idx, adapter) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let text = text.to_string();
            let cancel = cancel.clone();
            let timeout = self.timeout;
            set.spawn(async move { (idx, call_adapter(adapter, text, timeout, cancel).await) });
        }

        let mut outcomes: Vec<Option<CallResult>> = vec![None; names.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => outcomes[idx] = Some(result),
                Err(e) => debug!(error = %e, "Adapter task did not complete"),
            }
        }

        let mut results = Vec::new();
        let mut notes = vec![format!("queried all {} adapters", names.len())];
        for (name, outcome) in names.iter().zip(outcomes) {
            let outcome = outcome
                .unwrap_or_else(|| Err(AdapterError::Unavailable("adapter task panicked".to_string())));
            match outcome {
                Ok(mut hits) => results.append(&mut hits),
                Err(e) => self.note_failure(name, e, &mut notes)?,
            }
        }

        Ok(RouteResponse {
            answer_sources: self.aggregator.merge(results),
            decision: RoutingDecision {
                mode_resolved: Mode::All.to_string(),
                sources_queried: names,
                reasoning: notes.join("; "),
            },
        })
    }

    /// Preferred adapter, then the fallback order, then anything else
    /// registered
    fn cascade(&self, preferred: &str) -> Vec<String> {
        let mut order = vec![preferred.to_string()];
        for name in self
            .fallback_order
            .iter()
            .cloned()
            .chain(self.adapter_names())
        {
            if !order.contains(&name) {
                order.push(name);
            }
        }
        order
    }

    async fn route_auto(&self, text: &str, cancel: &CancelSignal) -> Result<RouteResponse> {
        let selection = select_target(&self.rules, text);
        let mut notes = vec![selection.reason.clone()];
        let mut queried = Vec::new();
        let mut results = Vec::new();
        let mut answered: Option<String> = None;

        for name in self.cascade(&selection.target) {
            let Some(adapter) = self.adapter(&name) else {
                notes.push(format!("{} not registered", name));
                continue;
            };
            if !queried.is_empty() {
                notes.push(format!("falling back to {}", name));
            }
            queried.push(name.clone());

            match self.call(adapter, text, cancel).await {
                Ok(hits) => {
                    results = hits;
                    answered = Some(name);
                    break;
                }
                Err(e) => self.note_failure(&name, e, &mut notes)?,
            }
        }

        let mode_resolved = match answered {
            Some(name) => format!("{}:{}", Mode::Auto, name),
            None => {
                notes.push("every candidate adapter was unavailable".to_string());
                Mode::Auto.to_string()
            }
        };

        Ok(RouteResponse {
            answer_sources: self.aggregator.merge(results),
            decision: RoutingDecision {
                mode_resolved,
                sources_queried: queried,
                reasoning: notes.join("; "),
            },
        })
    }
}

/// One adapter call under the per-adapter deadline. Dropping the future
/// (timeout or cancel) cancels the adapter call.
async fn call_adapter(
    adapter: Arc<dyn SourceAdapter>,
    text: String,
    timeout: Duration,
    cancel: CancelSignal,
) -> CallResult {
    match with_deadline(adapter.search(&text), timeout, &cancel).await {
        Ok(result) => result,
        Err(Interrupt::Timeout(d)) => Err(AdapterError::Timeout(d)),
        Err(Interrupt::Cancelled) => Err(AdapterError::Cancelled),
    }
}
