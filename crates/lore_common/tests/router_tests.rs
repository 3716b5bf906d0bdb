//! Query router behaviour tests.
//!
//! Uses `StaticAdapter` instrumentation to check which adapters each mode
//! calls, how unavailable or slow adapters are reported, and how results
//! from incomparable sources are merged. The last tests run the real
//! SQLite backends.

use lore_common::cancel::cancel_pair;
use lore_common::metrics::LoreMetrics;
use lore_common::router::{
    default_views, AnalyticAdapter, FullTextAdapter, Mode, Query, QueryRouter, SourceAdapter,
    SqliteAnalyticStore, SqliteFullTextStore, StaticAdapter, ANALYTIC_SOURCE, FULLTEXT_SOURCE,
    VECTOR_SOURCE,
};
use lore_common::LoreError;
use rusqlite::Connection;
use serde_json::Map;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Fixture {
    vector: Arc<StaticAdapter>,
    fulltext: Arc<StaticAdapter>,
    analytic: Arc<StaticAdapter>,
}

impl Fixture {
    fn healthy() -> Self {
        Self::new(
            StaticAdapter::with_hits(VECTOR_SOURCE, &[(0.91, "ADR-7 event sourcing"), (0.55, "ADR-2 queues")]),
            StaticAdapter::with_hits(FULLTEXT_SOURCE, &[(7.5, "deploy runbook")]),
            StaticAdapter::with_hits(ANALYTIC_SOURCE, &[(2.0, "cost_by_service: llm-api=14.5")]),
        )
    }

    fn new(vector: StaticAdapter, fulltext: StaticAdapter, analytic: StaticAdapter) -> Self {
        Self {
            vector: Arc::new(vector),
            fulltext: Arc::new(fulltext),
            analytic: Arc::new(analytic),
        }
    }

    fn router(&self) -> QueryRouter {
        QueryRouter::new(TIMEOUT)
            .register(self.vector.clone())
            .register(self.fulltext.clone())
            .register(self.analytic.clone())
    }

    fn calls(&self) -> (usize, usize, usize) {
        (
            self.vector.call_count(),
            self.fulltext.call_count(),
            self.analytic.call_count(),
        )
    }
}

// ============================================================================
// Auto mode
// ============================================================================

#[tokio::test]
async fn test_cost_question_routes_to_analytic_only() {
    let fx = Fixture::healthy();
    let response = fx
        .router()
        .route(&Query::auto("What's my API cost this month?").unwrap())
        .await
        .unwrap();

    assert_eq!(response.decision.sources_queried, vec![ANALYTIC_SOURCE.to_string()]);
    assert_eq!(response.decision.mode_resolved, "auto:analytic");
    assert_eq!(fx.calls(), (0, 0, 1));
    assert_eq!(response.answer_sources.len(), 1);
    assert_eq!(response.answer_sources[0].source, ANALYTIC_SOURCE);
}

#[tokio::test]
async fn test_architecture_question_routes_to_vector() {
    let fx = Fixture::healthy();
    let response = fx
        .router()
        .route_text("Why did we pick this architecture?", Mode::Auto)
        .await
        .unwrap();

    assert_eq!(response.decision.sources_queried, vec![VECTOR_SOURCE.to_string()]);
    assert_eq!(fx.calls(), (1, 0, 0));
    assert_eq!(response.answer_sources[0].excerpt, "ADR-7 event sourcing");
}

#[tokio::test]
async fn test_plain_question_routes_to_fulltext() {
    let fx = Fixture::healthy();
    let response = fx
        .router()
        .route_text("where is the deploy runbook", Mode::Auto)
        .await
        .unwrap();

    assert_eq!(response.decision.sources_queried, vec![FULLTEXT_SOURCE.to_string()]);
    assert_eq!(fx.calls(), (0, 1, 0));
}

#[tokio::test]
async fn test_unavailable_vector_falls_back_to_fulltext() {
    let fx = Fixture::new(
        StaticAdapter::unavailable(VECTOR_SOURCE),
        StaticAdapter::with_hits(FULLTEXT_SOURCE, &[(3.0, "architecture notes")]),
        StaticAdapter::with_hits(ANALYTIC_SOURCE, &[]),
    );
    let response = fx
        .router()
        .route_text("architecture of the ingest path", Mode::Auto)
        .await
        .unwrap();

    assert_eq!(
        response.decision.sources_queried,
        vec![VECTOR_SOURCE.to_string(), FULLTEXT_SOURCE.to_string()]
    );
    assert_eq!(fx.calls(), (1, 1, 0));
    assert!(response.decision.reasoning.contains("Source unavailable: vector"));
    assert!(response.decision.reasoning.contains("falling back to fulltext"));
    // Names the adapter that answered, not the rule's target
    assert_eq!(response.decision.mode_resolved, "auto:fulltext");
    assert_eq!(response.answer_sources[0].source, FULLTEXT_SOURCE);
}

#[tokio::test]
async fn test_empty_result_is_not_a_fallback() {
    let fx = Fixture::new(
        StaticAdapter::with_hits(VECTOR_SOURCE, &[]),
        StaticAdapter::with_hits(FULLTEXT_SOURCE, &[(1.0, "unused")]),
        StaticAdapter::with_hits(ANALYTIC_SOURCE, &[]),
    );
    let response = fx.router().route_text("research roadmap", Mode::Auto).await.unwrap();

    assert!(response.answer_sources.is_empty());
    assert_eq!(fx.calls(), (1, 0, 0));
}

#[tokio::test]
async fn test_every_adapter_unavailable_is_reported_not_raised() {
    let fx = Fixture::new(
        StaticAdapter::unavailable(VECTOR_SOURCE),
        StaticAdapter::unavailable(FULLTEXT_SOURCE),
        StaticAdapter::unavailable(ANALYTIC_SOURCE),
    );
    let response = fx.router().route_text("how much did we spend", Mode::Auto).await.unwrap();

    assert!(response.answer_sources.is_empty());
    assert_eq!(
        response.decision.sources_queried,
        vec![
            ANALYTIC_SOURCE.to_string(),
            VECTOR_SOURCE.to_string(),
            FULLTEXT_SOURCE.to_string()
        ]
    );
    assert!(response.decision.reasoning.contains("every candidate adapter was unavailable"));
    assert_eq!(response.decision.mode_resolved, "auto");
}

#[tokio::test]
async fn test_unregistered_target_falls_back() {
    let fulltext = Arc::new(StaticAdapter::with_hits(FULLTEXT_SOURCE, &[(1.0, "doc")]));
    let router = QueryRouter::new(TIMEOUT).register(fulltext.clone());

    let response = router.route_text("architecture review", Mode::Auto).await.unwrap();
    assert_eq!(response.decision.sources_queried, vec![FULLTEXT_SOURCE.to_string()]);
    assert!(response.decision.reasoning.contains("vector not registered"));
    assert_eq!(fulltext.call_count(), 1);
}

// ============================================================================
// All mode
// ============================================================================

#[tokio::test]
async fn test_all_mode_calls_every_adapter_even_when_some_fail() {
    let fx = Fixture::new(
        StaticAdapter::with_hits(VECTOR_SOURCE, &[(0.8, "v1")]),
        StaticAdapter::unavailable(FULLTEXT_SOURCE),
        StaticAdapter::with_hits(ANALYTIC_SOURCE, &[(12.0, "a1")]),
    );
    let response = fx.router().route_text("anything", Mode::All).await.unwrap();

    assert_eq!(fx.calls(), (1, 1, 1));
    assert_eq!(response.decision.mode_resolved, "all");
    assert_eq!(response.decision.sources_queried.len(), 3);
    assert!(response.decision.reasoning.contains("Source unavailable: fulltext"));

    let sources: Vec<&str> = response.answer_sources.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, vec![VECTOR_SOURCE, ANALYTIC_SOURCE]);
}

#[tokio::test]
async fn test_all_mode_interleaves_by_source_priority() {
    let fx = Fixture::new(
        StaticAdapter::with_hits(VECTOR_SOURCE, &[(0.2, "v2"), (0.9, "v1")]),
        StaticAdapter::with_hits(FULLTEXT_SOURCE, &[(40.0, "f1")]),
        StaticAdapter::with_hits(ANALYTIC_SOURCE, &[(900.0, "a1"), (100.0, "a2")]),
    );
    let response = fx.router().route_text("anything", Mode::All).await.unwrap();

    let excerpts: Vec<&str> = response.answer_sources.iter().map(|r| r.excerpt.as_str()).collect();
    assert_eq!(excerpts, vec!["v1", "f1", "a1", "v2", "a2"]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_adapter_times_out_as_unavailable() {
    let fx = Fixture::new(
        StaticAdapter::with_hits(VECTOR_SOURCE, &[(0.8, "v1")]).with_delay(Duration::from_secs(30)),
        StaticAdapter::with_hits(FULLTEXT_SOURCE, &[(1.0, "f1")]),
        StaticAdapter::with_hits(ANALYTIC_SOURCE, &[]),
    );

    let started = tokio::time::Instant::now();
    let response = fx.router().route_text("anything", Mode::All).await.unwrap();

    // The router waited for the deadline, not for the slow adapter
    assert_eq!(started.elapsed(), TIMEOUT);
    assert!(response.decision.reasoning.contains("timed out"));
    assert_eq!(response.answer_sources.len(), 1);
    assert_eq!(response.answer_sources[0].source, FULLTEXT_SOURCE);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_route() {
    let fx = Fixture::new(
        StaticAdapter::with_hits(VECTOR_SOURCE, &[]).with_delay(Duration::from_secs(3)),
        StaticAdapter::with_hits(FULLTEXT_SOURCE, &[]).with_delay(Duration::from_secs(3)),
        StaticAdapter::with_hits(ANALYTIC_SOURCE, &[]).with_delay(Duration::from_secs(3)),
    );
    let router = fx.router();
    let query = Query::new("anything", Mode::All).unwrap();
    let (handle, signal) = cancel_pair();

    let route = router.route_with(&query, &signal);
    let cancel = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
    };
    let (result, _) = tokio::join!(route, cancel);
    assert!(matches!(result, Err(LoreError::Cancelled)));
}

// ============================================================================
// Source mode
// ============================================================================

#[tokio::test]
async fn test_explicit_source_queries_only_that_adapter() {
    let fx = Fixture::healthy();
    let response = fx
        .router()
        .route_text("What's my API cost this month?", "fulltext".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(fx.calls(), (0, 1, 0));
    assert_eq!(response.decision.sources_queried, vec![FULLTEXT_SOURCE.to_string()]);
    assert_eq!(response.decision.mode_resolved, "source:fulltext");
}

#[tokio::test]
async fn test_source_prefix_is_case_insensitive() {
    let fx = Fixture::healthy();
    let response = fx
        .router()
        .route_text("anything", "Source:vector".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(fx.calls(), (1, 0, 0));
    assert_eq!(response.decision.sources_queried, vec![VECTOR_SOURCE.to_string()]);
}

#[tokio::test]
async fn test_unknown_source_is_client_error() {
    let fx = Fixture::healthy();
    let err = fx
        .router()
        .route_text("anything", Mode::Source("graph".into()))
        .await
        .unwrap_err();

    assert!(matches!(err, LoreError::UnknownSource(ref name) if name == "graph"));
    assert!(err.is_client_error());
    assert_eq!(fx.calls(), (0, 0, 0));
}

#[tokio::test]
async fn test_blank_query_is_invalid() {
    let fx = Fixture::healthy();
    assert!(matches!(
        fx.router().route_text("   ", Mode::All).await,
        Err(LoreError::InvalidInput(_))
    ));
    assert_eq!(fx.calls(), (0, 0, 0));
}

// ============================================================================
// Metrics + real backends
// ============================================================================

#[tokio::test]
async fn test_route_metrics() {
    let metrics = LoreMetrics::new().unwrap();
    let fx = Fixture::new(
        StaticAdapter::unavailable(VECTOR_SOURCE),
        StaticAdapter::with_hits(FULLTEXT_SOURCE, &[]),
        StaticAdapter::with_hits(ANALYTIC_SOURCE, &[]),
    );
    let router = fx.router().with_metrics(metrics.clone());

    router.route_text("architecture", Mode::Auto).await.unwrap();
    router.route_text("anything", Mode::All).await.unwrap();

    let text = metrics.render();
    assert!(text.contains("lore_route_requests_total{mode=\"auto\"} 1"));
    assert!(text.contains("lore_route_requests_total{mode=\"all\"} 1"));
    assert!(text.contains("lore_adapter_unavailable_total{source=\"vector\"} 2"));
}

#[tokio::test]
async fn test_sqlite_backends_behind_router() {
    let dir = tempfile::tempdir().unwrap();

    let fts = SqliteFullTextStore::open(&dir.path().join("fts.db")).unwrap();
    fts.index_document("Deploy", "Deploy the ingest service with the blue-green script", &Map::new())
        .unwrap();
    fts.index_document("Oncall", "Escalate to the platform rotation", &Map::new())
        .unwrap();
    fts.index_document("Style", "Use short commit subjects", &Map::new())
        .unwrap();

    let analytics_path = dir.path().join("analytics.db");
    Connection::open(&analytics_path)
        .unwrap()
        .execute_batch(
            r#"
            CREATE TABLE usage (day TEXT, service TEXT, units REAL, cost REAL);
            INSERT INTO usage VALUES (date('now'), 'llm-api', 1200, 14.5);
            "#,
        )
        .unwrap();

    let fulltext: Arc<dyn SourceAdapter> = Arc::new(FullTextAdapter::new(Arc::new(fts)));
    let analytic: Arc<dyn SourceAdapter> = Arc::new(AnalyticAdapter::new(
        Arc::new(SqliteAnalyticStore::open(&analytics_path).unwrap()),
        default_views(),
    ));
    let router = QueryRouter::new(TIMEOUT).register(fulltext).register(analytic);

    let cost = router.route_text("What's my API cost this month?", Mode::Auto).await.unwrap();
    assert_eq!(cost.answer_sources.len(), 1);
    assert_eq!(cost.answer_sources[0].metadata["view"], "cost_by_service");

    let deploy = router.route_text("how do I deploy ingest", Mode::Auto).await.unwrap();
    assert_eq!(deploy.decision.sources_queried, vec![FULLTEXT_SOURCE.to_string()]);
    assert!(deploy.answer_sources[0].excerpt.contains("blue-green"));
}
