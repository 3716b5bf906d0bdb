//! Query router
//!
//! Routes a free-text query to one or more retrieval backends (vector,
//! full-text, analytic) behind the `SourceAdapter` capability and merges
//! what comes back without fusing their scores.

pub mod adapter;
pub mod aggregator;
pub mod analytic;
pub mod engine;
pub mod fulltext;
pub mod query;
pub mod rules;
pub mod vector;

pub use adapter::{
    excerpt, AdapterError, SourceAdapter, SourceResult, StaticAdapter, StoreError,
    ANALYTIC_SOURCE, FULLTEXT_SOURCE, VECTOR_SOURCE,
};
pub use aggregator::ResultAggregator;
pub use analytic::{default_views, AnalyticAdapter, AnalyticStore, AnalyticView, SqliteAnalyticStore};
pub use engine::QueryRouter;
pub use fulltext::{FullTextAdapter, FullTextStore, SqliteFullTextStore, TextMatch};
pub use query::{Mode, Query, RouteResponse, RoutingDecision};
pub use rules::{default_rules, select_target, RoutingRule, DEFAULT_SOURCE, FALLBACK_ORDER};
pub use vector::{HttpVectorStore, VectorAdapter, VectorHit, VectorStore};
