//! Command handlers for lorectl.

use anyhow::{Context, Result};
use lore_common::evidence::{spawn_evidence_worker, EvidenceLoop, EvidenceOrchestrator};
use lore_common::graph::{GraphStore, MemoryGraphStore, SqliteGraphStore};
use lore_common::llm::{HttpLlmClient, LlmCaller};
use lore_common::router::{
    AnalyticAdapter, FullTextAdapter, HttpVectorStore, Mode, QueryRouter, SqliteAnalyticStore,
    SqliteFullTextStore, VectorAdapter,
};
use lore_common::{Event, LoreConfig, LoreMetrics};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Worker channel capacity for `loop`
const WORKER_CAPACITY: usize = 256;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Events file: a JSON array, or one event per line
fn parse_events(content: &str) -> Result<Vec<Event>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("Invalid JSON event array");
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Event>(line).with_context(|| format!("Invalid event on line {}", n + 1))
        })
        .collect()
}

fn build_evidence_loop(config: &LoreConfig, metrics: &LoreMetrics, dry_run: bool) -> Result<EvidenceLoop> {
    let llm: Arc<dyn LlmCaller> = Arc::new(HttpLlmClient::new(config.llm.clone())?);
    let graph: Arc<dyn GraphStore> = if dry_run {
        Arc::new(MemoryGraphStore::new())
    } else {
        Arc::new(SqliteGraphStore::open(&config.storage.graph_db)?)
    };
    Ok(EvidenceLoop::new(&config.evidence_settings(), llm, graph).with_metrics(metrics.clone()))
}

/// Handle `run`
pub async fn run(config: &LoreConfig, metrics: &LoreMetrics, events: &Path, dry_run: bool) -> Result<()> {
    let content = std::fs::read_to_string(events)
        .with_context(|| format!("Failed to read events file: {:?}", events))?;
    let events = parse_events(&content)?;

    let evidence = build_evidence_loop(config, metrics, dry_run)?;
    let summary = evidence.run_once(events).await?;
    print_json(&summary)
}

/// Handle `loop`: stdin JSONL -> worker -> one summary per line on stdout
pub async fn run_loop(config: &LoreConfig, metrics: &LoreMetrics, dry_run: bool) -> Result<()> {
    let evidence = Arc::new(build_evidence_loop(config, metrics, dry_run)?);
    let orchestrator = Arc::new(EvidenceOrchestrator::new(evidence, config.evidence.cooldown()));
    let handle = spawn_evidence_worker(orchestrator, WORKER_CAPACITY);

    let mut summaries = handle.summaries;
    let printer = tokio::spawn(async move {
        while let Some(summary) = summaries.recv().await {
            match serde_json::to_string(&summary) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to encode run summary"),
            }
        }
    });

    let sender = handle.events;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                if sender.send(event).await.is_err() {
                    warn!("Evidence worker stopped early");
                    break;
                }
                accepted += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed event"),
        }
    }
    info!(accepted, "Input closed, flushing");

    drop(sender);
    handle.task.await.context("Evidence worker panicked")?;
    printer.await.context("Summary printer panicked")?;
    Ok(())
}

/// Registers whichever backends are configured and present
fn build_router(config: &LoreConfig, metrics: &LoreMetrics) -> Result<QueryRouter> {
    let settings = &config.router;
    let mut router = QueryRouter::new(settings.adapter_timeout())
        .with_result_limit(settings.result_limit())
        .with_metrics(metrics.clone());

    match &settings.vector_endpoint {
        Some(endpoint) => {
            let store = HttpVectorStore::new(endpoint, settings.adapter_timeout())?;
            router = router.register(Arc::new(VectorAdapter::new(Arc::new(store), settings.vector_top_k)));
        }
        None => info!("No vector endpoint configured"),
    }

    let fulltext_db = &config.storage.fulltext_db;
    if fulltext_db.exists() {
        let store = SqliteFullTextStore::open_read_only(fulltext_db)?;
        router = router.register(Arc::new(FullTextAdapter::new(Arc::new(store))));
    } else {
        info!(path = ?fulltext_db, "No full-text index");
    }

    let analytic_db = &config.storage.analytic_db;
    if analytic_db.exists() {
        let store = SqliteAnalyticStore::open(analytic_db)?;
        router = router.register(Arc::new(AnalyticAdapter::new(Arc::new(store), settings.views())));
    } else {
        info!(path = ?analytic_db, "No analytic database");
    }

    Ok(router)
}

/// Handle `route`
pub async fn route(config: &LoreConfig, metrics: &LoreMetrics, text: &str, mode: &str) -> Result<()> {
    let mode: Mode = mode.parse()?;
    let router = build_router(config, metrics)?;
    let response = router.route_text(text, mode).await?;
    print_json(&response)
}

/// Handle `index`
pub fn index(config: &LoreConfig, files: &[PathBuf]) -> Result<()> {
    let store = SqliteFullTextStore::open(&config.storage.fulltext_db)?;

    for file in files {
        let body = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {:?}", file))?;
        let title = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut metadata = Map::new();
        metadata.insert("path".to_string(), Value::String(file.display().to_string()));
        store.index_document(&title, &body, &metadata)?;
        info!(file = %file.display(), "Indexed");
    }

    print_json(&serde_json::json!({
        "indexed": files.len(),
        "documents": store.document_count()?,
    }))
}

/// Handle `config`. `--save` writes back to the file the config was
/// loaded from.
pub fn config(config: &LoreConfig, path: &Path, save: bool) -> Result<()> {
    if save {
        config.save_to(path)?;
        info!(path = %path.display(), "Configuration saved");
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
