//! Graph store for persisted insights.
//!
//! The evidence loop only ever writes `Insight` nodes through
//! `upsert_node`; nodes are keyed by `(label, properties.id)` so a repeated
//! write of the same insight replaces it (last write wins).

use crate::error::{LoreError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Node properties
pub type Properties = Map<String, Value>;

/// External graph store
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or replace the node identified by `label` + `properties["id"]`
    async fn upsert_node(&self, label: &str, properties: &Properties) -> Result<()>;
}

fn node_id(properties: &Properties) -> Result<String> {
    properties
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| LoreError::InvalidInput("graph node needs a non-empty string id".into()))
}

// ============================================================================
// SQLite-backed store
// ============================================================================

/// Graph store backed by a SQLite node table
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SqliteGraphStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        Self::from_connection(conn, path.to_path_buf())
    }

    /// In-memory database, for tests and dry runs
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, PathBuf::from(":memory:"))
    }

    fn from_connection(conn: Connection, db_path: PathBuf) -> anyhow::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS graph_nodes (
                label TEXT NOT NULL,
                id TEXT NOT NULL,
                properties TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (label, id)
            );
            CREATE INDEX IF NOT EXISTS idx_graph_nodes_label ON graph_nodes(label);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// All nodes carrying `label`, ordered by id
    pub fn nodes(&self, label: &str) -> Result<Vec<Properties>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LoreError::Storage("graph connection poisoned".into()))?;
        let mut stmt =
            conn.prepare("SELECT properties FROM graph_nodes WHERE label = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![label], |row| row.get::<_, String>(0))?;

        let mut nodes = Vec::new();
        for raw in rows {
            if let Value::Object(map) = serde_json::from_str::<Value>(&raw?)? {
                nodes.push(map);
            }
        }
        Ok(nodes)
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_node(&self, label: &str, properties: &Properties) -> Result<()> {
        let id = node_id(properties)?;
        let label = label.to_string();
        let body = serde_json::to_string(properties)?;
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn
                .lock()
                .map_err(|_| LoreError::Storage("graph connection poisoned".into()))?;
            conn.execute(
                r#"
                INSERT INTO graph_nodes (label, id, properties, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(label, id) DO UPDATE SET
                    properties = excluded.properties,
                    updated_at = excluded.updated_at
                "#,
                params![label, id, body, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| LoreError::Storage(format!("graph write task failed: {}", e)))?
    }
}

// ============================================================================
// In-memory store (testing)
// ============================================================================

/// In-memory graph store with write counting and injectable failures
#[derive(Default)]
pub struct MemoryGraphStore {
    nodes: Mutex<BTreeMap<(String, String), Properties>>,
    writes: AtomicUsize,
    failing_ids: Mutex<HashSet<String>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write of node `id` fail
    pub fn fail_on(&self, id: &str) {
        if let Ok(mut ids) = self.failing_ids.lock() {
            ids.insert(id.to_string());
        }
    }

    /// Number of upsert calls that reached the store
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, label: &str, id: &str) -> Option<Properties> {
        self.nodes
            .lock()
            .ok()?
            .get(&(label.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of distinct nodes with `label`
    pub fn count(&self, label: &str) -> usize {
        self.nodes
            .lock()
            .map(|nodes| nodes.keys().filter(|(l, _)| l == label).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, label: &str, properties: &Properties) -> Result<()> {
        let id = node_id(properties)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_ids
            .lock()
            .map(|ids| ids.contains(&id))
            .unwrap_or(false);
        if failing {
            return Err(LoreError::Storage(format!("injected failure for {}", id)));
        }

        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| LoreError::Storage("memory graph poisoned".into()))?;
        nodes.insert((label.to_string(), id), properties.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(id: &str, confidence: f64) -> Properties {
        match json!({"id": id, "confidence": confidence}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_upsert_replaces_same_id() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.upsert_node("Insight", &props("ins_a", 0.7)).await.unwrap();
        store.upsert_node("Insight", &props("ins_a", 0.9)).await.unwrap();
        store.upsert_node("Insight", &props("ins_b", 0.8)).await.unwrap();

        let nodes = store.nodes("Insight").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["confidence"], 0.9);
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");
        {
            let store = SqliteGraphStore::open(&path).unwrap();
            store.upsert_node("Insight", &props("ins_a", 0.7)).await.unwrap();
        }
        let store = SqliteGraphStore::open(&path).unwrap();
        assert_eq!(store.nodes("Insight").unwrap().len(), 1);
        assert!(store.nodes("Other").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_id_is_rejected() {
        let store = MemoryGraphStore::new();
        let res = store.upsert_node("Insight", &Map::new()).await;
        assert!(matches!(res, Err(LoreError::InvalidInput(_))));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_store_injected_failure() {
        let store = MemoryGraphStore::new();
        store.fail_on("ins_bad");
        assert!(store.upsert_node("Insight", &props("ins_bad", 0.9)).await.is_err());
        assert!(store.upsert_node("Insight", &props("ins_ok", 0.9)).await.is_ok());
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.count("Insight"), 1);
    }
}
