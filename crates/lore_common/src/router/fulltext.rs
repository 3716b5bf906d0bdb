//! Full-text adapter and its SQLite FTS5 backend.

use super::adapter::{excerpt, AdapterError, SourceAdapter, SourceResult, StoreError, FULLTEXT_SOURCE};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Default number of matches returned per query
const DEFAULT_MATCH_LIMIT: usize = 20;

/// One full-text match; higher `rank` is better
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMatch {
    pub document: String,
    pub rank: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// External full-text store: `match(text) -> [(document, rank, metadata)]`
#[async_trait]
pub trait FullTextStore: Send + Sync {
    async fn match_text(&self, text: &str) -> Result<Vec<TextMatch>, StoreError>;
}

pub struct FullTextAdapter {
    store: Arc<dyn FullTextStore>,
}

impl FullTextAdapter {
    pub fn new(store: Arc<dyn FullTextStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SourceAdapter for FullTextAdapter {
    fn name(&self) -> &str {
        FULLTEXT_SOURCE
    }

    async fn search(&self, text: &str) -> Result<Vec<SourceResult>, AdapterError> {
        let matches = self.store.match_text(text).await?;
        Ok(matches
            .into_iter()
            .map(|m| SourceResult {
                source: FULLTEXT_SOURCE.to_string(),
                score: m.rank,
                excerpt: excerpt(&m.document),
                metadata: m.metadata,
            })
            .collect())
    }
}

/// FTS5 MATCH expression: every word quoted, OR-joined. Quoting keeps FTS
/// operators in user text from being interpreted.
pub fn match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(|w| format!("\"{}\"", w.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

// ============================================================================
// SQLite FTS5 store
// ============================================================================

pub struct SqliteFullTextStore {
    conn: Arc<Mutex<Connection>>,
    limit: usize,
}

impl SqliteFullTextStore {
    /// Open or create the index at `path`
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open full-text index: {:?}", path))?;
        Self::from_connection(conn)
    }

    /// Open an existing index without write access
    pub fn open_read_only(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open full-text index: {:?}", path))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            limit: DEFAULT_MATCH_LIMIT,
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS documents USING fts5(
                title,
                body,
                metadata UNINDEXED
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            limit: DEFAULT_MATCH_LIMIT,
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Add a document to the index
    pub fn index_document(
        &self,
        title: &str,
        body: &str,
        metadata: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unreachable("full-text connection poisoned".into()))?;
        let metadata = serde_json::to_string(metadata).map_err(|e| StoreError::Query(e.to_string()))?;
        conn.execute(
            "INSERT INTO documents (title, body, metadata) VALUES (?1, ?2, ?3)",
            params![title, body, metadata],
        )?;
        Ok(())
    }

    pub fn document_count(&self) -> Result<usize, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unreachable("full-text connection poisoned".into()))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

fn run_match(conn: &Connection, expr: &str, limit: usize) -> Result<Vec<TextMatch>, StoreError> {
    let mut stmt = conn.prepare(
        r#"
        SELECT title, body, metadata, bm25(documents) AS score
        FROM documents
        WHERE documents MATCH ?1
        ORDER BY score
        LIMIT ?2
        "#,
    )?;
    let rows = stmt.query_map(params![expr, limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, f64>(3)?,
        ))
    })?;

    let mut matches = Vec::new();
    for row in rows {
        let (title, body, metadata, bm25) = row?;
        let mut meta = metadata
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_default();
        if !title.is_empty() {
            meta.insert("title".to_string(), Value::String(title));
        }
        // bm25() is lower-is-better
        matches.push(TextMatch {
            document: body,
            rank: -bm25,
            metadata: meta,
        });
    }
    Ok(matches)
}

#[async_trait]
impl FullTextStore for SqliteFullTextStore {
    async fn match_text(&self, text: &str) -> Result<Vec<TextMatch>, StoreError> {
        let Some(expr) = match_expression(text) else {
            return Ok(Vec::new());
        };
        let conn = Arc::clone(&self.conn);
        let limit = self.limit;

        tokio::task::spawn_blocking(move || -> Result<Vec<TextMatch>, StoreError> {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Unreachable("full-text connection poisoned".into()))?;
            run_match(&conn, &expr, limit)
        })
        .await
        .map_err(|e| StoreError::Unreachable(format!("full-text task failed: {}", e)))?
    }
}
