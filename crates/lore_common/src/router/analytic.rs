//! Structured/analytic adapter.
//!
//! The adapter does not translate free text into SQL. It holds a small set
//! of named views, picks the ones whose keywords appear in the query (all
//! of them when none do) and returns one result per view that produced
//! rows. The score is the row count.

use super::adapter::{excerpt, AdapterError, SourceAdapter, SourceResult, StoreError, ANALYTIC_SOURCE};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// One result row, column name -> value
pub type Row = Map<String, Value>;

/// Rows rendered into an excerpt
const EXCERPT_ROWS: usize = 5;

/// External analytic store: `query(sql) -> rows`
#[async_trait]
pub trait AnalyticStore: Send + Sync {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError>;
}

/// A named, read-only query selected by keyword
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticView {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub sql: String,
}

impl AnalyticView {
    pub fn new(name: &str, keywords: &[&str], sql: &str) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            sql: sql.to_string(),
        }
    }

    fn matches(&self, lower: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && lower.contains(k.to_lowercase().as_str()))
    }
}

/// Views over the `usage` table (`day`, `service`, `units`, `cost`)
pub fn default_views() -> Vec<AnalyticView> {
    vec![
        AnalyticView::new(
            "cost_by_service",
            &["cost", "spend", "spent", "price", "pricing", "billing", "invoice", "budget"],
            "SELECT service, ROUND(SUM(cost), 2) AS total_cost \
             FROM usage \
             WHERE day >= date('now', 'start of month') \
             GROUP BY service ORDER BY total_cost DESC",
        ),
        AnalyticView::new(
            "daily_usage",
            &["usage", "units", "daily", "trend"],
            "SELECT day, SUM(units) AS units, ROUND(SUM(cost), 2) AS cost \
             FROM usage \
             GROUP BY day ORDER BY day DESC LIMIT 30",
        ),
    ]
}

pub struct AnalyticAdapter {
    store: Arc<dyn AnalyticStore>,
    views: Vec<AnalyticView>,
}

impl AnalyticAdapter {
    pub fn new(store: Arc<dyn AnalyticStore>, views: Vec<AnalyticView>) -> Self {
        Self { store, views }
    }

    /// Views matching `text`, or every view when none match
    pub fn select_views(&self, text: &str) -> Vec<&AnalyticView> {
        let lower = text.to_lowercase();
        let matched: Vec<&AnalyticView> = self.views.iter().filter(|v| v.matches(&lower)).collect();
        if matched.is_empty() {
            self.views.iter().collect()
        } else {
            matched
        }
    }
}

#[async_trait]
impl SourceAdapter for AnalyticAdapter {
    fn name(&self) -> &str {
        ANALYTIC_SOURCE
    }

    async fn search(&self, text: &str) -> Result<Vec<SourceResult>, AdapterError> {
        let views = self.select_views(text);
        let mut results = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0usize;

        for view in &views {
            match self.store.query(&view.sql).await {
                Ok(rows) => {
                    succeeded += 1;
                    if !rows.is_empty() {
                        results.push(view_result(view, rows));
                    }
                }
                Err(e) => {
                    warn!(view = %view.name, error = %e, "Analytic view failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e.into()),
            _ => Ok(results),
        }
    }
}

fn view_result(view: &AnalyticView, rows: Vec<Row>) -> SourceResult {
    let rendered: Vec<String> = rows.iter().take(EXCERPT_ROWS).map(render_row).collect();
    let mut metadata = Map::new();
    metadata.insert("view".to_string(), Value::String(view.name.clone()));
    metadata.insert("row_count".to_string(), Value::from(rows.len()));
    let count = rows.len();
    metadata.insert(
        "rows".to_string(),
        Value::Array(rows.into_iter().map(Value::Object).collect()),
    );

    SourceResult {
        source: ANALYTIC_SOURCE.to_string(),
        score: count as f64,
        excerpt: excerpt(&format!("{}: {}", view.name, rendered.join("; "))),
        metadata,
    }
}

fn render_row(row: &Row) -> String {
    row.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// SQLite analytic store
// ============================================================================

/// Read-only SQLite connection; non-read-only statements are refused
pub struct SqliteAnalyticStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAnalyticStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open analytic database: {:?}", path))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Row>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    if !stmt.readonly() {
        return Err(StoreError::Query("only read-only statements are allowed".into()));
    }
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Map::new();
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

#[async_trait]
impl AnalyticStore for SqliteAnalyticStore {
    async fn query(&self, sql: &str) -> Result<Vec<Row>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<Row>, StoreError> {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Unreachable("analytic connection poisoned".into()))?;
            run_query(&conn, &sql)
        })
        .await
        .map_err(|e| StoreError::Unreachable(format!("analytic task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded_db() -> (TempDir, SqliteAnalyticStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE usage (day TEXT, service TEXT, units REAL, cost REAL);
            INSERT INTO usage VALUES (date('now'), 'llm-api', 1200, 14.5);
            INSERT INTO usage VALUES (date('now'), 'vector-db', 300, 2.25);
            INSERT INTO usage VALUES (date('now', '-1 day'), 'llm-api', 800, 9.0);
            "#,
        )
        .unwrap();
        drop(conn);
        let store = SqliteAnalyticStore::open(&path).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_query_returns_typed_rows() {
        let (_dir, store) = seeded_db();
        let rows = store
            .query("SELECT service, units FROM usage ORDER BY units DESC LIMIT 1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["service"], "llm-api");
        assert_eq!(rows[0]["units"], 1200.0);
    }

    #[tokio::test]
    async fn test_writes_are_refused() {
        let (_dir, store) = seeded_db();
        assert!(store.query("DELETE FROM usage").await.is_err());
        assert_eq!(store.query("SELECT * FROM usage").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cost_query_selects_cost_view() {
        let (_dir, store) = seeded_db();
        let adapter = AnalyticAdapter::new(Arc::new(store), default_views());

        let results = adapter.search("What's my API cost this month?").await.unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.source, ANALYTIC_SOURCE);
        assert_eq!(result.metadata["view"], "cost_by_service");
        assert_eq!(result.score, result.metadata["row_count"].as_f64().unwrap());
        assert!(result.excerpt.starts_with("cost_by_service: service=llm-api"));
    }

    #[test]
    fn test_unmatched_text_selects_all_views() {
        struct Never;
        #[async_trait]
        impl AnalyticStore for Never {
            async fn query(&self, _sql: &str) -> Result<Vec<Row>, StoreError> {
                Ok(Vec::new())
            }
        }
        let adapter = AnalyticAdapter::new(Arc::new(Never), default_views());
        assert_eq!(adapter.select_views("hello").len(), 2);
        assert_eq!(adapter.select_views("daily usage").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE other (x INTEGER);")
            .unwrap();
        let adapter = AnalyticAdapter::new(
            Arc::new(SqliteAnalyticStore::open(&path).unwrap()),
            default_views(),
        );
        assert!(matches!(
            adapter.search("cost").await,
            Err(AdapterError::Unavailable(_))
        ));
    }
}
