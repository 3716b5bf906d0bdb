//! Lore Configuration
//!
//! Configuration lives in ~/.config/lore/config.toml (or `$LORE_CONFIG`).
//! Environment variables override file values after loading:
//!
//! - LORE_CONFIDENCE_THRESHOLD, LORE_MAX_BATCH_SIZE, LORE_RUN_COOLDOWN_SECONDS
//! - LORE_ADAPTER_TIMEOUT_SECONDS, LORE_LLM_RETRY_COUNT
//! - LORE_LLM_ENDPOINT, LORE_LLM_MODEL, LORE_LLM_API_KEY

use crate::error::{LoreError, Result};
use crate::llm::LlmConfig;
use crate::retry::RetryPolicy;
use crate::router::analytic::{default_views, AnalyticView};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "lore";

// ============================================================================
// Evidence loop settings
// ============================================================================

/// Evidence loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSettings {
    /// Minimum confidence an insight needs to be persisted (0.0-1.0)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Maximum events per batch; older events overflow first
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Minimum seconds between two runs
    #[serde(default = "default_run_cooldown")]
    pub run_cooldown_seconds: u64,

    /// Total LLM attempts per run before degrading to zero insights
    #[serde(default = "default_llm_retry_count")]
    pub llm_retry_count: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Backoff growth factor between attempts
    #[serde(default = "default_retry_multiplier")]
    pub retry_backoff_multiplier: f64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Random jitter as a fraction of each delay (0.0 disables)
    #[serde(default)]
    pub retry_jitter_percent: f64,

    /// Deadline for a single LLM call
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_seconds: u64,
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_max_batch_size() -> usize {
    50
}

fn default_run_cooldown() -> u64 {
    60
}

fn default_llm_retry_count() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_max_delay() -> u64 {
    30_000
}

fn default_llm_timeout() -> u64 {
    30
}

impl EvidenceSettings {
    /// Threshold clamped into [0, 1]
    pub fn effective_threshold(&self) -> f64 {
        if self.confidence_threshold.is_nan() {
            return default_confidence_threshold();
        }
        self.confidence_threshold.clamp(0.0, 1.0)
    }

    /// Batch size, at least 1
    pub fn effective_batch_size(&self) -> usize {
        self.max_batch_size.max(1)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.run_cooldown_seconds)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds.max(1))
    }

    /// Retry policy for the generation stage
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm_retry_count.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            backoff_multiplier: if self.retry_backoff_multiplier >= 1.0 {
                self.retry_backoff_multiplier
            } else {
                1.0
            },
            max_delay: Duration::from_millis(self.retry_max_delay_ms.max(self.retry_base_delay_ms)),
            jitter_percent: self.retry_jitter_percent.clamp(0.0, 1.0),
        }
    }
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_batch_size: default_max_batch_size(),
            run_cooldown_seconds: default_run_cooldown(),
            llm_retry_count: default_llm_retry_count(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_backoff_multiplier: default_retry_multiplier(),
            retry_max_delay_ms: default_retry_max_delay(),
            retry_jitter_percent: 0.0,
            llm_timeout_seconds: default_llm_timeout(),
        }
    }
}

// ============================================================================
// Router settings
// ============================================================================

/// Query router settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Per-adapter deadline
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_seconds: u64,

    /// Neighbours requested from the vector store
    #[serde(default = "default_vector_top_k")]
    pub vector_top_k: usize,

    /// Cap on merged results (0 = unlimited)
    #[serde(default)]
    pub max_results: usize,

    /// Endpoint of the vector similarity service, if any
    #[serde(default)]
    pub vector_endpoint: Option<String>,

    /// SQL views for the analytic adapter (empty = built-in views)
    #[serde(default)]
    pub analytic_views: Vec<AnalyticView>,
}

fn default_adapter_timeout() -> u64 {
    5
}

fn default_vector_top_k() -> usize {
    8
}

impl RouterSettings {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_seconds.max(1))
    }

    pub fn result_limit(&self) -> Option<usize> {
        (self.max_results > 0).then_some(self.max_results)
    }

    pub fn views(&self) -> Vec<AnalyticView> {
        if self.analytic_views.is_empty() {
            default_views()
        } else {
            self.analytic_views.clone()
        }
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            adapter_timeout_seconds: default_adapter_timeout(),
            vector_top_k: default_vector_top_k(),
            max_results: 0,
            vector_endpoint: None,
            analytic_views: Vec::new(),
        }
    }
}

// ============================================================================
// Storage + logging
// ============================================================================

/// Paths of the SQLite-backed stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Graph store holding persisted insights
    #[serde(default = "default_graph_db")]
    pub graph_db: PathBuf,

    /// Full-text document index
    #[serde(default = "default_fulltext_db")]
    pub fulltext_db: PathBuf,

    /// Analytic database (opened read-only)
    #[serde(default = "default_analytic_db")]
    pub analytic_db: PathBuf,
}

fn default_graph_db() -> PathBuf {
    data_dir().join("graph.db")
}

fn default_fulltext_db() -> PathBuf {
    data_dir().join("fulltext.db")
}

fn default_analytic_db() -> PathBuf {
    data_dir().join("analytics.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            graph_db: default_graph_db(),
            fulltext_db: default_fulltext_db(),
            analytic_db: default_analytic_db(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Complete configuration
// ============================================================================

/// Complete Lore configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoreConfig {
    #[serde(default)]
    pub evidence: EvidenceSettings,

    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl LoreConfig {
    /// Load from the default path, then apply environment overrides.
    /// A missing file yields defaults; an unreadable one is an error.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file without environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| LoreError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save to the default config path
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| LoreError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Evidence settings with the LLM call deadline widened to cover every
    /// HTTP route the configured client may try
    pub fn evidence_settings(&self) -> EvidenceSettings {
        let mut settings = self.evidence.clone();
        let needed = self.llm.max_call_duration();
        if settings.llm_timeout() < needed {
            warn!(
                configured = settings.llm_timeout_seconds,
                needed = needed.as_secs(),
                "Raising evidence.llm_timeout_seconds to fit the LLM fallback route"
            );
            settings.llm_timeout_seconds = needed.as_secs();
        }
        settings
    }

    /// Apply `LORE_*` overrides. `lookup` is injected so tests need not
    /// touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "LORE_CONFIDENCE_THRESHOLD", &mut self.evidence.confidence_threshold);
        override_parsed(&lookup, "LORE_MAX_BATCH_SIZE", &mut self.evidence.max_batch_size);
        override_parsed(&lookup, "LORE_RUN_COOLDOWN_SECONDS", &mut self.evidence.run_cooldown_seconds);
        override_parsed(&lookup, "LORE_LLM_RETRY_COUNT", &mut self.evidence.llm_retry_count);
        override_parsed(&lookup, "LORE_ADAPTER_TIMEOUT_SECONDS", &mut self.router.adapter_timeout_seconds);

        if let Some(endpoint) = lookup("LORE_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = lookup("LORE_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = lookup("LORE_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable config override"),
        }
    }
}

/// Config file path (`$LORE_CONFIG` wins)
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("LORE_CONFIG") {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(CONFIG_FILE)
}

/// Data directory for the SQLite stores
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = LoreConfig::default();
        assert_eq!(config.evidence.confidence_threshold, 0.6);
        assert_eq!(config.evidence.max_batch_size, 50);
        assert_eq!(config.evidence.run_cooldown_seconds, 60);
        assert_eq!(config.evidence.llm_retry_count, 3);
        assert_eq!(config.router.adapter_timeout_seconds, 5);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LoreConfig = toml::from_str(
            r#"
            [evidence]
            confidence_threshold = 0.75

            [router]
            vector_top_k = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.evidence.confidence_threshold, 0.75);
        assert_eq!(config.evidence.max_batch_size, 50);
        assert_eq!(config.router.vector_top_k, 3);
        assert_eq!(config.router.adapter_timeout_seconds, 5);
        assert!(!config.router.views().is_empty());
    }

    #[test]
    fn test_custom_analytic_views() {
        let config: LoreConfig = toml::from_str(
            r#"
            [[router.analytic_views]]
            name = "tickets"
            keywords = ["ticket"]
            sql = "SELECT * FROM tickets"
            "#,
        )
        .unwrap();
        let views = config.router.views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "tickets");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LORE_CONFIDENCE_THRESHOLD", "0.8"),
            ("LORE_MAX_BATCH_SIZE", "not-a-number"),
            ("LORE_ADAPTER_TIMEOUT_SECONDS", "9"),
            ("LORE_LLM_MODEL", "qwen3:4b"),
        ]
        .into_iter()
        .collect();

        let mut config = LoreConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.evidence.confidence_threshold, 0.8);
        // Unparsable value keeps the previous one
        assert_eq!(config.evidence.max_batch_size, 50);
        assert_eq!(config.router.adapter_timeout_seconds, 9);
        assert_eq!(config.llm.model, "qwen3:4b");
    }

    #[test]
    fn test_effective_values_are_clamped() {
        let settings = EvidenceSettings {
            confidence_threshold: 1.7,
            max_batch_size: 0,
            llm_retry_count: 0,
            retry_backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert_eq!(settings.effective_threshold(), 1.0);
        assert_eq!(settings.effective_batch_size(), 1);

        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff_multiplier, 1.0);
    }

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = LoreConfig::default();
        config.evidence.max_batch_size = 20;
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = LoreConfig::load_from(&path).unwrap();
        assert_eq!(loaded.evidence.max_batch_size, 20);
    }

    #[test]
    fn test_save_to_writes_the_given_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("alt.toml");
        let mut config = LoreConfig::default();
        config.router.vector_top_k = 3;

        config.save_to(&path).unwrap();
        assert_eq!(LoreConfig::load_from(&path).unwrap().router.vector_top_k, 3);
    }

    #[test]
    fn test_evidence_deadline_fits_llm_fallback() {
        // Ollama endpoint, 30s per HTTP route, two routes
        let config = LoreConfig::default();
        assert_eq!(config.evidence.llm_timeout(), Duration::from_secs(30));
        assert_eq!(config.evidence_settings().llm_timeout(), Duration::from_secs(60));

        let mut config = LoreConfig::default();
        config.llm.endpoint = "https://api.example.com".to_string();
        assert_eq!(config.evidence_settings().llm_timeout(), Duration::from_secs(30));

        config.evidence.llm_timeout_seconds = 90;
        assert_eq!(config.evidence_settings().llm_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[evidence\nbroken").unwrap();
        assert!(matches!(LoreConfig::load_from(&path), Err(LoreError::Config(_))));
    }
}
