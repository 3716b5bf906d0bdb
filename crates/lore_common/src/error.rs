//! Error types for Lore.
//!
//! Input-validation errors surface to the caller. Infrastructure errors
//! (timeouts, unavailable sources, generation failures) are recovered
//! locally by the evidence loop and the router and only reach callers that
//! ask for them explicitly.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insight generation failed: {0}")]
    GenerationFailure(String),

    #[error("Source unavailable: {source_name}: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Persistence failed for insight {insight_id}: {reason}")]
    PersistenceFailure { insight_id: String, reason: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled")]
    Cancelled,

    #[error("Evidence loop cooling down, {remaining:?} remaining")]
    CoolingDown { remaining: Duration },

    #[error("An evidence run is already in flight")]
    RunInFlight,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoreError {
    /// Stable numeric code, JSON-RPC style
    pub fn code(&self) -> i32 {
        match self {
            LoreError::InvalidInput(_) => -32602,
            LoreError::GenerationFailure(_) => -32010,
            LoreError::SourceUnavailable { .. } => -32011,
            LoreError::UnknownSource(_) => -32012,
            LoreError::PersistenceFailure { .. } => -32013,
            LoreError::Timeout(_) => -32014,
            LoreError::Cancelled => -32015,
            LoreError::CoolingDown { .. } => -32016,
            LoreError::RunInFlight => -32017,
            LoreError::Config(_) => -32018,
            LoreError::Storage(_) => -32019,
            LoreError::Io(_) => -32006,
            LoreError::Json(_) => -32700,
        }
    }

    /// Client errors are the caller's fault and never retried
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LoreError::InvalidInput(_) | LoreError::UnknownSource(_)
        )
    }
}

impl From<rusqlite::Error> for LoreError {
    fn from(e: rusqlite::Error) -> Self {
        LoreError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LoreError>;
