use super::adapter::SourceResult;
use crate::error::{LoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SOURCE_PREFIX: &str = "source:";

/// How the router picks adapters
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Keyword rules pick one adapter, with fallback
    #[default]
    Auto,
    /// Exactly the named adapter
    Source(String),
    /// Every registered adapter, concurrently
    All,
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Auto => "auto",
            Mode::Source(name) => name,
            Mode::All => "all",
        }
    }

    /// Metric label; source names are collapsed so label cardinality
    /// stays bounded
    pub fn kind(&self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Source(_) => "source",
            Mode::All => "all",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Source(name) => write!(f, "{}{}", SOURCE_PREFIX, name),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Accepts `auto`, `all`, `source:<name>` or a bare adapter name
impl FromStr for Mode {
    type Err = LoreError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "" => Err(LoreError::InvalidInput("empty mode".to_string())),
            "auto" => Ok(Mode::Auto),
            "all" => Ok(Mode::All),
            _ => {
                let name = match s.get(..SOURCE_PREFIX.len()) {
                    Some(head) if head.eq_ignore_ascii_case(SOURCE_PREFIX) => &s[SOURCE_PREFIX.len()..],
                    _ => s,
                }
                .trim();
                if name.is_empty() {
                    return Err(LoreError::InvalidInput("source mode needs a name".to_string()));
                }
                Ok(Mode::Source(name.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub mode: Mode,
}

impl Query {
    /// Rejects blank text and blank source names
    pub fn new(text: &str, mode: Mode) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LoreError::InvalidInput("query text is empty".to_string()));
        }
        if let Mode::Source(name) = &mode {
            if name.trim().is_empty() {
                return Err(LoreError::InvalidInput("source name is empty".to_string()));
            }
        }
        Ok(Self {
            text: text.to_string(),
            mode,
        })
    }

    pub fn auto(text: &str) -> Result<Self> {
        Self::new(text, Mode::Auto)
    }
}

/// How a query was answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// `source:<name>`, `all`, or `auto:<adapter that answered>` (plain
    /// `auto` when no adapter answered)
    pub mode_resolved: String,
    /// Adapters actually called, in call order
    pub sources_queried: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub answer_sources: Vec<SourceResult>,
    pub decision: RoutingDecision,
}
