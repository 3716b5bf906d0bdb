//! Keyword routing rules for `Mode::Auto`.
//!
//! Rules are evaluated in order over the lower-cased query text; the first
//! rule with a matching term picks the adapter. No match means
//! `DEFAULT_SOURCE`.

use super::adapter::{ANALYTIC_SOURCE, FULLTEXT_SOURCE, VECTOR_SOURCE};
use serde::{Deserialize, Serialize};

/// Adapter used when no rule matches
pub const DEFAULT_SOURCE: &str = FULLTEXT_SOURCE;

/// Order in which Auto mode tries adapters after the preferred one fails
pub const FALLBACK_ORDER: [&str; 3] = [VECTOR_SOURCE, FULLTEXT_SOURCE, ANALYTIC_SOURCE];

const COST_TERMS: &[&str] = &[
    "cost", "usage", "pricing", "price", "spend", "spent", "billing", "invoice", "budget",
];

const RESEARCH_TERMS: &[&str] = &[
    "research",
    "architecture",
    "strategy",
    "design",
    "roadmap",
    "approach",
    "tradeoff",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    /// Lower-case substrings; any one of them matches
    pub terms: Vec<String>,
    /// Adapter name
    pub target: String,
}

impl RoutingRule {
    pub fn new(name: &str, terms: &[&str], target: &str) -> Self {
        Self {
            name: name.to_string(),
            terms: terms.iter().map(|t| t.to_lowercase()).collect(),
            target: target.to_string(),
        }
    }

    /// The first term found in `lower`, if any
    pub fn matches(&self, lower: &str) -> Option<&str> {
        self.terms
            .iter()
            .find(|term| !term.is_empty() && lower.contains(term.as_str()))
            .map(String::as_str)
    }
}

/// Cost/usage questions go to analytics, research questions to vectors
pub fn default_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule::new("cost", COST_TERMS, ANALYTIC_SOURCE),
        RoutingRule::new("research", RESEARCH_TERMS, VECTOR_SOURCE),
    ]
}

/// Result of evaluating the rule table
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub target: String,
    pub reason: String,
}

/// First matching rule, or the default source
pub fn select_target(rules: &[RoutingRule], text: &str) -> RuleMatch {
    let lower = text.to_lowercase();
    for rule in rules {
        if let Some(term) = rule.matches(&lower) {
            return RuleMatch {
                target: rule.target.clone(),
                reason: format!("rule '{}' matched term '{}' -> {}", rule.name, term, rule.target),
            };
        }
    }
    RuleMatch {
        target: DEFAULT_SOURCE.to_string(),
        reason: format!("no rule matched -> default {}", DEFAULT_SOURCE),
    }
}
