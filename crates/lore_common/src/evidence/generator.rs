//! Insight generation through an external LLM.
//!
//! The model is asked for a JSON array of `{pattern, action, confidence}`.
//! Parsing is tolerant of the usual small-model habits (code fences, a
//! wrapping object, prose around the JSON, stray malformed items); only a
//! response with no usable structure counts as a failed attempt.

use super::{Insight, PatternSummary};
use crate::cancel::{with_deadline, CancelSignal, Interrupt};
use crate::error::{LoreError, Result};
use crate::llm::LlmCaller;
use crate::retry::{RetryError, RetryPolicy};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROMPT_HEADER: &str = "You analyse interaction events from an assistant and propose \
behavioral insights: a recurring pattern and the action the assistant should take when it \
sees that pattern again. Only propose insights supported by the counts and samples below.";

const PROMPT_SCHEMA: &str = r#"Respond with JSON only, no prose:
[{"pattern": "<observed pattern>", "action": "<what to do about it>", "confidence": <0.0-1.0>}]
Respond with [] if the events support no insight."#;

/// Build the generation prompt from pattern summaries
pub fn build_prompt(summaries: &[PatternSummary]) -> String {
    let patterns: Vec<Value> = summaries
        .iter()
        .map(|s| {
            json!({
                "event_type": s.event_type,
                "count": s.count,
                "samples": s.samples.iter().map(|e| json!({
                    "payload": e.payload,
                    "timestamp": e.timestamp.to_rfc3339(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();

    let body = serde_json::to_string_pretty(&patterns).unwrap_or_else(|_| "[]".to_string());
    format!("{}\n\nObserved patterns:\n{}\n\n{}", PROMPT_HEADER, body, PROMPT_SCHEMA)
}

/// Parse an LLM response into candidate insights.
///
/// Duplicate `(pattern, action)` pairs collapse onto the highest confidence.
/// `[]` is a valid "nothing to report".
pub fn parse_insights(text: &str) -> Result<Vec<Insight>> {
    let value = extract_json(text).ok_or_else(|| {
        LoreError::GenerationFailure(format!("response is not JSON: {}", preview(text)))
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("insights") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(LoreError::GenerationFailure(
                    "JSON object without an \"insights\" array".into(),
                ))
            }
        },
        _ => {
            return Err(LoreError::GenerationFailure(
                "expected a JSON array of insights".into(),
            ))
        }
    };

    let total = items.len();
    let mut by_id: HashMap<String, Insight> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for item in &items {
        let Some(insight) = parse_item(item) else {
            debug!(item = %item, "Skipping malformed insight");
            continue;
        };
        match by_id.get_mut(&insight.id) {
            Some(existing) => {
                if insight.confidence > existing.confidence {
                    *existing = insight;
                }
            }
            None => {
                order.push(insight.id.clone());
                by_id.insert(insight.id.clone(), insight);
            }
        }
    }

    if total > 0 && by_id.is_empty() {
        return Err(LoreError::GenerationFailure(format!(
            "none of {} items had pattern, action and confidence",
            total
        )));
    }

    Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
}

fn parse_item(item: &Value) -> Option<Insight> {
    let pattern = item.get("pattern")?.as_str()?.trim();
    let action = item.get("action")?.as_str()?.trim();
    if pattern.is_empty() || action.is_empty() {
        return None;
    }
    let confidence = match item.get("confidence")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !confidence.is_finite() {
        return None;
    }
    Some(Insight::new(pattern, action, confidence))
}

/// Find the JSON payload in a response, tolerating fences and prose.
///
/// Every `[` or `{` is tried as a start position, in order, so bracketed
/// prose before the payload ("[Note] ...") does not hide it. The first
/// value shaped like an insight list wins; failing that, the first value
/// that parses at all.
fn extract_json(text: &str) -> Option<Value> {
    let trimmed = strip_code_fence(text.trim());
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let mut fallback = None;
    for (start, _) in trimmed.match_indices(|c: char| c == '[' || c == '{') {
        let mut stream = serde_json::Deserializer::from_str(&trimmed[start..]).into_iter::<Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        if looks_like_insights(&value) {
            return Some(value);
        }
        fallback.get_or_insert(value);
    }
    fallback
}

/// An array that is empty or holds objects, or an object with `insights`
fn looks_like_insights(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty() || items.iter().any(Value::is_object),
        Value::Object(obj) => obj.contains_key("insights"),
        _ => false,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(80).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Result of the generation stage. `failure` is set when retries were
/// exhausted and the run degraded to zero insights.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub insights: Vec<Insight>,
    pub attempts: u32,
    pub failure: Option<String>,
}

/// Calls the LLM with retry/backoff and parses its answer
pub struct InsightGenerator {
    llm: Arc<dyn LlmCaller>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl InsightGenerator {
    pub fn new(llm: Arc<dyn LlmCaller>, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            llm,
            retry,
            call_timeout,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Generate candidates for `summaries`.
    ///
    /// Call failures, timeouts and unparsable answers are retried; once the
    /// policy is exhausted the result degrades to zero insights. Only
    /// cancellation is returned as an error.
    pub async fn generate(
        &self,
        summaries: &[PatternSummary],
        cancel: &CancelSignal,
    ) -> Result<Generation> {
        if summaries.is_empty() {
            return Ok(Generation::default());
        }

        let prompt = build_prompt(summaries);
        let outcome = self
            .retry
            .run(cancel, |attempt| self.attempt(&prompt, attempt, cancel))
            .await;

        match outcome {
            Ok((insights, attempts)) => {
                info!(candidates = insights.len(), attempts, "Generated candidate insights");
                Ok(Generation {
                    insights,
                    attempts,
                    failure: None,
                })
            }
            Err(RetryError::Cancelled { .. }) => Err(LoreError::Cancelled),
            Err(RetryError::Exhausted { last: LoreError::Cancelled, .. }) => {
                Err(LoreError::Cancelled)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                let failure = LoreError::GenerationFailure(last.to_string()).to_string();
                warn!(attempts, error = %failure, "Insight generation degraded to zero insights");
                Ok(Generation {
                    insights: Vec::new(),
                    attempts,
                    failure: Some(failure),
                })
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        attempt: u32,
        cancel: &CancelSignal,
    ) -> Result<(Vec<Insight>, u32)> {
        debug!(attempt = attempt + 1, "Calling LLM");
        let text = match with_deadline(self.llm.complete(prompt), self.call_timeout, cancel).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(LoreError::GenerationFailure(e.to_string())),
            Err(Interrupt::Timeout(d)) => return Err(LoreError::Timeout(d)),
            Err(Interrupt::Cancelled) => return Err(LoreError::Cancelled),
        };
        parse_insights(&text).map(|insights| (insights, attempt + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use serde_json::Map;

    #[test]
    fn test_parse_plain_array() {
        let insights = parse_insights(
            r#"[{"pattern": "X", "action": "Y", "confidence": 0.85},
                {"pattern": "P", "action": "Q", "confidence": 0.3}]"#,
        )
        .unwrap();
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].pattern, "X");
        assert_eq!(insights[1].confidence, 0.3);
    }

    #[test]
    fn test_parse_fenced_wrapped_object() {
        let text = "```json\n{\"insights\": [{\"pattern\": \"X\", \"action\": \"Y\", \"confidence\": \"0.7\"}]}\n```";
        let insights = parse_insights(text).unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].confidence, 0.7);
    }

    #[test]
    fn test_parse_with_surrounding_prose() {
        let text = "Sure! Here you go:\n[{\"pattern\": \"X\", \"action\": \"Y\", \"confidence\": 0.9}]\nHope it helps.";
        assert_eq!(parse_insights(text).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_skips_bracketed_prose_before_payload() {
        let text = r#"[Note] result: [{"pattern": "X", "action": "Y", "confidence": 0.9}]"#;
        let insights = parse_insights(text).unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].action, "Y");

        let text = r#"See [1] and {ref}: {"insights": [{"pattern": "P", "action": "Q", "confidence": 0.8}]}"#;
        assert_eq!(parse_insights(text).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_empty_array_is_ok() {
        assert!(parse_insights("[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_skips_malformed_items() {
        let text = r#"[{"pattern": "X", "action": "Y", "confidence": 0.9},
                       {"pattern": "", "action": "Y", "confidence": 0.9},
                       {"pattern": "Z", "confidence": 0.9},
                       {"pattern": "Z", "action": "W", "confidence": "high"}]"#;
        let insights = parse_insights(text).unwrap();
        assert_eq!(insights.len(), 1);
    }

    #[test]
    fn test_parse_all_malformed_is_failure() {
        let res = parse_insights(r#"[{"foo": 1}, {"bar": 2}]"#);
        assert!(matches!(res, Err(LoreError::GenerationFailure(_))));
    }

    #[test]
    fn test_parse_garbage_is_failure() {
        assert!(matches!(
            parse_insights("I could not find any patterns, sorry."),
            Err(LoreError::GenerationFailure(_))
        ));
        assert!(matches!(
            parse_insights(r#"{"result": "ok"}"#),
            Err(LoreError::GenerationFailure(_))
        ));
    }

    #[test]
    fn test_duplicates_keep_highest_confidence() {
        let text = r#"[{"pattern": "X", "action": "Y", "confidence": 0.5},
                       {"pattern": "x", "action": "y ", "confidence": 0.8}]"#;
        let insights = parse_insights(text).unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].confidence, 0.8);
    }

    #[test]
    fn test_prompt_mentions_types_and_counts() {
        let summaries = vec![PatternSummary {
            event_type: "correction".into(),
            count: 4,
            samples: vec![Event::new("correction", Map::new()).with("text", "use metric units")],
        }];
        let prompt = build_prompt(&summaries);
        assert!(prompt.contains("\"event_type\": \"correction\""));
        assert!(prompt.contains("\"count\": 4"));
        assert!(prompt.contains("use metric units"));
        assert!(prompt.contains("\"confidence\""));
    }
}
