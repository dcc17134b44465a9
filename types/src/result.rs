//! Structured outcome of processing a thought.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::ThoughtId;
use crate::thought::ThoughtType;

/// Lexical link from a completed thought to an earlier one, as embedded in
/// the thought's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub thought_id: ThoughtId,
    #[serde(rename = "type")]
    pub thought_type: ThoughtType,
    pub strength: f64,
    pub shared_concepts: Vec<String>,
}

/// Backend output after heuristic parsing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub raw_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionSummary>,
    #[serde(default)]
    pub needs_iteration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_id: Option<ThoughtId>,
    /// Bullet lists keyed by the lower-cased header line that opened them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sections: BTreeMap<String, Vec<String>>,
}

/// Persisted result of a processed thought.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ThoughtResult {
    Completed(ParsedResponse),
    Failed { error: String },
}

impl ThoughtResult {
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        ThoughtResult::Failed {
            error: error.into(),
        }
    }

    #[must_use]
    pub fn parsed(&self) -> Option<&ParsedResponse> {
        match self {
            ThoughtResult::Completed(parsed) => Some(parsed),
            ThoughtResult::Failed { .. } => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            ThoughtResult::Completed(_) => None,
            ThoughtResult::Failed { error } => Some(error),
        }
    }

    #[must_use]
    pub fn insights(&self) -> &[String] {
        self.parsed().map_or(&[], |parsed| parsed.insights.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_serializes_error_field() {
        let value = serde_json::to_value(ThoughtResult::failed("backend down")).unwrap();
        assert_eq!(value["outcome"], "failed");
        assert_eq!(value["error"], "backend down");
    }

    #[test]
    fn completed_result_omits_empty_optionals() {
        let parsed = ParsedResponse {
            raw_response: "hello".to_string(),
            timestamp: 1.5,
            ..ParsedResponse::default()
        };
        let value = serde_json::to_value(ThoughtResult::Completed(parsed)).unwrap();
        assert_eq!(value["outcome"], "completed");
        assert_eq!(value["raw_response"], "hello");
        assert!(value.get("insights").is_none());
        assert!(value.get("iteration_prompt").is_none());
        assert_eq!(value["needs_iteration"], false);
    }

    #[test]
    fn accessors_match_variant() {
        let failed = ThoughtResult::failed("boom");
        assert_eq!(failed.error(), Some("boom"));
        assert!(failed.insights().is_empty());

        let done = ThoughtResult::Completed(ParsedResponse {
            insights: vec!["Insight: a".to_string()],
            ..ParsedResponse::default()
        });
        assert!(done.error().is_none());
        assert_eq!(done.insights(), ["Insight: a".to_string()]);
    }
}
