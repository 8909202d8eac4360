//! Immutable records of what happened during a turn.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::Failure;
use crate::llm::TokenUsage;
use crate::value::{truncate, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    pub result: Result<Value, Failure>,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ToolCallRecord {
    /// One-line rendering for the prompt history.
    pub fn summary(&self, max_chars: usize) -> String {
        let result = match &self.result {
            Ok(value) => value.preview(max_chars),
            Err(failure) => format!("ERROR {}", truncate(&failure.to_string(), max_chars)),
        };
        format!(
            "(tool/{} {}) => {}",
            self.name,
            self.args.preview(max_chars),
            result
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Evaluation finished without `return`/`fail`.
    Continued { value: Value },
    Returned { value: Value },
    /// The program called `fail`.
    Failed { failure: Failure },
    /// Parse, model or evaluation error; the run may recover next turn.
    Errored { failure: Failure },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub number: usize,
    pub program: String,
    pub outcome: TurnOutcome,
    pub tool_calls: Vec<ToolCallRecord>,
    pub prints: Vec<String>,
    pub usage: TokenUsage,
}

impl Turn {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            TurnOutcome::Continued { .. } | TurnOutcome::Returned { .. }
        )
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            TurnOutcome::Continued { value } | TurnOutcome::Returned { value } => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            TurnOutcome::Failed { failure } | TurnOutcome::Errored { failure } => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Reason;
    use pretty_assertions::assert_eq;

    fn record(result: Result<Value, Failure>) -> ToolCallRecord {
        ToolCallRecord {
            name: "fetch".into(),
            args: Value::map([("id", Value::Int(1))]),
            result,
            timestamp: Utc::now(),
            duration: Duration::from_millis(12),
        }
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            record(Ok(Value::string("done"))).summary(40),
            "(tool/fetch {:id 1}) => \"done\""
        );
        assert_eq!(
            record(Err(Failure::new(Reason::ToolError, "down"))).summary(40),
            "(tool/fetch {:id 1}) => ERROR :tool_error: down"
        );
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = TurnOutcome::Returned {
            value: Value::Int(1),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"status": "returned", "value": 1})
        );
    }
}
