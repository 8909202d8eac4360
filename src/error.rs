use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eval::evaluator::EvalError;
use crate::journal::JournalError;
use crate::llm::LlmError;
use crate::reader::ParseError;
use crate::signature::SignatureError;
use crate::tokenizer::token::TokenizerError;
use crate::tool::ToolError;
use crate::value::{Map, Value};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PtcResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}

/// Failure categories, rendered to the model as keywords.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Reason {
    ParseError,
    UnboundSymbol,
    ArityMismatch,
    TypeMismatch,
    ToolError,
    Timeout,
    BudgetExceeded,
    TurnsExhausted,
    ModelError,
    RuntimeError,
    /// Chosen by the program through `fail`.
    Explicit(String),
}

impl Reason {
    pub fn as_str(&self) -> &str {
        match self {
            Reason::ParseError => "parse_error",
            Reason::UnboundSymbol => "unbound_symbol",
            Reason::ArityMismatch => "arity_mismatch",
            Reason::TypeMismatch => "type_mismatch",
            Reason::ToolError => "tool_error",
            Reason::Timeout => "timeout",
            Reason::BudgetExceeded => "budget_exceeded",
            Reason::TurnsExhausted => "turns_exhausted",
            Reason::ModelError => "model_error",
            Reason::RuntimeError => "runtime_error",
            Reason::Explicit(name) => name,
        }
    }

    pub fn is_explicit(&self) -> bool {
        matches!(self, Reason::Explicit(_))
    }

    /// Maps a keyword back onto the engine's reasons; anything else is explicit.
    pub fn from_keyword(name: &str) -> Self {
        let name = name.trim_start_matches(':');
        match name {
            "parse_error" => Reason::ParseError,
            "unbound_symbol" => Reason::UnboundSymbol,
            "arity_mismatch" => Reason::ArityMismatch,
            "type_mismatch" => Reason::TypeMismatch,
            "tool_error" => Reason::ToolError,
            "timeout" => Reason::Timeout,
            "budget_exceeded" => Reason::BudgetExceeded,
            "turns_exhausted" => Reason::TurnsExhausted,
            "model_error" => Reason::ModelError,
            "runtime_error" => Reason::RuntimeError,
            other => Reason::Explicit(other.to_string()),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.as_str())
    }
}

impl From<Reason> for String {
    fn from(reason: Reason) -> Self {
        reason.as_str().to_string()
    }
}

impl From<String> for Reason {
    fn from(name: String) -> Self {
        Reason::from_keyword(&name)
    }
}

/// The uniform `{reason, message, details?}` failure every error becomes at a
/// turn boundary.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{reason}: {message}")]
pub struct Failure {
    pub reason: Reason,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Failure {
    pub fn new(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Builds the failure carried by `(fail x)`. A map supplies `:reason`,
    /// `:message` and `:details`; a keyword is a bare reason; anything else
    /// becomes the message.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Map(map) => {
                let reason = map
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(|r| Reason::Explicit(r.trim_start_matches(':').to_string()))
                    .unwrap_or_else(|| Reason::Explicit("failed".to_string()));
                let message = match map.get("message") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_text(),
                    None => String::new(),
                };
                Self {
                    reason,
                    message,
                    details: map.get("details").cloned(),
                }
            }
            Value::Keyword(k) => Self::new(Reason::Explicit(k.clone()), ""),
            other => Self::new(Reason::Explicit("failed".to_string()), other.to_text()),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "reason".to_string(),
            Value::keyword(self.reason.as_str()),
        );
        map.insert("message".to_string(), Value::string(&self.message));
        if let Some(details) = &self.details {
            map.insert("details".to_string(), details.clone());
        }
        Value::Map(map)
    }
}

impl From<EvalError> for Failure {
    fn from(error: EvalError) -> Self {
        let reason = match &error {
            EvalError::UnboundSymbol(_) => Reason::UnboundSymbol,
            EvalError::Arity { .. } => Reason::ArityMismatch,
            EvalError::TypeMismatch(_) | EvalError::InvalidArgument { .. } => {
                Reason::TypeMismatch
            }
            EvalError::Tool { .. } => Reason::ToolError,
            EvalError::Timeout(_) => Reason::Timeout,
            EvalError::BudgetExceeded(_) => Reason::BudgetExceeded,
            EvalError::Runtime(_) => Reason::RuntimeError,
        };
        let details = match &error {
            EvalError::TypeMismatch(mismatch) => Some(Value::map([
                ("path", Value::string(&mismatch.path)),
                ("expected", Value::string(&mismatch.expected)),
                ("found", Value::string(&mismatch.found)),
            ])),
            EvalError::Tool {
                details: Some(details),
                ..
            } => Some(details.clone()),
            _ => None,
        };
        Self {
            reason,
            message: error.to_string(),
            details,
        }
    }
}

impl From<ParseError> for Failure {
    fn from(error: ParseError) -> Self {
        Failure::new(Reason::ParseError, error.to_string()).with_details(Value::map([
            ("line", Value::Int(error.line as i64)),
            ("column", Value::Int(error.column as i64)),
        ]))
    }
}

impl From<LlmError> for Failure {
    fn from(error: LlmError) -> Self {
        Failure::new(Reason::ModelError, error.to_string())
    }
}
