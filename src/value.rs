//! Runtime values of the DSL and their JSON mapping.
//!
//! Maps use string keys: `{:id 1}` and `{"id" 1}` address the same entry. On the
//! JSON side keywords travel as `":name"` strings, which is also how the journal
//! persists them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::FnDef;
use crate::eval::builtins::Builtin;

pub type Map = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(into = "serde_json::Value", from = "serde_json::Value")]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Keyword(String),
    List(Vec<Value>),
    Map(Map),
    Closure(Arc<Closure>),
    Builtin(Builtin),
    ToolRef(String),
}

/// A user-defined function. `captured` holds the enclosing locals and `memory`
/// the memory namespace as it was when the `fn` was evaluated; later `def!`s
/// are not visible through it.
#[derive(Debug)]
pub struct Closure {
    pub def: Arc<FnDef>,
    pub captured: Map,
    pub memory: Arc<Map>,
}

impl Closure {
    pub fn name(&self) -> &str {
        self.def.name.as_deref().unwrap_or("fn")
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::ToolRef(a), Value::ToolRef(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn keyword(k: impl Into<String>) -> Self {
        Value::Keyword(k.into())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Closure(_) | Value::Builtin(_) => "fn",
            Value::ToolRef(_) => "tool",
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Closure(_) | Value::Builtin(_) | Value::ToolRef(_) | Value::Keyword(_)
        )
    }

    /// The map key this value addresses, if it can be one.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::String(s) | Value::Keyword(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Keyword(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Text used when the value is concatenated by `str` or printed by
    /// `println`: strings are not quoted, `nil` is empty.
    pub fn to_text(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::String(s) => s.clone(),
            Value::Keyword(k) => format!(":{}", k),
            other => other.to_string(),
        }
    }

    /// Display form cut to at most `max_chars` characters.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate(&self.to_string(), max_chars)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            // A leading colon is doubled so the string does not read back as a keyword.
            Value::String(s) if s.starts_with(':') => serde_json::Value::String(format!(":{}", s)),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Keyword(k) => serde_json::Value::String(format!(":{}", k)),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Closure(_) | Value::Builtin(_) | Value::ToolRef(_) => {
                serde_json::Value::String(self.to_string())
            }
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => {
                if let Some(escaped) = s.strip_prefix("::") {
                    return Value::String(format!(":{}", escaped));
                }
                match keyword_name(s) {
                    Some(k) => Value::Keyword(k.to_string()),
                    None => Value::String(s.clone()),
                }
            }
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

fn keyword_name(s: &str) -> Option<&str> {
    let name = s.strip_prefix(':')?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(crate::tokenizer::symbol::is_symbol_char);
    valid.then_some(name)
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        value.to_json()
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(map)
    }
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &str) -> fmt::Result {
    let keyword_safe = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(crate::tokenizer::symbol::is_symbol_char);
    if keyword_safe {
        write!(f, ":{}", key)
    } else {
        write!(f, "{:?}", key)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Keyword(k) => write!(f, ":{}", k),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_key(f, k)?;
                    write!(f, " {}", v)?;
                }
                write!(f, "}}")
            }
            Value::Closure(c) => write!(f, "#<fn {}>", c.name()),
            Value::Builtin(b) => write!(f, "#<builtin {}>", b),
            Value::ToolRef(name) => write!(f, "#<tool {}>", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_display_is_edn_like() {
        let value = Value::map([
            ("status", Value::keyword("ok")),
            ("items", Value::List(vec![Value::Int(1), Value::Float(2.0)])),
            ("first name", Value::string("Ann")),
        ]);
        assert_eq!(
            value.to_string(),
            r#"{"first name" "Ann", :items [1 2.0], :status :ok}"#
        );
    }

    #[test]
    fn test_keywords_travel_as_tagged_strings() {
        let value = Value::map([("status", Value::keyword("approved"))]);
        assert_eq!(value.to_json(), json!({"status": ":approved"}));
        assert_eq!(Value::from_json(&json!({"status": ":approved"})), value);
        assert_eq!(Value::from_json(&json!(":")), Value::string(":"));
    }

    #[test]
    fn test_colon_strings_keep_their_type() {
        let text = Value::string(":approved");
        assert_eq!(text.to_json(), json!("::approved"));
        assert_eq!(Value::from_json(&text.to_json()), text);
        assert_eq!(Value::from_json(&json!("::")), Value::string(":"));
        let bare = Value::string(":");
        assert_eq!(Value::from_json(&bare.to_json()), bare);
    }

    #[test]
    fn test_numbers_from_json() {
        assert_eq!(Value::from_json(&json!(5)), Value::Int(5));
        assert_eq!(Value::from_json(&json!(2.5)), Value::Float(2.5));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn test_preview_truncates() {
        let value = Value::string("abcdefghij");
        assert_eq!(value.preview(5), "\"abcd...");
    }
}
