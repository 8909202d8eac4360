//! Compact type signatures such as `(x :int, y :string?) -> {status :keyword}`.
//!
//! A [`Signature`] validates tool arguments before invocation, validates the
//! value a sub-agent returns, and renders documentation for prompts.

pub mod parser;
pub mod validation;

use std::fmt;

use thiserror::Error;

use crate::value::{Map, Value};

pub use parser::parse_signature;
pub use validation::TypeMismatch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature '{input}': {message}")]
    Invalid { input: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpec {
    String,
    Int,
    Float,
    Bool,
    Keyword,
    Any,
    /// `:map` when `None`, `{field :type ...}` otherwise.
    Map(Option<Vec<Field>>),
    List(Box<TypeSpec>),
    Optional(Box<TypeSpec>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub spec: TypeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Field>,
    pub output: TypeSpec,
}

impl TypeSpec {
    pub fn is_optional(&self) -> bool {
        matches!(self, TypeSpec::Optional(_) | TypeSpec::Any)
    }

    /// A value of this shape, used in generated documentation.
    pub fn example(&self) -> Value {
        match self {
            TypeSpec::String => Value::string("text"),
            TypeSpec::Int => Value::Int(0),
            TypeSpec::Float => Value::Float(0.0),
            TypeSpec::Bool => Value::Bool(true),
            TypeSpec::Keyword => Value::keyword("value"),
            TypeSpec::Any => Value::Nil,
            TypeSpec::Map(None) => Value::Map(Map::new()),
            TypeSpec::Map(Some(fields)) => Value::Map(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), f.spec.example()))
                    .collect(),
            ),
            TypeSpec::List(inner) => Value::List(vec![inner.example()]),
            TypeSpec::Optional(inner) => inner.example(),
        }
    }
}

impl Signature {
    pub fn param(&self, name: &str) -> Option<&Field> {
        self.params.iter().find(|f| f.name == name)
    }

    /// Binds positional arguments to parameter names in declaration order.
    pub fn bind_positional(&self, args: Vec<Value>) -> Option<Value> {
        if args.len() > self.params.len() {
            return None;
        }
        Some(Value::Map(
            self.params
                .iter()
                .zip(args)
                .map(|(field, value)| (field.name.clone(), value))
                .collect(),
        ))
    }

    /// Example invocation of `tool/<name>` built from the parameter examples.
    pub fn example_call(&self, tool_name: &str) -> String {
        let args = Value::Map(
            self.params
                .iter()
                .filter(|f| !f.spec.is_optional())
                .map(|f| (f.name.clone(), f.spec.example()))
                .collect(),
        );
        if self.params.is_empty() {
            format!("(tool/{})", tool_name)
        } else {
            format!("(tool/{} {})", tool_name, args)
        }
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[Field]) -> fmt::Result {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{} {}", field.name, field.spec)?;
    }
    Ok(())
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::String => write!(f, ":string"),
            TypeSpec::Int => write!(f, ":int"),
            TypeSpec::Float => write!(f, ":float"),
            TypeSpec::Bool => write!(f, ":bool"),
            TypeSpec::Keyword => write!(f, ":keyword"),
            TypeSpec::Any => write!(f, ":any"),
            TypeSpec::Map(None) => write!(f, ":map"),
            TypeSpec::Map(Some(fields)) => {
                write!(f, "{{")?;
                write_fields(f, fields)?;
                write!(f, "}}")
            }
            TypeSpec::List(inner) => write!(f, "[{}]", inner),
            TypeSpec::Optional(inner) => write!(f, "{}?", inner),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        write_fields(f, &self.params)?;
        write!(f, ") -> {}", self.output)
    }
}

impl std::str::FromStr for Signature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_signature(s)
    }
}
