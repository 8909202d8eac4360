//! Abstract syntax tree produced by the [`reader`](crate::reader).
//!
//! Special forms are resolved at parse time into dedicated [`Expr`] variants;
//! everything else in head position becomes an [`Expr::Call`] whose head is
//! resolved by the evaluator.

use std::sync::Arc;

use strum_macros::{Display, EnumString};

pub use crate::tokenizer::literal::Literal;

/// Fixed namespace prefixes a symbol may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Namespace {
    Tool,
    Data,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub namespace: Option<Namespace>,
    pub name: String,
}

impl Symbol {
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn qualified(namespace: Namespace, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Parameter list of a `fn`/`defn`: fixed names plus an optional `& rest`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    pub fixed: Vec<String>,
    pub rest: Option<String>,
}

impl Params {
    pub fn accepts(&self, count: usize) -> bool {
        match self.rest {
            Some(_) => count >= self.fixed.len(),
            None => count == self.fixed.len(),
        }
    }

    pub fn arity(&self) -> String {
        match self.rest {
            Some(_) => format!("at least {}", self.fixed.len()),
            None => self.fixed.len().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub name: Option<String>,
    pub params: Params,
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Symbol(Symbol),
    Vector(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Call {
        head: Box<Expr>,
        args: Vec<Expr>,
    },
    Do(Vec<Expr>),
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    When {
        condition: Box<Expr>,
        body: Vec<Expr>,
    },
    Cond(Vec<(Expr, Expr)>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Let {
        bindings: Vec<(String, Expr)>,
        body: Vec<Expr>,
    },
    /// `def!`/`def`, and `defn` after desugaring into a named `fn`.
    Def {
        name: String,
        value: Box<Expr>,
    },
    Fn(Arc<FnDef>),
    Task {
        id: Box<Expr>,
        body: Box<Expr>,
    },
    Return(Box<Expr>),
    Fail(Box<Expr>),
    Pmap {
        callable: Box<Expr>,
        items: Box<Expr>,
    },
}

/// A parsed program: the top-level forms in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub forms: Vec<Expr>,
    pub source: String,
}
