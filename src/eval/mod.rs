//! Evaluation System
//!
//! Executes a parsed [`Program`](crate::ast::Program) inside a sandboxed
//! [`EvalContext`].
//!
//! # Core Components
//!
//! ## Evaluator
//! Tree-walking interpreter. Arguments are evaluated left to right, depth
//! first; only `if`/`when`/`cond`/`and`/`or` skip untaken branches. Every step
//! returns a [`Step`]: either a value to continue with or an [`Exit`] raised by
//! `return`/`fail`, which callers hand back without evaluating anything else.
//!
//! ## Evaluation Context
//! Tools, data and memory namespaces, lexical scopes, the task journal, the
//! tool-call and print accumulators, and the step/deadline budget.
//!
//! ## Builtins
//! Pure functions reachable by bare name (`count`, `assoc`, `str`, ...).
//!
//! ## Fan-out
//! `pmap`, the only concurrency inside an evaluation.
//!
//! # Symbol Resolution
//!
//! - `data/x`: the run's inputs, read-only
//! - `user/x`: memory written by `def!`
//! - `tool/x`: registered tools
//! - bare `x`: locals, then memory, then tools, then builtins

pub mod builtins;
pub mod context;
pub mod evaluator;
pub mod fanout;

pub use context::{Callee, EvalContext, Limits};
pub use evaluator::{EvalError, EvalResult, Evaluator, Exit, Step};
