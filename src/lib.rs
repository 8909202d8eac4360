//! # ptc-runner: Programmatic Tool Calling
//!
//! Instead of calling tools one at a time, a model writes a small Lisp
//! program. The program is parsed, evaluated in a sandbox that can reach a
//! bounded set of tools, and ends with `return` or `fail`. A turn loop
//! re-prompts the model with compressed history until the run succeeds,
//! fails, or a budget runs out.
//!
//! ## Processing Pipeline
//!
//! ```text
//! Model reply → Tokenizer → Reader → Analyzer → Evaluator → Turn → Compression → Model
//! ```
//!
//! ### Stage 1: Tokenization
//!
//! The [`tokenizer`] module turns program text into tokens that carry their
//! line and column.
//!
//! ### Stage 2: Reading and Analysis
//!
//! The [`reader`] module groups tokens into forms and checks the shape of
//! every special form, producing the [`ast`]. A malformed program never runs.
//!
//! ### Stage 3: Evaluation
//!
//! The [`eval`] module walks the AST. Symbols resolve through the `tool/`,
//! `data/` and `user/` namespaces. `task` results are memoized in the
//! [`journal`], and `pmap` fans tool calls out concurrently.
//!
//! ### Stage 4: Orchestration
//!
//! The [`turn_loop`] drives a [`agent::SubAgent`] through turns, asking the
//! [`llm::ModelClient`] for programs, enforcing the [`budget`] and folding
//! history through a [`compression`] strategy.
//!
//! ## Supporting Modules
//!
//! - [`signature`]: compact type signatures for tool input and agent output
//! - [`tool`]: host tools and nested sub-agents
//! - [`value`]: runtime values and their JSON form
//! - [`config`]: run options
//! - [`error`]: crate errors and the uniform `{reason, message}` failure

pub mod agent;
pub mod ast;
pub mod budget;
pub mod compression;
pub mod config;
pub mod error;
pub mod eval;
pub mod journal;
pub mod llm;
pub mod reader;
pub mod signature;
pub mod tokenizer;
pub mod tool;
pub mod turn;
pub mod turn_loop;
pub mod value;

// Re-exports
pub use agent::{RunFailure, RunInput, RunOutcome, RunSuccess, SubAgent, Usage};
pub use config::{BudgetPolicy, RunConfig};
pub use error::*;
pub use journal::Journal;
pub use reader::{parse, ParseError};
pub use signature::{parse_signature, Signature};
pub use tool::{Tool, ToolError, ToolRegistry};
pub use value::{Map, Value};

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
