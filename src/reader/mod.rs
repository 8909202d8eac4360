//! # Reader
//!
//! Turns program text into a [`Program`]. Reading happens in three stages:
//!
//! 1. the [`Tokenizer`] produces positioned tokens,
//! 2. [`forms`] groups them into balanced raw forms,
//! 3. [`analyzer`] recognizes special forms and checks their shape.
//!
//! Any malformed input is reported as a single [`ParseError`] before anything
//! is evaluated.
//!
//! ```
//! use ptc_runner::ast::Expr;
//! use ptc_runner::reader::parse;
//!
//! let program = parse(r#"(task "fetch_1" (tool/fetch {:id 1}))"#).unwrap();
//! assert!(matches!(program.forms[0], Expr::Task { .. }));
//! ```

pub mod analyzer;
pub mod core;
pub mod forms;

pub use self::core::{ParseError, ReadResult};

use tracing::debug;

use crate::ast::Program;
use crate::tokenizer::token::{TokenSpan, Tokenizer};

#[tracing::instrument(level = "debug", skip(text), fields(len = text.len()))]
pub fn parse(text: &str) -> Result<Program, ParseError> {
    let tokens: Vec<TokenSpan> = Tokenizer::new()
        .tokenize(text)?
        .into_iter()
        .filter(|t| !t.token.is_trivia())
        .collect();
    let forms = forms::read_forms(&tokens)?;
    let forms = forms
        .iter()
        .map(analyzer::analyze)
        .collect::<Result<Vec<_>, _>>()?;
    debug!(forms = forms.len(), "parsed program");
    Ok(Program {
        forms,
        source: text.to_string(),
    })
}
