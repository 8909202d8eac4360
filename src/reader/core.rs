use thiserror::Error;

use crate::tokenizer::token::{Span, TokenizerError};

/// Position-returning reader result, in the `(next_pos, output)` shape used
/// throughout the reader.
pub type ReadResult<O> = Result<(usize, O), ParseError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    /// Byte offset into the program text.
    pub position: usize,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn at(span: Span, message: impl Into<String>) -> Self {
        Self {
            position: span.start,
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }
}

impl From<TokenizerError> for ParseError {
    fn from(error: TokenizerError) -> Self {
        match error {
            TokenizerError::ParseError { message, span, .. } => ParseError::at(span, message),
        }
    }
}
