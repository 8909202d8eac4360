//! # Tokenizer Component
//!
//! Lexical analysis of PTC-Lisp program text. The tokenizer turns raw text into a
//! stream of [`TokenSpan`](token::TokenSpan)s that the [`reader`](crate::reader)
//! folds into forms.
//!
//! ## Component Structure
//!
//! * [`token`]: Core token types and the tokenizer driver
//! * [`literal`]: Strings, numbers and keywords
//! * [`symbol`]: Delimiters and symbols (including `true`, `false`, `nil`)
//! * [`whitespace`]: Whitespace (commas included) and newlines
//! * [`comment`]: `;` line comments
//!
//! Every token carries its byte offsets and 1-based line/column so the reader can
//! report a precise [`ParseError`](crate::reader::ParseError) position.
//!
//! ```rust
//! use ptc_runner::tokenizer::token::{Token, Tokenizer};
//!
//! let tokens = Tokenizer::new().tokenize("(tool/search {:q \"rust\"})").unwrap();
//! assert!(matches!(tokens[1].token, Token::Symbol(ref s) if s == "tool/search"));
//! ```

pub mod comment;
pub mod literal;
pub mod symbol;
pub mod token;
pub mod whitespace;
