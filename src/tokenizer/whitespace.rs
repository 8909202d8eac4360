//! # Whitespace Token Handling
//!
//! Spaces, tabs and commas are all insignificant separators in PTC-Lisp, so they
//! collapse into a single [`Token::Whitespace`]. Line breaks are kept apart as
//! [`Token::Newline`] because the tokenizer tracks line numbers through them.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    combinator::map,
    error::context,
};

use super::token::{ParserResult, Token};

/// Parses a run of spaces, tabs and commas.
///
/// ```
/// # use ptc_runner::tokenizer::whitespace::parse_whitespace;
/// # use ptc_runner::tokenizer::token::Token;
/// let (rest, token) = parse_whitespace(" ,\t1").unwrap();
/// assert_eq!(token, Token::Whitespace(" ,\t".to_string()));
/// assert_eq!(rest, "1");
/// ```
#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_whitespace(input: &str) -> ParserResult<Token> {
    context(
        "whitespace expected",
        map(
            take_while1(|c| c == ' ' || c == '\t' || c == ','),
            |ws: &str| Token::Whitespace(ws.to_string()),
        ),
    )(input)
}

/// Parses `\n` or `\r\n`.
#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_newline(input: &str) -> ParserResult<Token> {
    context(
        "newline expected",
        map(alt((tag("\r\n"), tag("\n"))), |_| Token::Newline),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_includes_commas() {
        let (rest, token) = parse_whitespace(", ,  x").unwrap();
        assert_eq!(token, Token::Whitespace(", ,  ".to_string()));
        assert_eq!(rest, "x");
    }

    #[test]
    fn test_newline() {
        let (rest, token) = parse_newline("\r\nworld").unwrap();
        assert_eq!(token, Token::Newline);
        assert_eq!(rest, "world");
    }

    #[test]
    fn test_error() {
        assert!(parse_whitespace("hello").is_err());
        assert!(parse_newline("hello").is_err());
    }
}
