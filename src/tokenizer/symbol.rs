//! # Symbol Token Handling
//!
//! Delimiters (`( ) [ ] { }`) and symbols. A symbol is any run of symbol
//! characters that does not start with a digit; namespaced references such as
//! `tool/search` or `data/orders` are single symbols and are split later by the
//! reader. `true`, `false` and `nil` are recognised here and turned into literal
//! tokens.

use std::fmt;

use strum_macros::{AsRefStr, EnumString};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::satisfy,
    combinator::{map, recognize, value},
    error::context,
    sequence::pair,
};

use super::{
    literal::Literal,
    token::{ParserResult, Token},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
pub enum Delimiter {
    #[strum(serialize = "(")]
    OpenParen,
    #[strum(serialize = ")")]
    CloseParen,
    #[strum(serialize = "[")]
    OpenBracket,
    #[strum(serialize = "]")]
    CloseBracket,
    #[strum(serialize = "{")]
    OpenBrace,
    #[strum(serialize = "}")]
    CloseBrace,
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

pub fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || "-_?!*+<>=/.&%'".contains(c)
}

fn is_symbol_start(c: char) -> bool {
    is_symbol_char(c) && !c.is_ascii_digit()
}

#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_delimiter(input: &str) -> ParserResult<Token> {
    context(
        "delimiter",
        map(
            alt((
                value(Delimiter::OpenParen, tag("(")),
                value(Delimiter::CloseParen, tag(")")),
                value(Delimiter::OpenBracket, tag("[")),
                value(Delimiter::CloseBracket, tag("]")),
                value(Delimiter::OpenBrace, tag("{")),
                value(Delimiter::CloseBrace, tag("}")),
            )),
            Token::Delimiter,
        ),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_symbol(input: &str) -> ParserResult<Token> {
    let (input, name) = context(
        "symbol",
        recognize(pair(satisfy(is_symbol_start), take_while(is_symbol_char))),
    )(input)?;

    let token = match name {
        "true" => Token::Literal(Literal::Boolean(true)),
        "false" => Token::Literal(Literal::Boolean(false)),
        "nil" => Token::Literal(Literal::Nil),
        _ => Token::Symbol(name.to_string()),
    };
    Ok((input, token))
}
