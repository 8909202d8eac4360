use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while1},
    character::complete::{char, digit1, satisfy},
    combinator::{map, map_res, not, opt, peek, recognize, value},
    error::context,
    sequence::{delimited, pair, preceded, terminated, tuple},
};

use super::{
    symbol::is_symbol_char,
    token::{ParserResult, Token},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Keyword(String),
    Boolean(bool),
    Nil,
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_string_literal(input: &str) -> ParserResult<Literal> {
    context(
        "string literal",
        map(
            delimited(
                char('"'),
                opt(escaped_transform(
                    is_not("\\\""),
                    '\\',
                    alt((
                        value("\\", tag("\\")),
                        value("\"", tag("\"")),
                        value("\n", tag("n")),
                        value("\t", tag("t")),
                        value("\r", tag("r")),
                    )),
                )),
                char('"'),
            ),
            |content: Option<String>| Literal::String(content.unwrap_or_default()),
        ),
    )(input)
}

// A number must not run straight into symbol characters: `1st` is not `1` + `st`.
#[tracing::instrument(level = "debug", skip(input))]
fn parse_float_literal(input: &str) -> ParserResult<Literal> {
    context(
        "float literal",
        map_res(
            terminated(
                recognize(tuple((opt(char('-')), digit1, char('.'), digit1))),
                not(peek(satisfy(is_symbol_char))),
            ),
            |s: &str| s.parse::<f64>().map(Literal::Float),
        ),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_integer_literal(input: &str) -> ParserResult<Literal> {
    context(
        "integer literal",
        map_res(
            terminated(
                recognize(pair(opt(char('-')), digit1)),
                not(peek(satisfy(is_symbol_char))),
            ),
            |s: &str| s.parse::<i64>().map(Literal::Integer),
        ),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_keyword_literal(input: &str) -> ParserResult<Literal> {
    context(
        "keyword literal",
        map(preceded(char(':'), take_while1(is_symbol_char)), |name: &str| {
            Literal::Keyword(name.to_string())
        }),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_literal(input: &str) -> ParserResult<Token> {
    context(
        "literal",
        map(
            alt((
                parse_string_literal,
                parse_keyword_literal,
                parse_float_literal,
                parse_integer_literal,
            )),
            Token::Literal,
        ),
    )(input)
}
