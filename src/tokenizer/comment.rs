use nom::{
    bytes::complete::{tag, take_while},
    character::complete::not_line_ending,
    combinator::map,
    error::context,
    sequence::{preceded, tuple},
};

use super::token::{ParserResult, Token};

/// Parses a `;` comment up to (not including) the line ending. Repeated
/// semicolons (`;;`) are treated as one marker.
#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_comment(input: &str) -> ParserResult<Token> {
    context(
        "line comment",
        map(
            preceded(
                tuple((tag(";"), take_while(|c| c == ';'))),
                not_line_ending,
            ),
            |content: &str| Token::Comment(content.trim().to_string()),
        ),
    )(input)
}
