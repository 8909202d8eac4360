use nom::{branch::alt, error::VerboseError, IResult};
use thiserror::Error;

use super::{
    comment::parse_comment,
    literal::{parse_literal, Literal},
    symbol::{parse_delimiter, parse_symbol, Delimiter},
    whitespace::{parse_newline, parse_whitespace},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Delimiter(Delimiter),
    Literal(Literal),
    Symbol(String),
    // Formatting
    Whitespace(String),
    Newline,
    Comment(String),
}

impl Token {
    /// Tokens the reader never looks at.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            Token::Whitespace(_) | Token::Newline | Token::Comment(_)
        )
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Delimiter(d) => write!(f, "{}", d),
            Token::Literal(Literal::String(s)) => write!(f, "{:?}", s),
            Token::Literal(Literal::Integer(i)) => write!(f, "{}", i),
            Token::Literal(Literal::Float(x)) => write!(f, "{}", x),
            Token::Literal(Literal::Keyword(k)) => write!(f, ":{}", k),
            Token::Literal(Literal::Boolean(b)) => write!(f, "{}", b),
            Token::Literal(Literal::Nil) => write!(f, "nil"),
            Token::Symbol(s) => write!(f, "{}", s),
            Token::Whitespace(_) => write!(f, "whitespace"),
            Token::Newline => write!(f, "newline"),
            Token::Comment(_) => write!(f, "comment"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    current_position: usize,
    current_line: usize,
    current_column: usize,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            current_position: 0,
            current_line: 1,   // 1-based
            current_column: 1, // 1-based
        }
    }

    #[tracing::instrument(level = "debug", skip(self, input))]
    pub fn tokenize(&mut self, input: &str) -> TokenizerResult<Vec<TokenSpan>> {
        let mut tokens = Vec::new();
        let mut remaining = input;

        while !remaining.is_empty() {
            let start_position = self.current_position;
            let start_line = self.current_line;
            let start_column = self.current_column;

            let result = alt((
                // Formatting
                parse_whitespace,
                parse_newline,
                parse_comment,
                // Literals before symbols so `-1` is a number and `:k` a keyword
                parse_literal,
                parse_delimiter,
                parse_symbol,
            ))(remaining);

            match result {
                Ok((new_remaining, token)) => {
                    let consumed = &remaining[..(remaining.len() - new_remaining.len())];
                    self.update_position(consumed);

                    tokens.push(TokenSpan {
                        token,
                        start: start_position,
                        end: self.current_position,
                        line: start_line,
                        column: start_column,
                    });

                    remaining = new_remaining;
                }
                Err(e) => {
                    let found = remaining.chars().take(20).collect::<String>();
                    let span = Span {
                        start: self.current_position,
                        end: self.current_position + 1,
                        line: self.current_line,
                        column: self.current_column,
                    };
                    let message = match e {
                        nom::Err::Incomplete(needed) => format!("incomplete input, {:?}", needed),
                        nom::Err::Error(_) | nom::Err::Failure(_) => {
                            describe_unexpected(remaining)
                        }
                    };
                    let error = TokenizerError::ParseError {
                        message,
                        found,
                        span,
                    };
                    tracing::debug!("{}", error);
                    return Err(error);
                }
            }
        }

        Ok(tokens)
    }

    fn update_position(&mut self, text: &str) {
        for c in text.chars() {
            self.current_position += c.len_utf8();
            if c == '\n' {
                self.current_line += 1;
                self.current_column = 1;
            } else {
                self.current_column += 1;
            }
        }
    }
}

fn describe_unexpected(remaining: &str) -> String {
    match remaining.chars().next() {
        Some('"') => "unterminated string literal".to_string(),
        Some(':') => "keyword must have a name after ':'".to_string(),
        Some(c) => format!("unexpected character '{}'", c),
        None => "unexpected end of input".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct TokenSpan {
    pub token: Token,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl TokenSpan {
    pub fn span(&self) -> Span {
        Span {
            start: self.start,
            end: self.end,
            line: self.line,
            column: self.column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

pub type TokenizerResult<T> = Result<T, TokenizerError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenizerError {
    #[error("{message} at {span}")]
    ParseError {
        message: String,
        found: String,
        span: Span,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn significant(input: &str) -> Vec<Token> {
        Tokenizer::new()
            .tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .filter(|t| !t.is_trivia())
            .collect()
    }

    #[test]
    fn test_tokenizer_with_position() {
        let mut tokenizer = Tokenizer::new();
        let tokens = tokenizer.tokenize("x\n(other)").unwrap();

        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[0].column, 1);
        assert_eq!(tokens[0].token, Token::Symbol("x".to_string()));

        let paren = &tokens[2];
        assert_eq!(paren.line, 2);
        assert_eq!(paren.column, 1);
        assert_eq!(paren.start, 2);
    }

    #[test]
    fn test_task_form() {
        let tokens = significant(r#"(task (str "wire_" data/id) (tool/wire {:amount 5000}))"#);
        assert_eq!(
            tokens,
            vec![
                Token::Delimiter(Delimiter::OpenParen),
                Token::Symbol("task".to_string()),
                Token::Delimiter(Delimiter::OpenParen),
                Token::Symbol("str".to_string()),
                Token::Literal(Literal::String("wire_".to_string())),
                Token::Symbol("data/id".to_string()),
                Token::Delimiter(Delimiter::CloseParen),
                Token::Delimiter(Delimiter::OpenParen),
                Token::Symbol("tool/wire".to_string()),
                Token::Delimiter(Delimiter::OpenBrace),
                Token::Literal(Literal::Keyword("amount".to_string())),
                Token::Literal(Literal::Integer(5000)),
                Token::Delimiter(Delimiter::CloseBrace),
                Token::Delimiter(Delimiter::CloseParen),
                Token::Delimiter(Delimiter::CloseParen),
            ]
        );
    }

    #[test]
    fn test_comments_and_commas_are_trivia() {
        let tokens = significant("; header\n[1, 2,3] ; trailing");
        assert_eq!(
            tokens,
            vec![
                Token::Delimiter(Delimiter::OpenBracket),
                Token::Literal(Literal::Integer(1)),
                Token::Literal(Literal::Integer(2)),
                Token::Literal(Literal::Integer(3)),
                Token::Delimiter(Delimiter::CloseBracket),
            ]
        );
    }

    #[test]
    fn test_minus_is_symbol_negative_is_number() {
        let tokens = significant("(- 5 -3)");
        assert_eq!(tokens[1], Token::Symbol("-".to_string()));
        assert_eq!(tokens[3], Token::Literal(Literal::Integer(-3)));
    }

    #[test]
    fn test_error_position() {
        let err = Tokenizer::new().tokenize("(+ 1\n  \"open)").unwrap_err();
        let TokenizerError::ParseError { message, span, .. } = err;
        assert_eq!(message, "unterminated string literal");
        assert_eq!(span.line, 2);
        assert_eq!(span.column, 3);
    }
}
