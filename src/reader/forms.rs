//! Token stream to raw forms: balanced delimiters, nothing else.

use crate::tokenizer::literal::Literal;
use crate::tokenizer::symbol::Delimiter;
use crate::tokenizer::token::{Span, Token, TokenSpan};

use super::core::{ParseError, ReadResult};

#[derive(Debug, Clone, PartialEq)]
pub enum FormKind {
    Literal(Literal),
    Symbol(String),
    List(Vec<Form>),
    Vector(Vec<Form>),
    Map(Vec<Form>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub span: Span,
}

impl Form {
    pub fn describe(&self) -> &'static str {
        match self.kind {
            FormKind::Literal(_) => "literal",
            FormKind::Symbol(_) => "symbol",
            FormKind::List(_) => "list",
            FormKind::Vector(_) => "vector",
            FormKind::Map(_) => "map",
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            FormKind::Symbol(name) => Some(name),
            _ => None,
        }
    }
}

/// Deepest delimiter nesting the reader accepts.
pub const MAX_NESTING: usize = 256;

fn closing(open: Delimiter) -> Delimiter {
    match open {
        Delimiter::OpenParen => Delimiter::CloseParen,
        Delimiter::OpenBracket => Delimiter::CloseBracket,
        _ => Delimiter::CloseBrace,
    }
}

/// Reads every top-level form. `tokens` must already be free of trivia.
pub fn read_forms(tokens: &[TokenSpan]) -> Result<Vec<Form>, ParseError> {
    let mut forms = Vec::new();
    let mut pos = 0;
    while pos < tokens.len() {
        let (next, form) = read_form(tokens, pos, 0)?;
        forms.push(form);
        pos = next;
    }
    Ok(forms)
}

pub fn read_form(tokens: &[TokenSpan], pos: usize, depth: usize) -> ReadResult<Form> {
    let current = &tokens[pos];
    let span = current.span();
    match &current.token {
        Token::Literal(literal) => Ok((
            pos + 1,
            Form {
                kind: FormKind::Literal(literal.clone()),
                span,
            },
        )),
        Token::Symbol(name) => Ok((
            pos + 1,
            Form {
                kind: FormKind::Symbol(name.clone()),
                span,
            },
        )),
        Token::Delimiter(
            open @ (Delimiter::OpenParen | Delimiter::OpenBracket | Delimiter::OpenBrace),
        ) => read_sequence(tokens, pos, *open, depth + 1),
        Token::Delimiter(close) => Err(ParseError::at(
            span,
            format!("unexpected closing '{}'", close),
        )),
        other => Err(ParseError::at(span, format!("unexpected token {}", other))),
    }
}

fn read_sequence(
    tokens: &[TokenSpan],
    pos: usize,
    open: Delimiter,
    depth: usize,
) -> ReadResult<Form> {
    let span = tokens[pos].span();
    if depth > MAX_NESTING {
        return Err(ParseError::at(span, "nesting too deep"));
    }
    let close = closing(open);
    let mut items = Vec::new();
    let mut cursor = pos + 1;
    loop {
        let Some(current) = tokens.get(cursor) else {
            return Err(ParseError::at(span, format!("unclosed '{}'", open)));
        };
        match &current.token {
            Token::Delimiter(d) if *d == close => break,
            Token::Delimiter(
                d @ (Delimiter::CloseParen | Delimiter::CloseBracket | Delimiter::CloseBrace),
            ) => {
                return Err(ParseError::at(
                    current.span(),
                    format!("expected '{}' but found '{}'", close, d),
                ));
            }
            _ => {
                let (next, form) = read_form(tokens, cursor, depth)?;
                items.push(form);
                cursor = next;
            }
        }
    }
    let kind = match open {
        Delimiter::OpenParen => FormKind::List(items),
        Delimiter::OpenBracket => FormKind::Vector(items),
        _ => FormKind::Map(items),
    };
    Ok((cursor + 1, Form { kind, span }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::token::Tokenizer;

    fn forms(input: &str) -> Result<Vec<Form>, ParseError> {
        let tokens: Vec<TokenSpan> = Tokenizer::new()
            .tokenize(input)
            .unwrap()
            .into_iter()
            .filter(|t| !t.token.is_trivia())
            .collect();
        read_forms(&tokens)
    }

    #[test]
    fn test_nested_forms() {
        let read = forms("(a [1 2] {:k \"v\"}) b").unwrap();
        assert_eq!(read.len(), 2);
        let FormKind::List(items) = &read[0].kind else {
            panic!("expected list");
        };
        assert_eq!(items[1].describe(), "vector");
        assert_eq!(items[2].describe(), "map");
        assert_eq!(read[1].as_symbol(), Some("b"));
    }

    #[test]
    fn test_unclosed_reports_opening_position() {
        let error = forms("(do\n  (x 1)").unwrap_err();
        assert_eq!((error.line, error.column), (1, 1));
        assert!(error.message.contains("unclosed"));
    }

    #[test]
    fn test_mismatched_close() {
        let error = forms("[1 2)").unwrap_err();
        assert_eq!(error.column, 5);
    }

    #[test]
    fn test_stray_close() {
        assert!(forms(")").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let at_limit = format!("{}1{}", "[".repeat(MAX_NESTING), "]".repeat(MAX_NESTING));
        assert!(forms(&at_limit).is_ok());

        let too_deep = format!("{}1{}", "[".repeat(20_000), "]".repeat(20_000));
        let error = forms(&too_deep).unwrap_err();
        assert_eq!(error.message, "nesting too deep");
        assert_eq!(error.column, MAX_NESTING + 1);
    }
}
