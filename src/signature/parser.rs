use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, map_res, opt},
    error::{context, convert_error, VerboseError},
    multi::many0,
    sequence::{delimited, pair, preceded, separated_pair, terminated},
    Finish,
};

use crate::tokenizer::token::ParserResult;

use super::{Field, Signature, SignatureError, TypeSpec};

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> ParserResult<'a, O>,
) -> impl FnMut(&'a str) -> ParserResult<'a, O> {
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> ParserResult<&str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-')(input)
}

fn base_type(input: &str) -> ParserResult<TypeSpec> {
    context(
        "type",
        map_res(preceded(char(':'), identifier), |name| match name {
            "string" => Ok(TypeSpec::String),
            "int" => Ok(TypeSpec::Int),
            "float" => Ok(TypeSpec::Float),
            "bool" => Ok(TypeSpec::Bool),
            "keyword" => Ok(TypeSpec::Keyword),
            "any" => Ok(TypeSpec::Any),
            "map" => Ok(TypeSpec::Map(None)),
            other => Err(format!("unknown type :{}", other)),
        }),
    )(input)
}

fn field(input: &str) -> ParserResult<Field> {
    map(
        separated_pair(preceded(opt(char(':')), identifier), multispace0, type_expr),
        |(name, spec)| Field {
            name: name.to_string(),
            spec,
        },
    )(input)
}

fn fields(input: &str) -> ParserResult<Vec<Field>> {
    many0(terminated(ws(field), opt(ws(char(',')))))(input)
}

fn map_type(input: &str) -> ParserResult<TypeSpec> {
    context(
        "map type",
        map(delimited(char('{'), fields, char('}')), |fields| {
            TypeSpec::Map(Some(fields))
        }),
    )(input)
}

fn list_type(input: &str) -> ParserResult<TypeSpec> {
    context(
        "list type",
        map(delimited(char('['), ws(type_expr), char(']')), |inner| {
            TypeSpec::List(Box::new(inner))
        }),
    )(input)
}

fn type_expr(input: &str) -> ParserResult<TypeSpec> {
    map(
        pair(alt((base_type, map_type, list_type)), opt(char('?'))),
        |(spec, optional)| match optional {
            Some(_) => TypeSpec::Optional(Box::new(spec)),
            None => spec,
        },
    )(input)
}

fn full_signature(input: &str) -> ParserResult<Signature> {
    map(
        separated_pair(
            delimited(char('('), fields, char(')')),
            ws(tag("->")),
            type_expr,
        ),
        |(params, output)| Signature { params, output },
    )(input)
}

fn output_only(input: &str) -> ParserResult<Signature> {
    map(
        preceded(opt(ws(tag("->"))), type_expr),
        |output| Signature {
            params: Vec::new(),
            output,
        },
    )(input)
}

/// Parses `(name :type, ...) -> type`, or a bare output type.
pub fn parse_signature(text: &str) -> Result<Signature, SignatureError> {
    let result = all_consuming(ws(alt((full_signature, output_only))))(text).finish();
    match result {
        Ok((_, signature)) => Ok(signature),
        Err(e) => Err(SignatureError::Invalid {
            input: text.to_string(),
            message: describe(text, e),
        }),
    }
}

fn describe(text: &str, error: VerboseError<&str>) -> String {
    let rendered = convert_error(text, error);
    rendered
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("unexpected input")
        .trim()
        .to_string()
}
