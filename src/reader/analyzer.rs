//! Raw forms to [`Expr`]: special forms are recognized and shape-checked here.

use std::sync::Arc;

use crate::ast::{Expr, FnDef, Literal, Namespace, Params, Symbol};

use super::core::ParseError;
use super::forms::{Form, FormKind};

type AnalyzeResult<T> = Result<T, ParseError>;

pub fn analyze(form: &Form) -> AnalyzeResult<Expr> {
    match &form.kind {
        FormKind::Literal(literal) => Ok(Expr::Literal(literal.clone())),
        FormKind::Symbol(name) => analyze_symbol(form, name).map(Expr::Symbol),
        FormKind::Vector(items) => Ok(Expr::Vector(analyze_all(items)?)),
        FormKind::Map(items) => {
            if items.len() % 2 != 0 {
                return Err(ParseError::at(
                    form.span,
                    "map literal needs an even number of forms",
                ));
            }
            let entries = items
                .chunks(2)
                .map(|pair| Ok((analyze(&pair[0])?, analyze(&pair[1])?)))
                .collect::<AnalyzeResult<Vec<_>>>()?;
            Ok(Expr::Map(entries))
        }
        FormKind::List(items) => analyze_list(form, items),
    }
}

fn analyze_all(forms: &[Form]) -> AnalyzeResult<Vec<Expr>> {
    forms.iter().map(analyze).collect()
}

fn analyze_symbol(form: &Form, text: &str) -> AnalyzeResult<Symbol> {
    match text.split_once('/') {
        Some((prefix, name)) if !prefix.is_empty() => {
            let namespace: Namespace = prefix.parse().map_err(|_| {
                ParseError::at(form.span, format!("unknown namespace '{}/'", prefix))
            })?;
            if name.is_empty() || name.contains('/') {
                return Err(ParseError::at(
                    form.span,
                    format!("invalid qualified symbol '{}'", text),
                ));
            }
            Ok(Symbol::qualified(namespace, name))
        }
        _ => Ok(Symbol::bare(text)),
    }
}

fn expect_args(form: &Form, head: &str, args: &[Form], expected: usize) -> AnalyzeResult<()> {
    if args.len() != expected {
        return Err(ParseError::at(
            form.span,
            format!(
                "{} expects {} argument(s), got {}",
                head,
                expected,
                args.len()
            ),
        ));
    }
    Ok(())
}

fn binding_name(form: &Form, what: &str) -> AnalyzeResult<String> {
    match form.as_symbol() {
        Some(name) if !name.contains('/') || name.starts_with("user/") => {
            Ok(name.trim_start_matches("user/").to_string())
        }
        _ => Err(ParseError::at(
            form.span,
            format!("{} must be a plain symbol, found {}", what, form.describe()),
        )),
    }
}

fn analyze_params(form: &Form) -> AnalyzeResult<Params> {
    let FormKind::Vector(items) = &form.kind else {
        return Err(ParseError::at(
            form.span,
            format!("parameter list must be a vector, found {}", form.describe()),
        ));
    };
    let mut params = Params::default();
    let mut iter = items.iter();
    while let Some(item) = iter.next() {
        if item.as_symbol() == Some("&") {
            let rest = iter
                .next()
                .ok_or_else(|| ParseError::at(item.span, "'&' must be followed by a name"))?;
            params.rest = Some(binding_name(rest, "rest parameter")?);
            if let Some(extra) = iter.next() {
                return Err(ParseError::at(
                    extra.span,
                    "only one parameter may follow '&'",
                ));
            }
            break;
        }
        params.fixed.push(binding_name(item, "parameter")?);
    }
    Ok(params)
}

fn analyze_fn(form: &Form, name: Option<String>, rest: &[Form]) -> AnalyzeResult<Arc<FnDef>> {
    let Some((params, body)) = rest.split_first() else {
        return Err(ParseError::at(form.span, "fn requires a parameter vector"));
    };
    Ok(Arc::new(FnDef {
        name,
        params: analyze_params(params)?,
        body: analyze_all(body)?,
    }))
}

fn analyze_list(form: &Form, items: &[Form]) -> AnalyzeResult<Expr> {
    let Some((head, args)) = items.split_first() else {
        return Ok(Expr::Vector(Vec::new()));
    };
    let Some(name) = head.as_symbol() else {
        return Ok(Expr::Call {
            head: Box::new(analyze(head)?),
            args: analyze_all(args)?,
        });
    };

    match name {
        "do" => Ok(Expr::Do(analyze_all(args)?)),
        "and" => Ok(Expr::And(analyze_all(args)?)),
        "or" => Ok(Expr::Or(analyze_all(args)?)),
        "if" => {
            if !(2..=3).contains(&args.len()) {
                return Err(ParseError::at(
                    form.span,
                    format!("if expects 2 or 3 arguments, got {}", args.len()),
                ));
            }
            Ok(Expr::If {
                condition: Box::new(analyze(&args[0])?),
                then_branch: Box::new(analyze(&args[1])?),
                else_branch: args.get(2).map(analyze).transpose()?.map(Box::new),
            })
        }
        "when" => {
            let Some((condition, body)) = args.split_first() else {
                return Err(ParseError::at(form.span, "when requires a condition"));
            };
            Ok(Expr::When {
                condition: Box::new(analyze(condition)?),
                body: analyze_all(body)?,
            })
        }
        "cond" => {
            if args.len() % 2 != 0 {
                return Err(ParseError::at(
                    form.span,
                    "cond needs test/expression pairs",
                ));
            }
            let clauses = args
                .chunks(2)
                .map(|pair| Ok((analyze(&pair[0])?, analyze(&pair[1])?)))
                .collect::<AnalyzeResult<Vec<_>>>()?;
            Ok(Expr::Cond(clauses))
        }
        "let" => {
            let Some((bindings, body)) = args.split_first() else {
                return Err(ParseError::at(form.span, "let requires a binding vector"));
            };
            let FormKind::Vector(pairs) = &bindings.kind else {
                return Err(ParseError::at(
                    bindings.span,
                    format!("let bindings must be a vector, found {}", bindings.describe()),
                ));
            };
            if pairs.len() % 2 != 0 {
                return Err(ParseError::at(
                    bindings.span,
                    "let bindings need name/value pairs",
                ));
            }
            let bindings = pairs
                .chunks(2)
                .map(|pair| Ok((binding_name(&pair[0], "let binding")?, analyze(&pair[1])?)))
                .collect::<AnalyzeResult<Vec<_>>>()?;
            Ok(Expr::Let {
                bindings,
                body: analyze_all(body)?,
            })
        }
        "def!" | "def" => {
            expect_args(form, name, args, 2)?;
            Ok(Expr::Def {
                name: binding_name(&args[0], "definition name")?,
                value: Box::new(analyze(&args[1])?),
            })
        }
        "defn" => {
            let Some((fn_name, rest)) = args.split_first() else {
                return Err(ParseError::at(form.span, "defn requires a name"));
            };
            let fn_name = binding_name(fn_name, "function name")?;
            // optional docstring
            let rest = match rest {
                [doc, tail @ ..]
                    if matches!(doc.kind, FormKind::Literal(Literal::String(_)))
                        && !tail.is_empty() =>
                {
                    tail
                }
                other => other,
            };
            Ok(Expr::Def {
                name: fn_name.clone(),
                value: Box::new(Expr::Fn(analyze_fn(form, Some(fn_name), rest)?)),
            })
        }
        "fn" => match args.first().and_then(Form::as_symbol) {
            Some(fn_name) => {
                let fn_name = fn_name.to_string();
                Ok(Expr::Fn(analyze_fn(form, Some(fn_name), &args[1..])?))
            }
            None => Ok(Expr::Fn(analyze_fn(form, None, args)?)),
        },
        "task" => {
            expect_args(form, name, args, 2)?;
            Ok(Expr::Task {
                id: Box::new(analyze(&args[0])?),
                body: Box::new(analyze(&args[1])?),
            })
        }
        "return" => {
            expect_args(form, name, args, 1)?;
            Ok(Expr::Return(Box::new(analyze(&args[0])?)))
        }
        "fail" => {
            expect_args(form, name, args, 1)?;
            Ok(Expr::Fail(Box::new(analyze(&args[0])?)))
        }
        "pmap" => {
            expect_args(form, name, args, 2)?;
            Ok(Expr::Pmap {
                callable: Box::new(analyze(&args[0])?),
                items: Box::new(analyze(&args[1])?),
            })
        }
        _ => Ok(Expr::Call {
            head: Box::new(analyze(head)?),
            args: analyze_all(args)?,
        }),
    }
}
