//! Builtin functions reachable by bare name.
//!
//! Pure builtins are implemented here by [`Builtin::call`]; the ones that call
//! back into user functions or touch the context (`map`, `filter`, `println`,
//! ...) are dispatched by the evaluator, see [`Builtin::needs_evaluator`].

use std::cmp::Ordering;

use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::value::{Map, Value};

use super::evaluator::{EvalError, EvalResult};

/// Upper bound on the length of a list produced by `range`.
pub const MAX_RANGE: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr, EnumIter)]
pub enum Builtin {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "mod")]
    Mod,
    #[strum(serialize = "inc")]
    Inc,
    #[strum(serialize = "dec")]
    Dec,
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "not=")]
    NotEq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "max")]
    Max,
    #[strum(serialize = "min")]
    Min,
    #[strum(serialize = "abs")]
    Abs,
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "println")]
    Println,
    #[strum(serialize = "count")]
    Count,
    #[strum(serialize = "empty?")]
    IsEmpty,
    #[strum(serialize = "first")]
    First,
    #[strum(serialize = "last")]
    Last,
    #[strum(serialize = "rest")]
    Rest,
    #[strum(serialize = "nth")]
    Nth,
    #[strum(serialize = "take")]
    Take,
    #[strum(serialize = "drop")]
    Drop,
    #[strum(serialize = "conj")]
    Conj,
    #[strum(serialize = "concat")]
    Concat,
    #[strum(serialize = "get")]
    Get,
    #[strum(serialize = "get-in")]
    GetIn,
    #[strum(serialize = "assoc")]
    Assoc,
    #[strum(serialize = "dissoc")]
    Dissoc,
    #[strum(serialize = "merge")]
    Merge,
    #[strum(serialize = "keys")]
    Keys,
    #[strum(serialize = "vals")]
    Vals,
    #[strum(serialize = "contains?")]
    Contains,
    #[strum(serialize = "select-keys")]
    SelectKeys,
    #[strum(serialize = "range")]
    Range,
    #[strum(serialize = "vector")]
    Vector,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "hash-map")]
    HashMap,
    #[strum(serialize = "nil?")]
    IsNil,
    #[strum(serialize = "some?")]
    IsSome,
    #[strum(serialize = "string?")]
    IsString,
    #[strum(serialize = "number?")]
    IsNumber,
    #[strum(serialize = "map?")]
    IsMap,
    #[strum(serialize = "keyword?")]
    IsKeyword,
    #[strum(serialize = "keyword")]
    Keyword,
    #[strum(serialize = "name")]
    Name,
    #[strum(serialize = "upper-case")]
    UpperCase,
    #[strum(serialize = "lower-case")]
    LowerCase,
    #[strum(serialize = "join")]
    Join,
    #[strum(serialize = "split")]
    Split,
    #[strum(serialize = "subs")]
    Subs,
    #[strum(serialize = "sum")]
    Sum,
    #[strum(serialize = "avg")]
    Avg,
    #[strum(serialize = "distinct")]
    Distinct,
    #[strum(serialize = "reverse")]
    Reverse,
    #[strum(serialize = "sort")]
    Sort,
    #[strum(serialize = "map")]
    MapFn,
    #[strum(serialize = "filter")]
    Filter,
    #[strum(serialize = "remove")]
    Remove,
    #[strum(serialize = "reduce")]
    Reduce,
    #[strum(serialize = "sort-by")]
    SortBy,
    #[strum(serialize = "some")]
    SomeMatch,
    #[strum(serialize = "every?")]
    Every,
    #[strum(serialize = "group-by")]
    GroupBy,
    #[strum(serialize = "apply")]
    Apply,
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Int(i),
            Num::Float(f) => Value::Float(f),
        }
    }
}

fn invalid(op: Builtin, expected: &str, found: &Value) -> EvalError {
    EvalError::InvalidArgument {
        operation: op.to_string(),
        expected: expected.to_string(),
        found: found.type_name().to_string(),
    }
}

pub(crate) fn arity(op: Builtin, args: &[Value], min: usize, max: Option<usize>) -> EvalResult<()> {
    let ok = args.len() >= min && max.map_or(true, |max| args.len() <= max);
    if ok {
        return Ok(());
    }
    let expected = match max {
        Some(max) if max == min => min.to_string(),
        Some(max) => format!("{} to {}", min, max),
        None => format!("at least {}", min),
    };
    Err(EvalError::Arity {
        name: op.to_string(),
        expected,
        found: args.len(),
    })
}

fn num(op: Builtin, value: &Value) -> EvalResult<Num> {
    match value {
        Value::Int(i) => Ok(Num::Int(*i)),
        Value::Float(f) => Ok(Num::Float(*f)),
        other => Err(invalid(op, "number", other)),
    }
}

fn int(op: Builtin, value: &Value) -> EvalResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(invalid(op, "int", other)),
    }
}

fn text(op: Builtin, value: &Value) -> EvalResult<String> {
    match value {
        Value::String(s) | Value::Keyword(s) => Ok(s.clone()),
        other => Err(invalid(op, "string", other)),
    }
}

fn overflow(op: Builtin) -> EvalError {
    EvalError::Runtime(format!("integer overflow in {}", op))
}

fn arith(op: Builtin, a: Num, b: Num) -> EvalResult<Num> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => {
            let result = match op {
                Builtin::Add => x.checked_add(y),
                Builtin::Sub => x.checked_sub(y),
                Builtin::Mul => x.checked_mul(y),
                _ => None,
            };
            result.map(Num::Int).ok_or_else(|| overflow(op))
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            Ok(Num::Float(match op {
                Builtin::Add => x + y,
                Builtin::Sub => x - y,
                _ => x * y,
            }))
        }
    }
}

fn divide(a: Num, b: Num) -> EvalResult<Num> {
    match (a, b) {
        (_, Num::Int(0)) => Err(EvalError::Runtime("division by zero".to_string())),
        (Num::Int(x), Num::Int(y)) => match x.checked_rem(y) {
            Some(0) => x.checked_div(y).map(Num::Int).ok_or_else(|| overflow(Builtin::Div)),
            Some(_) => Ok(Num::Float(x as f64 / y as f64)),
            None => Err(overflow(Builtin::Div)),
        },
        _ if b.as_f64() == 0.0 => Err(EvalError::Runtime("division by zero".to_string())),
        _ => Ok(Num::Float(a.as_f64() / b.as_f64())),
    }
}

/// Total order over comparable values: numbers with numbers, text with text.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let x = match a {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                _ => return None,
            };
            let y = match b {
                Value::Int(i) => *i as f64,
                Value::Float(f) => *f,
                _ => return None,
            };
            x.partial_cmp(&y)
        }
        (Value::String(x), Value::String(y)) | (Value::Keyword(x), Value::Keyword(y)) => {
            Some(x.cmp(y))
        }
        (Value::Nil, Value::Nil) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Elements of a collection argument. Maps iterate as `[key value]` pairs.
pub fn items_of(op: Builtin, value: &Value) -> EvalResult<Vec<Value>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::List(items) => Ok(items.clone()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| Value::List(vec![key_value(k), v.clone()]))
            .collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(invalid(op, "collection", other)),
    }
}

/// A map key as a value: keyword when it reads as one, string otherwise.
pub fn key_value(key: &str) -> Value {
    let keyword_like = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(crate::tokenizer::symbol::is_symbol_char);
    if keyword_like {
        Value::Keyword(key.to_string())
    } else {
        Value::String(key.to_string())
    }
}

fn key(op: Builtin, value: &Value) -> EvalResult<String> {
    value
        .as_key()
        .ok_or_else(|| invalid(op, "map key", value))
}

fn lookup(value: &Value, k: &Value) -> Option<Value> {
    match (value, k) {
        (Value::Map(map), _) => k.as_key().and_then(|k| map.get(&k).cloned()),
        (Value::List(items), Value::Int(i)) if *i >= 0 => items.get(*i as usize).cloned(),
        _ => None,
    }
}

fn map_arg(op: Builtin, value: &Value) -> EvalResult<Map> {
    match value {
        Value::Nil => Ok(Map::new()),
        Value::Map(map) => Ok(map.clone()),
        other => Err(invalid(op, "map", other)),
    }
}

fn chain(op: Builtin, args: &[Value], test: fn(Ordering) -> bool) -> EvalResult<Value> {
    arity(op, args, 1, None)?;
    for pair in args.windows(2) {
        let ordering = compare(&pair[0], &pair[1]).ok_or_else(|| EvalError::InvalidArgument {
            operation: op.to_string(),
            expected: "comparable values".to_string(),
            found: format!("{} and {}", pair[0].type_name(), pair[1].type_name()),
        })?;
        if !test(ordering) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn sort_values(op: Builtin, items: &mut [Value]) -> EvalResult<()> {
    let mut failed = None;
    items.sort_by(|a, b| {
        compare(a, b).unwrap_or_else(|| {
            failed = Some((a.type_name(), b.type_name()));
            Ordering::Equal
        })
    });
    match failed {
        Some((a, b)) => Err(EvalError::InvalidArgument {
            operation: op.to_string(),
            expected: "comparable values".to_string(),
            found: format!("{} and {}", a, b),
        }),
        None => Ok(()),
    }
}

fn slice_index(op: Builtin, value: &Value, len: usize) -> EvalResult<usize> {
    let n = int(op, value)?;
    Ok(n.clamp(0, len as i64) as usize)
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Builtins that call user functions or need the evaluation context.
    pub fn needs_evaluator(self) -> bool {
        matches!(
            self,
            Builtin::Println
                | Builtin::MapFn
                | Builtin::Filter
                | Builtin::Remove
                | Builtin::Reduce
                | Builtin::SortBy
                | Builtin::SomeMatch
                | Builtin::Every
                | Builtin::GroupBy
                | Builtin::Apply
        )
    }

    pub fn call(self, args: &[Value]) -> EvalResult<Value> {
        match self {
            Builtin::Add | Builtin::Mul => {
                let identity = if self == Builtin::Add { 0 } else { 1 };
                let mut acc = Num::Int(identity);
                for arg in args {
                    acc = arith(self, acc, num(self, arg)?)?;
                }
                Ok(acc.into_value())
            }
            Builtin::Sub => {
                arity(self, args, 1, None)?;
                let first = num(self, &args[0])?;
                if args.len() == 1 {
                    return arith(self, Num::Int(0), first).map(Num::into_value);
                }
                let mut acc = first;
                for arg in &args[1..] {
                    acc = arith(self, acc, num(self, arg)?)?;
                }
                Ok(acc.into_value())
            }
            Builtin::Div => {
                arity(self, args, 2, None)?;
                let mut acc = num(self, &args[0])?;
                for arg in &args[1..] {
                    acc = divide(acc, num(self, arg)?)?;
                }
                Ok(acc.into_value())
            }
            Builtin::Mod => {
                arity(self, args, 2, Some(2))?;
                match (num(self, &args[0])?, num(self, &args[1])?) {
                    (_, Num::Int(0)) => Err(EvalError::Runtime("division by zero".to_string())),
                    (Num::Int(a), Num::Int(b)) => a
                        .checked_rem_euclid(b)
                        .map(Value::Int)
                        .ok_or_else(|| overflow(self)),
                    (a, b) => Ok(Value::Float(a.as_f64().rem_euclid(b.as_f64()))),
                }
            }
            Builtin::Inc | Builtin::Dec => {
                arity(self, args, 1, Some(1))?;
                let delta = if self == Builtin::Inc { 1 } else { -1 };
                arith(Builtin::Add, num(self, &args[0])?, Num::Int(delta)).map(Num::into_value)
            }
            Builtin::Eq => {
                arity(self, args, 1, None)?;
                Ok(Value::Bool(args.windows(2).all(|w| w[0] == w[1])))
            }
            Builtin::NotEq => {
                arity(self, args, 1, None)?;
                Ok(Value::Bool(!args.windows(2).all(|w| w[0] == w[1])))
            }
            Builtin::Lt => chain(self, args, |o| o == Ordering::Less),
            Builtin::Gt => chain(self, args, |o| o == Ordering::Greater),
            Builtin::Le => chain(self, args, |o| o != Ordering::Greater),
            Builtin::Ge => chain(self, args, |o| o != Ordering::Less),
            Builtin::Not => {
                arity(self, args, 1, Some(1))?;
                Ok(Value::Bool(!args[0].is_truthy()))
            }
            Builtin::Max | Builtin::Min => {
                arity(self, args, 1, None)?;
                let mut best = num(self, &args[0])?;
                for arg in &args[1..] {
                    let candidate = num(self, arg)?;
                    let better = if self == Builtin::Max {
                        candidate.as_f64() > best.as_f64()
                    } else {
                        candidate.as_f64() < best.as_f64()
                    };
                    if better {
                        best = candidate;
                    }
                }
                Ok(best.into_value())
            }
            Builtin::Abs => {
                arity(self, args, 1, Some(1))?;
                match num(self, &args[0])? {
                    Num::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| overflow(self)),
                    Num::Float(f) => Ok(Value::Float(f.abs())),
                }
            }
            Builtin::Str => Ok(Value::String(args.iter().map(Value::to_text).collect())),
            Builtin::Count | Builtin::IsEmpty => {
                arity(self, args, 1, Some(1))?;
                let count = match &args[0] {
                    Value::Nil => 0,
                    Value::List(items) => items.len(),
                    Value::Map(map) => map.len(),
                    Value::String(s) => s.chars().count(),
                    other => return Err(invalid(self, "collection", other)),
                };
                Ok(if self == Builtin::Count {
                    Value::Int(count as i64)
                } else {
                    Value::Bool(count == 0)
                })
            }
            Builtin::First => {
                arity(self, args, 1, Some(1))?;
                Ok(items_of(self, &args[0])?.into_iter().next().unwrap_or_default())
            }
            Builtin::Last => {
                arity(self, args, 1, Some(1))?;
                Ok(items_of(self, &args[0])?.pop().unwrap_or_default())
            }
            Builtin::Rest => {
                arity(self, args, 1, Some(1))?;
                Ok(Value::List(
                    items_of(self, &args[0])?.into_iter().skip(1).collect(),
                ))
            }
            Builtin::Nth => {
                arity(self, args, 2, Some(3))?;
                let items = items_of(self, &args[0])?;
                let index = int(self, &args[1])?;
                let found = usize::try_from(index).ok().and_then(|i| items.get(i).cloned());
                match (found, args.get(2)) {
                    (Some(value), _) => Ok(value),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => Err(EvalError::Runtime(format!(
                        "index {} out of bounds for length {}",
                        index,
                        items.len()
                    ))),
                }
            }
            Builtin::Take | Builtin::Drop => {
                arity(self, args, 2, Some(2))?;
                let items = items_of(self, &args[1])?;
                let n = slice_index(self, &args[0], items.len())?;
                Ok(Value::List(if self == Builtin::Take {
                    items.into_iter().take(n).collect()
                } else {
                    items.into_iter().skip(n).collect()
                }))
            }
            Builtin::Conj => {
                arity(self, args, 1, None)?;
                match &args[0] {
                    Value::Map(map) => {
                        let mut map = map.clone();
                        for entry in &args[1..] {
                            match entry {
                                Value::List(pair) if pair.len() == 2 => {
                                    map.insert(key(self, &pair[0])?, pair[1].clone());
                                }
                                Value::Map(other) => map.extend(other.clone()),
                                other => return Err(invalid(self, "[key value] pair", other)),
                            }
                        }
                        Ok(Value::Map(map))
                    }
                    Value::Nil | Value::List(_) => {
                        let mut items = items_of(self, &args[0])?;
                        items.extend(args[1..].iter().cloned());
                        Ok(Value::List(items))
                    }
                    other => Err(invalid(self, "collection", other)),
                }
            }
            Builtin::Concat => {
                let mut items = Vec::new();
                for arg in args {
                    items.extend(items_of(self, arg)?);
                }
                Ok(Value::List(items))
            }
            Builtin::Get => {
                arity(self, args, 2, Some(3))?;
                Ok(lookup(&args[0], &args[1])
                    .or_else(|| args.get(2).cloned())
                    .unwrap_or_default())
            }
            Builtin::GetIn => {
                arity(self, args, 2, Some(3))?;
                let mut current = Some(args[0].clone());
                for k in items_of(self, &args[1])? {
                    current = current.and_then(|value| lookup(&value, &k));
                }
                Ok(current.or_else(|| args.get(2).cloned()).unwrap_or_default())
            }
            Builtin::Assoc => {
                arity(self, args, 3, None)?;
                if args.len() % 2 == 0 {
                    return Err(EvalError::Arity {
                        name: self.to_string(),
                        expected: "a collection and key/value pairs".to_string(),
                        found: args.len(),
                    });
                }
                if let Value::List(items) = &args[0] {
                    let mut items = items.clone();
                    for pair in args[1..].chunks(2) {
                        let index = int(self, &pair[0])?;
                        match usize::try_from(index).ok().filter(|i| *i <= items.len()) {
                            Some(i) if i == items.len() => items.push(pair[1].clone()),
                            Some(i) => items[i] = pair[1].clone(),
                            None => {
                                return Err(EvalError::Runtime(format!(
                                    "index {} out of bounds for length {}",
                                    index,
                                    items.len()
                                )))
                            }
                        }
                    }
                    return Ok(Value::List(items));
                }
                let mut map = map_arg(self, &args[0])?;
                for pair in args[1..].chunks(2) {
                    map.insert(key(self, &pair[0])?, pair[1].clone());
                }
                Ok(Value::Map(map))
            }
            Builtin::Dissoc => {
                arity(self, args, 1, None)?;
                let mut map = map_arg(self, &args[0])?;
                for k in &args[1..] {
                    map.remove(&key(self, k)?);
                }
                Ok(Value::Map(map))
            }
            Builtin::Merge => {
                let mut merged = Map::new();
                for arg in args {
                    merged.extend(map_arg(self, arg)?);
                }
                Ok(Value::Map(merged))
            }
            Builtin::Keys | Builtin::Vals => {
                arity(self, args, 1, Some(1))?;
                let map = map_arg(self, &args[0])?;
                Ok(Value::List(if self == Builtin::Keys {
                    map.keys().map(|k| key_value(k)).collect()
                } else {
                    map.into_values().collect()
                }))
            }
            Builtin::Contains => {
                arity(self, args, 2, Some(2))?;
                Ok(Value::Bool(match &args[0] {
                    Value::Map(map) => args[1].as_key().is_some_and(|k| map.contains_key(&k)),
                    Value::List(items) => items.contains(&args[1]),
                    Value::String(s) => s.contains(&text(self, &args[1])?),
                    Value::Nil => false,
                    other => return Err(invalid(self, "collection", other)),
                }))
            }
            Builtin::SelectKeys => {
                arity(self, args, 2, Some(2))?;
                let map = map_arg(self, &args[0])?;
                let mut selected = Map::new();
                for k in items_of(self, &args[1])? {
                    let k = key(self, &k)?;
                    if let Some(value) = map.get(&k) {
                        selected.insert(k, value.clone());
                    }
                }
                Ok(Value::Map(selected))
            }
            Builtin::Range => {
                arity(self, args, 1, Some(3))?;
                let (start, end, step) = match args.len() {
                    1 => (0, int(self, &args[0])?, 1),
                    2 => (int(self, &args[0])?, int(self, &args[1])?, 1),
                    _ => (
                        int(self, &args[0])?,
                        int(self, &args[1])?,
                        int(self, &args[2])?,
                    ),
                };
                if step == 0 {
                    return Err(EvalError::Runtime("range step must not be zero".to_string()));
                }
                let span = i128::from(end) - i128::from(start);
                let step_wide = i128::from(step);
                let len = if (span > 0) == (step_wide > 0) && span != 0 {
                    (span + step_wide - step_wide.signum()) / step_wide
                } else {
                    0
                };
                if len > i128::from(MAX_RANGE) {
                    return Err(EvalError::BudgetExceeded(format!(
                        "range of {} elements exceeds the limit of {}",
                        len, MAX_RANGE
                    )));
                }
                (0..len as i64)
                    .map(|i| {
                        i.checked_mul(step)
                            .and_then(|offset| start.checked_add(offset))
                            .map(Value::Int)
                            .ok_or_else(|| overflow(self))
                    })
                    .collect::<EvalResult<Vec<_>>>()
                    .map(Value::List)
            }
            Builtin::Vector | Builtin::List => Ok(Value::List(args.to_vec())),
            Builtin::HashMap => {
                if args.len() % 2 != 0 {
                    return Err(EvalError::Arity {
                        name: self.to_string(),
                        expected: "key/value pairs".to_string(),
                        found: args.len(),
                    });
                }
                let mut map = Map::new();
                for pair in args.chunks(2) {
                    map.insert(key(self, &pair[0])?, pair[1].clone());
                }
                Ok(Value::Map(map))
            }
            Builtin::IsNil
            | Builtin::IsSome
            | Builtin::IsString
            | Builtin::IsNumber
            | Builtin::IsMap
            | Builtin::IsKeyword => {
                arity(self, args, 1, Some(1))?;
                let v = &args[0];
                Ok(Value::Bool(match self {
                    Builtin::IsNil => matches!(v, Value::Nil),
                    Builtin::IsSome => !matches!(v, Value::Nil),
                    Builtin::IsString => matches!(v, Value::String(_)),
                    Builtin::IsNumber => matches!(v, Value::Int(_) | Value::Float(_)),
                    Builtin::IsMap => matches!(v, Value::Map(_)),
                    _ => matches!(v, Value::Keyword(_)),
                }))
            }
            Builtin::Keyword => {
                arity(self, args, 1, Some(1))?;
                Ok(Value::Keyword(
                    text(self, &args[0])?.trim_start_matches(':').to_string(),
                ))
            }
            Builtin::Name => {
                arity(self, args, 1, Some(1))?;
                Ok(Value::String(text(self, &args[0])?))
            }
            Builtin::UpperCase | Builtin::LowerCase => {
                arity(self, args, 1, Some(1))?;
                let s = text(self, &args[0])?;
                Ok(Value::String(if self == Builtin::UpperCase {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                }))
            }
            Builtin::Join => {
                arity(self, args, 1, Some(2))?;
                let (separator, coll) = if args.len() == 2 {
                    (text(self, &args[0])?, &args[1])
                } else {
                    (String::new(), &args[0])
                };
                Ok(Value::String(
                    items_of(self, coll)?
                        .iter()
                        .map(Value::to_text)
                        .collect::<Vec<_>>()
                        .join(&separator),
                ))
            }
            Builtin::Split => {
                arity(self, args, 2, Some(2))?;
                let s = text(self, &args[0])?;
                let separator = text(self, &args[1])?;
                if separator.is_empty() {
                    return Ok(Value::List(
                        s.chars().map(|c| Value::String(c.to_string())).collect(),
                    ));
                }
                Ok(Value::List(
                    s.split(separator.as_str()).map(Value::from).collect(),
                ))
            }
            Builtin::Subs => {
                arity(self, args, 2, Some(3))?;
                let chars: Vec<char> = text(self, &args[0])?.chars().collect();
                let start = slice_index(self, &args[1], chars.len())?;
                let end = match args.get(2) {
                    Some(end) => slice_index(self, end, chars.len())?,
                    None => chars.len(),
                };
                Ok(Value::String(chars[start..end.max(start)].iter().collect()))
            }
            Builtin::Sum | Builtin::Avg => {
                arity(self, args, 1, Some(1))?;
                let items = items_of(self, &args[0])?;
                let mut total = Num::Int(0);
                for item in &items {
                    total = arith(Builtin::Add, total, num(self, item)?)?;
                }
                if self == Builtin::Sum {
                    return Ok(total.into_value());
                }
                if items.is_empty() {
                    return Ok(Value::Nil);
                }
                Ok(Value::Float(total.as_f64() / items.len() as f64))
            }
            Builtin::Distinct => {
                arity(self, args, 1, Some(1))?;
                let mut seen: Vec<Value> = Vec::new();
                for item in items_of(self, &args[0])? {
                    if !seen.contains(&item) {
                        seen.push(item);
                    }
                }
                Ok(Value::List(seen))
            }
            Builtin::Reverse => {
                arity(self, args, 1, Some(1))?;
                let mut items = items_of(self, &args[0])?;
                items.reverse();
                Ok(Value::List(items))
            }
            Builtin::Sort => {
                arity(self, args, 1, Some(1))?;
                let mut items = items_of(self, &args[0])?;
                sort_values(self, &mut items)?;
                Ok(Value::List(items))
            }
            Builtin::Println
            | Builtin::MapFn
            | Builtin::Filter
            | Builtin::Remove
            | Builtin::Reduce
            | Builtin::SortBy
            | Builtin::SomeMatch
            | Builtin::Every
            | Builtin::GroupBy
            | Builtin::Apply => Err(EvalError::Runtime(format!(
                "{} must be called through the evaluator",
                self
            ))),
        }
    }
}

/// Sorts `items` by the precomputed `keys`, keeping the sort stable.
pub fn sort_by_keys(op: Builtin, items: Vec<Value>, keys: Vec<Value>) -> EvalResult<Vec<Value>> {
    let mut pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    let mut failed = None;
    pairs.sort_by(|(a, _), (b, _)| {
        compare(a, b).unwrap_or_else(|| {
            failed = Some((a.type_name(), b.type_name()));
            Ordering::Equal
        })
    });
    if let Some((a, b)) = failed {
        return Err(EvalError::InvalidArgument {
            operation: op.to_string(),
            expected: "comparable sort keys".to_string(),
            found: format!("{} and {}", a, b),
        });
    }
    Ok(pairs.into_iter().map(|(_, item)| item).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: Vec<Value>) -> EvalResult<Value> {
        Builtin::lookup(name).unwrap().call(&args)
    }

    #[test]
    fn test_lookup_by_surface_name() {
        assert_eq!(Builtin::lookup("not="), Some(Builtin::NotEq));
        assert_eq!(Builtin::lookup("group-by"), Some(Builtin::GroupBy));
        assert_eq!(Builtin::lookup("frobnicate"), None);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(call("+", vec![]).unwrap(), Value::Int(0));
        assert_eq!(call("+", vec![Value::Int(1), Value::Float(0.5)]).unwrap(), Value::Float(1.5));
        assert_eq!(call("-", vec![Value::Int(3)]).unwrap(), Value::Int(-3));
        assert_eq!(call("/", vec![Value::Int(6), Value::Int(3)]).unwrap(), Value::Int(2));
        assert_eq!(call("/", vec![Value::Int(1), Value::Int(2)]).unwrap(), Value::Float(0.5));
        assert!(call("/", vec![Value::Int(1), Value::Int(0)]).is_err());
        assert!(call("+", vec![Value::Int(i64::MAX), Value::Int(1)]).is_err());
        assert_eq!(call("mod", vec![Value::Int(-1), Value::Int(3)]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_type_errors_name_the_operation() {
        let error = call("+", vec![Value::Int(1), Value::string("2")]).unwrap_err();
        assert_eq!(error.to_string(), "+ expects number, got string");
    }

    #[test]
    fn test_str_concatenates_text() {
        let value = call(
            "str",
            vec![Value::string("wire_"), Value::keyword("bob"), Value::Int(5000), Value::Nil],
        )
        .unwrap();
        assert_eq!(value, Value::string("wire_:bob5000"));
    }

    #[test]
    fn test_map_operations() {
        let m = Value::map([("a", Value::Int(1))]);
        let m = call("assoc", vec![m, Value::keyword("b"), Value::Int(2)]).unwrap();
        assert_eq!(call("get", vec![m.clone(), Value::string("b")]).unwrap(), Value::Int(2));
        assert_eq!(
            call("keys", vec![m.clone()]).unwrap(),
            Value::List(vec![Value::keyword("a"), Value::keyword("b")])
        );
        let nested = Value::map([("x", Value::map([("y", Value::Int(9))]))]);
        assert_eq!(
            call(
                "get-in",
                vec![nested, Value::List(vec![Value::keyword("x"), Value::keyword("y")])]
            )
            .unwrap(),
            Value::Int(9)
        );
        assert_eq!(
            call("get", vec![m, Value::keyword("zzz"), Value::Int(0)]).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_range_limit() {
        assert_eq!(
            call("range", vec![Value::Int(3)]).unwrap(),
            Value::List(vec![Value::Int(0), Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            call("range", vec![Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap(),
            Value::List(vec![Value::Int(5), Value::Int(3), Value::Int(1)])
        );
        assert!(call("range", vec![Value::Int(MAX_RANGE + 1)]).is_err());
    }

    #[test]
    fn test_range_extreme_bounds() {
        assert!(matches!(
            call("range", vec![Value::Int(i64::MIN), Value::Int(i64::MAX)]),
            Err(EvalError::BudgetExceeded(_))
        ));
        assert_eq!(
            call("range", vec![Value::Int(i64::MAX), Value::Int(i64::MIN)]).unwrap(),
            Value::List(vec![])
        );
        assert_eq!(
            call("range", vec![Value::Int(i64::MAX - 1), Value::Int(i64::MAX)]).unwrap(),
            Value::List(vec![Value::Int(i64::MAX - 1)])
        );
    }

    #[test]
    fn test_division_overflow_is_an_error() {
        assert!(matches!(
            call("/", vec![Value::Int(i64::MIN), Value::Int(-1)]),
            Err(EvalError::Runtime(_))
        ));
        assert!(matches!(
            call("mod", vec![Value::Int(i64::MIN), Value::Int(-1)]),
            Err(EvalError::Runtime(_))
        ));
        assert_eq!(call("/", vec![Value::Int(7), Value::Int(2)]).unwrap(), Value::Float(3.5));
        assert_eq!(call("mod", vec![Value::Int(-7), Value::Int(3)]).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_sort_and_distinct() {
        let items = Value::List(vec![Value::Int(3), Value::Float(1.5), Value::Int(3)]);
        assert_eq!(
            call("sort", vec![items.clone()]).unwrap(),
            Value::List(vec![Value::Float(1.5), Value::Int(3), Value::Int(3)])
        );
        assert_eq!(
            call("distinct", vec![items]).unwrap(),
            Value::List(vec![Value::Int(3), Value::Float(1.5)])
        );
        let mixed = Value::List(vec![Value::Int(1), Value::string("a")]);
        assert!(call("sort", vec![mixed]).is_err());
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            call("join", vec![Value::string(", "), Value::List(vec![Value::Int(1), Value::string("b")])])
                .unwrap(),
            Value::string("1, b")
        );
        assert_eq!(
            call("split", vec![Value::string("a,b"), Value::string(",")]).unwrap(),
            Value::List(vec![Value::string("a"), Value::string("b")])
        );
        assert_eq!(
            call("subs", vec![Value::string("hello"), Value::Int(1), Value::Int(3)]).unwrap(),
            Value::string("el")
        );
    }

    #[test]
    fn test_arity_errors() {
        let error = call("not", vec![]).unwrap_err();
        assert!(matches!(error, EvalError::Arity { found: 0, .. }));
    }
}
