//! `pmap`: order-preserving fan-out with per-item timeouts.

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::error::{Failure, Reason};
use crate::value::Value;

use super::context::{Callee, EvalContext};
use super::evaluator::{EvalError, EvalResult, Evaluator, Exit, Step};

pub fn ok_slot(value: Value) -> Value {
    Value::map([("status", Value::keyword("ok")), ("value", value)])
}

pub fn error_slot(failure: &Failure) -> Value {
    Value::map([
        ("status", Value::keyword("error")),
        ("reason", Value::keyword(failure.reason.as_str())),
        ("message", Value::string(&failure.message)),
    ])
}

/// Calls `callee` once per item, at most `pmap_concurrency` at a time, and
/// returns one outcome slot per item in input order. A failing or timed-out
/// item only fills its own slot. Branch tool calls and prints are merged back
/// in input order.
#[tracing::instrument(level = "debug", skip_all, fields(callee = %callee.name()))]
pub async fn pmap(
    evaluator: &Evaluator,
    ctx: &mut EvalContext,
    callee: Callee,
    items: Value,
) -> EvalResult<Value> {
    let items = match items {
        Value::List(items) => items,
        Value::Nil => Vec::new(),
        other => {
            return Err(EvalError::InvalidArgument {
                operation: "pmap".to_string(),
                expected: "list".to_string(),
                found: other.type_name().to_string(),
            })
        }
    };
    let limits = ctx.limits().clone();
    let item_timeout = limits.pmap_timeout;
    info!(items = items.len(), concurrency = limits.pmap_concurrency, "pmap fan-out");

    let branches: Vec<_> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let mut branch = ctx.fork();
            let callee = callee.clone();
            async move {
                let outcome = tokio::time::timeout(
                    item_timeout,
                    evaluator.apply(callee, vec![item], &mut branch),
                )
                .await;
                (index, outcome, branch)
            }
        })
        .collect();
    let collected = stream::iter(branches)
        .buffered(limits.pmap_concurrency)
        .collect::<Vec<_>>();
    let results = match limits.deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, collected)
            .await
            .map_err(|_| EvalError::Timeout("run deadline exceeded during pmap".to_string()))?,
        None => collected.await,
    };

    let mut slots = Vec::with_capacity(results.len());
    for (index, outcome, branch) in results {
        let slot = match outcome {
            Ok(Ok(Step::Continue(value))) | Ok(Ok(Step::Exit(Exit::Return(value)))) => {
                ok_slot(value)
            }
            Ok(Ok(Step::Exit(Exit::Fail(failure)))) => error_slot(&failure),
            Ok(Err(error)) => error_slot(&Failure::from(error)),
            Err(_) => {
                warn!(index, timeout_ms = item_timeout.as_millis() as u64, "pmap item timed out");
                error_slot(&Failure::new(
                    Reason::Timeout,
                    format!(
                        "item {} timed out after {}ms",
                        index,
                        item_timeout.as_millis()
                    ),
                ))
            }
        };
        ctx.absorb(branch);
        slots.push(slot);
    }
    Ok(Value::List(slots))
}
