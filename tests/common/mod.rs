#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use ptc_runner::{
    eval::{EvalContext, EvalResult, Evaluator, Limits, Step},
    parse, Journal, Map, Tool, ToolError, ToolRegistry, Value,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Side-effecting tool that counts its invocations and returns the new count.
pub fn counting_tool(name: &str, counter: Arc<AtomicUsize>) -> Tool {
    Tool::from_fn(name, move |_args: Value| {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Value::map([("confirmation", Value::Int(n as i64))]))
        }
    })
}

/// Sleeps for `:ms` milliseconds, then returns `:v`. Fails when `:fail` is set.
pub fn delayed_tool() -> Tool {
    Tool::from_fn("delayed", |args: Value| async move {
        let ms = match args.get("ms") {
            Some(Value::Int(ms)) => *ms as u64,
            _ => 0,
        };
        tokio::time::sleep(Duration::from_millis(ms)).await;
        if args.get("fail").is_some_and(Value::is_truthy) {
            return Err(ToolError::failed("asked to fail"));
        }
        Ok(args.get("v").cloned().unwrap_or_default())
    })
}

pub fn context(tools: ToolRegistry, journal: Journal, limits: Limits) -> EvalContext {
    EvalContext::new(Arc::new(tools), Arc::new(Map::new()), Map::new(), journal)
        .with_limits(limits)
}

pub async fn eval(source: &str, ctx: &mut EvalContext) -> EvalResult<Step> {
    let program = parse(source).expect("program should parse");
    Evaluator::new().eval_program(&program, ctx).await
}

pub fn continued(step: Step) -> Value {
    match step {
        Step::Continue(value) => value,
        other => panic!("expected a value, got {:?}", other),
    }
}
