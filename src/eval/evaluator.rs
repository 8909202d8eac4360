use std::sync::Arc;

use async_recursion::async_recursion;
use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::ast::{Expr, Literal, Program};
use crate::error::Failure;
use crate::signature::TypeMismatch;
use crate::tool::Tool;
use crate::turn::ToolCallRecord;
use crate::value::{Closure, Map, Value};

use super::builtins::{self, arity, items_of, Builtin};
use super::context::{Callee, EvalContext};
use super::fanout;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unbound symbol: {0}")]
    UnboundSymbol(String),
    #[error("{name} expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),
    #[error("{operation} expects {expected}, got {found}")]
    InvalidArgument {
        operation: String,
        expected: String,
        found: String,
    },
    #[error("{name} failed: {message}")]
    Tool {
        name: String,
        message: String,
        details: Option<Value>,
    },
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("{0}")]
    Runtime(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// How evaluation stopped early.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    Return(Value),
    Fail(Failure),
}

/// Result of every evaluation step. An [`Step::Exit`] must be handed back to
/// the caller untouched; nothing after it is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue(Value),
    Exit(Exit),
}

/// Unwraps a `Continue` value or returns the exit to the caller.
macro_rules! proceed {
    ($step:expr) => {
        match $step? {
            Step::Continue(value) => value,
            Step::Exit(exit) => return Ok(Step::Exit(exit)),
        }
    };
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(s.clone()),
        Literal::Integer(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Keyword(k) => Value::Keyword(k.clone()),
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Nil => Value::Nil,
    }
}

/// Zero args is an empty map, a single map is used as is, anything else is
/// bound positionally to the signature's parameters.
fn tool_arguments(tool: &Tool, mut args: Vec<Value>) -> EvalResult<Value> {
    if args.is_empty() {
        return Ok(Value::Map(Map::new()));
    }
    if args.len() == 1 && matches!(args[0], Value::Map(_)) {
        return Ok(args.remove(0));
    }
    let found = args.len();
    match &tool.signature {
        Some(signature) => signature
            .bind_positional(args)
            .ok_or_else(|| EvalError::Arity {
                name: format!("tool/{}", tool.name),
                expected: format!("at most {}", signature.params.len()),
                found,
            }),
        None => Err(EvalError::Arity {
            name: format!("tool/{}", tool.name),
            expected: "a single map".to_string(),
            found,
        }),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluates the top-level forms in order; the value of the last one is
    /// the program's value unless a form exits first.
    #[tracing::instrument(level = "debug", skip_all, fields(forms = program.forms.len()))]
    pub async fn eval_program(&self, program: &Program, ctx: &mut EvalContext) -> EvalResult<Step> {
        self.eval_body(&program.forms, ctx).await
    }

    #[async_recursion]
    pub async fn eval(&self, expr: &Expr, ctx: &mut EvalContext) -> EvalResult<Step> {
        ctx.tick()?;
        match expr {
            Expr::Literal(literal) => Ok(Step::Continue(literal_value(literal))),
            Expr::Symbol(symbol) => ctx.resolve_symbol(symbol).map(Step::Continue),
            Expr::Vector(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(proceed!(self.eval(item, ctx).await));
                }
                Ok(Step::Continue(Value::List(values)))
            }
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    let k = proceed!(self.eval(k, ctx).await);
                    let key = k.as_key().ok_or_else(|| EvalError::InvalidArgument {
                        operation: "map literal".to_string(),
                        expected: "keyword or string key".to_string(),
                        found: k.type_name().to_string(),
                    })?;
                    let value = proceed!(self.eval(v, ctx).await);
                    map.insert(key, value);
                }
                Ok(Step::Continue(Value::Map(map)))
            }
            Expr::Call { head, args } => self.eval_call(head, args, ctx).await,
            Expr::Do(body) => self.eval_body(body, ctx).await,
            Expr::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let test = proceed!(self.eval(condition, ctx).await);
                match (test.is_truthy(), else_branch) {
                    (true, _) => self.eval(then_branch, ctx).await,
                    (false, Some(else_branch)) => self.eval(else_branch, ctx).await,
                    (false, None) => Ok(Step::Continue(Value::Nil)),
                }
            }
            Expr::When { condition, body } => {
                let test = proceed!(self.eval(condition, ctx).await);
                if test.is_truthy() {
                    self.eval_body(body, ctx).await
                } else {
                    Ok(Step::Continue(Value::Nil))
                }
            }
            Expr::Cond(clauses) => {
                for (test, branch) in clauses {
                    if proceed!(self.eval(test, ctx).await).is_truthy() {
                        return self.eval(branch, ctx).await;
                    }
                }
                Ok(Step::Continue(Value::Nil))
            }
            Expr::And(items) => {
                let mut last = Value::Bool(true);
                for item in items {
                    last = proceed!(self.eval(item, ctx).await);
                    if !last.is_truthy() {
                        break;
                    }
                }
                Ok(Step::Continue(last))
            }
            Expr::Or(items) => {
                let mut last = Value::Nil;
                for item in items {
                    last = proceed!(self.eval(item, ctx).await);
                    if last.is_truthy() {
                        break;
                    }
                }
                Ok(Step::Continue(last))
            }
            Expr::Let { bindings, body } => {
                ctx.push_scope();
                let result = self.eval_let(bindings, body, ctx).await;
                ctx.pop_scope();
                result
            }
            Expr::Def { name, value } => {
                let value = proceed!(self.eval(value, ctx).await);
                ctx.define(name, value.clone())?;
                debug!(name = %name, "defined in memory");
                Ok(Step::Continue(value))
            }
            Expr::Fn(def) => Ok(Step::Continue(Value::Closure(Arc::new(Closure {
                def: Arc::clone(def),
                captured: ctx.locals(),
                memory: ctx.memory_snapshot(),
            })))),
            Expr::Task { id, body } => self.eval_task(id, body, ctx).await,
            Expr::Return(value) => {
                let value = proceed!(self.eval(value, ctx).await);
                Ok(Step::Exit(Exit::Return(value)))
            }
            Expr::Fail(error) => {
                let error = proceed!(self.eval(error, ctx).await);
                Ok(Step::Exit(Exit::Fail(Failure::from_value(&error))))
            }
            Expr::Pmap { callable, items } => {
                let callee = match self.head_callee(callable, ctx).await? {
                    Ok(callee) => callee,
                    Err(exit) => return Ok(Step::Exit(exit)),
                };
                let items = proceed!(self.eval(items, ctx).await);
                fanout::pmap(self, ctx, callee, items)
                    .await
                    .map(Step::Continue)
            }
        }
    }

    async fn eval_body(&self, body: &[Expr], ctx: &mut EvalContext) -> EvalResult<Step> {
        let mut last = Value::Nil;
        for expr in body {
            last = proceed!(self.eval(expr, ctx).await);
        }
        Ok(Step::Continue(last))
    }

    async fn eval_let(
        &self,
        bindings: &[(String, Expr)],
        body: &[Expr],
        ctx: &mut EvalContext,
    ) -> EvalResult<Step> {
        for (name, expr) in bindings {
            let value = proceed!(self.eval(expr, ctx).await);
            ctx.bind(name, value);
        }
        self.eval_body(body, ctx).await
    }

    async fn eval_task(&self, id: &Expr, body: &Expr, ctx: &mut EvalContext) -> EvalResult<Step> {
        let id = proceed!(self.eval(id, ctx).await);
        let key = match &id {
            Value::String(s) | Value::Keyword(s) if !s.is_empty() => s.clone(),
            Value::Int(_) | Value::Float(_) => id.to_string(),
            other => {
                return Err(EvalError::InvalidArgument {
                    operation: "task".to_string(),
                    expected: "a non-empty string id".to_string(),
                    found: other.type_name().to_string(),
                })
            }
        };
        if let Some(value) = ctx.journal().get(&key) {
            debug!(key = %key, "task replayed from journal");
            return Ok(Step::Continue(value));
        }
        let value = proceed!(self.eval(body, ctx).await);
        Ok(Step::Continue(ctx.journal().record(&key, value)))
    }

    /// Resolves a call head without calling it. Symbols go through the
    /// callee lookup; any other expression is evaluated to a callable value.
    async fn head_callee(
        &self,
        head: &Expr,
        ctx: &mut EvalContext,
    ) -> EvalResult<Result<Callee, Exit>> {
        if let Expr::Symbol(symbol) = head {
            return ctx.resolve_callee(symbol).map(Ok);
        }
        match self.eval(head, ctx).await? {
            Step::Continue(value) => Callee::from_value(value, ctx.tools()).map(Ok),
            Step::Exit(exit) => Ok(Err(exit)),
        }
    }

    async fn eval_call(&self, head: &Expr, args: &[Expr], ctx: &mut EvalContext) -> EvalResult<Step> {
        let callee = match self.head_callee(head, ctx).await? {
            Ok(callee) => callee,
            Err(exit) => return Ok(Step::Exit(exit)),
        };
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(proceed!(self.eval(arg, ctx).await));
        }
        self.apply(callee, values, ctx).await
    }

    /// Calls an already evaluated callee with evaluated arguments.
    #[async_recursion]
    pub async fn apply(&self, callee: Callee, args: Vec<Value>, ctx: &mut EvalContext) -> EvalResult<Step> {
        ctx.tick()?;
        match callee {
            Callee::HostTool(tool) | Callee::NestedSubAgent(tool) => {
                self.call_tool(&tool, args, ctx).await.map(Step::Continue)
            }
            Callee::UserClosure(closure) => self.call_closure(&closure, args, ctx).await,
            Callee::Builtin(builtin) if builtin.needs_evaluator() => {
                self.call_higher_order(builtin, args, ctx).await
            }
            Callee::Builtin(builtin) => builtin.call(&args).map(Step::Continue),
            Callee::Keyword(key) => {
                if !(1..=2).contains(&args.len()) {
                    return Err(EvalError::Arity {
                        name: format!(":{}", key),
                        expected: "1 to 2".to_string(),
                        found: args.len(),
                    });
                }
                let found = args[0].get(&key).cloned();
                Ok(Step::Continue(
                    found.or_else(|| args.get(1).cloned()).unwrap_or_default(),
                ))
            }
        }
    }

    async fn call_closure(
        &self,
        closure: &Arc<Closure>,
        args: Vec<Value>,
        ctx: &mut EvalContext,
    ) -> EvalResult<Step> {
        let params = &closure.def.params;
        if !params.accepts(args.len()) {
            return Err(EvalError::Arity {
                name: closure.name().to_string(),
                expected: params.arity(),
                found: args.len(),
            });
        }
        let mut locals = closure.captured.clone();
        if let Some(name) = &closure.def.name {
            locals.insert(name.clone(), Value::Closure(Arc::clone(closure)));
        }
        let mut args = args.into_iter();
        for name in &params.fixed {
            locals.insert(name.clone(), args.next().unwrap_or_default());
        }
        if let Some(rest) = &params.rest {
            locals.insert(rest.clone(), Value::List(args.collect()));
        }

        let frame = ctx.enter_frame(locals, Arc::clone(&closure.memory))?;
        let result = self.eval_body(&closure.def.body, ctx).await;
        ctx.exit_frame(frame);
        result
    }

    #[tracing::instrument(level = "debug", skip_all, fields(tool = %tool.name))]
    async fn call_tool(&self, tool: &Tool, args: Vec<Value>, ctx: &mut EvalContext) -> EvalResult<Value> {
        let args = tool_arguments(tool, args)?;
        if let Some(signature) = &tool.signature {
            signature.validate_input(&args)?;
        }
        ctx.check_deadline()?;

        let timestamp = Utc::now();
        let started = Instant::now();
        let invocation = tool.invoke(args.clone());
        let invoked = match ctx.limits().deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, invocation)
                .await
                .map_err(|_| EvalError::Timeout(format!("tool/{} did not finish before the run deadline", tool.name))),
            None => Ok(invocation.await),
        };
        let result = invoked.and_then(|result| {
            result.map_err(|error| EvalError::Tool {
                name: format!("tool/{}", tool.name),
                message: error.to_string(),
                details: error.details(),
            })
        });
        let duration = started.elapsed();
        info!(
            tool = %tool.name,
            ok = result.is_ok(),
            duration_ms = duration.as_millis() as u64,
            "tool call"
        );

        ctx.record_tool_call(ToolCallRecord {
            name: tool.name.clone(),
            args,
            result: result.clone().map_err(Failure::from),
            timestamp,
            duration,
        });
        result
    }

    async fn call_higher_order(
        &self,
        op: Builtin,
        mut args: Vec<Value>,
        ctx: &mut EvalContext,
    ) -> EvalResult<Step> {
        match op {
            Builtin::Println => {
                let line = args.iter().map(Value::to_text).collect::<Vec<_>>().join(" ");
                ctx.print(line);
                return Ok(Step::Continue(Value::Nil));
            }
            Builtin::Apply => {
                arity(op, &args, 2, None)?;
                let f = Callee::from_value(args.remove(0), ctx.tools())?;
                let spread = args.pop().unwrap_or_default();
                args.extend(items_of(op, &spread)?);
                return self.apply(f, args, ctx).await;
            }
            Builtin::Reduce => {
                arity(op, &args, 2, Some(3))?;
                let f = Callee::from_value(args[0].clone(), ctx.tools())?;
                let (mut acc, items) = if args.len() == 3 {
                    (args[1].clone(), items_of(op, &args[2])?)
                } else {
                    let mut items = items_of(op, &args[1])?.into_iter();
                    let first = items.next().unwrap_or_default();
                    (first, items.collect())
                };
                for item in items {
                    acc = proceed!(self.apply(f.clone(), vec![acc, item], ctx).await);
                }
                return Ok(Step::Continue(acc));
            }
            _ => {}
        }

        arity(op, &args, 2, Some(2))?;
        let f = Callee::from_value(args[0].clone(), ctx.tools())?;
        let items = items_of(op, &args[1])?;
        let mut results = Vec::with_capacity(items.len());
        for item in &items {
            results.push(proceed!(self.apply(f.clone(), vec![item.clone()], ctx).await));
        }

        let value = match op {
            Builtin::MapFn => Value::List(results),
            Builtin::Filter | Builtin::Remove => {
                let keep = op == Builtin::Filter;
                Value::List(
                    items
                        .into_iter()
                        .zip(results)
                        .filter(|(_, test)| test.is_truthy() == keep)
                        .map(|(item, _)| item)
                        .collect(),
                )
            }
            Builtin::SortBy => Value::List(builtins::sort_by_keys(op, items, results)?),
            Builtin::SomeMatch => results
                .into_iter()
                .find(Value::is_truthy)
                .unwrap_or_default(),
            Builtin::Every => Value::Bool(results.iter().all(Value::is_truthy)),
            Builtin::GroupBy => {
                let mut groups = Map::new();
                for (item, group) in items.into_iter().zip(results) {
                    let key = group.as_key().unwrap_or_else(|| group.to_string());
                    if let Value::List(members) =
                        groups.entry(key).or_insert_with(|| Value::List(Vec::new()))
                    {
                        members.push(item);
                    }
                }
                Value::Map(groups)
            }
            other => {
                return Err(EvalError::Runtime(format!(
                    "{} is not a higher-order builtin",
                    other
                )))
            }
        };
        Ok(Step::Continue(value))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Reason;
    use crate::eval::context::Limits;
    use crate::journal::Journal;
    use crate::reader::parse;
    use crate::tool::{echo_tool, ToolError, ToolRegistry};
    use pretty_assertions::assert_eq;

    fn context_with(tools: ToolRegistry) -> EvalContext {
        let data = Map::from([("limit".to_string(), Value::Int(2))]);
        EvalContext::new(Arc::new(tools), Arc::new(data), Map::new(), Journal::new())
    }

    fn context() -> EvalContext {
        context_with(ToolRegistry::new().with(echo_tool()))
    }

    async fn run(source: &str, ctx: &mut EvalContext) -> EvalResult<Step> {
        let program = parse(source).unwrap();
        Evaluator::new().eval_program(&program, ctx).await
    }

    async fn value(source: &str) -> Value {
        match run(source, &mut context()).await.unwrap() {
            Step::Continue(value) => value,
            other => panic!("expected a value, got {:?}", other),
        }
    }

    fn counting_tool(counter: Arc<AtomicUsize>) -> Tool {
        Tool::from_fn("charge", move |args: Value| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::map([("charged", args)]))
            }
        })
    }

    #[tokio::test]
    async fn test_let_and_arithmetic() {
        assert_eq!(value("(let [x 2 y (* x 3)] (+ x y))").await, Value::Int(8));
        assert_eq!(value("(if (> data/limit 1) :big :small)").await, Value::keyword("big"));
        assert_eq!(
            value("(cond (= 1 2) :a (= 1 1) :b :else :c)").await,
            Value::keyword("b")
        );
        assert_eq!(value("(and 1 nil 2)").await, Value::Nil);
        assert_eq!(value("(or nil false 3)").await, Value::Int(3));
    }

    #[tokio::test]
    async fn test_return_halts_evaluation() {
        let mut ctx = context();
        let step = run("(println \"before\") (return {:ok true}) (println \"after\")", &mut ctx)
            .await
            .unwrap();
        assert_eq!(
            step,
            Step::Exit(Exit::Return(Value::map([("ok", Value::Bool(true))])))
        );
        assert_eq!(ctx.prints(), ["before".to_string()]);
    }

    #[tokio::test]
    async fn test_return_inside_nested_call_exits() {
        let step = run("(+ 1 (do (return 5) 2))", &mut context()).await.unwrap();
        assert_eq!(step, Step::Exit(Exit::Return(Value::Int(5))));
    }

    #[tokio::test]
    async fn test_fail_builds_structured_failure() {
        let step = run(
            "(fail {:reason :not_found :message \"no such order\"})",
            &mut context(),
        )
        .await
        .unwrap();
        let Step::Exit(Exit::Fail(failure)) = step else {
            panic!("expected failure");
        };
        assert_eq!(failure.reason, Reason::Explicit("not_found".into()));
        assert_eq!(failure.message, "no such order");
    }

    #[tokio::test]
    async fn test_closures_snapshot_memory() {
        let mut ctx = context();
        let step = run(
            "(def! rate 1) (defn scaled [x] (* x rate)) (def! rate 10) [(scaled 3) user/rate]",
            &mut ctx,
        )
        .await
        .unwrap();
        assert_eq!(
            step,
            Step::Continue(Value::List(vec![Value::Int(3), Value::Int(10)]))
        );
    }

    #[tokio::test]
    async fn test_closures_capture_locals_and_rest_args() {
        assert_eq!(
            value("(let [base 10 f (fn [a & more] (+ base a (count more)))] (f 1 :x :y))").await,
            Value::Int(13)
        );
    }

    #[tokio::test]
    async fn test_task_runs_body_once_per_key() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tools = ToolRegistry::new().with(counting_tool(Arc::clone(&counter)));
        let journal = Journal::new();
        let source = "(task (str \"charge_\" 42) (tool/charge {:amount 42}))";

        let mut first = EvalContext::new(
            Arc::new(tools.clone()),
            Arc::new(Map::new()),
            Map::new(),
            journal.clone(),
        );
        let a = run(source, &mut first).await.unwrap();
        let mut second =
            EvalContext::new(Arc::new(tools), Arc::new(Map::new()), Map::new(), journal.clone());
        let b = run(source, &mut second).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(journal.contains("charge_42"));
        assert!(second.tool_calls().is_empty());
    }

    #[tokio::test]
    async fn test_task_that_exits_records_nothing() {
        let mut ctx = context();
        let step = run("(task \"k\" (fail :nope))", &mut ctx).await.unwrap();
        assert!(matches!(step, Step::Exit(Exit::Fail(_))));
        assert!(ctx.journal().is_empty());
    }

    #[tokio::test]
    async fn test_unbound_symbol() {
        let error = run("(frobnicate 1)", &mut context()).await.unwrap_err();
        assert_eq!(error, EvalError::UnboundSymbol("frobnicate".to_string()));
        assert_eq!(Failure::from(error).reason, Reason::UnboundSymbol);
    }

    #[tokio::test]
    async fn test_tool_signature_is_checked_before_invocation() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tool = counting_tool(Arc::clone(&counter))
            .with_signature("(amount :int) -> :map")
            .unwrap();
        let mut ctx = context_with(ToolRegistry::new().with(tool));
        let error = run("(tool/charge {:amount \"lots\"})", &mut ctx)
            .await
            .unwrap_err();
        let EvalError::TypeMismatch(mismatch) = error else {
            panic!("expected type mismatch");
        };
        assert_eq!(mismatch.path, "amount");
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // positional arguments bind to parameter names
        let step = run("(tool/charge 5)", &mut ctx).await.unwrap();
        assert_eq!(
            step,
            Step::Continue(Value::map([(
                "charged",
                Value::map([("amount", Value::Int(5))])
            )]))
        );
    }

    #[tokio::test]
    async fn test_tool_errors_are_recorded() {
        let failing = Tool::from_fn("flaky", |_| async { Err(ToolError::failed("service down")) });
        let mut ctx = context_with(ToolRegistry::new().with(failing));
        let error = run("(flaky)", &mut ctx).await.unwrap_err();
        assert!(matches!(error, EvalError::Tool { ref message, .. } if message == "service down"));
        assert_eq!(ctx.tool_calls().len(), 1);
        assert!(ctx.tool_calls()[0].result.is_err());
    }

    #[tokio::test]
    async fn test_higher_order_builtins() {
        assert_eq!(
            value("(map (fn [o] (:total o)) [{:total 1} {:total 2}])").await,
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            value("(filter (fn [n] (> n 1)) [1 2 3])").await,
            Value::List(vec![Value::Int(2), Value::Int(3)])
        );
        assert_eq!(value("(reduce + 0 [1 2 3])").await, Value::Int(6));
        assert_eq!(
            value("(sort-by :age [{:age 3} {:age 1}])").await,
            Value::List(vec![
                Value::map([("age", Value::Int(1))]),
                Value::map([("age", Value::Int(3))])
            ])
        );
        assert_eq!(
            value("(group-by :kind [{:kind :a} {:kind :b} {:kind :a}])").await,
            Value::map([
                (
                    "a",
                    Value::List(vec![
                        Value::map([("kind", Value::keyword("a"))]),
                        Value::map([("kind", Value::keyword("a"))])
                    ])
                ),
                ("b", Value::List(vec![Value::map([("kind", Value::keyword("b"))])])),
            ])
        );
        assert_eq!(value("(apply + 1 [2 3])").await, Value::Int(6));
    }

    #[tokio::test]
    async fn test_runaway_recursion_is_cut_off() {
        let error = run("(defn spin [n] (spin (inc n))) (spin 0)", &mut context())
            .await
            .unwrap_err();
        assert!(matches!(error, EvalError::BudgetExceeded(_)));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let mut ctx = context().with_limits(Limits {
            max_steps: 10,
            ..Limits::default()
        });
        let error = run("(map inc (range 100))", &mut ctx).await.unwrap_err();
        assert!(matches!(error, EvalError::BudgetExceeded(_)));
    }

    #[tokio::test]
    async fn test_pmap_isolates_failures() {
        let step = run(
            "(pmap (fn [x] (if (= x 2) (fail {:reason :bad :message \"two\"}) (* x 10))) [1 2 3])",
            &mut context(),
        )
        .await
        .unwrap();
        let Step::Continue(Value::List(slots)) = step else {
            panic!("expected slots");
        };
        assert_eq!(slots[0], fanout::ok_slot(Value::Int(10)));
        assert_eq!(slots[1].get("status"), Some(&Value::keyword("error")));
        assert_eq!(slots[1].get("reason"), Some(&Value::keyword("bad")));
        assert_eq!(slots[2], fanout::ok_slot(Value::Int(30)));
    }

    #[tokio::test]
    async fn test_def_inside_pmap_is_an_error_slot() {
        let mut ctx = context();
        let step = run("(pmap (fn [x] (def! y x)) [1])", &mut ctx).await.unwrap();
        let Step::Continue(Value::List(slots)) = step else {
            panic!("expected slots");
        };
        assert_eq!(slots[0].get("reason"), Some(&Value::keyword("runtime_error")));
        assert!(ctx.memory().is_empty());
    }

    #[tokio::test]
    async fn test_pmap_merges_tool_calls_in_input_order() {
        let mut ctx = context();
        run("(pmap tool/echo [{:n 1} {:n 2} {:n 3}])", &mut ctx)
            .await
            .unwrap();
        let order: Vec<Value> = ctx
            .tool_calls()
            .iter()
            .map(|call| call.args.get("n").cloned().unwrap_or_default())
            .collect();
        assert_eq!(order, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }
}
