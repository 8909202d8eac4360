mod common;

use std::time::Duration;

use common::{context, continued, delayed_tool, eval};
use pretty_assertions::assert_eq;
use ptc_runner::{eval::Limits, Journal, ToolRegistry, Value};

fn limits(pmap_timeout_ms: u64) -> Limits {
    Limits {
        pmap_timeout: Duration::from_millis(pmap_timeout_ms),
        ..Limits::default()
    }
}

fn slot(value: &Value, index: usize) -> &Value {
    match value {
        Value::List(slots) => &slots[index],
        other => panic!("expected a list, got {}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_results_follow_input_order() {
    let mut ctx = context(
        ToolRegistry::new().with(delayed_tool()),
        Journal::new(),
        limits(1_000),
    );
    let value = continued(
        eval(
            r#"(pmap tool/delayed [{:ms 300 :v "a"} {:ms 50 :v "b"} {:ms 10 :v "c"}])"#,
            &mut ctx,
        )
        .await
        .unwrap(),
    );
    let values: Vec<Value> = (0..3)
        .map(|i| slot(&value, i).get("value").cloned().unwrap())
        .collect();
    assert_eq!(
        values,
        vec![Value::string("a"), Value::string("b"), Value::string("c")]
    );
    let names: Vec<&str> = ctx.tool_calls().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["delayed", "delayed", "delayed"]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_item_times_out_alone() {
    let mut ctx = context(
        ToolRegistry::new().with(delayed_tool()),
        Journal::new(),
        limits(100),
    );
    let value = continued(
        eval(
            r#"(pmap tool/delayed [{:ms 10 :v "a"} {:ms 10000 :v "b"} {:ms 20 :v "c"}])"#,
            &mut ctx,
        )
        .await
        .unwrap(),
    );
    assert_eq!(slot(&value, 0).get("status"), Some(&Value::keyword("ok")));
    assert_eq!(slot(&value, 1).get("status"), Some(&Value::keyword("error")));
    assert_eq!(slot(&value, 1).get("reason"), Some(&Value::keyword("timeout")));
    assert_eq!(slot(&value, 2).get("value"), Some(&Value::string("c")));
}

#[tokio::test]
async fn test_all_items_failing_still_returns_a_list() {
    let mut ctx = context(
        ToolRegistry::new().with(delayed_tool()),
        Journal::new(),
        limits(1_000),
    );
    let value = continued(
        eval(
            "(pmap tool/delayed [{:fail true} {:fail true}])",
            &mut ctx,
        )
        .await
        .unwrap(),
    );
    for i in 0..2 {
        assert_eq!(
            slot(&value, i).get("reason"),
            Some(&Value::keyword("tool_error"))
        );
    }
}

#[tokio::test]
async fn test_program_can_inspect_failures() {
    let mut ctx = context(
        ToolRegistry::new().with(delayed_tool()),
        Journal::new(),
        limits(1_000),
    );
    let value = continued(
        eval(
            r#"(let [results (pmap tool/delayed [{:v 1} {:fail true} {:v 3}])
                     ok (filter (fn [r] (= (:status r) :ok)) results)]
                 (reduce + 0 (map :value ok)))"#,
            &mut ctx,
        )
        .await
        .unwrap(),
    );
    assert_eq!(value, Value::Int(4));
}
