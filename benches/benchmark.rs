use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use ptc_runner::{
    eval::{EvalContext, Evaluator},
    parse,
    tool::echo_tool,
    Journal, Map, ToolRegistry, Value,
};

const PROGRAM: &str = r#"
(defn score [order] (* (:qty order) (:price order)))
(let [orders (map (fn [i] {:id i :qty (inc (mod i 5)) :price (* i 3)}) (range 200))
      big (filter (fn [o] (> (score o) 100)) orders)]
  (def! totals (group-by (fn [o] (mod (:id o) 4)) big))
  (task "echo-count" (tool/echo {:count (count big)}))
  (sum (map score big)))
"#;

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse order program", |b| b.iter(|| parse(PROGRAM)));
}

fn bench_eval(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let program = parse(PROGRAM).unwrap();
    let tools = Arc::new(ToolRegistry::new().with(echo_tool()));
    let data = Arc::new(Map::from([("limit".to_string(), Value::Int(10))]));

    c.bench_function("evaluate order program", |b| {
        b.to_async(&runtime).iter(|| async {
            let mut ctx = EvalContext::new(
                Arc::clone(&tools),
                Arc::clone(&data),
                Map::new(),
                Journal::new(),
            );
            Evaluator::new().eval_program(&program, &mut ctx).await
        })
    });
}

criterion_group!(benches, bench_parse, bench_eval);
criterion_main!(benches);
