use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::ast::{Namespace, Symbol};
use crate::config::RunConfig;
use crate::journal::Journal;
use crate::tool::{Tool, ToolKind, ToolRegistry};
use crate::turn::ToolCallRecord;
use crate::value::{Closure, Map, Value};

use super::builtins::Builtin;
use super::evaluator::{EvalError, EvalResult};

/// Caps enforced while a single program evaluates.
#[derive(Debug, Clone)]
pub struct Limits {
    pub deadline: Option<Instant>,
    pub max_steps: u64,
    pub max_depth: usize,
    pub pmap_timeout: Duration,
    pub pmap_concurrency: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            deadline: None,
            max_steps: 100_000,
            max_depth: 128,
            pmap_timeout: Duration::from_secs(5),
            pmap_concurrency: 8,
        }
    }
}

impl Limits {
    pub fn from_config(config: &RunConfig, deadline: Option<Instant>) -> Self {
        Self {
            deadline,
            max_steps: config.eval_step_limit,
            pmap_timeout: config.pmap_timeout,
            pmap_concurrency: config.pmap_concurrency.max(1),
            ..Self::default()
        }
    }
}

/// What a call head resolved to.
#[derive(Debug, Clone)]
pub enum Callee {
    HostTool(Tool),
    NestedSubAgent(Tool),
    UserClosure(Arc<Closure>),
    Builtin(Builtin),
    /// `(:key map)` reads `key` from `map`.
    Keyword(String),
}

impl Callee {
    fn from_tool(tool: &Tool) -> Self {
        match tool.kind {
            ToolKind::Host(_) => Callee::HostTool(tool.clone()),
            ToolKind::SubAgent(_) => Callee::NestedSubAgent(tool.clone()),
        }
    }

    pub fn from_value(value: Value, tools: &ToolRegistry) -> EvalResult<Self> {
        match value {
            Value::Closure(closure) => Ok(Callee::UserClosure(closure)),
            Value::Builtin(builtin) => Ok(Callee::Builtin(builtin)),
            Value::Keyword(k) => Ok(Callee::Keyword(k)),
            Value::ToolRef(name) => tools
                .get(&name)
                .map(Callee::from_tool)
                .ok_or_else(|| EvalError::UnboundSymbol(format!("tool/{}", name))),
            other => Err(EvalError::Runtime(format!(
                "cannot call {} value {}",
                other.type_name(),
                other.preview(40)
            ))),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Callee::HostTool(tool) | Callee::NestedSubAgent(tool) => format!("tool/{}", tool.name),
            Callee::UserClosure(closure) => closure.name().to_string(),
            Callee::Builtin(builtin) => builtin.to_string(),
            Callee::Keyword(k) => format!(":{}", k),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    variables: HashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn insert(&mut self, name: String, value: Value) -> Option<Value> {
        self.variables.insert(name, value)
    }
}

/// Lexical locals; the innermost scope is last.
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new()],
        }
    }

    pub fn from_map(locals: Map) -> Self {
        Self {
            scopes: vec![Scope {
                variables: locals.into_iter().collect(),
            }],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    pub fn pop_scope(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.lookup(name))
    }

    pub fn insert(&mut self, name: String, value: Value) -> Option<Value> {
        match self.scopes.last_mut() {
            Some(scope) => scope.insert(name, value),
            None => {
                let mut scope = Scope::new();
                scope.insert(name, value);
                self.scopes.push(scope);
                None
            }
        }
    }

    /// Every visible binding, inner scopes shadowing outer ones.
    pub fn flatten(&self) -> Map {
        let mut locals = Map::new();
        for scope in &self.scopes {
            for (name, value) in &scope.variables {
                locals.insert(name.clone(), value.clone());
            }
        }
        locals
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

/// Saved caller state while a closure body runs.
pub struct Frame {
    scopes: ScopeStack,
    closure_memory: Option<Arc<Map>>,
}

/// Everything one evaluation reads and writes. Owned by the turn that is
/// evaluating; `pmap` branches get their own [`fork`](EvalContext::fork).
pub struct EvalContext {
    tools: Arc<ToolRegistry>,
    data: Arc<Map>,
    memory: Arc<Map>,
    closure_memory: Option<Arc<Map>>,
    scopes: ScopeStack,
    journal: Journal,
    tool_calls: Vec<ToolCallRecord>,
    prints: Vec<String>,
    steps: Arc<AtomicU64>,
    limits: Limits,
    depth: usize,
    in_fanout: bool,
}

impl EvalContext {
    pub fn new(tools: Arc<ToolRegistry>, data: Arc<Map>, memory: Map, journal: Journal) -> Self {
        Self {
            tools,
            data,
            memory: Arc::new(memory),
            closure_memory: None,
            scopes: ScopeStack::new(),
            journal,
            tool_calls: Vec::new(),
            prints: Vec::new(),
            steps: Arc::new(AtomicU64::new(0)),
            limits: Limits::default(),
            depth: 0,
            in_fanout: false,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn data(&self) -> &Map {
        &self.data
    }

    /// The run's memory namespace as written by `def!`.
    pub fn memory(&self) -> &Map {
        &self.memory
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    pub fn prints(&self) -> &[String] {
        &self.prints
    }

    pub fn steps_used(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn in_fanout(&self) -> bool {
        self.in_fanout
    }

    /// Memory as seen by the code currently running: a closure sees the
    /// snapshot taken when it was created.
    fn visible_memory(&self) -> &Arc<Map> {
        self.closure_memory.as_ref().unwrap_or(&self.memory)
    }

    pub fn memory_snapshot(&self) -> Arc<Map> {
        Arc::clone(self.visible_memory())
    }

    pub fn define(&mut self, name: &str, value: Value) -> EvalResult<()> {
        if self.in_fanout {
            return Err(EvalError::Runtime(format!(
                "def! {} is not allowed inside pmap",
                name
            )));
        }
        Arc::make_mut(&mut self.memory).insert(name.to_string(), value);
        Ok(())
    }

    pub fn push_scope(&mut self) {
        self.scopes.push_scope();
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop_scope();
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.scopes.insert(name.to_string(), value);
    }

    pub fn locals(&self) -> Map {
        self.scopes.flatten()
    }

    /// Switches to a closure's environment. Depth is checked here so runaway
    /// recursion ends in a typed failure.
    pub fn enter_frame(&mut self, locals: Map, memory: Arc<Map>) -> EvalResult<Frame> {
        if self.depth >= self.limits.max_depth {
            return Err(EvalError::BudgetExceeded(format!(
                "call depth limit of {} reached",
                self.limits.max_depth
            )));
        }
        self.depth += 1;
        Ok(Frame {
            scopes: std::mem::replace(&mut self.scopes, ScopeStack::from_map(locals)),
            closure_memory: self.closure_memory.replace(memory),
        })
    }

    pub fn exit_frame(&mut self, frame: Frame) {
        self.depth = self.depth.saturating_sub(1);
        self.scopes = frame.scopes;
        self.closure_memory = frame.closure_memory;
    }

    /// Consumes one evaluation step and checks the run deadline.
    pub fn tick(&self) -> EvalResult<()> {
        let used = self.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if used > self.limits.max_steps {
            return Err(EvalError::BudgetExceeded(format!(
                "evaluation step limit of {} reached",
                self.limits.max_steps
            )));
        }
        self.check_deadline()
    }

    pub fn check_deadline(&self) -> EvalResult<()> {
        match self.limits.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(EvalError::Timeout("run deadline exceeded".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn record_tool_call(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
    }

    pub fn print(&mut self, line: String) {
        self.prints.push(line);
    }

    /// A context for one `pmap` branch: same tools, data, memory snapshot,
    /// journal and step budget, fresh accumulators, and `def!` disabled.
    pub fn fork(&self) -> Self {
        Self {
            tools: Arc::clone(&self.tools),
            data: Arc::clone(&self.data),
            memory: Arc::clone(&self.memory),
            closure_memory: self.closure_memory.clone(),
            scopes: ScopeStack::from_map(self.locals()),
            journal: self.journal.clone(),
            tool_calls: Vec::new(),
            prints: Vec::new(),
            steps: Arc::clone(&self.steps),
            limits: self.limits.clone(),
            depth: self.depth,
            in_fanout: true,
        }
    }

    /// Appends a finished branch's tool calls and prints.
    pub fn absorb(&mut self, branch: EvalContext) {
        self.tool_calls.extend(branch.tool_calls);
        self.prints.extend(branch.prints);
    }

    /// Hands back the memory namespace and the accumulators.
    pub fn finish(self) -> (Map, Vec<ToolCallRecord>, Vec<String>) {
        let memory = Arc::try_unwrap(self.memory).unwrap_or_else(|shared| (*shared).clone());
        (memory, self.tool_calls, self.prints)
    }

    /// Resolves a symbol in value position.
    pub fn resolve_symbol(&self, symbol: &Symbol) -> EvalResult<Value> {
        match symbol.namespace {
            Some(Namespace::Data) => self
                .data
                .get(&symbol.name)
                .cloned()
                .ok_or_else(|| EvalError::UnboundSymbol(symbol.to_string())),
            Some(Namespace::User) => self
                .visible_memory()
                .get(&symbol.name)
                .cloned()
                .ok_or_else(|| EvalError::UnboundSymbol(symbol.to_string())),
            Some(Namespace::Tool) => {
                if self.tools.contains(&symbol.name) {
                    Ok(Value::ToolRef(symbol.name.clone()))
                } else {
                    Err(EvalError::UnboundSymbol(symbol.to_string()))
                }
            }
            None => {
                let name = symbol.name.as_str();
                if let Some(value) = self.scopes.lookup(name) {
                    return Ok(value.clone());
                }
                if let Some(value) = self.visible_memory().get(name) {
                    return Ok(value.clone());
                }
                if self.tools.contains(name) {
                    return Ok(Value::ToolRef(name.to_string()));
                }
                if let Some(builtin) = Builtin::lookup(name) {
                    return Ok(Value::Builtin(builtin));
                }
                Err(EvalError::UnboundSymbol(name.to_string()))
            }
        }
    }

    /// Resolves a symbol in call-head position: locals, then memory, then
    /// registered tools, then builtins.
    pub fn resolve_callee(&self, symbol: &Symbol) -> EvalResult<Callee> {
        if symbol.namespace == Some(Namespace::Tool) {
            return self
                .tools
                .get(&symbol.name)
                .map(Callee::from_tool)
                .ok_or_else(|| EvalError::UnboundSymbol(symbol.to_string()));
        }
        let value = self.resolve_symbol(symbol)?;
        Callee::from_value(value, &self.tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::echo_tool;
    use pretty_assertions::assert_eq;

    fn context() -> EvalContext {
        let tools = Arc::new(ToolRegistry::new().with(echo_tool()));
        let data = Arc::new(Map::from([("user_id".to_string(), Value::Int(7))]));
        EvalContext::new(tools, data, Map::new(), Journal::new())
    }

    #[test]
    fn test_scope_hierarchy() {
        let mut ctx = context();
        ctx.bind("x", Value::Int(1));
        ctx.push_scope();
        ctx.bind("x", Value::Int(2));
        assert_eq!(ctx.resolve_symbol(&Symbol::bare("x")).unwrap(), Value::Int(2));
        ctx.pop_scope();
        assert_eq!(ctx.resolve_symbol(&Symbol::bare("x")).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_namespaces() {
        let mut ctx = context();
        ctx.define("total", Value::Int(3)).unwrap();
        assert_eq!(
            ctx.resolve_symbol(&Symbol::qualified(Namespace::Data, "user_id"))
                .unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            ctx.resolve_symbol(&Symbol::qualified(Namespace::User, "total"))
                .unwrap(),
            Value::Int(3)
        );
        assert!(matches!(
            ctx.resolve_symbol(&Symbol::qualified(Namespace::Data, "missing")),
            Err(EvalError::UnboundSymbol(name)) if name == "data/missing"
        ));
    }

    #[test]
    fn test_callee_resolution_order() {
        let mut ctx = context();
        assert!(matches!(
            ctx.resolve_callee(&Symbol::bare("echo")).unwrap(),
            Callee::HostTool(_)
        ));
        assert!(matches!(
            ctx.resolve_callee(&Symbol::bare("count")).unwrap(),
            Callee::Builtin(Builtin::Count)
        ));
        ctx.define("count", Value::keyword("shadowed")).unwrap();
        assert!(matches!(
            ctx.resolve_callee(&Symbol::bare("count")).unwrap(),
            Callee::Keyword(_)
        ));
        assert!(matches!(
            ctx.resolve_callee(&Symbol::bare("nope")),
            Err(EvalError::UnboundSymbol(_))
        ));
    }

    #[test]
    fn test_registered_tool_shadows_builtin() {
        let tools = ToolRegistry::new().with(Tool::from_fn("count", |a| async move { Ok(a) }));
        let mut ctx = EvalContext::new(Arc::new(tools), Arc::new(Map::new()), Map::new(), Journal::new());
        assert!(matches!(
            ctx.resolve_callee(&Symbol::bare("count")).unwrap(),
            Callee::HostTool(_)
        ));
        assert!(matches!(
            ctx.resolve_callee(&Symbol::bare("get")).unwrap(),
            Callee::Builtin(Builtin::Get)
        ));
        ctx.define("count", Value::Int(1)).unwrap();
        assert_eq!(
            ctx.resolve_symbol(&Symbol::bare("count")).unwrap(),
            Value::Int(1)
        );
    }

    #[test]
    fn test_fork_disables_def_and_shares_steps() {
        let ctx = context();
        let mut branch = ctx.fork();
        assert!(branch.define("x", Value::Nil).is_err());
        branch.tick().unwrap();
        assert_eq!(ctx.steps_used(), 1);
    }

    #[test]
    fn test_step_limit() {
        let ctx = context().with_limits(Limits {
            max_steps: 2,
            ..Limits::default()
        });
        assert!(ctx.tick().is_ok());
        assert!(ctx.tick().is_ok());
        assert!(matches!(ctx.tick(), Err(EvalError::BudgetExceeded(_))));
    }
}
