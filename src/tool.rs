//! Host tools and nested sub-agents exposed to programs under `tool/`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::agent::SubAgent;
use crate::error::Failure;
use crate::signature::{parse_signature, Signature, SignatureError};
use crate::value::Value;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("{message}")]
    Failed {
        message: String,
        details: Option<Value>,
    },
    #[error("sub-agent failed: {0}")]
    SubAgent(Failure),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed {
            message: message.into(),
            details: None,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ToolError::Failed { details, .. } => details.clone(),
            ToolError::SubAgent(failure) => Some(failure.to_value()),
        }
    }
}

/// Host side of a tool: one call in, a value or an error out.
#[mockall::automock]
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        (self.f)(args).await
    }
}

#[derive(Clone)]
pub enum ToolKind {
    Host(Arc<dyn ToolHandler>),
    SubAgent(Arc<SubAgent>),
}

#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub signature: Option<Signature>,
    pub kind: ToolKind,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ToolKind::Host(_) => "host",
            ToolKind::SubAgent(_) => "sub_agent",
        };
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("signature", &self.signature.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl Tool {
    pub fn new(name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            signature: None,
            kind: ToolKind::Host(Arc::new(handler)),
        }
    }

    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new(name, FnHandler { f })
    }

    pub fn sub_agent(agent: Arc<SubAgent>) -> Self {
        Self {
            name: agent.name().to_string(),
            description: agent.mission().to_string(),
            signature: agent.signature().cloned(),
            kind: ToolKind::SubAgent(agent),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_signature(mut self, signature: &str) -> Result<Self, SignatureError> {
        self.signature = Some(parse_signature(signature)?);
        Ok(self)
    }

    pub fn is_sub_agent(&self) -> bool {
        matches!(self.kind, ToolKind::SubAgent(_))
    }

    pub async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        match &self.kind {
            ToolKind::Host(handler) => handler.invoke(args).await,
            ToolKind::SubAgent(agent) => agent.invoke_nested(args).await,
        }
    }

    /// One documentation entry as rendered into the prompt.
    pub fn render_doc(&self) -> String {
        let mut doc = format!("tool/{}", self.name);
        if let Some(signature) = &self.signature {
            doc.push_str(&format!(" {}", signature));
        }
        if !self.description.is_empty() {
            doc.push_str(&format!("\n  {}", self.description));
        }
        if let Some(signature) = &self.signature {
            doc.push_str(&format!("\n  e.g. {}", signature.example_call(&self.name)));
        }
        doc
    }
}

/// Tool that hands back its arguments.
pub fn echo_tool() -> Tool {
    Tool::from_fn("echo", |args| async move { Ok(args) })
        .with_description("Returns its arguments unchanged.")
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) -> Option<Tool> {
        self.tools.insert(tool.name.clone(), tool)
    }

    pub fn with(mut self, tool: Tool) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn render_docs(&self) -> String {
        self.tools
            .values()
            .map(Tool::render_doc)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_fn_tool_invocation() {
        let tool = Tool::from_fn("double", |args: Value| async move {
            match args.get("n") {
                Some(Value::Int(n)) => Ok(Value::Int(n * 2)),
                _ => Err(ToolError::failed("n is required")),
            }
        });
        let result = tool.invoke(Value::map([("n", Value::Int(21))])).await;
        assert_eq!(result, Ok(Value::Int(42)));
        assert!(tool.invoke(Value::Nil).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_handler() {
        let mut handler = MockToolHandler::new();
        handler
            .expect_invoke()
            .times(1)
            .returning(|_| Ok(Value::keyword("ok")));
        let tool = Tool::new("mocked", handler);
        assert_eq!(tool.invoke(Value::Nil).await, Ok(Value::keyword("ok")));
    }

    #[test]
    fn test_render_doc() {
        let tool = echo_tool()
            .with_signature("(msg :string) -> :map")
            .unwrap();
        assert_eq!(
            tool.render_doc(),
            "tool/echo (msg :string) -> :map\n  Returns its arguments unchanged.\n  e.g. (tool/echo {:msg \"text\"})"
        );
    }

    #[test]
    fn test_registry_is_sorted_by_name() {
        let registry = ToolRegistry::new()
            .with(echo_tool())
            .with(Tool::from_fn("add", |a| async move { Ok(a) }));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["add", "echo"]);
    }
}
