//! Sub-agents: a mission, a tool set and a model, run through the turn loop.
//!
//! A [`SubAgent`] is configured once with [`SubAgentBuilder`] and can be run
//! any number of times. Each [`SubAgent::run`] starts from the supplied
//! journal and memory and returns them alongside the outcome, so a caller can
//! persist the journal and resume later.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::compression::{CompressionStrategy, SingleUserCoalesced, DEFAULT_SYSTEM_PROMPT};
use crate::config::{duration_ms, RunConfig};
use crate::error::{Failure, PtcResult};
use crate::journal::Journal;
use crate::llm::ModelClient;
use crate::signature::{parse_signature, Signature};
use crate::tool::{Tool, ToolError, ToolRegistry};
use crate::turn::Turn;
use crate::turn_loop::TurnLoop;
use crate::value::{Map, Value};

/// Inputs that change from run to run.
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    /// Values exposed under `data/`.
    pub context: Map,
    pub journal: Journal,
    pub memory: Map,
}

impl RunInput {
    pub fn new(context: Map) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_memory(mut self, memory: Map) -> Self {
        self.memory = memory;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub llm_requests: usize,
    pub turns: usize,
    pub tool_calls: usize,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSuccess {
    pub value: Value,
    pub journal: Journal,
    pub memory: Map,
    pub prints: Vec<String>,
    pub usage: Usage,
    pub turns: Vec<Turn>,
    /// Set when a budget ran out and `value` is the last value a turn produced.
    pub partial: bool,
}

#[derive(Error, Debug, Clone, Serialize)]
#[error("{failure}")]
pub struct RunFailure {
    pub failure: Failure,
    pub journal: Journal,
    pub memory: Map,
    pub prints: Vec<String>,
    pub usage: Usage,
    pub trace: Vec<Turn>,
}

pub type RunOutcome = Result<RunSuccess, RunFailure>;

pub struct SubAgent {
    name: String,
    mission: String,
    signature: Option<Signature>,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn ModelClient>,
    compression: Arc<dyn CompressionStrategy>,
    system_prompt: String,
    config: RunConfig,
}

impl std::fmt::Debug for SubAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubAgent")
            .field("name", &self.name)
            .field("tools", &self.tools.names().collect::<Vec<_>>())
            .field("compression", &self.compression.name())
            .finish()
    }
}

impl SubAgent {
    pub fn builder(name: impl Into<String>, model: Arc<dyn ModelClient>) -> SubAgentBuilder {
        SubAgentBuilder::new(name, model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mission(&self) -> &str {
        &self.mission
    }

    /// Declared `(params) -> output` contract. The output part validates the
    /// value passed to `return`.
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn model(&self) -> &Arc<dyn ModelClient> {
        &self.model
    }

    pub fn compression(&self) -> &Arc<dyn CompressionStrategy> {
        &self.compression
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[instrument(level = "info", skip(self, input), fields(agent = %self.name))]
    pub async fn run(&self, input: RunInput) -> RunOutcome {
        TurnLoop::new(self, input).run().await
    }

    /// Wraps the agent as a tool other agents can call.
    pub fn into_tool(self) -> Tool {
        Tool::sub_agent(Arc::new(self))
    }

    /// Runs the agent as a tool call: `args` become the data namespace and the
    /// run starts from an empty journal.
    pub fn invoke_nested(&self, args: Value) -> BoxFuture<'_, Result<Value, ToolError>> {
        async move {
            let context = match args {
                Value::Map(map) => map,
                Value::Nil => Map::new(),
                other => {
                    let mut map = Map::new();
                    map.insert("input".to_string(), other);
                    map
                }
            };
            info!(agent = %self.name, "nested run");
            match self.run(RunInput::new(context)).await {
                Ok(success) => Ok(success.value),
                Err(failure) => Err(ToolError::SubAgent(failure.failure)),
            }
        }
        .boxed()
    }
}

pub struct SubAgentBuilder {
    name: String,
    mission: String,
    signature: Option<String>,
    tools: ToolRegistry,
    model: Arc<dyn ModelClient>,
    compression: Arc<dyn CompressionStrategy>,
    system_prompt: String,
    config: RunConfig,
}

impl SubAgentBuilder {
    pub fn new(name: impl Into<String>, model: Arc<dyn ModelClient>) -> Self {
        Self {
            name: name.into(),
            mission: String::new(),
            signature: None,
            tools: ToolRegistry::new(),
            model,
            compression: Arc::new(SingleUserCoalesced),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            config: RunConfig::default(),
        }
    }

    pub fn mission(mut self, mission: impl Into<String>) -> Self {
        self.mission = mission.into();
        self
    }

    /// Set the agent's signature.
    ///
    /// # Arguments
    ///
    /// * `signature` - Text such as `"(id :int) -> {status :keyword}"`; parsed
    ///   by [`build`](Self::build)
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        for tool in tools.iter() {
            self.tools.register(tool.clone());
        }
        self
    }

    pub fn compression(mut self, compression: Arc<dyn CompressionStrategy>) -> Self {
        self.compression = compression;
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> PtcResult<SubAgent> {
        let signature = self
            .signature
            .as_deref()
            .map(parse_signature)
            .transpose()?;
        Ok(SubAgent {
            name: self.name,
            mission: self.mission,
            signature,
            tools: Arc::new(self.tools),
            model: self.model,
            compression: self.compression,
            system_prompt: self.system_prompt,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::tool::echo_tool;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder() {
        let agent = SubAgent::builder("lookup", Arc::new(ScriptedModel::new(["(return 1)"])))
            .mission("Find the user")
            .signature("(id :int) -> {name :string}")
            .tool(echo_tool())
            .build()
            .unwrap();
        assert_eq!(agent.name(), "lookup");
        assert_eq!(agent.mission(), "Find the user");
        assert_eq!(
            agent.signature().unwrap().to_string(),
            "(id :int) -> {name :string}"
        );
        assert!(agent.tools().contains("echo"));

        let tool = agent.into_tool();
        assert!(tool.is_sub_agent());
        assert_eq!(tool.name, "lookup");
    }

    #[test]
    fn test_builder_rejects_bad_signature() {
        let result = SubAgent::builder("bad", Arc::new(ScriptedModel::new(Vec::<String>::new())))
            .signature("(id :integer")
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_nested_invocation() {
        let model = ScriptedModel::new(["(return {:greeting (str \"hi \" data/name)})"]);
        let agent = SubAgent::builder("greeter", Arc::new(model))
            .signature("(name :string) -> {greeting :string}")
            .build()
            .unwrap();
        let value = agent
            .invoke_nested(Value::map([("name", Value::string("Ann"))]))
            .await
            .unwrap();
        assert_eq!(value, Value::map([("greeting", Value::string("hi Ann"))]));
    }

    #[tokio::test]
    async fn test_nested_failure_surfaces_as_tool_error() {
        let model = ScriptedModel::new(["(fail {:reason :not_found :message \"no such user\"})"]);
        let agent = SubAgent::builder("lookup", Arc::new(model)).build().unwrap();
        let error = agent.invoke_nested(Value::Nil).await.unwrap_err();
        match error {
            ToolError::SubAgent(failure) => assert_eq!(failure.message, "no such user"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
