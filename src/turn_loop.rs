//! The request, evaluate, compress cycle behind [`SubAgent::run`].
//!
//! # States
//!
//! ```text
//! Init -> AwaitingProgram -> Evaluating -> Continuing -> AwaitingProgram ...
//!                                       -> Succeeded | Failed
//!                                       -> BudgetExceeded | TurnsExhausted
//! ```
//!
//! One program evaluates fully before the next prompt is built. A turn that
//! errors is fed back to the model; its memory writes are dropped while its
//! journal entries stay. The overall timeout and exhausted budgets end the run
//! immediately.

use std::sync::Arc;

use strum_macros::Display;
use tokio::time::timeout_at;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::agent::{RunFailure, RunInput, RunOutcome, RunSuccess, SubAgent, Usage};
use crate::budget::BudgetState;
use crate::compression::CompressionOptions;
use crate::config::BudgetPolicy;
use crate::error::{Failure, Reason};
use crate::eval::{EvalContext, EvalError, Evaluator, Exit, Limits, Step};
use crate::journal::Journal;
use crate::llm::{extract_program, CompletionOptions, CompletionRequest, Message, Role, TokenUsage};
use crate::reader::parse;
use crate::turn::{Turn, TurnOutcome};
use crate::value::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LoopState {
    Init,
    AwaitingProgram,
    Evaluating,
    Continuing,
    Succeeded,
    Failed,
    BudgetExceeded,
    TurnsExhausted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopState::Succeeded
                | LoopState::Failed
                | LoopState::BudgetExceeded
                | LoopState::TurnsExhausted
        )
    }
}

enum Terminal {
    Success { value: Value, partial: bool },
    Failure(Failure),
}

pub struct TurnLoop<'a> {
    run_id: Uuid,
    agent: &'a SubAgent,
    state: LoopState,
    budget: BudgetState,
    evaluator: Evaluator,
    data: Arc<Map>,
    memory: Map,
    journal: Journal,
    history: Vec<Turn>,
    prints: Vec<String>,
    tool_calls: usize,
    last_value: Option<Value>,
}

impl<'a> TurnLoop<'a> {
    pub fn new(agent: &'a SubAgent, input: RunInput) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            agent,
            state: LoopState::Init,
            budget: BudgetState::new(agent.config()),
            evaluator: Evaluator::new(),
            data: Arc::new(input.context),
            memory: input.memory,
            journal: input.journal,
            history: Vec::new(),
            prints: Vec::new(),
            tool_calls: 0,
            last_value: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[instrument(level = "debug", skip(self), fields(agent = %self.agent.name(), run_id = %self.run_id))]
    pub async fn run(mut self) -> RunOutcome {
        while self.budget.turns_remaining() > 0 {
            if let Err(failure) = self.check_budgets() {
                let terminal = self.budget_exceeded(failure);
                return self.conclude(terminal);
            }
            if let Some(terminal) = self.play_turn().await {
                return self.conclude(terminal);
            }
        }
        self.transition(LoopState::TurnsExhausted);
        let failure = Failure::new(
            Reason::TurnsExhausted,
            format!(
                "no return or fail after {} turns",
                self.budget.turns_used()
            ),
        );
        self.conclude(Terminal::Failure(failure))
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = %self.state, to = %next, "turn loop transition");
        self.state = next;
    }

    fn check_budgets(&self) -> Result<(), Failure> {
        self.budget.check_time()?;
        self.budget.check_tokens()?;
        self.budget.check_heap(&self.memory)
    }

    async fn play_turn(&mut self) -> Option<Terminal> {
        let options = self.compression_options();
        let messages = self
            .agent
            .compression()
            .to_messages(&self.history, &self.memory, &options);
        let number = self.budget.start_turn();

        self.transition(LoopState::AwaitingProgram);
        let request = self.request(messages);
        let completion = match timeout_at(
            self.budget.deadline(),
            self.agent.model().complete(request),
        )
        .await
        {
            Err(_) => return Some(self.budget_exceeded(self.budget.timeout_failure())),
            Ok(Err(error)) => {
                warn!(turn = number, "model request failed: {}", error);
                let turn = Turn {
                    number,
                    program: String::new(),
                    outcome: TurnOutcome::Errored {
                        failure: error.into(),
                    },
                    tool_calls: Vec::new(),
                    prints: Vec::new(),
                    usage: TokenUsage::default(),
                };
                return self.settle(turn);
            }
            Ok(Ok(completion)) => completion,
        };
        self.budget.record_usage(completion.usage);

        self.transition(LoopState::Evaluating);
        let program = extract_program(&completion.content);
        let turn = self.evaluate(number, program, completion.usage).await;
        self.settle(turn)
    }

    fn compression_options(&self) -> CompressionOptions {
        let config = self.agent.config();
        CompressionOptions {
            system_prompt: self.agent.system_prompt().to_string(),
            mission: self.agent.mission().to_string(),
            output_signature: self.agent.signature().cloned(),
            tool_docs: self.agent.tools().render_docs(),
            data: (*self.data).clone(),
            turns_remaining: self.budget.turns_remaining(),
            final_turn: self.budget.is_final_turn(),
            tool_call_history_limit: config.tool_call_history_limit,
            print_history_limit: config.print_history_limit,
        }
    }

    fn request(&self, messages: Vec<Message>) -> CompletionRequest {
        let config = self.agent.config();
        let (system, messages): (Vec<Message>, Vec<Message>) = messages
            .into_iter()
            .partition(|message| message.role == Role::System);
        let system = system
            .into_iter()
            .map(|message| message.content)
            .collect::<Vec<_>>()
            .join("\n\n");
        CompletionRequest {
            system,
            messages,
            options: CompletionOptions {
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                extra: config.extra.clone(),
            },
        }
    }

    #[instrument(level = "debug", skip(self, program, usage))]
    async fn evaluate(&mut self, number: usize, program: String, usage: TokenUsage) -> Turn {
        let parsed = match parse(&program) {
            Ok(parsed) => parsed,
            Err(error) => {
                return Turn {
                    number,
                    program,
                    outcome: TurnOutcome::Errored {
                        failure: error.into(),
                    },
                    tool_calls: Vec::new(),
                    prints: Vec::new(),
                    usage,
                }
            }
        };

        let limits = Limits::from_config(self.agent.config(), Some(self.budget.deadline()));
        let mut ctx = EvalContext::new(
            Arc::clone(self.agent.tools()),
            Arc::clone(&self.data),
            self.memory.clone(),
            self.journal.clone(),
        )
        .with_limits(limits);
        let result = self.evaluator.eval_program(&parsed, &mut ctx).await;
        let (memory, tool_calls, prints) = ctx.finish();

        let outcome = match result {
            Ok(Step::Continue(value)) => TurnOutcome::Continued { value },
            Ok(Step::Exit(Exit::Return(value))) => match self.check_output(&value) {
                Ok(()) => TurnOutcome::Returned { value },
                Err(failure) => TurnOutcome::Errored { failure },
            },
            Ok(Step::Exit(Exit::Fail(failure))) => TurnOutcome::Failed { failure },
            Err(error) => TurnOutcome::Errored {
                failure: error.into(),
            },
        };
        if matches!(
            outcome,
            TurnOutcome::Continued { .. } | TurnOutcome::Returned { .. }
        ) {
            self.memory = memory;
        }
        Turn {
            number,
            program,
            outcome,
            tool_calls,
            prints,
            usage,
        }
    }

    fn check_output(&self, value: &Value) -> Result<(), Failure> {
        match self.agent.signature() {
            Some(signature) => signature
                .validate_output(value)
                .map_err(|mismatch| EvalError::from(mismatch).into()),
            None => Ok(()),
        }
    }

    /// Records a finished turn and decides whether the run ends with it.
    fn settle(&mut self, turn: Turn) -> Option<Terminal> {
        info!(turn = turn.number, status = ?outcome_label(&turn.outcome), "turn finished");
        self.tool_calls += turn.tool_calls.len();
        self.prints.extend(turn.prints.iter().cloned());
        let outcome = turn.outcome.clone();
        self.history.push(turn);

        match outcome {
            TurnOutcome::Returned { value } => {
                self.transition(LoopState::Succeeded);
                Some(Terminal::Success {
                    value,
                    partial: false,
                })
            }
            TurnOutcome::Failed { failure } => {
                self.transition(LoopState::Failed);
                Some(Terminal::Failure(failure))
            }
            TurnOutcome::Errored { failure } => {
                if failure.reason == Reason::Timeout && self.budget.check_time().is_err() {
                    return Some(self.budget_exceeded(failure));
                }
                if self.budget.turns_remaining() == 0 {
                    self.transition(LoopState::Failed);
                    return Some(Terminal::Failure(failure));
                }
                self.transition(LoopState::Continuing);
                None
            }
            TurnOutcome::Continued { value } => {
                self.last_value = Some(value);
                self.transition(LoopState::Continuing);
                None
            }
        }
    }

    fn budget_exceeded(&mut self, failure: Failure) -> Terminal {
        self.transition(LoopState::BudgetExceeded);
        warn!("budget exceeded: {}", failure);
        match (self.agent.config().on_budget_exceeded, self.last_value.take()) {
            (BudgetPolicy::ReturnPartial, Some(value)) => Terminal::Success {
                value,
                partial: true,
            },
            _ => Terminal::Failure(failure),
        }
    }

    fn conclude(self, terminal: Terminal) -> RunOutcome {
        let usage = Usage {
            input_tokens: self.budget.usage().input_tokens,
            output_tokens: self.budget.usage().output_tokens,
            llm_requests: self.budget.llm_requests(),
            turns: self.budget.turns_used(),
            tool_calls: self.tool_calls,
            duration: self.budget.elapsed(),
        };
        info!(state = %self.state, turns = usage.turns, "run finished");
        match terminal {
            Terminal::Success { value, partial } => Ok(RunSuccess {
                value,
                journal: self.journal,
                memory: self.memory,
                prints: self.prints,
                usage,
                turns: self.history,
                partial,
            }),
            Terminal::Failure(failure) => Err(RunFailure {
                failure,
                journal: self.journal,
                memory: self.memory,
                prints: self.prints,
                usage,
                trace: self.history,
            }),
        }
    }
}

fn outcome_label(outcome: &TurnOutcome) -> &'static str {
    match outcome {
        TurnOutcome::Continued { .. } => "continued",
        TurnOutcome::Returned { .. } => "returned",
        TurnOutcome::Failed { .. } => "failed",
        TurnOutcome::Errored { .. } => "errored",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::llm::{Completion, LlmError, MockModelClient, ScriptedModel};
    use crate::tool::Tool;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn agent(replies: &[&str], config: RunConfig) -> SubAgent {
        SubAgent::builder("test", Arc::new(ScriptedModel::new(replies.to_vec())))
            .mission("Compute things")
            .config(config)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_memory_carries_across_turns() {
        let agent = agent(
            &["(def! total (+ 1 2))", "(return (* user/total 10))"],
            RunConfig::default(),
        );
        let success = agent.run(RunInput::default()).await.unwrap();
        assert_eq!(success.value, Value::Int(30));
        assert_eq!(success.turns.len(), 2);
        assert_eq!(success.memory.get("total"), Some(&Value::Int(3)));
        assert!(!success.partial);
    }

    #[tokio::test]
    async fn test_failed_turn_discards_memory_but_keeps_journal() {
        let agent = agent(
            &[
                "(def! x 1) (task \"step-1\" 42) (no-such-fn)",
                "(return :done)",
            ],
            RunConfig::default(),
        );
        let success = agent.run(RunInput::default()).await.unwrap();
        assert_eq!(success.value, Value::keyword("done"));
        assert!(success.memory.get("x").is_none());
        assert_eq!(success.journal.get("step-1"), Some(Value::Int(42)));
        assert_eq!(
            success.turns[0].failure().unwrap().reason,
            Reason::UnboundSymbol
        );
    }

    #[tokio::test]
    async fn test_explicit_fail_ends_the_run() {
        let agent = agent(
            &["(fail {:reason :no_data :message \"nothing to do\"})", "(return 1)"],
            RunConfig::default(),
        );
        let failure = agent.run(RunInput::default()).await.unwrap_err();
        assert_eq!(failure.failure.reason, Reason::Explicit("no_data".to_string()));
        assert_eq!(failure.trace.len(), 1);
    }

    #[tokio::test]
    async fn test_output_mismatch_is_recoverable() {
        let agent = SubAgent::builder(
            "typed",
            Arc::new(ScriptedModel::new([
                "(return {:count \"three\"})",
                "(return {:count 3})",
            ])),
        )
        .signature("-> {count :int}")
        .build()
        .unwrap();
        let success = agent.run(RunInput::default()).await.unwrap();
        assert_eq!(success.value, Value::map([("count", Value::Int(3))]));
        assert_eq!(
            success.turns[0].failure().unwrap().reason,
            Reason::TypeMismatch
        );
    }

    #[tokio::test]
    async fn test_error_on_last_turn_fails_with_that_error() {
        let agent = agent(
            &["(undefined-thing)"],
            RunConfig {
                max_turns: 1,
                ..RunConfig::default()
            },
        );
        let failure = agent.run(RunInput::default()).await.unwrap_err();
        assert_eq!(failure.failure.reason, Reason::UnboundSymbol);
    }

    #[tokio::test]
    async fn test_model_error_is_fed_back() {
        let mut model = MockModelClient::new();
        let mut seq = Sequence::new();
        model
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LlmError::RateLimited("busy".to_string())));
        model
            .expect_complete()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|request| request.messages[0].content.contains("rate limited: busy"))
            .returning(|_| {
                Ok(Completion {
                    content: "(return :ok)".to_string(),
                    usage: TokenUsage::new(5, 5),
                })
            });
        let agent = SubAgent::builder("mocked", Arc::new(model)).build().unwrap();
        let success = agent.run(RunInput::default()).await.unwrap();
        assert_eq!(success.value, Value::keyword("ok"));
        assert_eq!(success.turns[0].failure().unwrap().reason, Reason::ModelError);
        assert_eq!(success.usage.llm_requests, 1);
    }

    #[tokio::test]
    async fn test_token_budget_returns_partial() {
        let agent = agent(
            &["(+ 1 2)", "(return 4)"],
            RunConfig {
                token_limit: Some(1),
                on_budget_exceeded: BudgetPolicy::ReturnPartial,
                ..RunConfig::default()
            },
        );
        let success = agent.run(RunInput::default()).await.unwrap();
        assert!(success.partial);
        assert_eq!(success.value, Value::Int(3));
    }

    #[tokio::test]
    async fn test_token_budget_fails_by_default() {
        let agent = agent(
            &["(+ 1 2)", "(return 4)"],
            RunConfig {
                token_limit: Some(1),
                ..RunConfig::default()
            },
        );
        let failure = agent.run(RunInput::default()).await.unwrap_err();
        assert_eq!(failure.failure.reason, Reason::BudgetExceeded);
        assert_eq!(failure.usage.turns, 1);
    }

    #[tokio::test]
    async fn test_heap_budget() {
        let agent = agent(
            &["(def! blob \"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\")", "(return 1)"],
            RunConfig {
                max_heap: Some(16),
                ..RunConfig::default()
            },
        );
        let failure = agent.run(RunInput::default()).await.unwrap_err();
        assert_eq!(failure.failure.reason, Reason::BudgetExceeded);
        assert!(failure.memory.contains_key("blob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_ends_the_run() {
        let slow = Tool::from_fn("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Nil)
        });
        let agent = SubAgent::builder(
            "slowpoke",
            Arc::new(ScriptedModel::new(["(tool/slow)", "(return 1)"])),
        )
        .tool(slow)
        .config(RunConfig {
            timeout: Duration::from_millis(100),
            ..RunConfig::default()
        })
        .build()
        .unwrap();
        let failure = agent.run(RunInput::default()).await.unwrap_err();
        assert_eq!(failure.failure.reason, Reason::Timeout);
        assert_eq!(failure.trace.len(), 1);
    }
}
