//! Run-level counters owned by the turn loop.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::RunConfig;
use crate::error::{Failure, Reason};
use crate::llm::TokenUsage;
use crate::value::{Map, Value};

#[derive(Debug, Clone)]
pub struct BudgetState {
    started: Instant,
    deadline: Instant,
    max_turns: usize,
    turns_used: usize,
    token_limit: Option<u64>,
    max_heap: Option<usize>,
    usage: TokenUsage,
    llm_requests: usize,
}

impl BudgetState {
    pub fn new(config: &RunConfig) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + config.timeout,
            max_turns: config.max_turns,
            turns_used: 0,
            token_limit: config.token_limit,
            max_heap: config.max_heap,
            usage: TokenUsage::default(),
            llm_requests: 0,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn llm_requests(&self) -> usize {
        self.llm_requests
    }

    pub fn turns_used(&self) -> usize {
        self.turns_used
    }

    /// Turns left including the one about to start.
    pub fn turns_remaining(&self) -> usize {
        self.max_turns.saturating_sub(self.turns_used)
    }

    pub fn is_final_turn(&self) -> bool {
        self.turns_remaining() == 1
    }

    pub fn start_turn(&mut self) -> usize {
        self.turns_used += 1;
        self.turns_used
    }

    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.usage += usage;
        self.llm_requests += 1;
    }

    pub fn check_tokens(&self) -> Result<(), Failure> {
        match self.token_limit {
            Some(limit) if self.usage.total() >= limit => Err(Failure::new(
                Reason::BudgetExceeded,
                format!("token budget exhausted: {} of {} used", self.usage.total(), limit),
            )),
            _ => Ok(()),
        }
    }

    pub fn check_time(&self) -> Result<(), Failure> {
        if Instant::now() >= self.deadline {
            return Err(self.timeout_failure());
        }
        Ok(())
    }

    pub fn timeout_failure(&self) -> Failure {
        Failure::new(
            Reason::Timeout,
            format!("run exceeded its {}ms timeout", self.timeout().as_millis()),
        )
    }

    /// Bounds the JSON size of the memory namespace.
    pub fn check_heap(&self, memory: &Map) -> Result<(), Failure> {
        let Some(limit) = self.max_heap else {
            return Ok(());
        };
        let size = memory_size(memory);
        if size > limit {
            return Err(Failure::new(
                Reason::BudgetExceeded,
                format!("memory uses {} bytes, limit is {}", size, limit),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.deadline - self.started
    }
}

pub fn memory_size(memory: &Map) -> usize {
    Value::Map(memory.clone()).to_json().to_string().len()
}
