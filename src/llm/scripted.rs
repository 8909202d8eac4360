use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{estimate_tokens, Completion, CompletionRequest, LlmError, ModelClient, TokenUsage};
use crate::error::{Error, PtcResult};

type Reply = Result<String, LlmError>;

/// Replays a fixed list of replies in order and keeps every request it saw.
pub struct ScriptedModel {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "scripted".to_string(),
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reads a JSON array of reply strings.
    pub fn from_file(path: impl AsRef<Path>) -> PtcResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let replies: Vec<String> = serde_json::from_str(&text)?;
        if replies.is_empty() {
            return Err(Error::internal("script contains no replies"));
        }
        Ok(Self::new(replies))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queues a transport failure after the replies already scripted.
    pub fn then_fail(self, error: LlmError) -> Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        lock(&self.requests).last().cloned()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let input_tokens = estimate_tokens(&request.system)
            + request
                .messages
                .iter()
                .map(|m| estimate_tokens(&m.content))
                .sum::<u64>();
        lock(&self.requests).push(request);

        let reply = lock(&self.replies).pop_front().ok_or_else(|| {
            LlmError::Exhausted(format!("{} has no more scripted replies", self.name))
        })??;
        debug!(model = %self.name, "reply: {}", reply);
        let output_tokens = estimate_tokens(&reply);
        Ok(Completion {
            content: reply,
            usage: TokenUsage::new(input_tokens, output_tokens),
        })
    }
}
