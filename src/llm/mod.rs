//! Model-completion collaborator.
//!
//! The turn loop needs a single round trip per turn: a system prompt plus
//! messages in, text and token usage out. Transports live outside this crate
//! and plug in through [`ModelClient`]; [`ScriptedModel`] replays canned
//! replies for tests and the `ptc script` command.

pub mod scripted;

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

pub use scripted::ScriptedModel;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("no reply available: {0}")]
    Exhausted(String),
    #[error("stream error: {0}")]
    Stream(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Unrecognized run options, passed through untouched.
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub options: CompletionOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Delta(String),
    /// Always the last chunk.
    Done(TokenUsage),
}

pub type CompletionStream = BoxStream<'static, Result<StreamChunk, LlmError>>;

#[mockall::automock]
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;

    /// Incremental variant of [`complete`](ModelClient::complete). The default
    /// emits the whole reply as one delta.
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, LlmError> {
        let completion = self.complete(request).await?;
        Ok(stream::iter(vec![
            Ok(StreamChunk::Delta(completion.content)),
            Ok(StreamChunk::Done(completion.usage)),
        ])
        .boxed())
    }
}

/// Folds a stream back into a [`Completion`].
pub async fn collect_stream(mut stream: CompletionStream) -> Result<Completion, LlmError> {
    let mut content = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Delta(text) => content.push_str(&text),
            StreamChunk::Done(usage) => return Ok(Completion { content, usage }),
        }
    }
    Err(LlmError::Stream(
        "stream ended without a done marker".to_string(),
    ))
}

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").unwrap();
}

/// The program inside the first fenced code block of a reply, or the whole
/// reply when it has none.
pub fn extract_program(reply: &str) -> String {
    match FENCED_BLOCK.captures(reply).and_then(|c| c.get(1)) {
        Some(block) => block.as_str().trim().to_string(),
        None => reply.trim().to_string(),
    }
}

/// Rough token count used when a client does not report usage.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
