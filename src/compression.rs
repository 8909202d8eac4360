//! Folds turn history into the messages for the next model prompt.

use crate::llm::Message;
use crate::signature::Signature;
use crate::turn::Turn;
use crate::value::{truncate, Map};

pub const FINAL_TURN_DIRECTIVE: &str =
    "This is your final turn. Your program must end with (return value) or (fail error).";

const PREVIEW_CHARS: usize = 200;
const PROGRAM_CHARS: usize = 2_000;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You solve tasks by writing programs in a small Lisp dialect. Reply with exactly one \
program inside a ```clojure fenced block.

Namespaces: tool/name calls a tool, data/name reads an input, user/name reads memory \
written with (def! name value). Wrap side effects in (task \"stable-id\" expr) so they \
run once. (pmap f items) runs f over items concurrently and returns \
{:status :ok :value v} or {:status :error :reason r :message m} per item.

Finish with (return value) when the answer is ready or (fail {:reason :kw :message \"...\"}) \
when it cannot be reached. A program that does neither continues into the next turn.";

/// Everything a strategy needs besides the history itself.
#[derive(Debug, Clone, Default)]
pub struct CompressionOptions {
    pub system_prompt: String,
    pub mission: String,
    pub output_signature: Option<Signature>,
    /// Pre-rendered `tool/` documentation.
    pub tool_docs: String,
    pub data: Map,
    pub turns_remaining: usize,
    pub final_turn: bool,
    pub tool_call_history_limit: usize,
    pub print_history_limit: usize,
}

pub trait CompressionStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn to_messages(&self, history: &[Turn], memory: &Map, options: &CompressionOptions)
        -> Vec<Message>;
}

/// Coalesces the whole history into one system and one user message.
///
/// Only the latest turn's error is shown; once a turn succeeds earlier
/// errors disappear from the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleUserCoalesced;

impl CompressionStrategy for SingleUserCoalesced {
    fn name(&self) -> &str {
        "single_user_coalesced"
    }

    fn to_messages(
        &self,
        history: &[Turn],
        memory: &Map,
        options: &CompressionOptions,
    ) -> Vec<Message> {
        let mut sections = vec![
            mission_section(options),
            namespaces_section(memory, options),
        ];
        if let Some(section) = tool_calls_section(history, options.tool_call_history_limit) {
            sections.push(section);
        }
        if let Some(section) = prints_section(history, options.print_history_limit) {
            sections.push(section);
        }
        if let Some(section) = history.last().and_then(error_section) {
            sections.push(section);
        }
        sections.push(turns_section(options));

        vec![
            Message::system(&options.system_prompt),
            Message::user(sections.join("\n\n")),
        ]
    }
}

/// Replays every turn as an assistant/user exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transcript;

impl CompressionStrategy for Transcript {
    fn name(&self) -> &str {
        "transcript"
    }

    fn to_messages(
        &self,
        history: &[Turn],
        memory: &Map,
        options: &CompressionOptions,
    ) -> Vec<Message> {
        let mut messages = vec![
            Message::system(&options.system_prompt),
            Message::user(format!(
                "{}\n\n{}",
                mission_section(options),
                namespaces_section(&Map::new(), options)
            )),
        ];
        for turn in history {
            messages.push(Message::assistant(format!("```clojure\n{}\n```", turn.program)));
            let mut feedback = Vec::new();
            for call in &turn.tool_calls {
                feedback.push(call.summary(PREVIEW_CHARS));
            }
            for line in &turn.prints {
                feedback.push(truncate(line, PREVIEW_CHARS));
            }
            match (turn.value(), turn.failure()) {
                (Some(value), _) => feedback.push(format!("=> {}", value.preview(PREVIEW_CHARS))),
                (None, Some(failure)) => feedback.push(format!("ERROR {}", failure)),
                (None, None) => {}
            }
            messages.push(Message::user(feedback.join("\n")));
        }
        let mut closing = vec![memory_lines(memory)];
        closing.push(turns_section(options));
        messages.push(Message::user(closing.join("\n\n")));
        messages
    }
}

fn mission_section(options: &CompressionOptions) -> String {
    let mut section = format!("# Mission\n{}", options.mission);
    if let Some(signature) = &options.output_signature {
        section.push_str(&format!("\n\nReturn a value of type {}", signature.output));
    }
    section
}

fn namespaces_section(memory: &Map, options: &CompressionOptions) -> String {
    let tools = if options.tool_docs.is_empty() {
        "(none)".to_string()
    } else {
        options.tool_docs.clone()
    };
    let data = if options.data.is_empty() {
        "(none)".to_string()
    } else {
        options
            .data
            .iter()
            .map(|(name, value)| {
                format!("data/{} : {} = {}", name, value.type_name(), value.preview(PREVIEW_CHARS))
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "# Namespaces\n## tool/\n{}\n\n## data/\n{}\n\n{}",
        tools,
        data,
        memory_lines(memory)
    )
}

fn memory_lines(memory: &Map) -> String {
    if memory.is_empty() {
        return "## user/\n(empty)".to_string();
    }
    let lines = memory
        .iter()
        .map(|(name, value)| format!("user/{} = {}", name, value.preview(PREVIEW_CHARS)))
        .collect::<Vec<_>>()
        .join("\n");
    format!("## user/\n{}", lines)
}

fn tool_calls_section(history: &[Turn], limit: usize) -> Option<String> {
    let calls: Vec<_> = history.iter().flat_map(|turn| &turn.tool_calls).collect();
    if calls.is_empty() || limit == 0 {
        return None;
    }
    let skipped = calls.len().saturating_sub(limit);
    let mut lines = Vec::new();
    if skipped > 0 {
        lines.push(format!("({} earlier calls omitted)", skipped));
    }
    lines.extend(calls[skipped..].iter().map(|call| call.summary(PREVIEW_CHARS)));
    Some(format!("# Tool calls\n{}", lines.join("\n")))
}

fn prints_section(history: &[Turn], limit: usize) -> Option<String> {
    let prints: Vec<&String> = history.iter().flat_map(|turn| &turn.prints).collect();
    if prints.is_empty() || limit == 0 {
        return None;
    }
    let skipped = prints.len().saturating_sub(limit);
    let mut lines = Vec::new();
    if skipped > 0 {
        lines.push(format!("({} earlier lines omitted)", skipped));
    }
    lines.extend(prints[skipped..].iter().map(|line| truncate(line, PREVIEW_CHARS)));
    Some(format!("# Output\n{}", lines.join("\n")))
}

fn error_section(turn: &Turn) -> Option<String> {
    let failure = turn.failure()?;
    Some(format!(
        "# Error\nYour previous program failed.\n```clojure\n{}\n```\n{}",
        truncate(&turn.program, PROGRAM_CHARS),
        failure
    ))
}

fn turns_section(options: &CompressionOptions) -> String {
    let mut section = format!("# Turns remaining\n{}", options.turns_remaining);
    if options.final_turn {
        section.push('\n');
        section.push_str(FINAL_TURN_DIRECTIVE);
    }
    section
}
