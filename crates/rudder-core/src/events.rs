//! Transcript event model.
//!
//! These are the immutable data types that make up an agent transcript:
//! user/assistant/system text, reasoning blocks, tool calls and their
//! outputs. The transcript itself is an ordered, append-mostly sequence of
//! `TranscriptItem`s owned exclusively by one `Agent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ToolResult;

/// User-authored text added to the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserText {
    pub text: String,
}

/// Assistant-generated text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantText {
    pub text: String,
}

/// System/instruction text in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemText {
    pub text: String,
}

/// Opaque reasoning block emitted by the model.
///
/// Reasoning items are forwarded verbatim when the transcript is resent and
/// are never synthesized or mutated by this crate. A reasoning item is only
/// valid within the response chain that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub summary: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
}

/// A model-requested tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Unique within a single agent run.
    pub call_id: String,
    pub name: String,
    /// Raw JSON text as produced by the model. Parsed at the provider
    /// boundary, not here.
    pub arguments: String,
}

/// The outcome of a tool call, paired one-to-one with its `ToolCall`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallOutput {
    pub call_id: String,
    pub result: ToolResult,
}

/// One entry in the transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptItem {
    User(UserText),
    Assistant(AssistantText),
    System(SystemText),
    Reasoning(ReasoningItem),
    ToolCall(ToolCall),
    ToolOutput(ToolCallOutput),
}

impl TranscriptItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserText { text: text.into() })
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant(AssistantText { text: text.into() })
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::System(SystemText { text: text.into() })
    }
}

/// Token accounting reported by the model provider for one call.
///
/// Cumulative tracking across a run is a handler concern (see
/// `CompactionHandler`); this struct is the per-response ground truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroundTruthUsage {
    #[serde(default)]
    pub input_tokens: usize,
    #[serde(default)]
    pub output_tokens: usize,
    #[serde(default)]
    pub total_tokens: usize,
}

/// Handler-facing summary of one completed model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub response_id: String,
    pub model: String,
    pub usage: GroundTruthUsage,
}

// ── Persistence boundary ───────────────────────────────────────────────

/// Why a transcript record was emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordKind {
    RunStarted { run_id: String },
    RunFinished { state: String },
    ItemAppended,
    /// The transcript prefix was replaced by a summary turn.
    Compacted { dropped_items: usize },
}

/// One append-only record per transcript mutation or lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RecordKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<TranscriptItem>,
}

/// Append-only event stream consumer.
///
/// The core emits one record per transcript mutation and lifecycle
/// transition; durability, querying, and replay are the collaborator's
/// responsibility. Implementations must not block the driving task.
pub trait TranscriptSink: Send + Sync {
    fn append(&self, record: &TranscriptRecord);
}

/// Sink that drops every record.
#[derive(Debug, Default)]
pub struct NullSink;

impl TranscriptSink for NullSink {
    fn append(&self, _record: &TranscriptRecord) {}
}
