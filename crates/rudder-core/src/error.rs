//! Crate-level error taxonomy.

use thiserror::Error;

use crate::model::ModelError;
use crate::provider::ProviderError;

/// Failures that escape `Agent::run` or `Agent::compact_transcript`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The transcript was about to be serialized with a `ToolCall` that has
    /// no paired `ToolCallOutput`.
    #[error("tool call '{call_id}' has no output in the transcript")]
    OrphanedToolCall { call_id: String },

    /// Compaction was requested while the transcript tail is a reasoning
    /// block. The built-in compaction handler never asks for this; an
    /// external caller did.
    #[error("cannot compact while the transcript ends with a reasoning item")]
    CompactionAfterReasoning,

    #[error("transcript summarization failed: {0}")]
    Summarization(String),
}
