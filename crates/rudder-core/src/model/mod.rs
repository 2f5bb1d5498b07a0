//! Model client boundary.
//!
//! The loop treats the LLM completion endpoint as a single opaque RPC:
//! request = serialized transcript + generation parameters, response =
//! ordered output items + usage counters. Retry/backoff is a caller
//! concern, not implemented here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::{AssistantText, GroundTruthUsage, ReasoningItem, ToolCall, ToolCallOutput, TranscriptItem};
use crate::provider::ToolSchema;

/// Provider/transport failure surfaced out of `Agent::run`.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model API error: {0}")]
    Api(String),
}

/// Tool-choice constraint sent with a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model may answer with text or call any tool.
    Auto,
    /// Model must invoke some tool.
    Required,
    /// Tool calls are forbidden.
    None,
    /// Model must invoke this specific tool.
    Function { name: String },
}

/// Requested reasoning effort for models that support extended thinking.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

/// One completion request: the full transcript plus generation parameters.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub items: Vec<TranscriptItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub tools: Vec<ToolSchema>,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// One item in a model response, in provider order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Assistant(AssistantText),
    Reasoning(ReasoningItem),
    ToolCall(ToolCall),
    /// Inline output the provider already produced for one of its own tool
    /// calls; the loop must not dispatch that call again.
    ToolOutput(ToolCallOutput),
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub response_id: String,
    pub items: Vec<ResponseItem>,
    pub usage: GroundTruthUsage,
}

/// Opaque LLM completion endpoint.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model name used for this client, included in handler events.
    fn model(&self) -> &str;

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}
