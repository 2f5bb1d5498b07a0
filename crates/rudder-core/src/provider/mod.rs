//! Tool provider abstraction.
//!
//! A `ToolProvider` is an opaque capability source exposing `list_tools` /
//! `call_tool`. Heterogeneous backends (in-process function tables, remote
//! services) all present the same contract; errors are communicated via
//! `ToolResult { is_error: true }`, never as panics or transport errors
//! leaking through the call site.

pub mod adapter;
pub mod result;

pub use adapter::{CompositeProvider, FunctionProvider, FunctionTool, ToolProvider};
pub use result::{ContentBlock, ToolResult};

use thiserror::Error;

/// Errors raised at the provider boundary.
///
/// Tool *execution* failures never take this path; they are reported inline
/// as `ToolResult { is_error: true }` so the model can react to them.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Two providers in a composite expose the same tool name. Raised at
    /// composition time, not at call time.
    #[error("duplicate tool name '{name}' across providers")]
    DuplicateTool { name: String },

    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// `ToolResult::structured` was called on an error result.
    #[error("cannot extract structured content from an error result")]
    ErrorResult,

    /// `ToolResult::structured` was called on a result with no structured
    /// payload.
    #[error("tool result has no structured content")]
    NoStructuredContent,

    #[error("structured content does not match the expected type: {0}")]
    StructuredShape(#[from] serde_json::Error),

    /// Transport or backend failure (remote provider unreachable, etc.).
    #[error("provider transport error: {0}")]
    Transport(String),
}

/// Tool schema advertised to the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}
