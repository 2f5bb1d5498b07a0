//! Tool result contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProviderError;

/// One block of tool output content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { mime_type: String, data: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }
}

/// Result of a tool invocation.
///
/// `is_error` distinguishes execution failure from success; a structured
/// payload is only meaningful on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a success result with a single text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            structured_content: None,
            is_error: false,
        }
    }

    /// Create a success result with a structured payload.
    pub fn structured_ok(value: Value) -> Self {
        Self {
            content: Vec::new(),
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// Create an error result with a text explanation.
    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            content: vec![ContentBlock::text(msg.to_string())],
            structured_content: None,
            is_error: true,
        }
    }

    /// Extract the strongly-typed structured payload.
    ///
    /// Fails loudly rather than defaulting: an error result or a result
    /// without structured content is a caller bug, not an empty value.
    pub fn structured<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProviderError> {
        if self.is_error {
            return Err(ProviderError::ErrorResult);
        }
        let value = self
            .structured_content
            .as_ref()
            .ok_or(ProviderError::NoStructuredContent)?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Concatenated text of all text blocks, for display and logging.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let Some(text) = block.as_text() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct Echoed {
        echo: String,
    }

    #[test]
    fn structured_extraction_succeeds() {
        let result = ToolResult::structured_ok(json!({"echo": "hi"}));
        let parsed: Echoed = result.structured().unwrap();
        assert_eq!(parsed, Echoed { echo: "hi".into() });
    }

    #[test]
    fn structured_extraction_fails_on_error_result() {
        let result = ToolResult::error("boom");
        let err = result.structured::<Echoed>().unwrap_err();
        assert!(matches!(err, ProviderError::ErrorResult));
    }

    #[test]
    fn structured_extraction_fails_without_payload() {
        let result = ToolResult::text("plain");
        let err = result.structured::<Echoed>().unwrap_err();
        assert!(matches!(err, ProviderError::NoStructuredContent));
    }

    #[test]
    fn text_content_joins_blocks() {
        let result = ToolResult {
            content: vec![ContentBlock::text("a"), ContentBlock::text("b")],
            structured_content: None,
            is_error: false,
        };
        assert_eq!(result.text_content(), "a\nb");
    }
}
