//! Repeated tool failure detection.
//!
//! Tracks tool error signatures across loop ticks and aborts the run when
//! the same tool keeps failing the same way, preventing infinite retry
//! loops.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

use crate::events::{ToolCall, ToolCallOutput};

use super::handler::Handler;
use super::loop_control::LoopDecision;

/// Default threshold: abort after this many identical failures.
pub const REPEATED_FAILURE_THRESHOLD: usize = 2;

#[derive(Default)]
struct FailureState {
    /// signature → identical-failure count
    counters: HashMap<String, usize>,
    /// call_id → (tool name, argument hash), for pairing results to calls
    call_meta: HashMap<String, (String, u64)>,
    tripped: Option<String>,
}

/// Aborts the run once the same tool fails with the same error fingerprint
/// `threshold` times. Any success clears all counters (the agent recovered).
pub struct RepeatedFailureHandler {
    threshold: usize,
    state: Mutex<FailureState>,
}

impl Default for RepeatedFailureHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatedFailureHandler {
    pub fn new() -> Self {
        Self::with_threshold(REPEATED_FAILURE_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            state: Mutex::new(FailureState::default()),
        }
    }
}

impl Handler for RepeatedFailureHandler {
    fn on_before_sample(&self) -> LoopDecision {
        let state = self.state.lock();
        match &state.tripped {
            Some(diagnostic) => {
                tracing::warn!(
                    diagnostic = %diagnostic,
                    "Fail-fast: stopping repeated tool failure loop"
                );
                LoopDecision::Abort
            }
            None => LoopDecision::NoAction,
        }
    }

    fn on_tool_call(&self, call: &ToolCall) {
        let mut state = self.state.lock();
        state.call_meta.insert(
            call.call_id.clone(),
            (call.name.clone(), hash_arguments(&call.arguments)),
        );
    }

    fn on_tool_result(&self, output: &ToolCallOutput) {
        let mut state = self.state.lock();

        if !output.result.is_error {
            state.counters.clear();
            return;
        }

        let Some((tool_name, args_hash)) = state.call_meta.get(&output.call_id).cloned() else {
            return;
        };

        let output_str = output.result.text_content();
        let (error_code, error_fingerprint) = extract_error_signature(&output_str);
        let signature = format!(
            "{}|{}|{}|{}",
            tool_name, error_code, error_fingerprint, args_hash
        );
        let count = state
            .counters
            .entry(signature)
            .and_modify(|c| *c += 1)
            .or_insert(1);

        if *count >= self.threshold {
            state.tripped = Some(format!(
                "Stopping tool loop: '{}' failed {} times with the same '{}' error. A different strategy is required.",
                tool_name, *count, error_code
            ));
        }
    }
}

fn hash_arguments(arguments: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    arguments.hash(&mut hasher);
    hasher.finish()
}

fn extract_error_signature(output_str: &str) -> (String, String) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(output_str) {
        if let Some(error) = value.get("error") {
            if let Some(error_obj) = error.as_object() {
                let message = error_obj
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let code = error_obj
                    .get("code")
                    .and_then(|v| v.as_str())
                    .map(|c| c.to_ascii_lowercase())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| classify_error_code(message).to_string());
                return (code, normalize_error_fingerprint(message));
            }

            if let Some(message) = error.as_str() {
                return (
                    classify_error_code(message).to_string(),
                    normalize_error_fingerprint(message),
                );
            }
        }
    }

    (
        classify_error_code(output_str).to_string(),
        normalize_error_fingerprint(output_str),
    )
}

fn classify_error_code(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    if lower.contains("invalid parameters")
        || lower.contains("invalid json")
        || lower.contains("missing field")
        || lower.contains("unknown field")
    {
        "invalid_parameters"
    } else if lower.contains("unknown tool") {
        "unknown_tool"
    } else if lower.contains("timed out") || lower.contains("timeout") {
        "timeout"
    } else if lower.contains("denied") {
        "permission_denied"
    } else {
        "tool_error"
    }
}

fn normalize_error_fingerprint(message: &str) -> String {
    let mut compact = String::new();
    for part in message.split_whitespace() {
        if !compact.is_empty() {
            compact.push(' ');
        }
        compact.push_str(part);
    }

    if compact.is_empty() {
        return "unknown".to_string();
    }

    compact.make_ascii_lowercase();
    compact.chars().take(160).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ToolResult;

    fn call(call_id: &str) -> ToolCall {
        ToolCall {
            call_id: call_id.to_string(),
            name: "glob".to_string(),
            arguments: r#"{"pattern":"**/*"}"#.to_string(),
        }
    }

    fn failure(call_id: &str, message: &str) -> ToolCallOutput {
        ToolCallOutput {
            call_id: call_id.to_string(),
            result: ToolResult::error(message),
        }
    }

    #[test]
    fn trips_at_threshold() {
        let handler = RepeatedFailureHandler::new();
        handler.on_tool_call(&call("call_1"));
        handler.on_tool_result(&failure("call_1", "Invalid parameters: missing field `pattern`"));
        assert_eq!(handler.on_before_sample(), LoopDecision::NoAction);

        handler.on_tool_call(&call("call_2"));
        handler.on_tool_result(&failure("call_2", "Invalid parameters: missing field `pattern`"));
        assert_eq!(handler.on_before_sample(), LoopDecision::Abort);
    }

    #[test]
    fn success_clears_counters() {
        let handler = RepeatedFailureHandler::new();
        handler.on_tool_call(&call("call_1"));
        handler.on_tool_result(&failure("call_1", "boom"));

        handler.on_tool_call(&call("call_2"));
        handler.on_tool_result(&ToolCallOutput {
            call_id: "call_2".to_string(),
            result: ToolResult::text("ok"),
        });

        handler.on_tool_call(&call("call_3"));
        handler.on_tool_result(&failure("call_3", "boom"));
        assert_eq!(handler.on_before_sample(), LoopDecision::NoAction);
    }

    #[test]
    fn different_errors_do_not_trip() {
        let handler = RepeatedFailureHandler::new();
        handler.on_tool_call(&call("call_1"));
        handler.on_tool_result(&failure("call_1", "operation timed out after 30s"));

        handler.on_tool_call(&call("call_2"));
        handler.on_tool_result(&failure("call_2", "unknown tool: globb"));

        assert_eq!(handler.on_before_sample(), LoopDecision::NoAction);
    }

    #[test]
    fn structured_envelope_code_is_used() {
        let handler = RepeatedFailureHandler::new();
        let envelope = r#"{"ok":false,"error":{"code":"policy_denied_continue","message":"denied"}}"#;

        handler.on_tool_call(&call("call_1"));
        handler.on_tool_result(&failure("call_1", envelope));
        handler.on_tool_call(&call("call_2"));
        handler.on_tool_result(&failure("call_2", envelope));

        assert_eq!(handler.on_before_sample(), LoopDecision::Abort);
    }

    #[test]
    fn classify_error_code_matches_categories() {
        assert_eq!(
            classify_error_code("Invalid parameters: missing field `x`"),
            "invalid_parameters"
        );
        assert_eq!(classify_error_code("unknown tool: foo"), "unknown_tool");
        assert_eq!(
            classify_error_code("operation timed out after 30s"),
            "timeout"
        );
        assert_eq!(classify_error_code("some random error"), "tool_error");
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(
            normalize_error_fingerprint("  A   spaced\n error\tmessage  "),
            "a spaced error message"
        );
    }
}
