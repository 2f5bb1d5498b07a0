//! Transcript compaction: summarize the old prefix, keep the recent tail.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::AgentError;
use crate::events::{
    AssistantText, ReasoningItem, ResponseEvent, SystemText, ToolCall, ToolCallOutput,
    TranscriptItem, UserText,
};
use crate::model::{ModelClient, ModelRequest, ResponseItem, ToolChoice};

use super::handler::Handler;
use super::loop_control::LoopDecision;

/// Compacting fewer items than this is not worth a model call.
const MIN_DROPPED_PREFIX_ITEMS: usize = 3;

const SUMMARIZATION_PROMPT: &str = "Summarize the conversation so far for your own future reference. \
     Capture the user's goals, decisions made, work completed, tool outcomes \
     that still matter, and anything unresolved. Be concise; omit pleasantries.";

/// Outcome of one compaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionResult {
    pub compacted: bool,
    /// Items removed from the transcript (the summarized prefix).
    pub dropped_items: usize,
}

impl CompactionResult {
    fn skipped() -> Self {
        Self {
            compacted: false,
            dropped_items: 0,
        }
    }
}

/// Replace the transcript prefix with a single summary turn.
///
/// Keeps the last `keep_recent_turns` items verbatim. The split never lands
/// between a `ToolCall` and its output; the boundary moves back so the pair
/// stays in the kept tail. Fails closed (`compacted: false`, transcript
/// untouched) when the dropped prefix would be too small to bother.
pub async fn compact_transcript(
    model: &dyn ModelClient,
    items: &mut Vec<TranscriptItem>,
    keep_recent_turns: usize,
) -> Result<CompactionResult, AgentError> {
    if matches!(items.last(), Some(TranscriptItem::Reasoning(_))) {
        return Err(AgentError::CompactionAfterReasoning);
    }

    let mut split = items.len().saturating_sub(keep_recent_turns);
    while split > 0 && !split_keeps_pairs_together(items, split) {
        split -= 1;
    }

    if split < MIN_DROPPED_PREFIX_ITEMS {
        tracing::debug!(
            transcript_len = items.len(),
            keep_recent_turns,
            "Compaction skipped: prefix too small"
        );
        return Ok(CompactionResult::skipped());
    }

    let summary = summarize_prefix(model, &items[..split]).await?;

    let tail = items.split_off(split);
    items.clear();
    items.push(TranscriptItem::user(format!(
        "Summary of the conversation so far:\n\n{}",
        summary
    )));
    items.extend(tail);

    tracing::info!(dropped_items = split, "Transcript compacted");
    Ok(CompactionResult {
        compacted: true,
        dropped_items: split,
    })
}

/// A split is valid only if no kept `ToolCallOutput` refers to a `ToolCall`
/// that would fall into the summarized prefix. Parallel batches interleave
/// as `call, call, output, output`, so checking the item at the boundary
/// alone is not enough.
fn split_keeps_pairs_together(items: &[TranscriptItem], split: usize) -> bool {
    items[split..].iter().all(|item| match item {
        TranscriptItem::ToolOutput(output) => items[..split].iter().all(|prior| {
            !matches!(prior, TranscriptItem::ToolCall(call) if call.call_id == output.call_id)
        }),
        _ => true,
    })
}

async fn summarize_prefix(
    model: &dyn ModelClient,
    prefix: &[TranscriptItem],
) -> Result<String, AgentError> {
    let mut request_items = prefix.to_vec();
    request_items.push(TranscriptItem::user(SUMMARIZATION_PROMPT));

    let request = ModelRequest {
        items: request_items,
        instructions: None,
        tools: Vec::new(),
        tool_choice: ToolChoice::None,
        parallel_tool_calls: false,
        reasoning_effort: None,
    };

    let response = model
        .complete(request)
        .await
        .map_err(|e| AgentError::Summarization(e.to_string()))?;

    let summary: Vec<String> = response
        .items
        .into_iter()
        .filter_map(|item| match item {
            ResponseItem::Assistant(AssistantText { text }) => Some(text),
            _ => None,
        })
        .collect();

    if summary.is_empty() {
        return Err(AgentError::Summarization(
            "model returned no summary text".to_string(),
        ));
    }
    Ok(summary.join("\n"))
}

/// Requests compaction once cumulative token usage crosses a threshold.
///
/// Never fires while the last observed transcript item is a reasoning
/// block; compacting there would sever the reasoning from the response
/// chain that owns it. The counter resets when a compaction actually ran
/// and is retried otherwise.
pub struct CompactionHandler {
    threshold_tokens: usize,
    keep_recent_turns: usize,
    total_tokens: AtomicUsize,
    tail_is_reasoning: AtomicBool,
}

impl CompactionHandler {
    pub fn new(threshold_tokens: usize, keep_recent_turns: usize) -> Self {
        Self {
            threshold_tokens,
            keep_recent_turns,
            total_tokens: AtomicUsize::new(0),
            tail_is_reasoning: AtomicBool::new(false),
        }
    }
}

impl Handler for CompactionHandler {
    fn on_before_sample(&self) -> LoopDecision {
        let total = self.total_tokens.load(Ordering::Acquire);
        if total < self.threshold_tokens || self.tail_is_reasoning.load(Ordering::Acquire) {
            return LoopDecision::NoAction;
        }
        tracing::info!(
            total_tokens = total,
            threshold = self.threshold_tokens,
            "Requesting transcript compaction"
        );
        LoopDecision::Compact {
            keep_recent_turns: self.keep_recent_turns,
        }
    }

    fn on_response(&self, event: &ResponseEvent) {
        self.total_tokens
            .fetch_add(event.usage.total_tokens, Ordering::AcqRel);
    }

    fn on_user_text(&self, _text: &UserText) {
        self.tail_is_reasoning.store(false, Ordering::Release);
    }

    fn on_assistant_text(&self, _text: &AssistantText) {
        self.tail_is_reasoning.store(false, Ordering::Release);
    }

    fn on_system_text(&self, _text: &SystemText) {
        self.tail_is_reasoning.store(false, Ordering::Release);
    }

    fn on_tool_call(&self, _call: &ToolCall) {
        self.tail_is_reasoning.store(false, Ordering::Release);
    }

    fn on_tool_result(&self, _output: &ToolCallOutput) {
        self.tail_is_reasoning.store(false, Ordering::Release);
    }

    fn on_reasoning(&self, _item: &ReasoningItem) {
        self.tail_is_reasoning.store(true, Ordering::Release);
    }

    fn on_compaction_complete(&self, compacted: bool) {
        if compacted {
            self.total_tokens.store(0, Ordering::Release);
        }
        // A skipped compaction keeps the counter; the request retries once
        // the transcript grows enough.
    }
}
