//! Handler chain: observation hooks plus loop-steering decisions.
//!
//! Handlers observe every transcript mutation and get one steering vote
//! per loop tick via `on_before_sample`. All methods have no-op defaults,
//! take `&self`, and use interior mutability for state; handlers are shared
//! with the loop task via `Arc`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::AgentError;
use crate::events::{
    AssistantText, ReasoningItem, ResponseEvent, SystemText, ToolCall, ToolCallOutput, UserText,
};

use super::loop_control::LoopDecision;

/// Observer and steering participant in the agent loop.
pub trait Handler: Send + Sync {
    /// Polled once per loop tick before the model is sampled. First
    /// non-`NoAction` decision across the chain wins.
    fn on_before_sample(&self) -> LoopDecision {
        LoopDecision::NoAction
    }

    /// One completed model call (id, model name, token usage).
    fn on_response(&self, _event: &ResponseEvent) {}

    fn on_user_text(&self, _text: &UserText) {}

    fn on_assistant_text(&self, _text: &AssistantText) {}

    fn on_system_text(&self, _text: &SystemText) {}

    fn on_tool_call(&self, _call: &ToolCall) {}

    fn on_tool_result(&self, _output: &ToolCallOutput) {}

    fn on_reasoning(&self, _item: &ReasoningItem) {}

    /// Reports whether a requested compaction actually ran.
    fn on_compaction_complete(&self, _compacted: bool) {}

    /// Called before a fatal error propagates out of `run()`.
    fn on_error(&self, _error: &AgentError) {}
}

/// Plays back a fixed decision script, then `NoAction` forever.
///
/// Test and bootstrap utility: drive the loop through a known sequence of
/// decisions without writing a bespoke handler.
pub struct SequenceHandler {
    script: Mutex<VecDeque<LoopDecision>>,
}

impl SequenceHandler {
    pub fn new(script: Vec<LoopDecision>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

impl Handler for SequenceHandler {
    fn on_before_sample(&self) -> LoopDecision {
        self.script
            .lock()
            .pop_front()
            .unwrap_or(LoopDecision::NoAction)
    }
}

/// Aborts the run when the predicate fires.
pub struct AbortIf<F>
where
    F: Fn() -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> AbortIf<F>
where
    F: Fn() -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> Handler for AbortIf<F>
where
    F: Fn() -> bool + Send + Sync,
{
    fn on_before_sample(&self) -> LoopDecision {
        if (self.predicate)() {
            LoopDecision::Abort
        } else {
            LoopDecision::NoAction
        }
    }
}

/// Stops the run once the assistant has produced a text reply.
///
/// Interactive "one reply per run" mode: tool calls still execute, but the
/// first text message ends the run at the next tick.
#[derive(Default)]
pub struct FinishOnText {
    saw_text: AtomicBool,
}

impl FinishOnText {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Handler for FinishOnText {
    fn on_before_sample(&self) -> LoopDecision {
        if self.saw_text.load(Ordering::Acquire) {
            LoopDecision::Abort
        } else {
            LoopDecision::NoAction
        }
    }

    fn on_assistant_text(&self, _text: &AssistantText) {
        self.saw_text.store(true, Ordering::Release);
    }
}

/// Like [`FinishOnText`], but keeps the reply text for retrieval.
#[derive(Default)]
pub struct CaptureText {
    captured: Mutex<Option<String>>,
}

impl CaptureText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the captured text, leaving `None` behind.
    pub fn take(&self) -> Option<String> {
        self.captured.lock().take()
    }
}

impl Handler for CaptureText {
    fn on_before_sample(&self) -> LoopDecision {
        if self.captured.lock().is_some() {
            LoopDecision::Abort
        } else {
            LoopDecision::NoAction
        }
    }

    fn on_assistant_text(&self, text: &AssistantText) {
        *self.captured.lock() = Some(text.text.clone());
    }
}

/// Injects a reminder user message when the model replies with text
/// instead of calling a tool.
pub struct RedirectOnText {
    reminder: String,
    pending: AtomicBool,
}

impl RedirectOnText {
    pub fn new(reminder: impl Into<String>) -> Self {
        Self {
            reminder: reminder.into(),
            pending: AtomicBool::new(false),
        }
    }
}

impl Handler for RedirectOnText {
    fn on_before_sample(&self) -> LoopDecision {
        if self.pending.swap(false, Ordering::AcqRel) {
            LoopDecision::InjectItems {
                items: vec![crate::events::TranscriptItem::user(self.reminder.clone())],
            }
        } else {
            LoopDecision::NoAction
        }
    }

    fn on_assistant_text(&self, _text: &AssistantText) {
        self.pending.store(true, Ordering::Release);
    }

    fn on_tool_call(&self, _call: &ToolCall) {
        // A tool call in the same response means the model is on track.
        self.pending.store(false, Ordering::Release);
    }
}
