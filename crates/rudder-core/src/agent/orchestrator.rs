//! The agent loop — the single canonical tool-call loop.
//!
//! An `Agent` owns one transcript and drives it: sample the model, fan
//! response items out to handlers, execute tool calls through the approval
//! gateway, append outputs, repeat. Handlers steer the loop through
//! `on_before_sample`; everything else they do is observation.
//!
//! ```text
//!  poll handlers ──► sample model ──► execute tools ──► append outputs ─┐
//!        ▲                                                             │
//!        └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop terminates when a response carries no tool calls and no handler
//! asks to continue.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalGateway;
use crate::error::AgentError;
use crate::events::{
    GroundTruthUsage, NullSink, RecordKind, ResponseEvent, ToolCallOutput, TranscriptItem,
    TranscriptRecord, TranscriptSink,
};
use crate::model::{ModelClient, ModelRequest, ResponseItem, ToolChoice};
use crate::provider::ToolResult;

use super::compaction::{self, CompactionResult};
use super::executor::ToolExecutor;
use super::handler::Handler;
use super::loop_control::{LoopDecision, ToolPolicy};

const DEFAULT_MAX_PARALLEL_TOOLS: usize = 4;
const DEFAULT_KEEP_RECENT_TURNS: usize = 16;

/// Lifecycle state of an agent, re-armed on each `run()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Sampling,
    ExecutingTools,
    Finished,
    Aborted,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sampling => "sampling",
            Self::ExecutingTools => "executing_tools",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }
}

/// Terminal outcome of one `run()`.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub state: RunState,
    /// The most recent assistant text in the transcript, if any.
    pub text: Option<String>,
    /// Token usage accumulated across every model call in the run.
    pub usage: GroundTruthUsage,
}

/// Configuration for an agent. Constructed once, read-only afterwards.
pub struct AgentConfig {
    /// System instructions sent with every request.
    pub instructions: Option<String>,
    pub parallel_tool_calls: bool,
    pub max_parallel_tools: usize,
    pub tool_policy: ToolPolicy,
    pub reasoning_effort: Option<crate::model::ReasoningEffort>,
    /// Default tail size for externally requested compaction.
    pub keep_recent_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: None,
            parallel_tool_calls: true,
            max_parallel_tools: DEFAULT_MAX_PARALLEL_TOOLS,
            tool_policy: ToolPolicy::Auto,
            reasoning_effort: None,
            keep_recent_turns: DEFAULT_KEEP_RECENT_TURNS,
        }
    }
}

/// One agent: a transcript, a model client, a gated tool surface, and a
/// handler chain.
pub struct Agent {
    model: Arc<dyn ModelClient>,
    gateway: Arc<ApprovalGateway>,
    executor: ToolExecutor,
    handlers: Vec<Arc<dyn Handler>>,
    config: AgentConfig,
    transcript: Vec<TranscriptItem>,
    sink: Arc<dyn TranscriptSink>,
    seq: u64,
    state: RunState,
    cancel: CancellationToken,
    run_usage: GroundTruthUsage,
}

impl Agent {
    pub fn new(model: Arc<dyn ModelClient>, gateway: ApprovalGateway, config: AgentConfig) -> Self {
        let gateway = Arc::new(gateway);
        let executor = ToolExecutor::new(Arc::clone(&gateway), config.max_parallel_tools);
        Self {
            model,
            gateway,
            executor,
            handlers: Vec::new(),
            config,
            transcript: Vec::new(),
            sink: Arc::new(NullSink),
            seq: 0,
            state: RunState::Idle,
            cancel: CancellationToken::new(),
            run_usage: GroundTruthUsage::default(),
        }
    }

    /// Append a handler. Registration order is poll order.
    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn transcript(&self) -> &[TranscriptItem] {
        &self.transcript
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Hub on which suspended approvals are resolved.
    pub fn approval_hub(&self) -> Arc<crate::approval::ApprovalHub> {
        Arc::clone(self.gateway.hub())
    }

    /// Token that cancels the in-flight model call and executing tools.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Append one item and fan it out to handlers. Does not sample.
    pub fn process_message(&mut self, item: TranscriptItem) {
        self.notify_item(&item);
        self.emit(RecordKind::ItemAppended, Some(&item));
        self.transcript.push(item);
    }

    /// Bulk-append items without handler fan-out (replay/resume path).
    pub fn insert_transcript_items(&mut self, items: Vec<TranscriptItem>) {
        for item in items {
            self.emit(RecordKind::ItemAppended, Some(&item));
            self.transcript.push(item);
        }
    }

    /// Summarize the transcript prefix, keeping the most recent items.
    ///
    /// Also invoked by the loop on a handler's `Compact` decision. Fans out
    /// `on_compaction_complete` whether or not the compaction ran.
    pub async fn compact_transcript(
        &mut self,
        keep_recent_turns: usize,
    ) -> Result<CompactionResult, AgentError> {
        let result =
            compaction::compact_transcript(self.model.as_ref(), &mut self.transcript, keep_recent_turns)
                .await?;
        if result.compacted {
            self.emit(
                RecordKind::Compacted {
                    dropped_items: result.dropped_items,
                },
                None,
            );
        }
        for handler in &self.handlers {
            handler.on_compaction_complete(result.compacted);
        }
        Ok(result)
    }

    /// Synthesize an aborted output for every tool call that has none.
    ///
    /// Restores the pairing invariant after cancellation or a model error
    /// so the transcript can be resumed.
    pub fn abort_pending_tool_calls(&mut self) {
        let satisfied: HashSet<String> = self
            .transcript
            .iter()
            .filter_map(|item| match item {
                TranscriptItem::ToolOutput(out) => Some(out.call_id.clone()),
                _ => None,
            })
            .collect();
        let orphans: Vec<String> = self
            .transcript
            .iter()
            .filter_map(|item| match item {
                TranscriptItem::ToolCall(call) if !satisfied.contains(&call.call_id) => {
                    Some(call.call_id.clone())
                }
                _ => None,
            })
            .collect();

        for call_id in orphans {
            tracing::info!(call_id = %call_id, "Synthesizing aborted tool output");
            self.gateway.hub().abandon(&call_id);
            self.process_message(TranscriptItem::ToolOutput(ToolCallOutput {
                call_id,
                result: ToolResult::error("tool execution aborted"),
            }));
        }
    }

    /// Drive the loop until a terminal state.
    pub async fn run(&mut self) -> Result<RunResult, AgentError> {
        self.state = RunState::Idle;
        self.run_usage = GroundTruthUsage::default();
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(run_id = %run_id, "Run started");
        self.emit(RecordKind::RunStarted { run_id }, None);

        let tools = match self.gateway.provider().list_tools().await {
            Ok(tools) => tools,
            Err(e) => return Err(self.fail(AgentError::Provider(e))),
        };

        let mut require_tool_once = false;
        // Set after a text-only response; the next all-NoAction poll ends
        // the run.
        let mut awaiting_finish = false;

        loop {
            if self.cancel.is_cancelled() {
                self.abort_pending_tool_calls();
                return self.finish(RunState::Aborted);
            }

            match self.poll_handlers() {
                LoopDecision::Abort => {
                    tracing::info!("Run aborted by handler");
                    return self.finish(RunState::Aborted);
                }
                LoopDecision::Compact { keep_recent_turns } => {
                    let result = match self.compact_transcript(keep_recent_turns).await {
                        Ok(result) => result,
                        Err(e) => return Err(self.fail(e)),
                    };
                    // Re-poll after a real compaction; a skipped one falls
                    // through to sampling so a retrying handler cannot spin
                    // the loop.
                    if result.compacted {
                        continue;
                    }
                }
                LoopDecision::InjectItems { items } => {
                    for item in items {
                        self.process_message(item);
                    }
                    awaiting_finish = false;
                    continue;
                }
                LoopDecision::RequireAnyTool => require_tool_once = true,
                LoopDecision::NoAction => {
                    if awaiting_finish {
                        return self.finish(RunState::Finished);
                    }
                }
            }

            // Sample.
            self.state = RunState::Sampling;
            if let Err(e) = self.validate_tool_pairing() {
                return Err(self.fail(e));
            }
            let request = ModelRequest {
                items: self.serialized_items(),
                instructions: self.config.instructions.clone(),
                tools: tools.clone(),
                tool_choice: if require_tool_once {
                    ToolChoice::Required
                } else {
                    self.config.tool_policy.to_tool_choice()
                },
                parallel_tool_calls: self.config.parallel_tool_calls,
                reasoning_effort: self.config.reasoning_effort,
            };
            require_tool_once = false;

            tracing::debug!(
                items = request.items.len(),
                tool_choice = ?request.tool_choice,
                "Sampling model"
            );
            let completed = tokio::select! {
                _ = self.cancel.cancelled() => None,
                response = self.model.complete(request) => Some(response),
            };
            let response = match completed {
                Some(Ok(response)) => response,
                Some(Err(e)) => {
                    self.abort_pending_tool_calls();
                    return Err(self.fail(AgentError::Model(e)));
                }
                None => {
                    self.abort_pending_tool_calls();
                    return self.finish(RunState::Aborted);
                }
            };

            self.run_usage.input_tokens += response.usage.input_tokens;
            self.run_usage.output_tokens += response.usage.output_tokens;
            self.run_usage.total_tokens += response.usage.total_tokens;
            let event = ResponseEvent {
                response_id: response.response_id.clone(),
                model: self.model.model().to_string(),
                usage: response.usage.clone(),
            };
            for handler in &self.handlers {
                handler.on_response(&event);
            }

            // Ingest response items in provider order.
            let mut known_call_ids: HashSet<String> = self
                .transcript
                .iter()
                .filter_map(|item| match item {
                    TranscriptItem::ToolCall(call) => Some(call.call_id.clone()),
                    _ => None,
                })
                .collect();
            let mut pending_calls = Vec::new();
            let mut satisfied: HashSet<String> = HashSet::new();
            let mut saw_text = false;
            let response_empty = response.items.is_empty();

            for item in response.items {
                match item {
                    ResponseItem::Assistant(text) => {
                        saw_text = true;
                        self.process_message(TranscriptItem::Assistant(text));
                    }
                    ResponseItem::Reasoning(reasoning) => {
                        self.process_message(TranscriptItem::Reasoning(reasoning));
                    }
                    ResponseItem::ToolCall(call) => {
                        if !known_call_ids.insert(call.call_id.clone()) {
                            tracing::warn!(call_id = %call.call_id, "Dropping duplicate tool call");
                            continue;
                        }
                        pending_calls.push(call.clone());
                        self.process_message(TranscriptItem::ToolCall(call));
                    }
                    ResponseItem::ToolOutput(output) => {
                        // The provider already satisfied this call inline.
                        satisfied.insert(output.call_id.clone());
                        self.process_message(TranscriptItem::ToolOutput(output));
                    }
                }
            }
            pending_calls.retain(|call| !satisfied.contains(&call.call_id));

            if pending_calls.is_empty() {
                // Only a text reply (or a fully empty response) is a finish
                // candidate. Reasoning-only and inline-output-only responses
                // go straight back to the model.
                if saw_text || response_empty {
                    awaiting_finish = true;
                } else {
                    tracing::debug!("Response carried no text or pending calls; sampling again");
                    awaiting_finish = false;
                }
                continue;
            }

            // Execute.
            self.state = RunState::ExecutingTools;
            let batch = self
                .executor
                .execute_batch(&pending_calls, self.config.parallel_tool_calls, &self.cancel)
                .await;
            let abort_run = batch.abort_run;
            for output in batch.outputs {
                self.process_message(TranscriptItem::ToolOutput(output));
            }
            if abort_run || self.cancel.is_cancelled() {
                self.abort_pending_tool_calls();
                return self.finish(RunState::Aborted);
            }
            awaiting_finish = false;
        }
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn poll_handlers(&self) -> LoopDecision {
        for handler in &self.handlers {
            let decision = handler.on_before_sample();
            if !decision.is_no_action() {
                return decision;
            }
        }
        LoopDecision::NoAction
    }

    fn notify_item(&self, item: &TranscriptItem) {
        for handler in &self.handlers {
            match item {
                TranscriptItem::User(text) => handler.on_user_text(text),
                TranscriptItem::Assistant(text) => handler.on_assistant_text(text),
                TranscriptItem::System(text) => handler.on_system_text(text),
                TranscriptItem::Reasoning(reasoning) => handler.on_reasoning(reasoning),
                TranscriptItem::ToolCall(call) => handler.on_tool_call(call),
                TranscriptItem::ToolOutput(output) => handler.on_tool_result(output),
            }
        }
    }

    /// Every `ToolCall` except a trailing one must already have its output.
    fn validate_tool_pairing(&self) -> Result<(), AgentError> {
        let satisfied: HashSet<&str> = self
            .transcript
            .iter()
            .filter_map(|item| match item {
                TranscriptItem::ToolOutput(out) => Some(out.call_id.as_str()),
                _ => None,
            })
            .collect();
        let last = self.transcript.len().saturating_sub(1);
        for (idx, item) in self.transcript.iter().enumerate() {
            if let TranscriptItem::ToolCall(call) = item {
                if idx != last && !satisfied.contains(call.call_id.as_str()) {
                    return Err(AgentError::OrphanedToolCall {
                        call_id: call.call_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Transcript as sent to the model. Reasoning items from before the
    /// latest user turn belong to a dead response chain and are dropped.
    fn serialized_items(&self) -> Vec<TranscriptItem> {
        let last_user = self
            .transcript
            .iter()
            .rposition(|item| matches!(item, TranscriptItem::User(_)));
        self.transcript
            .iter()
            .enumerate()
            .filter(|(idx, item)| match item {
                TranscriptItem::Reasoning(_) => last_user.map_or(true, |u| *idx > u),
                _ => true,
            })
            .map(|(_, item)| item.clone())
            .collect()
    }

    fn emit(&mut self, kind: RecordKind, item: Option<&TranscriptItem>) {
        self.seq += 1;
        self.sink.append(&TranscriptRecord {
            seq: self.seq,
            at: Utc::now(),
            kind,
            item: item.cloned(),
        });
    }

    fn finish(&mut self, state: RunState) -> Result<RunResult, AgentError> {
        self.state = state;
        self.emit(
            RecordKind::RunFinished {
                state: state.as_str().to_string(),
            },
            None,
        );
        tracing::info!(state = state.as_str(), "Run finished");
        let text = self.transcript.iter().rev().find_map(|item| match item {
            TranscriptItem::Assistant(a) => Some(a.text.clone()),
            _ => None,
        });
        Ok(RunResult {
            state,
            text,
            usage: self.run_usage.clone(),
        })
    }

    fn fail(&mut self, err: AgentError) -> AgentError {
        for handler in &self.handlers {
            handler.on_error(&err);
        }
        self.state = RunState::Error;
        self.emit(
            RecordKind::RunFinished {
                state: RunState::Error.as_str().to_string(),
            },
            None,
        );
        tracing::error!(error = %err, "Run failed");
        err
    }
}
