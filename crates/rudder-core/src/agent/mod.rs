//! Agent loop: orchestrator, handler chain, tool execution, compaction.

pub mod compaction;
pub mod executor;
pub mod failure;
pub mod handler;
pub mod loop_control;
pub mod orchestrator;

pub use compaction::{compact_transcript, CompactionHandler, CompactionResult};
pub use failure::{RepeatedFailureHandler, REPEATED_FAILURE_THRESHOLD};
pub use handler::{AbortIf, CaptureText, FinishOnText, Handler, RedirectOnText, SequenceHandler};
pub use loop_control::{LoopDecision, ToolPolicy};
pub use orchestrator::{Agent, AgentConfig, RunResult, RunState};
