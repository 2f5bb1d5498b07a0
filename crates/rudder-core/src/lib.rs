//! Agent tool-call loop with a policy-mediated approval gateway.
//!
//! The crate is organized around five seams:
//!
//! - [`events`] — the transcript item model and the persistence record
//!   stream ([`events::TranscriptSink`]).
//! - [`model`] — the opaque LLM completion boundary ([`model::ModelClient`]).
//! - [`provider`] — the tool surface ([`provider::ToolProvider`]) with
//!   in-process and composite implementations.
//! - [`approval`] — the policy gateway every tool call passes through,
//!   including suspension on human approval.
//! - [`agent`] — the loop itself: [`agent::Agent`] plus the handler chain
//!   that observes and steers it.

pub mod agent;
pub mod approval;
pub mod error;
pub mod events;
pub mod model;
pub mod provider;

pub use agent::{Agent, AgentConfig, Handler, LoopDecision, RunResult, RunState, ToolPolicy};
pub use error::AgentError;
