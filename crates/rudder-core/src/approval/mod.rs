//! Approval gateway: policy-mediated tool execution.
//!
//! Every tool call passes through the gateway before it reaches a
//! `ToolProvider`. The policy backend returns allow / ask / deny-continue /
//! deny-abort; "ask" suspends the call on the `ApprovalHub` until an
//! external decision arrives for that exact `call_id`.

pub mod gateway;
pub mod hub;
pub mod policy;

pub use gateway::{ApprovalGateway, ApprovalNotice, GatedOutcome};
pub use hub::{ApprovalHub, PendingApproval, ReviewDecision};
pub use policy::{PolicyBackend, PolicyDecision, PolicyRequest, PolicyVerdict, StaticPolicy};

/// Reserved error codes stamped onto gateway-synthesized denial outputs.
///
/// A tool backend returning one of these codes (or the stamp key) is trying
/// to impersonate a policy decision; the gateway remaps such results to
/// `POLICY_BACKEND_MISUSE_CODE` to keep the audit trail honest.
pub const POLICY_DENIED_CONTINUE_CODE: &str = "policy_denied_continue";
pub const POLICY_DENIED_ABORT_CODE: &str = "policy_denied_abort";
pub const POLICY_EVALUATOR_ERROR_CODE: &str = "policy_evaluator_error";
pub const POLICY_BACKEND_MISUSE_CODE: &str = "policy_backend_misuse";

/// Key marking a result as produced by the gateway itself.
pub const POLICY_GATEWAY_STAMP_KEY: &str = "policy_gateway";
