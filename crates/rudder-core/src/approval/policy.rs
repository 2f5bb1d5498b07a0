//! Policy backend boundary.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What the policy decided for one tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Execute immediately.
    Allow,
    /// Suspend until an external approval/denial arrives.
    Ask,
    /// Deny; the run continues and the model sees the denial.
    DenyContinue,
    /// Deny; the orchestrator aborts after this step.
    DenyAbort,
}

/// Input to a policy evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyRequest {
    pub call_id: String,
    /// Canonical tool name as the model requested it.
    pub tool_key: String,
    pub arguments: Value,
}

/// Decision plus an optional human-readable rationale.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyVerdict {
    pub decision: PolicyDecision,
    pub rationale: Option<String>,
}

/// External decision service consulted before every tool execution.
///
/// An `Err` from `decide` is an evaluator failure, not a denial; the
/// gateway converts it to a structured `policy_evaluator_error` output.
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    async fn decide(&self, request: &PolicyRequest) -> anyhow::Result<PolicyVerdict>;
}

/// Fixed per-tool policy table with a default decision for unlisted tools.
///
/// Constructed once at startup and read-only thereafter.
pub struct StaticPolicy {
    default: PolicyDecision,
    per_tool: HashMap<String, PolicyDecision>,
}

impl StaticPolicy {
    pub fn allow_all() -> Self {
        Self {
            default: PolicyDecision::Allow,
            per_tool: HashMap::new(),
        }
    }

    pub fn new(default: PolicyDecision) -> Self {
        Self {
            default,
            per_tool: HashMap::new(),
        }
    }

    pub fn with_tool(mut self, tool_key: impl Into<String>, decision: PolicyDecision) -> Self {
        self.per_tool.insert(tool_key.into(), decision);
        self
    }
}

#[async_trait]
impl PolicyBackend for StaticPolicy {
    async fn decide(&self, request: &PolicyRequest) -> anyhow::Result<PolicyVerdict> {
        let decision = self
            .per_tool
            .get(&request.tool_key)
            .copied()
            .unwrap_or(self.default);
        Ok(PolicyVerdict {
            decision,
            rationale: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(tool_key: &str) -> PolicyRequest {
        PolicyRequest {
            call_id: "call_1".to_string(),
            tool_key: tool_key.to_string(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn static_policy_uses_per_tool_override() {
        let policy = StaticPolicy::allow_all().with_tool("rm", PolicyDecision::DenyAbort);

        let verdict = policy.decide(&request("rm")).await.unwrap();
        assert_eq!(verdict.decision, PolicyDecision::DenyAbort);

        let verdict = policy.decide(&request("ls")).await.unwrap();
        assert_eq!(verdict.decision, PolicyDecision::Allow);
    }

    #[tokio::test]
    async fn static_policy_default_applies_to_unlisted_tools() {
        let policy = StaticPolicy::new(PolicyDecision::Ask);
        let verdict = policy.decide(&request("anything")).await.unwrap();
        assert_eq!(verdict.decision, PolicyDecision::Ask);
    }
}
