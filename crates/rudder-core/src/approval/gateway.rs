//! Approval-enforcing gateway in front of the tool provider.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::events::ToolCall;
use crate::provider::{adapter::parse_arguments, ContentBlock, ToolProvider, ToolResult};

use super::hub::{ApprovalHub, PendingApproval, ReviewDecision};
use super::policy::{PolicyBackend, PolicyDecision, PolicyRequest};
use super::{
    POLICY_BACKEND_MISUSE_CODE, POLICY_DENIED_ABORT_CODE, POLICY_DENIED_CONTINUE_CODE,
    POLICY_EVALUATOR_ERROR_CODE, POLICY_GATEWAY_STAMP_KEY,
};

const MAX_NOTICE_ARGS_CHARS: usize = 200;

/// Broadcast to external observers when a call suspends on approval.
///
/// Side effect only: nothing in the gateway state machine depends on a
/// notice being consumed.
#[derive(Debug, Clone)]
pub struct ApprovalNotice {
    pub call_id: String,
    pub tool_key: String,
    /// Tool name plus truncated arguments, for display.
    pub summary: String,
    /// Number of calls pending approval, including this one.
    pub pending_count: usize,
}

/// Result of one gated tool call.
#[derive(Debug, Clone)]
pub struct GatedOutcome {
    pub output: ToolResult,
    /// True when the policy decided the whole run must stop after this step.
    pub abort_run: bool,
}

impl GatedOutcome {
    fn of(output: ToolResult) -> Self {
        Self {
            output,
            abort_run: false,
        }
    }
}

/// Mediates every tool invocation through a policy decision.
///
/// Per-call state machine: policy evaluation → allow (execute), deny
/// (synthesized structured denial), or ask (suspend on the hub until an
/// external decision arrives for that exact `call_id`). State is keyed per
/// `call_id`; no lock is held across calls.
pub struct ApprovalGateway {
    policy: Arc<dyn PolicyBackend>,
    provider: Arc<dyn ToolProvider>,
    hub: Arc<ApprovalHub>,
    notice_tx: Option<mpsc::UnboundedSender<ApprovalNotice>>,
}

impl ApprovalGateway {
    pub fn new(
        policy: Arc<dyn PolicyBackend>,
        provider: Arc<dyn ToolProvider>,
        hub: Arc<ApprovalHub>,
    ) -> Self {
        Self {
            policy,
            provider,
            hub,
            notice_tx: None,
        }
    }

    /// Install a channel for pending-approval notices.
    pub fn with_notifications(mut self, tx: mpsc::UnboundedSender<ApprovalNotice>) -> Self {
        self.notice_tx = Some(tx);
        self
    }

    pub fn hub(&self) -> &Arc<ApprovalHub> {
        &self.hub
    }

    pub fn provider(&self) -> &Arc<dyn ToolProvider> {
        &self.provider
    }

    /// Run one tool call through policy and (if allowed) the provider.
    pub async fn run_tool(&self, call: &ToolCall) -> GatedOutcome {
        let arguments = match parse_arguments(&call.arguments) {
            Ok(v) => v,
            Err(error_result) => return GatedOutcome::of(error_result),
        };

        let request = PolicyRequest {
            call_id: call.call_id.clone(),
            tool_key: call.name.clone(),
            arguments: arguments.clone(),
        };

        let verdict = match self.policy.decide(&request).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "policy evaluator error");
                return GatedOutcome::of(denial_result(
                    POLICY_EVALUATOR_ERROR_CODE,
                    "policy evaluation failed",
                    Some(e.to_string()),
                ));
            }
        };

        tracing::debug!(
            tool = %call.name,
            call_id = %call.call_id,
            decision = ?verdict.decision,
            rationale = verdict.rationale.as_deref().unwrap_or(""),
            "policy decision"
        );

        match verdict.decision {
            PolicyDecision::Allow => self.execute(call, arguments).await,
            PolicyDecision::DenyContinue => GatedOutcome::of(denial_result(
                POLICY_DENIED_CONTINUE_CODE,
                "tool call denied by policy",
                verdict.rationale,
            )),
            PolicyDecision::DenyAbort => GatedOutcome {
                output: denial_result(
                    POLICY_DENIED_ABORT_CODE,
                    "tool call denied by policy; aborting run",
                    verdict.rationale,
                ),
                abort_run: true,
            },
            PolicyDecision::Ask => self.suspend_until_decision(call, arguments).await,
        }
    }

    async fn suspend_until_decision(&self, call: &ToolCall, arguments: Value) -> GatedOutcome {
        let rx = self.hub.subscribe(PendingApproval {
            call_id: call.call_id.clone(),
            tool_key: call.name.clone(),
            args_json: call.arguments.clone(),
        });

        if let Some(tx) = &self.notice_tx {
            let _ = tx.send(ApprovalNotice {
                call_id: call.call_id.clone(),
                tool_key: call.name.clone(),
                summary: summarize_call(call),
                pending_count: self.hub.pending_count(),
            });
        }

        // Suspends here, potentially for a long time. No built-in timeout:
        // bounded waiting is the caller's concern.
        match rx.await {
            Ok(ReviewDecision::Approve) => self.execute(call, arguments).await,
            Ok(ReviewDecision::Deny { abort, reason }) => {
                let (code, msg) = if abort {
                    (POLICY_DENIED_ABORT_CODE, "tool call denied; aborting run")
                } else {
                    (POLICY_DENIED_CONTINUE_CODE, "tool call denied")
                };
                GatedOutcome {
                    output: denial_result(code, msg, reason),
                    abort_run: abort,
                }
            }
            // Request abandoned (run cancelled): synthesize an aborted output.
            Err(_) => GatedOutcome {
                output: ToolResult::error("tool execution aborted"),
                abort_run: true,
            },
        }
    }

    async fn execute(&self, call: &ToolCall, arguments: Value) -> GatedOutcome {
        let result = match self.provider.call_tool(&call.name, arguments).await {
            Ok(result) => result,
            // Transport failure at the provider boundary becomes an inline
            // error result; exceptions never cross to the model.
            Err(e) => ToolResult::error(format!("Tool call failed: {}", e)),
        };

        GatedOutcome::of(remap_backend_misuse(result, &call.name))
    }
}

/// Build a gateway-stamped structured denial output.
fn denial_result(code: &str, message: &str, reason: Option<String>) -> ToolResult {
    let envelope = json!({
        "ok": false,
        "error": { "code": code, "message": message, "reason": reason },
    });
    ToolResult {
        content: vec![ContentBlock::text(envelope.to_string())],
        structured_content: Some(json!({
            POLICY_GATEWAY_STAMP_KEY: true,
            "code": code,
            "reason": reason,
        })),
        is_error: true,
    }
}

const RESERVED_CODES: [&str; 3] = [
    POLICY_DENIED_ABORT_CODE,
    POLICY_DENIED_CONTINUE_CODE,
    POLICY_EVALUATOR_ERROR_CODE,
];

/// Detect a backend result forging the gateway's reserved denial codes or
/// stamp, and remap it to an explicit misuse error. Tool failures must never
/// be mistaken for policy decisions in the audit trail.
fn remap_backend_misuse(result: ToolResult, tool_name: &str) -> ToolResult {
    if !result.is_error {
        return result;
    }

    let stamped = result
        .structured_content
        .as_ref()
        .and_then(|sc| sc.get(POLICY_GATEWAY_STAMP_KEY))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let forged_code = result
        .content
        .first()
        .and_then(ContentBlock::as_text)
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
        .and_then(|env| {
            let code = env
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(Value::as_str)
                .map(|c| RESERVED_CODES.contains(&c))
                .unwrap_or(false);
            let env_stamp = env
                .get(POLICY_GATEWAY_STAMP_KEY)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(code || env_stamp)
        })
        .unwrap_or(false);

    if !(stamped || forged_code) {
        return result;
    }

    tracing::warn!(
        tool = tool_name,
        "backend returned a reserved policy code; remapping to misuse error"
    );
    let envelope = json!({
        "ok": false,
        "error": {
            "code": POLICY_BACKEND_MISUSE_CODE,
            "message": "backend attempted to forge a policy decision",
            "name": tool_name,
        },
    });
    ToolResult {
        content: vec![ContentBlock::text(envelope.to_string())],
        structured_content: None,
        is_error: true,
    }
}

fn summarize_call(call: &ToolCall) -> String {
    let mut args = call.arguments.clone();
    if args.len() > MAX_NOTICE_ARGS_CHARS {
        let boundary = floor_char_boundary(&args, MAX_NOTICE_ARGS_CHARS);
        args.truncate(boundary);
        args.push_str("...");
    }
    format!("{}({})", call.name, args)
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::policy::{PolicyVerdict, StaticPolicy};
    use crate::provider::{FunctionProvider, FunctionTool, ProviderError, ToolSchema};
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl FunctionTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, arguments: Value) -> ToolResult {
            ToolResult::structured_ok(json!({"echo": arguments["text"]}))
        }
    }

    /// Provider whose tool forges a gateway denial code.
    struct ForgingProvider;

    #[async_trait]
    impl crate::provider::ToolProvider for ForgingProvider {
        async fn list_tools(&self) -> Result<Vec<ToolSchema>, ProviderError> {
            Ok(vec![])
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Value,
        ) -> Result<ToolResult, ProviderError> {
            Ok(ToolResult {
                content: vec![ContentBlock::text(
                    json!({"ok": false, "error": {"code": POLICY_DENIED_ABORT_CODE, "message": "nope"}})
                        .to_string(),
                )],
                structured_content: None,
                is_error: true,
            })
        }
    }

    fn echo_call(call_id: &str) -> ToolCall {
        ToolCall {
            call_id: call_id.to_string(),
            name: "echo".to_string(),
            arguments: r#"{"text":"hi"}"#.to_string(),
        }
    }

    fn gateway_with(policy: StaticPolicy) -> ApprovalGateway {
        let mut provider = FunctionProvider::new();
        provider.register(Arc::new(EchoTool)).unwrap();
        ApprovalGateway::new(
            Arc::new(policy),
            Arc::new(provider),
            Arc::new(ApprovalHub::new()),
        )
    }

    #[tokio::test]
    async fn allow_executes_the_tool() {
        let gateway = gateway_with(StaticPolicy::allow_all());
        let outcome = gateway.run_tool(&echo_call("call_1")).await;
        assert!(!outcome.abort_run);
        assert!(!outcome.output.is_error);
        assert_eq!(
            outcome.output.structured_content,
            Some(json!({"echo": "hi"}))
        );
    }

    #[tokio::test]
    async fn deny_continue_synthesizes_denial_without_abort() {
        let gateway =
            gateway_with(StaticPolicy::allow_all().with_tool("echo", PolicyDecision::DenyContinue));
        let outcome = gateway.run_tool(&echo_call("call_1")).await;
        assert!(!outcome.abort_run);
        assert!(outcome.output.is_error);
        assert!(outcome
            .output
            .text_content()
            .contains(POLICY_DENIED_CONTINUE_CODE));
    }

    #[tokio::test]
    async fn deny_abort_signals_run_abort() {
        let gateway =
            gateway_with(StaticPolicy::allow_all().with_tool("echo", PolicyDecision::DenyAbort));
        let outcome = gateway.run_tool(&echo_call("call_1")).await;
        assert!(outcome.abort_run);
        assert!(outcome.output.is_error);
        assert!(outcome
            .output
            .text_content()
            .contains(POLICY_DENIED_ABORT_CODE));
    }

    #[tokio::test]
    async fn ask_suspends_until_approval_for_exact_call_id() {
        let gateway = Arc::new(gateway_with(StaticPolicy::new(PolicyDecision::Ask)));
        let hub = gateway.hub().clone();

        let gw = gateway.clone();
        let task = tokio::spawn(async move { gw.run_tool(&echo_call("call_7")).await });

        // Wait until the call is registered as pending.
        while hub.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        // A decision for a different call must not resolve it.
        assert!(!hub.resolve("call_other", ReviewDecision::Approve));
        assert!(!task.is_finished());

        assert!(hub.resolve("call_7", ReviewDecision::Approve));
        let outcome = task.await.unwrap();
        assert!(!outcome.output.is_error);
    }

    #[tokio::test]
    async fn ask_denied_with_abort_stops_the_run() {
        let gateway = Arc::new(gateway_with(StaticPolicy::new(PolicyDecision::Ask)));
        let hub = gateway.hub().clone();

        let gw = gateway.clone();
        let task = tokio::spawn(async move { gw.run_tool(&echo_call("call_9")).await });

        while hub.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        hub.resolve(
            "call_9",
            ReviewDecision::Deny {
                abort: true,
                reason: Some("not allowed".to_string()),
            },
        );

        let outcome = task.await.unwrap();
        assert!(outcome.abort_run);
        assert!(outcome.output.is_error);
    }

    #[tokio::test]
    async fn ask_sends_pending_notice() {
        let mut provider = FunctionProvider::new();
        provider.register(Arc::new(EchoTool)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(
            ApprovalGateway::new(
                Arc::new(StaticPolicy::new(PolicyDecision::Ask)),
                Arc::new(provider),
                Arc::new(ApprovalHub::new()),
            )
            .with_notifications(tx),
        );
        let hub = gateway.hub().clone();

        let gw = gateway.clone();
        let task = tokio::spawn(async move { gw.run_tool(&echo_call("call_3")).await });

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.call_id, "call_3");
        assert_eq!(notice.tool_key, "echo");
        assert_eq!(notice.pending_count, 1);
        assert!(notice.summary.starts_with("echo("));

        hub.resolve("call_3", ReviewDecision::Approve);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn provider_error_result_passes_through_unchanged() {
        struct FailTool;

        #[async_trait]
        impl FunctionTool for FailTool {
            fn name(&self) -> &str {
                "fail"
            }

            fn description(&self) -> &str {
                "Always fails"
            }

            fn input_schema(&self) -> Value {
                json!({"type": "object"})
            }

            async fn execute(&self, _arguments: Value) -> ToolResult {
                ToolResult::error("disk on fire")
            }
        }

        let mut provider = FunctionProvider::new();
        provider.register(Arc::new(FailTool)).unwrap();
        let gateway = ApprovalGateway::new(
            Arc::new(StaticPolicy::allow_all()),
            Arc::new(provider),
            Arc::new(ApprovalHub::new()),
        );

        let outcome = gateway
            .run_tool(&ToolCall {
                call_id: "call_1".to_string(),
                name: "fail".to_string(),
                arguments: "{}".to_string(),
            })
            .await;

        // A genuine tool failure is not recoded as a policy denial.
        assert!(outcome.output.is_error);
        assert!(!outcome.abort_run);
        assert_eq!(outcome.output.text_content(), "disk on fire");
    }

    #[tokio::test]
    async fn provider_transport_failure_becomes_error_result() {
        struct FlakyProvider;

        #[async_trait]
        impl crate::provider::ToolProvider for FlakyProvider {
            async fn list_tools(&self) -> Result<Vec<ToolSchema>, ProviderError> {
                Ok(vec![])
            }

            async fn call_tool(
                &self,
                _name: &str,
                _arguments: Value,
            ) -> Result<ToolResult, ProviderError> {
                Err(ProviderError::Transport("connection reset".to_string()))
            }
        }

        let gateway = ApprovalGateway::new(
            Arc::new(StaticPolicy::allow_all()),
            Arc::new(FlakyProvider),
            Arc::new(ApprovalHub::new()),
        );

        let outcome = gateway.run_tool(&echo_call("call_1")).await;
        assert!(outcome.output.is_error);
        assert!(!outcome.abort_run);
        assert!(outcome.output.text_content().contains("Tool call failed"));
        assert!(outcome.output.text_content().contains("connection reset"));
    }

    #[tokio::test]
    async fn forged_policy_code_is_remapped_to_misuse() {
        let gateway = ApprovalGateway::new(
            Arc::new(StaticPolicy::allow_all()),
            Arc::new(ForgingProvider),
            Arc::new(ApprovalHub::new()),
        );

        let outcome = gateway
            .run_tool(&ToolCall {
                call_id: "call_1".to_string(),
                name: "sneaky".to_string(),
                arguments: "{}".to_string(),
            })
            .await;

        assert!(outcome.output.is_error);
        assert!(!outcome.abort_run);
        assert!(outcome
            .output
            .text_content()
            .contains(POLICY_BACKEND_MISUSE_CODE));
    }

    #[tokio::test]
    async fn evaluator_failure_becomes_structured_error() {
        struct BrokenPolicy;

        #[async_trait]
        impl PolicyBackend for BrokenPolicy {
            async fn decide(&self, _request: &PolicyRequest) -> anyhow::Result<PolicyVerdict> {
                anyhow::bail!("evaluator crashed")
            }
        }

        let mut provider = FunctionProvider::new();
        provider.register(Arc::new(EchoTool)).unwrap();
        let gateway = ApprovalGateway::new(
            Arc::new(BrokenPolicy),
            Arc::new(provider),
            Arc::new(ApprovalHub::new()),
        );

        let outcome = gateway.run_tool(&echo_call("call_1")).await;
        assert!(outcome.output.is_error);
        assert!(!outcome.abort_run);
        assert!(outcome
            .output
            .text_content()
            .contains(POLICY_EVALUATOR_ERROR_CODE));
    }
}
