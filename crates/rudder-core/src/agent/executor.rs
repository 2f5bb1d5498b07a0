//! Tool batch execution through the approval gateway.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::approval::ApprovalGateway;
use crate::events::{ToolCall, ToolCallOutput};
use crate::provider::ToolResult;

/// Outputs for one batch of tool calls, in call order.
pub(crate) struct BatchOutcome {
    pub outputs: Vec<ToolCallOutput>,
    /// A policy decision (or cancellation) requires the run to stop.
    pub abort_run: bool,
}

/// Runs batches of tool calls through the gateway with bounded parallelism.
///
/// Every call in a batch gets exactly one output, even under cancellation
/// or an abort decision: calls that never executed receive a synthesized
/// aborted result and their pending approvals are abandoned.
pub(crate) struct ToolExecutor {
    gateway: Arc<ApprovalGateway>,
    max_parallel: usize,
}

impl ToolExecutor {
    pub fn new(gateway: Arc<ApprovalGateway>, max_parallel: usize) -> Self {
        Self {
            gateway,
            max_parallel: max_parallel.max(1),
        }
    }

    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        parallel: bool,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let concurrency = if parallel { self.max_parallel } else { 1 };
        let cancel = cancel.clone();
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut abort_run = false;

        {
            // The batch futures own their calls so the whole future stays
            // `Send` and the run can be driven from a spawned task.
            let owned: Vec<(usize, ToolCall)> = calls.iter().cloned().enumerate().collect();
            let mut stream = futures::stream::iter(owned.into_iter().map(|(idx, call)| {
                let gateway = Arc::clone(&self.gateway);
                async move { (idx, gateway.run_tool(&call).await) }
            }))
            .buffer_unordered(concurrency);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Tool batch cancelled");
                        abort_run = true;
                        break;
                    }
                    next = stream.next() => {
                        let Some((idx, outcome)) = next else { break };
                        tracing::info!(
                            tool = %calls[idx].name,
                            call_id = %calls[idx].call_id,
                            is_error = outcome.output.is_error,
                            "Tool execution completed"
                        );
                        let stop = outcome.abort_run;
                        slots[idx] = Some(outcome.output);
                        if stop {
                            abort_run = true;
                            break;
                        }
                    }
                }
            }
        }

        let outputs = calls
            .iter()
            .zip(slots)
            .map(|(call, slot)| {
                let result = match slot {
                    Some(result) => result,
                    None => {
                        // Never started or interrupted mid-flight.
                        self.gateway.hub().abandon(&call.call_id);
                        ToolResult::error("tool execution aborted")
                    }
                };
                ToolCallOutput {
                    call_id: call.call_id.clone(),
                    result,
                }
            })
            .collect();

        BatchOutcome { outputs, abort_run }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalHub, PolicyDecision, StaticPolicy};
    use crate::provider::{FunctionProvider, FunctionTool};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

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

    struct StallTool;

    #[async_trait]
    impl FunctionTool for StallTool {
        fn name(&self) -> &str {
            "stall"
        }

        fn description(&self) -> &str {
            "Sleeps forever"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, _arguments: Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ToolResult::text("unreachable")
        }
    }

    fn executor(policy: StaticPolicy) -> ToolExecutor {
        let mut provider = FunctionProvider::new();
        provider.register(Arc::new(EchoTool)).unwrap();
        provider.register(Arc::new(StallTool)).unwrap();
        let gateway = ApprovalGateway::new(
            Arc::new(policy),
            Arc::new(provider),
            Arc::new(ApprovalHub::new()),
        );
        ToolExecutor::new(Arc::new(gateway), 4)
    }

    fn call(call_id: &str, name: &str, text: &str) -> ToolCall {
        ToolCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: format!(r#"{{"text":"{}"}}"#, text),
        }
    }

    #[tokio::test]
    async fn outputs_come_back_in_call_order() {
        let executor = executor(StaticPolicy::allow_all());
        let calls = vec![
            call("call_1", "echo", "a"),
            call("call_2", "echo", "b"),
            call("call_3", "echo", "c"),
        ];

        let batch = executor
            .execute_batch(&calls, true, &CancellationToken::new())
            .await;

        assert!(!batch.abort_run);
        let ids: Vec<&str> = batch.outputs.iter().map(|o| o.call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_1", "call_2", "call_3"]);
        assert_eq!(
            batch.outputs[1].result.structured_content,
            Some(json!({"echo": "b"}))
        );
    }

    #[tokio::test]
    async fn deny_abort_synthesizes_outputs_for_unstarted_calls() {
        let executor =
            executor(StaticPolicy::allow_all().with_tool("echo", PolicyDecision::DenyAbort));
        let calls = vec![call("call_1", "echo", "a"), call("call_2", "echo", "b")];

        // Sequential so the second call has not started when the first
        // aborts the run.
        let batch = executor
            .execute_batch(&calls, false, &CancellationToken::new())
            .await;

        assert!(batch.abort_run);
        assert_eq!(batch.outputs.len(), 2);
        assert!(batch.outputs[0].result.is_error);
        assert_eq!(
            batch.outputs[1].result.text_content(),
            "tool execution aborted"
        );
    }

    #[tokio::test]
    async fn batch_execution_runs_on_a_spawned_task() {
        let executor = Arc::new(executor(StaticPolicy::allow_all()));
        let calls = vec![call("call_1", "echo", "a")];

        let task = tokio::spawn(async move {
            executor
                .execute_batch(&calls, true, &CancellationToken::new())
                .await
        });

        let batch = task.await.unwrap();
        assert_eq!(batch.outputs.len(), 1);
        assert!(!batch.outputs[0].result.is_error);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_yields_exactly_one_output_per_call() {
        let executor = executor(StaticPolicy::allow_all());
        let calls = vec![call("call_1", "stall", "a"), call("call_2", "stall", "b")];
        let cancel = CancellationToken::new();

        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });

        let batch = executor.execute_batch(&calls, true, &cancel).await;

        assert!(batch.abort_run);
        assert_eq!(batch.outputs.len(), 2);
        for output in &batch.outputs {
            assert!(output.result.is_error);
            assert_eq!(output.result.text_content(), "tool execution aborted");
        }
    }
}
