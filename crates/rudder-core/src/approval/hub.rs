//! In-process rendezvous for pending approval decisions.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

/// External reviewer's decision for one suspended tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    Approve,
    Deny { abort: bool, reason: Option<String> },
}

/// Snapshot of one suspended call, for UIs listing pending approvals.
#[derive(Debug, Clone, Serialize)]
pub struct PendingApproval {
    pub call_id: String,
    pub tool_key: String,
    pub args_json: String,
}

struct PendingEntry {
    request: PendingApproval,
    resolver: oneshot::Sender<ReviewDecision>,
}

/// Per-`call_id` single-assignment decision slots.
///
/// `subscribe` registers a pending request and returns the receiving end;
/// `resolve` fires it at most once. A decision for an unknown `call_id` is
/// dropped — it must never resolve a different call. Unresolved requests
/// pend indefinitely; bounded waiting is the caller's concern.
#[derive(Default)]
pub struct ApprovalHub {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl ApprovalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request. The returned receiver completes when
    /// `resolve` is called for the same `call_id`.
    pub fn subscribe(&self, request: PendingApproval) -> oneshot::Receiver<ReviewDecision> {
        let (tx, rx) = oneshot::channel();
        let call_id = request.call_id.clone();
        let mut entries = self.entries.lock();
        entries.insert(
            call_id,
            PendingEntry {
                request,
                resolver: tx,
            },
        );
        rx
    }

    /// Deliver a decision. Returns false if no request with this `call_id`
    /// is pending (already resolved, abandoned, or never registered).
    pub fn resolve(&self, call_id: &str, decision: ReviewDecision) -> bool {
        let entry = self.entries.lock().remove(call_id);
        match entry {
            Some(entry) => entry.resolver.send(decision).is_ok(),
            None => false,
        }
    }

    /// Drop a pending request without resolving it (e.g. run cancellation).
    pub fn abandon(&self, call_id: &str) {
        self.entries.lock().remove(call_id);
    }

    /// Snapshot of currently pending requests.
    pub fn pending(&self) -> Vec<PendingApproval> {
        self.entries
            .lock()
            .values()
            .map(|e| e.request.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }
}
