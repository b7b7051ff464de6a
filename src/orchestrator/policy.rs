//! Hook and permission chain applied to every tool use
//!
//! Order per call: `PreToolUse` hooks, then the permission gate, then (for
//! `ask`) the approver. A hook that stops execution turns the decision into
//! `deny` without consulting the gate. Exactly one permission decision is
//! recorded per call. `PostToolUse` hooks run once the tool has returned.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::hooks::{HookPipeline, HookRunOutcome};
use crate::permissions::PermissionGate;
use crate::stream::{Authorization, ExecutionSink, ToolAuthorizer};
use crate::types::hooks::{HookContext, HookEvent, HookInput};
use crate::types::permissions::{PermissionDecision, PermissionVerdict};
use crate::types::records::{HookExecutionRecord, PermissionDecisionRecord, ToolCall};
use crate::types::session::SessionStatus;

use super::approval::{ApprovalDecision, ApprovalRequest, Approver};

/// Reason recorded when `ask` cannot be resolved
pub const NO_APPROVER_REASON: &str = "approval required but no approver is configured";

/// Per-query tool policy
pub struct ToolPolicy {
    gate: PermissionGate,
    hooks: HookPipeline,
    approver: Option<Arc<dyn Approver>>,
}

impl ToolPolicy {
    /// Combine a gate, a hook pipeline and an optional approver
    #[must_use]
    pub fn new(
        gate: PermissionGate,
        hooks: HookPipeline,
        approver: Option<Arc<dyn Approver>>,
    ) -> Self {
        Self {
            gate,
            hooks,
            approver,
        }
    }

    /// Run the hooks for `event` and record every invocation through `sink`
    ///
    /// # Errors
    /// Returns error if a record cannot be written
    pub async fn run_hooks(
        &self,
        sink: &dyn ExecutionSink,
        event: HookEvent,
        payload: serde_json::Value,
        call: Option<&ToolCall>,
    ) -> Result<HookRunOutcome> {
        let input = HookInput {
            event,
            payload,
            correlation_id: call.map(|c| c.tool_use_id.clone()),
            context: HookContext {
                session_id: sink.session_id().cloned(),
                tool_name: call.map(|c| c.tool_name.clone()),
            },
        };
        let outcome = self.hooks.run(input).await;

        if let Some(session_id) = sink.session_id() {
            for invocation in &outcome.invocations {
                let record = HookExecutionRecord {
                    session_id: session_id.clone(),
                    hook_name: invocation.hook_name.clone(),
                    event: invocation.event,
                    tool_use_id: invocation.correlation_id.clone(),
                    input: invocation.input.clone(),
                    output: invocation.output.clone(),
                    error: invocation.error.clone(),
                    continued: invocation.continued,
                    duration_ms: invocation.duration_ms,
                    executed_at: invocation.executed_at,
                };
                sink.record_hook(&record).await?;
            }
        }
        Ok(outcome)
    }

    async fn resolve_ask(
        &self,
        call: &ToolCall,
        input: &serde_json::Value,
        verdict: &PermissionVerdict,
        sink: &dyn ExecutionSink,
        cancel: &CancellationToken,
    ) -> Result<(PermissionDecision, String)> {
        let Some(approver) = &self.approver else {
            return Ok((PermissionDecision::Deny, NO_APPROVER_REASON.to_string()));
        };

        let request = ApprovalRequest {
            session_id: sink.session_id().cloned(),
            tool_call_id: call.id.clone(),
            tool_use_id: call.tool_use_id.clone(),
            tool_name: call.tool_name.clone(),
            input: input.clone(),
            reason: verdict.reason.clone(),
        };

        sink.set_status(SessionStatus::Waiting).await?;
        let decision = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(EngineError::cancelled("query cancelled while waiting for approval"));
            }
            decision = approver.approve(&request) => decision,
        };
        sink.set_status(SessionStatus::Processing).await?;

        Ok(match decision {
            Ok(ApprovalDecision::Approve) => (PermissionDecision::Allow, "approved".to_string()),
            Ok(ApprovalDecision::Reject { reason }) => (PermissionDecision::Deny, reason),
            Err(e) => (PermissionDecision::Deny, format!("approval failed: {e}")),
        })
    }
}

#[async_trait]
impl ToolAuthorizer for ToolPolicy {
    async fn authorize(
        &self,
        call: &ToolCall,
        sink: &dyn ExecutionSink,
        cancel: &CancellationToken,
    ) -> Result<Authorization> {
        let hooks = self
            .run_hooks(sink, HookEvent::PreToolUse, call.input.clone(), Some(call))
            .await?;

        // The gate judges the input as rewritten by PreToolUse hooks
        let evaluated_input = hooks.output.clone().unwrap_or_else(|| call.input.clone());
        let (decision, final_decision, reason, matched_rule, updated_input) =
            if hooks.continue_execution {
                let verdict = self.gate.evaluate(&call.tool_name, &evaluated_input);
                let (final_decision, reason) = if verdict.decision == PermissionDecision::Ask {
                    self.resolve_ask(call, &evaluated_input, &verdict, sink, cancel).await?
                } else {
                    (verdict.decision, verdict.reason.clone())
                };
                (
                    verdict.decision,
                    final_decision,
                    reason,
                    verdict.matched_rule,
                    hooks.output,
                )
            } else {
                let reason = hooks
                    .stop_reason
                    .unwrap_or_else(|| "blocked by PreToolUse hook".to_string());
                (
                    PermissionDecision::Deny,
                    PermissionDecision::Deny,
                    reason,
                    None,
                    None,
                )
            };

        if let Some(session_id) = sink.session_id() {
            sink.record_permission(&PermissionDecisionRecord {
                session_id: session_id.clone(),
                tool_call_id: call.id.clone(),
                tool_use_id: call.tool_use_id.clone(),
                tool_name: call.tool_name.clone(),
                input: evaluated_input,
                decision,
                final_decision,
                reason: reason.clone(),
                matched_rule,
                decided_at: Utc::now(),
            })
            .await?;
        }

        Ok(Authorization {
            decision: final_decision,
            reason,
            updated_input,
        })
    }

    async fn after_tool(&self, call: &ToolCall, sink: &dyn ExecutionSink) -> Result<()> {
        let payload = json!({
            "tool_input": call.input,
            "tool_response": call.output,
            "is_error": call.error_message.is_some(),
        });
        let outcome = self
            .run_hooks(sink, HookEvent::PostToolUse, payload, Some(call))
            .await?;
        if !outcome.continue_execution {
            log::warn!(
                "PostToolUse hook stopped after {} ({}): {}",
                call.tool_name,
                call.tool_use_id,
                outcome.stop_reason.unwrap_or_default()
            );
        }
        Ok(())
    }
}
