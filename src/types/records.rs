//! Persisted records owned by a session
//!
//! Messages, tool calls, and the two append-only audit logs (hook executions
//! and permission decisions).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hooks::HookEvent;
use super::identifiers::{MessageId, SessionId, ToolCallId, ToolName};
use super::permissions::PermissionDecision;

/// Persisted message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// User prompt or tool result
    User,
    /// Assistant output (final or partial)
    Assistant,
    /// System notice
    System,
    /// Terminal result
    Result,
}

/// One persisted message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Identity
    pub id: MessageId,
    /// Owning session
    pub session_id: SessionId,
    /// Gap-free, strictly increasing per session, starting at 1
    pub sequence_number: u64,
    /// Message type
    pub message_type: MessageType,
    /// Raw message content
    pub content: serde_json::Value,
    /// Whether this is a streaming chunk awaiting its final message
    pub is_partial: bool,
    /// The message this chunk will be merged into
    pub parent_message_id: Option<MessageId>,
    /// Model that produced it (assistant messages)
    pub model: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Tool call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    /// Observed, not yet authorized
    Pending,
    /// Authorized and handed to the SDK
    Running,
    /// Tool returned a result
    Completed,
    /// Tool returned an error, or the stream ended before a result
    Failed,
    /// Refused by a hook or the permission gate
    Denied,
}

impl ToolCallStatus {
    /// Whether a transition from `self` to `to` is legal
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running | Self::Denied | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }

    /// Whether the call is finished
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Denied)
    }
}

/// One tool invocation requested by the agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identity
    pub id: ToolCallId,
    /// Owning session
    pub session_id: SessionId,
    /// Assistant message that requested it
    pub message_id: Option<MessageId>,
    /// Provider-issued id
    pub tool_use_id: String,
    /// Tool name
    pub tool_name: ToolName,
    /// Tool input
    pub input: serde_json::Value,
    /// Tool output, once known
    pub output: Option<serde_json::Value>,
    /// Status
    pub status: ToolCallStatus,
    /// Final permission decision
    pub permission_decision: Option<PermissionDecision>,
    /// Reason for the decision
    pub reason: Option<String>,
    /// Error text for failed calls
    pub error_message: Option<String>,
    /// When the call was observed
    pub created_at: DateTime<Utc>,
    /// When the SDK was told to run it
    pub started_at: Option<DateTime<Utc>>,
    /// When it finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall time between start and completion
    pub duration_ms: Option<u64>,
}

/// Append-only log of one hook invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookExecutionRecord {
    /// Owning session
    pub session_id: SessionId,
    /// Hook label
    pub hook_name: String,
    /// Event
    pub event: HookEvent,
    /// Correlated tool use, if any
    pub tool_use_id: Option<String>,
    /// Payload handed to the hook
    pub input: serde_json::Value,
    /// What the hook returned
    pub output: Option<serde_json::Value>,
    /// Error or timeout description
    pub error: Option<String>,
    /// Whether execution continued after this hook
    pub continued: bool,
    /// Wall time
    pub duration_ms: u64,
    /// When it ran
    pub executed_at: DateTime<Utc>,
}

/// Append-only audit of one permission evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDecisionRecord {
    /// Owning session
    pub session_id: SessionId,
    /// Tool call this decision applies to
    pub tool_call_id: ToolCallId,
    /// Provider-issued id
    pub tool_use_id: String,
    /// Tool name
    pub tool_name: ToolName,
    /// Tool input evaluated
    pub input: serde_json::Value,
    /// What the gate (or a blocking hook) decided
    pub decision: PermissionDecision,
    /// Final decision after approval (`ask` resolved to allow/deny)
    pub final_decision: PermissionDecision,
    /// Reason
    pub reason: String,
    /// Rule that matched, if any
    pub matched_rule: Option<String>,
    /// Evaluation time
    pub decided_at: DateTime<Utc>,
}
