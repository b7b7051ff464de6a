//! Resolution of `ask` permission decisions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::identifiers::{SessionId, ToolCallId, ToolName};

/// A tool use waiting for a human (or automated) verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Session, when the run is recorded
    pub session_id: Option<SessionId>,
    /// Tool call awaiting approval
    pub tool_call_id: ToolCallId,
    /// Provider-issued id
    pub tool_use_id: String,
    /// Tool name
    pub tool_name: ToolName,
    /// Tool input
    pub input: serde_json::Value,
    /// Why the gate asked
    pub reason: String,
}

/// Verdict on an [`ApprovalRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum ApprovalDecision {
    /// Let the tool run
    Approve,
    /// Refuse the tool
    Reject {
        /// Reason shown to the agent
        reason: String,
    },
}

/// Resolves `ask` decisions while the session waits
#[async_trait]
pub trait Approver: Send + Sync {
    /// Decide on one tool use
    ///
    /// # Errors
    /// An error is treated as a rejection
    async fn approve(&self, request: &ApprovalRequest) -> Result<ApprovalDecision>;
}
