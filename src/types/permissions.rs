//! Permission-related type definitions
//!
//! Permission modes, the three-way decision computed by the
//! [`PermissionGate`](crate::permissions::PermissionGate), and the final
//! authorization handed back to the SDK for one tool use.

use serde::{Deserialize, Serialize};

/// Permission modes for tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Unmatched tools require approval
    #[default]
    Default,
    /// Unmatched tools are allowed (forced for task automation)
    AcceptEdits,
    /// Plan mode
    Plan,
    /// Passed through to the CLI; unmatched tools are denied by the gate
    BypassPermissions,
}

impl PermissionMode {
    /// CLI flag value
    #[must_use]
    pub const fn as_cli_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Permission decision for one tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    /// Allow the action
    Allow,
    /// Deny the action
    Deny,
    /// Ask an approver
    Ask,
}

impl PermissionDecision {
    /// Lowercase label used in logs and records
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
        }
    }
}

/// Outcome of evaluating the gate: a decision plus a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionVerdict {
    /// The decision
    pub decision: PermissionDecision,
    /// Why this decision was reached
    pub reason: String,
    /// The pattern that produced the decision, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
}

impl PermissionVerdict {
    /// Build a verdict
    pub fn new(
        decision: PermissionDecision,
        reason: impl Into<String>,
        matched_rule: Option<String>,
    ) -> Self {
        Self {
            decision,
            reason: reason.into(),
            matched_rule,
        }
    }
}

/// Final authorization sent to the SDK for one tool use
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum ToolAuthorization {
    /// Let the SDK run the tool
    Allow {
        /// Replacement input supplied by a hook
        #[serde(skip_serializing_if = "Option::is_none", rename = "updatedInput")]
        updated_input: Option<serde_json::Value>,
    },
    /// Refuse the tool
    Deny {
        /// Reason shown to the agent
        message: String,
    },
}

impl ToolAuthorization {
    /// Whether the tool may run
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}
