//! Hook-related type definitions
//!
//! Hook events, the payload handed to a hook, what a hook returns, and the
//! [`Hook`] trait every handler implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::identifiers::{SessionId, ToolName};
use crate::error::Result;

// ============================================================================
// Hook Types
// ============================================================================

/// Hook event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// Before a tool is used
    PreToolUse,
    /// After a tool is used
    PostToolUse,
    /// When user submits a prompt
    UserPromptSubmit,
    /// When conversation stops
    Stop,
    /// When a subagent stops
    SubagentStop,
    /// Before compacting the conversation
    PreCompact,
}

impl HookEvent {
    /// Whether hooks for this event are matched against a tool name
    #[must_use]
    pub const fn is_tool_event(self) -> bool {
        matches!(self, Self::PreToolUse | Self::PostToolUse)
    }
}

/// What to do when a hook errors or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookFailurePolicy {
    /// Record the failure and keep going
    #[default]
    Continue,
    /// Treat the failure as `continue = false`
    Block,
}

/// Context for hook callbacks
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Session the event belongs to (absent for unrecorded task runs)
    pub session_id: Option<SessionId>,
    /// Tool involved, for tool events
    pub tool_name: Option<ToolName>,
}

/// Input handed to a hook
#[derive(Debug, Clone)]
pub struct HookInput {
    /// Event being dispatched
    pub event: HookEvent,
    /// Event payload (tool input, prompt, result...)
    pub payload: serde_json::Value,
    /// Correlation id: the `tool_use_id` for tool events
    pub correlation_id: Option<String>,
    /// Ambient context
    pub context: HookContext,
}

/// Hook output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookOutput {
    /// Whether execution may proceed
    #[serde(rename = "continue")]
    pub continue_execution: bool,
    /// Message explaining a stop, surfaced as the denial reason
    #[serde(skip_serializing_if = "Option::is_none", rename = "stopReason")]
    pub stop_reason: Option<String>,
    /// Replacement output (for `PreToolUse`: replacement tool input)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl Default for HookOutput {
    fn default() -> Self {
        Self::proceed()
    }
}

impl HookOutput {
    /// Continue without changes
    #[must_use]
    pub const fn proceed() -> Self {
        Self {
            continue_execution: true,
            stop_reason: None,
            output: None,
        }
    }

    /// Stop execution with a reason
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            continue_execution: false,
            stop_reason: Some(reason.into()),
            output: None,
        }
    }

    /// Continue with a replacement output
    #[must_use]
    pub const fn with_output(output: serde_json::Value) -> Self {
        Self {
            continue_execution: true,
            stop_reason: None,
            output: Some(output),
        }
    }
}

/// A lifecycle hook
#[async_trait]
pub trait Hook: Send + Sync {
    /// Handle one event
    async fn invoke(&self, input: HookInput) -> Result<HookOutput>;
}

/// Boxed future returned by closure hooks
pub type HookFuture = Pin<Box<dyn Future<Output = Result<HookOutput>> + Send>>;

/// Adapter turning a closure into a [`Hook`]
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(HookInput) -> HookFuture + Send + Sync,
{
    async fn invoke(&self, input: HookInput) -> Result<HookOutput> {
        (self.0)(input).await
    }
}

/// One registered hook: event, optional tool matcher, handler
#[derive(Clone)]
pub struct HookDescriptor {
    /// Event this hook listens to
    pub event: HookEvent,
    /// Matcher pattern (e.g., tool name like "Bash" or pattern like "Write|Edit")
    pub matcher: Option<String>,
    /// Handler
    pub hook: Arc<dyn Hook>,
    /// Label used in execution records
    pub name: String,
}

impl std::fmt::Debug for HookDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDescriptor")
            .field("event", &self.event)
            .field("matcher", &self.matcher)
            .field("name", &self.name)
            .finish()
    }
}
