//! Task definitions and execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::identifiers::{ExecutionId, SessionId, TaskId};
use super::options::SessionConfig;

/// How a task execution is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Summary only, no session or message detail
    #[default]
    Async,
    /// Full background session with message and tool-call detail
    Session,
}

/// A reusable prompt template executed unattended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Identity
    pub id: TaskId,
    /// Display name
    pub name: String,
    /// Owning user
    pub owner: String,
    /// Prompt template with `{{variable}}` placeholders
    pub prompt_template: String,
    /// SDK configuration for runs of this task
    pub config: SessionConfig,
    /// Recording mode
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Defaults merged under caller-provided variables
    #[serde(default)]
    pub default_variables: HashMap<String, String>,
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Accepted
    Pending,
    /// Waiting for a concurrency slot
    Queued,
    /// Running
    Running,
    /// Finished normally
    Completed,
    /// Finished with an error
    Failed,
    /// Cancelled cooperatively
    Cancelled,
}

impl ExecutionStatus {
    /// Whether the execution has finished
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a retry may clone an execution in this status
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Failed)
    }
}

/// What started an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// Started by a user
    #[default]
    Manual,
    /// Started by a schedule
    Scheduled,
    /// Started through the API
    Api,
    /// Clone of an earlier execution
    Retry,
}

/// Trigger metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerMetadata {
    /// Source
    pub source: TriggerSource,
    /// Who or what triggered it
    pub triggered_by: Option<String>,
    /// Execution this one retries
    pub retry_of: Option<ExecutionId>,
}

/// One unattended run of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    /// Identity
    pub id: ExecutionId,
    /// Task definition
    pub task_id: TaskId,
    /// Session, once started in session mode
    pub session_id: Option<SessionId>,
    /// Status
    pub status: ExecutionStatus,
    /// Recording mode
    pub mode: ExecutionMode,
    /// Variables used to render the prompt
    pub variables: HashMap<String, String>,
    /// Trigger metadata
    pub trigger: TriggerMetadata,
    /// Cooperative cancellation flag
    pub cancel_requested: bool,
    /// Terminal summary
    pub result_data: Option<serde_json::Value>,
    /// Finalized messages seen
    pub message_count: u64,
    /// Tool calls seen
    pub tool_call_count: u64,
    /// Retryable failures absorbed
    pub retry_count: u32,
    /// Error text for failed executions
    pub error_message: Option<String>,
    /// Run time
    pub duration_ms: Option<u64>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Start time
    pub started_at: Option<DateTime<Utc>>,
    /// Finish time
    pub completed_at: Option<DateTime<Utc>>,
}
