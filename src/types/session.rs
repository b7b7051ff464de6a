//! Session record and its status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::identifiers::{ArchiveId, SdkSessionId, SessionId};
use super::options::SessionConfig;

/// How a session is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Driven by a user issuing queries
    Interactive,
    /// Driven by a task execution
    Background,
    /// Created by forking another session
    Forked,
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, never queried
    Created,
    /// Starting an SDK client
    Connecting,
    /// Idle, awaiting the next query
    Active,
    /// Paused by the user
    Paused,
    /// Blocked on an approval
    Waiting,
    /// Consuming a message stream
    Processing,
    /// Finished normally
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped by the user
    Terminated,
    /// Post-terminal: working directory archived
    Archived,
}

impl SessionStatus {
    /// Whether the session has finished (archived counts as finished)
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Terminated | Self::Archived
        )
    }

    /// Whether a transition from `self` to `to` is an edge of the state machine
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        use SessionStatus::{
            Active, Archived, Completed, Connecting, Created, Failed, Paused, Processing,
            Terminated, Waiting,
        };
        match (self, to) {
            // terminate() is permitted from any non-terminal state
            (from, Terminated) => !from.is_terminal(),
            (Created | Paused | Active | Processing, Connecting) => true,
            (Connecting, Active) => true,
            (Active, Processing | Paused | Waiting | Completed) => true,
            (Processing, Active | Waiting) => true,
            (Waiting, Processing | Active | Paused) => true,
            (Paused, Active) => true,
            (Created | Connecting | Active | Processing | Waiting | Paused, Failed) => true,
            (Completed | Failed | Terminated, Archived) => true,
            _ => false,
        }
    }

    /// Lowercase label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Waiting => "waiting",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Finalized (non-partial) messages
    pub total_messages: u64,
    /// Tool calls observed
    pub total_tool_calls: u64,
    /// Errors (failed tools, error results, failed attempts)
    pub total_errors: u64,
    /// Retryable failures absorbed by the retry coordinator
    pub total_retries: u32,
    /// Input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Total cost in USD
    pub total_cost_usd: f64,
    /// Summed SDK-reported duration
    pub total_duration_ms: u64,
    /// Summed SDK-reported turns
    pub total_turns: u64,
}

/// An agent session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Identity
    pub id: SessionId,
    /// Owning user
    pub owner: String,
    /// Display name
    pub name: String,
    /// How the session is driven
    pub mode: SessionMode,
    /// Current status
    pub status: SessionStatus,
    /// SDK configuration
    pub config: SessionConfig,
    /// Running counters
    pub metrics: SessionMetrics,
    /// Live working directory
    pub working_directory: PathBuf,
    /// Conversation id announced by the SDK
    pub sdk_session_id: Option<SdkSessionId>,
    /// Parent when forked; never changes after creation
    pub parent_session_id: Option<SessionId>,
    /// Whether this session is a fork
    pub is_fork: bool,
    /// Last message sequence number included from the parent
    pub forked_at_sequence: Option<u64>,
    /// Archive record, once archiving completed
    pub archive_id: Option<ArchiveId>,
    /// Human-readable error for failed sessions
    pub error_message: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// When the session reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}
