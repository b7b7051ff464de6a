//! Error types for the session execution engine

use thiserror::Error;

/// Main error type for the session engine
///
/// Permission denials are deliberately absent: a denied tool call is a
/// recorded outcome on the `ToolCall`, not a failure.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Claude Code CLI not found or not installed
    #[error("Claude Code CLI not found: {0}")]
    CliNotFound(String),

    /// Subprocess start or stream failure (retryable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Per-attempt time ceiling exceeded (retryable)
    #[error("Attempt timed out after {seconds}s")]
    AttemptTimeout {
        /// Configured ceiling in seconds
        seconds: u64,
    },

    /// Process execution error with exit code and stderr
    #[error("Process error (exit code {exit_code}): {message}")]
    Process {
        /// Error message
        message: String,
        /// Process exit code
        exit_code: i32,
        /// Standard error output
        stderr: Option<String>,
    },

    /// Rejected input: prompt template, tool pattern, configuration
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Hook invocation failed
    #[error("Hook error: {0}")]
    Hook(String),

    /// Archiving failed; live data is left untouched
    #[error("Archive error: {0}")]
    Archive(String),

    /// Operation not permitted in the current state
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Execution was cancelled cooperatively
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// All attempts failed
    #[error("Giving up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Message of the last failure
        last_error: String,
    },

    /// JSON decode error when parsing CLI output
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// Message parse error with optional raw data
    #[error("Message parse error: {message}")]
    MessageParse {
        /// Error message
        message: String,
        /// Raw message data that failed to parse
        data: Option<serde_json::Value>,
    },

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Durable store error
    #[error("Store error: {0}")]
    Store(String),

    /// Record not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind ("session", "execution", ...)
        kind: &'static str,
        /// Record identifier
        id: String,
    },

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create a CLI not found error
    #[must_use]
    pub fn cli_not_found() -> Self {
        Self::CliNotFound(
            "Claude Code not found. Install with:\n\
             npm install -g @anthropic-ai/claude-code\n\
             \n\
             Or set `cli_path` in the engine configuration"
                .to_string(),
        )
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an attempt timeout error
    #[must_use]
    pub const fn attempt_timeout(seconds: u64) -> Self {
        Self::AttemptTimeout { seconds }
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>, exit_code: i32, stderr: Option<String>) -> Self {
        Self::Process {
            message: msg.into(),
            exit_code,
            stderr,
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create an archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    /// Create a state conflict error
    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a message parse error
    pub fn message_parse(msg: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::MessageParse {
            message: msg.into(),
            data,
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the retry coordinator may absorb this failure
    ///
    /// Subprocess/stream failures and attempt timeouts are transient;
    /// validation, state, cancellation and store failures are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::AttemptTimeout { .. }
                | Self::Process { .. }
                | Self::Transport(_)
                | Self::Io(_)
        )
    }

    /// Whether this error represents a cooperative cancellation
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
