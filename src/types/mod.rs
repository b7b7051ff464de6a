//! Type definitions for the session engine
//!
//! - [`identifiers`] - Type-safe ID wrappers (`SessionId`, `ToolName`, ...)
//! - [`messages`] - Wire messages produced by the agent SDK
//! - [`session`] - Session record and status state machine
//! - [`records`] - Messages, tool calls, hook and permission audit records
//! - [`permissions`] - Permission modes and decisions
//! - [`hooks`] - Hook events, inputs, outputs and the `Hook` trait
//! - [`options`] - Per-session SDK configuration
//! - [`task`] - Task definitions and executions
//! - [`archive`] - Archive metadata

pub mod archive;
pub mod hooks;
pub mod identifiers;
pub mod messages;
pub mod options;
pub mod permissions;
pub mod records;
pub mod session;
pub mod task;

pub use archive::{ArchiveMetadata, ArchiveStatus};
pub use hooks::{
    FnHook, Hook, HookContext, HookDescriptor, HookEvent, HookFailurePolicy, HookFuture,
    HookInput, HookOutput,
};
pub use identifiers::{
    ArchiveId, ExecutionId, MessageId, SdkSessionId, SessionId, TaskId, ToolCallId, ToolName,
};
pub use messages::{
    BlockKind, ContentBlock, ContentValue, ControlRequest, Message, UserContent,
};
pub use options::{RetryConfig, SessionConfig, SessionConfigBuilder};
pub use permissions::{PermissionDecision, PermissionMode, PermissionVerdict, ToolAuthorization};
pub use records::{
    HookExecutionRecord, MessageRecord, MessageType, PermissionDecisionRecord, ToolCall,
    ToolCallStatus,
};
pub use session::{Session, SessionMetrics, SessionMode, SessionStatus};
pub use task::{
    ExecutionMode, ExecutionStatus, TaskDefinition, TaskExecution, TriggerMetadata,
    TriggerSource,
};
