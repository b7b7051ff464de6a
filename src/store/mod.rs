//! Durable store abstraction
//!
//! The engine persists sessions and everything they own through
//! [`SessionStore`]. Each method is atomic for the record it touches; the
//! engine never needs a transaction spanning more than "update the session"
//! plus "append one record".
//!
//! Session and execution updates go through `modify_*`, which applies a
//! closure under the store's own lock so concurrent pause/terminate requests
//! and the stream processor never lose each other's writes.

mod memory;
mod page;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::archive::ArchiveMetadata;
use crate::types::identifiers::{ArchiveId, ExecutionId, SessionId, TaskId, ToolCallId};
use crate::types::records::{
    HookExecutionRecord, MessageRecord, PermissionDecisionRecord, ToolCall,
};
use crate::types::session::Session;
use crate::types::task::{TaskDefinition, TaskExecution};

pub use memory::InMemoryStore;
pub use page::{Page, PageRequest};

/// In-place mutation of a session; returning an error leaves it unchanged
pub type SessionMutation = Box<dyn FnOnce(&mut Session) -> Result<()> + Send>;

/// In-place mutation of an execution; returning an error leaves it unchanged
pub type ExecutionMutation = Box<dyn FnOnce(&mut TaskExecution) -> Result<()> + Send>;

/// Persistence consumed by the engine
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Insert a new session
    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Fetch a session
    async fn get_session(&self, id: &SessionId) -> Result<Session>;

    /// Atomically mutate a session and return the stored result
    async fn modify_session(&self, id: &SessionId, change: SessionMutation) -> Result<Session>;

    /// Sessions of an owner (all sessions when `None`), oldest first
    async fn list_sessions(&self, owner: Option<&str>, page: PageRequest) -> Result<Page<Session>>;

    /// Append a message; `(session_id, sequence_number)` must be unique
    async fn append_message(&self, message: &MessageRecord) -> Result<()>;

    /// Messages of a session in sequence order
    async fn list_messages(
        &self,
        session_id: &SessionId,
        page: PageRequest,
    ) -> Result<Page<MessageRecord>>;

    /// Highest sequence number of a session, 0 when it has none
    async fn last_sequence(&self, session_id: &SessionId) -> Result<u64>;

    /// Insert or replace a tool call
    async fn save_tool_call(&self, call: &ToolCall) -> Result<()>;

    /// Fetch a tool call
    async fn get_tool_call(&self, id: &ToolCallId) -> Result<ToolCall>;

    /// Tool calls of a session in creation order
    async fn list_tool_calls(
        &self,
        session_id: &SessionId,
        page: PageRequest,
    ) -> Result<Page<ToolCall>>;

    /// Append a hook execution record
    async fn append_hook_execution(&self, record: &HookExecutionRecord) -> Result<()>;

    /// Hook execution records of a session
    async fn list_hook_executions(&self, session_id: &SessionId) -> Result<Vec<HookExecutionRecord>>;

    /// Append a permission decision record
    async fn append_permission_decision(&self, record: &PermissionDecisionRecord) -> Result<()>;

    /// Permission decision records of a session
    async fn list_permission_decisions(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PermissionDecisionRecord>>;

    /// Insert or replace a task definition
    async fn save_task(&self, task: &TaskDefinition) -> Result<()>;

    /// Fetch a task definition
    async fn get_task(&self, id: &TaskId) -> Result<TaskDefinition>;

    /// Insert a new execution
    async fn create_execution(&self, execution: &TaskExecution) -> Result<()>;

    /// Fetch an execution
    async fn get_execution(&self, id: &ExecutionId) -> Result<TaskExecution>;

    /// Atomically mutate an execution and return the stored result
    async fn modify_execution(
        &self,
        id: &ExecutionId,
        change: ExecutionMutation,
    ) -> Result<TaskExecution>;

    /// Executions of a task, oldest first
    async fn list_executions(
        &self,
        task_id: &TaskId,
        page: PageRequest,
    ) -> Result<Page<TaskExecution>>;

    /// Insert or replace archive metadata
    async fn save_archive(&self, archive: &ArchiveMetadata) -> Result<()>;

    /// Fetch archive metadata
    async fn get_archive(&self, id: &ArchiveId) -> Result<ArchiveMetadata>;

    /// Latest archive metadata of a session, if any
    async fn archive_for_session(&self, session_id: &SessionId) -> Result<Option<ArchiveMetadata>>;
}
