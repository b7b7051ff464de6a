//! In-memory store

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{EngineError, Result};
use crate::types::archive::ArchiveMetadata;
use crate::types::identifiers::{ArchiveId, ExecutionId, SessionId, TaskId, ToolCallId};
use crate::types::records::{
    HookExecutionRecord, MessageRecord, PermissionDecisionRecord, ToolCall,
};
use crate::types::session::Session;
use crate::types::task::{TaskDefinition, TaskExecution};

use super::{ExecutionMutation, Page, PageRequest, SessionMutation, SessionStore};

/// Store keeping every record in process memory
///
/// Suitable for tests and one-shot CLI runs. Collections owned by a session
/// are kept in insertion order.
#[derive(Default)]
pub struct InMemoryStore {
    sessions: RwLock<Vec<Session>>,
    messages: RwLock<HashMap<SessionId, Vec<MessageRecord>>>,
    tool_calls: RwLock<Vec<ToolCall>>,
    hook_executions: RwLock<HashMap<SessionId, Vec<HookExecutionRecord>>>,
    permission_decisions: RwLock<HashMap<SessionId, Vec<PermissionDecisionRecord>>>,
    tasks: RwLock<HashMap<TaskId, TaskDefinition>>,
    executions: RwLock<Vec<TaskExecution>>,
    archives: RwLock<Vec<ArchiveMetadata>>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.iter().any(|s| s.id == session.id) {
            return Err(EngineError::store(format!("session {} already exists", session.id)));
        }
        sessions.push(session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Session> {
        self.sessions
            .read()
            .iter()
            .find(|s| &s.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("session", id.as_str()))
    }

    async fn modify_session(&self, id: &SessionId, change: SessionMutation) -> Result<Session> {
        let mut sessions = self.sessions.write();
        let slot = sessions
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| EngineError::not_found("session", id.as_str()))?;
        let mut updated = slot.clone();
        change(&mut updated)?;
        updated.updated_at = chrono::Utc::now();
        *slot = updated.clone();
        Ok(updated)
    }

    async fn list_sessions(&self, owner: Option<&str>, page: PageRequest) -> Result<Page<Session>> {
        let sessions = self.sessions.read();
        let matching: Vec<Session> = sessions
            .iter()
            .filter(|s| owner.is_none_or(|o| s.owner == o))
            .cloned()
            .collect();
        Ok(Page::slice(&matching, page))
    }

    async fn append_message(&self, message: &MessageRecord) -> Result<()> {
        let mut messages = self.messages.write();
        let list = messages.entry(message.session_id.clone()).or_default();
        if let Some(last) = list.last()
            && last.sequence_number >= message.sequence_number
        {
            return Err(EngineError::store(format!(
                "sequence {} is not after {} in session {}",
                message.sequence_number, last.sequence_number, message.session_id
            )));
        }
        list.push(message.clone());
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &SessionId,
        page: PageRequest,
    ) -> Result<Page<MessageRecord>> {
        let messages = self.messages.read();
        let list = messages.get(session_id).map_or(&[][..], Vec::as_slice);
        Ok(Page::slice(list, page))
    }

    async fn last_sequence(&self, session_id: &SessionId) -> Result<u64> {
        Ok(self
            .messages
            .read()
            .get(session_id)
            .and_then(|list| list.last())
            .map_or(0, |m| m.sequence_number))
    }

    async fn save_tool_call(&self, call: &ToolCall) -> Result<()> {
        let mut calls = self.tool_calls.write();
        if let Some(existing) = calls.iter_mut().find(|c| c.id == call.id) {
            *existing = call.clone();
            return Ok(());
        }
        if calls.iter().any(|c| c.tool_use_id == call.tool_use_id) {
            return Err(EngineError::store(format!(
                "tool_use_id {} already recorded",
                call.tool_use_id
            )));
        }
        calls.push(call.clone());
        Ok(())
    }

    async fn get_tool_call(&self, id: &ToolCallId) -> Result<ToolCall> {
        self.tool_calls
            .read()
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("tool call", id.as_str()))
    }

    async fn list_tool_calls(
        &self,
        session_id: &SessionId,
        page: PageRequest,
    ) -> Result<Page<ToolCall>> {
        let calls: Vec<ToolCall> = self
            .tool_calls
            .read()
            .iter()
            .filter(|c| &c.session_id == session_id)
            .cloned()
            .collect();
        Ok(Page::slice(&calls, page))
    }

    async fn append_hook_execution(&self, record: &HookExecutionRecord) -> Result<()> {
        self.hook_executions
            .write()
            .entry(record.session_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_hook_executions(&self, session_id: &SessionId) -> Result<Vec<HookExecutionRecord>> {
        Ok(self
            .hook_executions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_permission_decision(&self, record: &PermissionDecisionRecord) -> Result<()> {
        self.permission_decisions
            .write()
            .entry(record.session_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn list_permission_decisions(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PermissionDecisionRecord>> {
        Ok(self
            .permission_decisions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_task(&self, task: &TaskDefinition) -> Result<()> {
        self.tasks.write().insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> Result<TaskDefinition> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("task", id.as_str()))
    }

    async fn create_execution(&self, execution: &TaskExecution) -> Result<()> {
        let mut executions = self.executions.write();
        if executions.iter().any(|e| e.id == execution.id) {
            return Err(EngineError::store(format!(
                "execution {} already exists",
                execution.id
            )));
        }
        executions.push(execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> Result<TaskExecution> {
        self.executions
            .read()
            .iter()
            .find(|e| &e.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("execution", id.as_str()))
    }

    async fn modify_execution(
        &self,
        id: &ExecutionId,
        change: ExecutionMutation,
    ) -> Result<TaskExecution> {
        let mut executions = self.executions.write();
        let slot = executions
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| EngineError::not_found("execution", id.as_str()))?;
        let mut updated = slot.clone();
        change(&mut updated)?;
        *slot = updated.clone();
        Ok(updated)
    }

    async fn list_executions(
        &self,
        task_id: &TaskId,
        page: PageRequest,
    ) -> Result<Page<TaskExecution>> {
        let matching: Vec<TaskExecution> = self
            .executions
            .read()
            .iter()
            .filter(|e| &e.task_id == task_id)
            .cloned()
            .collect();
        Ok(Page::slice(&matching, page))
    }

    async fn save_archive(&self, archive: &ArchiveMetadata) -> Result<()> {
        let mut archives = self.archives.write();
        if let Some(existing) = archives.iter_mut().find(|a| a.id == archive.id) {
            *existing = archive.clone();
        } else {
            archives.push(archive.clone());
        }
        Ok(())
    }

    async fn get_archive(&self, id: &ArchiveId) -> Result<ArchiveMetadata> {
        self.archives
            .read()
            .iter()
            .find(|a| &a.id == id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("archive", id.as_str()))
    }

    async fn archive_for_session(&self, session_id: &SessionId) -> Result<Option<ArchiveMetadata>> {
        Ok(self
            .archives
            .read()
            .iter()
            .rev()
            .find(|a| &a.session_id == session_id)
            .cloned())
    }
}
