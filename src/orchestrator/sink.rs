//! Session-backed execution sink and status transitions

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::retry::RetryEvent;
use crate::store::SessionStore;
use crate::stream::{ExecutionSink, QuerySummary};
use crate::types::identifiers::SessionId;
use crate::types::records::{
    HookExecutionRecord, MessageRecord, PermissionDecisionRecord, ToolCall, ToolCallStatus,
};
use crate::types::session::{Session, SessionStatus};

/// Move a session to `to`, validating the edge atomically
///
/// Moving to the current status is a no-op. `extra` runs on the session in
/// the same atomic update (error message, archive id...). Publishes
/// `status_changed` on success.
///
/// # Errors
/// Returns `EngineError::StateConflict` if the edge is not part of the
/// state machine
pub(crate) async fn transition(
    store: &dyn SessionStore,
    events: &EventBus,
    session_id: &SessionId,
    to: SessionStatus,
    extra: impl FnOnce(&mut Session) + Send + 'static,
) -> Result<Session> {
    let from_cell = Arc::new(Mutex::new(None));
    let from_slot = Arc::clone(&from_cell);

    let session = store
        .modify_session(
            session_id,
            Box::new(move |session: &mut Session| {
                let from = session.status;
                if from != to && !from.can_transition_to(to) {
                    return Err(EngineError::state_conflict(format!(
                        "session {} cannot move from {from} to {to}",
                        session.id
                    )));
                }
                session.status = to;
                if to.is_terminal() && session.completed_at.is_none() {
                    session.completed_at = Some(Utc::now());
                }
                extra(session);
                *from_slot.lock() = Some(from);
                Ok(())
            }),
        )
        .await?;

    let from = from_cell.lock().take();
    if let Some(from) = from
        && from != to
    {
        log::debug!("[{session_id}] {from} -> {to}");
        events.publish(
            session_id,
            SessionEvent::StatusChanged {
                session_id: session_id.clone(),
                from,
                to,
            },
        );
    }
    Ok(session)
}

/// Persists everything a stream produces for one session
pub struct SessionSink {
    session_id: SessionId,
    store: Arc<dyn SessionStore>,
    events: Arc<EventBus>,
}

impl SessionSink {
    /// Sink writing to `session_id`
    pub fn new(session_id: SessionId, store: Arc<dyn SessionStore>, events: Arc<EventBus>) -> Self {
        Self {
            session_id,
            store,
            events,
        }
    }

    async fn bump(&self, change: impl FnOnce(&mut Session) + Send + 'static) -> Result<()> {
        self.store
            .modify_session(
                &self.session_id,
                Box::new(move |session: &mut Session| {
                    change(session);
                    Ok(())
                }),
            )
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ExecutionSink for SessionSink {
    fn session_id(&self) -> Option<&SessionId> {
        Some(&self.session_id)
    }

    async fn last_sequence(&self) -> Result<u64> {
        self.store.last_sequence(&self.session_id).await
    }

    async fn record_message(&self, message: &MessageRecord) -> Result<()> {
        self.store.append_message(message).await?;
        if !message.is_partial {
            self.bump(|s| s.metrics.total_messages += 1).await?;
        }
        self.events.publish(
            &self.session_id,
            SessionEvent::MessageAppended {
                message: message.clone(),
            },
        );
        Ok(())
    }

    async fn record_tool_call(&self, call: &ToolCall) -> Result<()> {
        self.store.save_tool_call(call).await?;
        match call.status {
            ToolCallStatus::Pending => {
                self.bump(|s| s.metrics.total_tool_calls += 1).await?;
            }
            ToolCallStatus::Running => {
                self.events.publish(
                    &self.session_id,
                    SessionEvent::ToolCallStarted {
                        tool_call: call.clone(),
                    },
                );
            }
            ToolCallStatus::Completed | ToolCallStatus::Denied | ToolCallStatus::Failed => {
                if call.status == ToolCallStatus::Failed {
                    self.bump(|s| s.metrics.total_errors += 1).await?;
                }
                self.events.publish(
                    &self.session_id,
                    SessionEvent::ToolCallCompleted {
                        tool_call: call.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn record_permission(&self, record: &PermissionDecisionRecord) -> Result<()> {
        self.store.append_permission_decision(record).await
    }

    async fn record_hook(&self, record: &HookExecutionRecord) -> Result<()> {
        self.store.append_hook_execution(record).await
    }

    async fn set_status(&self, status: SessionStatus) -> Result<()> {
        transition(
            self.store.as_ref(),
            &self.events,
            &self.session_id,
            status,
            |_| {},
        )
        .await
        .map(|_| ())
    }

    async fn record_summary(&self, summary: &QuerySummary) -> Result<()> {
        let summary = summary.clone();
        self.bump(move |s| {
            let m = &mut s.metrics;
            m.input_tokens += summary.input_tokens;
            m.output_tokens += summary.output_tokens;
            m.total_cost_usd += summary.cost_usd;
            m.total_duration_ms += summary.duration_ms;
            m.total_turns += u64::from(summary.num_turns);
            if summary.is_error {
                m.total_errors += 1;
                s.error_message = Some(summary.result.clone().unwrap_or_else(|| {
                    format!(
                        "query ended with {}",
                        summary.subtype.as_deref().unwrap_or("an error")
                    )
                }));
            }
            if let Some(id) = summary.sdk_session_id {
                s.sdk_session_id = Some(id);
            }
        })
        .await
    }

    async fn record_retry(&self, event: &RetryEvent) -> Result<()> {
        log::info!(
            "[{}] retry {}/{}: {}",
            self.session_id,
            event.attempt,
            event.max_attempts,
            event.error
        );
        self.bump(|s| s.metrics.total_retries += 1).await
    }
}
