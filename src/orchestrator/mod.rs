//! Session lifecycle
//!
//! [`SessionOrchestrator`] owns every status change of a session:
//!
//! ```text
//! created ─► connecting ─► active ⇄ { processing, waiting, paused }
//!                             │
//!                             └─► { completed, failed, terminated } ─► archived
//! ```
//!
//! A query renders its prompt, runs `UserPromptSubmit` hooks, then retries
//! `with_client { query; drain stream }` until it succeeds or the attempt
//! budget is spent. Every tool use on the way passes through the
//! [`ToolPolicy`] before the SDK may run it. However the query ends, the
//! session is left in a settled status: `active`, `paused`, `terminated` or
//! `failed`, never `processing`.
//!
//! Only one query per session runs at a time. Pause and terminate may arrive
//! concurrently; they flip the status first and then cancel the in-flight
//! query, which observes the cancellation at its next message or while
//! waiting for an approval or a retry backoff.

mod approval;
mod policy;
mod sink;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveManager, copy_tree};
use crate::client::{AgentClient, ClientFactory, ClientManager};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::hooks::{HookPipeline, HookRunOutcome};
use crate::permissions::PermissionGate;
use crate::prompt::{PromptInput, PromptRenderer, TemplateRenderer};
use crate::retry::RetryCoordinator;
use crate::store::{Page, PageRequest, SessionStore};
use crate::stream::{ExecutionSink, QuerySummary, StreamProcessor};
use crate::types::archive::{ArchiveMetadata, ArchiveStatus};
use crate::types::hooks::HookEvent;
use crate::types::identifiers::{MessageId, SessionId};
use crate::types::options::{RetryConfig, SessionConfig};
use crate::types::records::{
    HookExecutionRecord, MessageRecord, PermissionDecisionRecord, ToolCall,
};
use crate::types::session::{Session, SessionMetrics, SessionMode, SessionStatus};

pub use approval::{ApprovalDecision, ApprovalRequest, Approver};
pub use policy::{NO_APPROVER_REASON, ToolPolicy};
pub use sink::SessionSink;

pub(crate) use sink::transition;

/// Parameters for a new session
#[derive(Debug, Clone, Default)]
pub struct CreateSession {
    /// Owning user
    pub owner: String,
    /// Display name
    pub name: String,
    /// `interactive` unless created for a task
    pub mode: Option<SessionMode>,
    /// SDK configuration
    pub config: SessionConfig,
    /// Working directory; a fresh directory under the workspace root when unset
    pub working_directory: Option<PathBuf>,
}

/// Parameters for a fork
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForkRequest {
    /// Last parent message (by sequence number) to carry over; all when unset
    pub at_sequence: Option<u64>,
    /// Copy the parent's working directory into the fork's
    pub copy_files: bool,
    /// Display name; derived from the parent when unset
    pub name: Option<String>,
}

/// Why an in-flight query was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelReason {
    Pause,
    Terminate,
}

/// Cancellation state of the session's current query
struct QueryControl {
    cancel: CancellationToken,
    reason: Option<CancelReason>,
}

/// Per-session runtime state
struct SessionRuntime {
    query_lock: tokio::sync::Mutex<()>,
    control: Mutex<QueryControl>,
}

impl SessionRuntime {
    fn new() -> Self {
        Self {
            query_lock: tokio::sync::Mutex::new(()),
            control: Mutex::new(QueryControl {
                cancel: CancellationToken::new(),
                reason: None,
            }),
        }
    }

    /// Fresh token for a new query, optionally tied to an outer token
    fn arm(&self, parent: Option<&CancellationToken>) -> CancellationToken {
        let mut control = self.control.lock();
        control.cancel = parent.map_or_else(CancellationToken::new, CancellationToken::child_token);
        control.reason = None;
        control.cancel.clone()
    }

    fn cancel(&self, reason: CancelReason) {
        let mut control = self.control.lock();
        control.reason.get_or_insert(reason);
        control.cancel.cancel();
    }

    fn reason(&self) -> Option<CancelReason> {
        self.control.lock().reason
    }
}

struct Inner<F: ClientFactory> {
    config: EngineConfig,
    store: Arc<dyn SessionStore>,
    events: Arc<EventBus>,
    clients: ClientManager<F>,
    renderer: Arc<dyn PromptRenderer>,
    approver: Option<Arc<dyn Approver>>,
    archives: ArchiveManager,
    runtimes: Mutex<HashMap<SessionId, Arc<SessionRuntime>>>,
}

/// Builder for [`SessionOrchestrator`]
pub struct OrchestratorBuilder<F: ClientFactory> {
    config: EngineConfig,
    store: Arc<dyn SessionStore>,
    factory: Arc<F>,
    renderer: Option<Arc<dyn PromptRenderer>>,
    approver: Option<Arc<dyn Approver>>,
}

impl<F: ClientFactory> OrchestratorBuilder<F> {
    /// Engine configuration (defaults otherwise)
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Prompt renderer (`TemplateRenderer` otherwise)
    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn PromptRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Approver for `ask` decisions (they are denied otherwise)
    #[must_use]
    pub fn approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    /// Validate the configuration and build
    ///
    /// # Errors
    /// Returns `EngineError::Validation` if the engine configuration is invalid
    pub fn build(self) -> Result<SessionOrchestrator<F>> {
        self.config.validate()?;
        let events = Arc::new(EventBus::new(self.config.event_buffer));
        let archives = ArchiveManager::new(Arc::clone(&self.store), &self.config.archive_root);
        Ok(SessionOrchestrator {
            inner: Arc::new(Inner {
                clients: ClientManager::new(self.factory),
                renderer: self
                    .renderer
                    .unwrap_or_else(|| Arc::new(TemplateRenderer::new())),
                approver: self.approver,
                store: self.store,
                events,
                archives,
                runtimes: Mutex::new(HashMap::new()),
                config: self.config,
            }),
        })
    }
}

/// Drives sessions through their lifecycle
pub struct SessionOrchestrator<F: ClientFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: ClientFactory> Clone for SessionOrchestrator<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ClientFactory> SessionOrchestrator<F> {
    /// Start building an orchestrator over a store and a client factory
    pub fn builder(store: Arc<dyn SessionStore>, factory: Arc<F>) -> OrchestratorBuilder<F> {
        OrchestratorBuilder {
            config: EngineConfig::default(),
            store,
            factory,
            renderer: None,
            approver: None,
        }
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Backing store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Archive manager
    #[must_use]
    pub fn archives(&self) -> &ArchiveManager {
        &self.inner.archives
    }

    fn runtime(&self, session_id: &SessionId) -> Arc<SessionRuntime> {
        Arc::clone(
            self.inner
                .runtimes
                .lock()
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(SessionRuntime::new())),
        )
    }

    /// Entries of in-memory bookkeeping (query runtimes and client locks)
    ///
    /// Finished sessions and finished task runs hold none.
    #[must_use]
    pub fn tracked_state(&self) -> usize {
        self.inner.runtimes.lock().len() + self.inner.clients.tracked()
    }

    /// Drop per-session bookkeeping once the session can no longer run
    fn forget(&self, session_id: &SessionId) {
        self.inner.runtimes.lock().remove(session_id);
        self.inner.clients.release(session_id);
    }

    /// Drop the client lock used for an unrecorded run
    pub(crate) fn release_client_lock(&self, lock_key: &SessionId) {
        self.inner.clients.release(lock_key);
    }

    async fn transition(
        &self,
        session_id: &SessionId,
        to: SessionStatus,
        extra: impl FnOnce(&mut Session) + Send + 'static,
    ) -> Result<Session> {
        transition(
            self.inner.store.as_ref(),
            &self.inner.events,
            session_id,
            to,
            extra,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a session in `created` status
    ///
    /// # Errors
    /// - `EngineError::Validation` for an invalid configuration or pattern
    /// - `EngineError::Io` if the working directory cannot be created
    pub async fn create(&self, request: CreateSession) -> Result<Session> {
        let mut config = request.config;
        if config.retry == RetryConfig::default() {
            config.retry = self.inner.config.default_retry.clone();
        }
        config.validate()?;

        let id = SessionId::generate();
        let working_directory = request
            .working_directory
            .unwrap_or_else(|| self.inner.config.workspace_root.join(id.as_str()));
        tokio::fs::create_dir_all(&working_directory).await?;

        let now = Utc::now();
        let session = Session {
            name: if request.name.is_empty() {
                format!("session-{}", &id.as_str()[..8.min(id.as_str().len())])
            } else {
                request.name
            },
            id,
            owner: request.owner,
            mode: request.mode.unwrap_or(SessionMode::Interactive),
            status: SessionStatus::Created,
            config,
            metrics: SessionMetrics::default(),
            working_directory,
            sdk_session_id: None,
            parent_session_id: None,
            is_fork: false,
            forked_at_sequence: None,
            archive_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.inner.store.create_session(&session).await?;
        log::info!(
            "[{}] created {:?} session '{}' in {}",
            session.id,
            session.mode,
            session.name,
            session.working_directory.display()
        );
        Ok(session)
    }

    /// Fetch a session
    ///
    /// # Errors
    /// Returns `EngineError::NotFound` for unknown sessions
    pub async fn get(&self, session_id: &SessionId) -> Result<Session> {
        self.inner.store.get_session(session_id).await
    }

    /// List sessions, optionally for one owner
    ///
    /// # Errors
    /// Returns error if the store fails
    pub async fn list(&self, owner: Option<&str>, page: PageRequest) -> Result<Page<Session>> {
        self.inner.store.list_sessions(owner, page).await
    }

    /// Pause an `active` or `waiting` session
    ///
    /// A query waiting for approval is cancelled and the session stays
    /// `paused`.
    ///
    /// # Errors
    /// Returns `EngineError::StateConflict` from any other status
    pub async fn pause(&self, session_id: &SessionId) -> Result<Session> {
        let current = self.get(session_id).await?;
        if !matches!(current.status, SessionStatus::Active | SessionStatus::Waiting) {
            return Err(EngineError::state_conflict(format!(
                "cannot pause session {session_id} in status {}",
                current.status
            )));
        }
        let session = self
            .transition(session_id, SessionStatus::Paused, |_| {})
            .await?;
        self.runtime(session_id).cancel(CancelReason::Pause);
        log::info!("[{session_id}] paused");
        Ok(session)
    }

    /// Resume a paused session
    ///
    /// # Errors
    /// Returns `EngineError::StateConflict` unless the session is `paused`
    pub async fn resume(&self, session_id: &SessionId) -> Result<Session> {
        let current = self.get(session_id).await?;
        if current.status != SessionStatus::Paused {
            return Err(EngineError::state_conflict(format!(
                "cannot resume session {session_id} in status {}",
                current.status
            )));
        }
        let session = self
            .transition(session_id, SessionStatus::Active, |_| {})
            .await?;
        log::info!("[{session_id}] resumed");
        Ok(session)
    }

    /// Terminate a session from any non-terminal status
    ///
    /// Any in-flight query is cancelled cooperatively; its client is torn
    /// down by the scoped acquisition.
    ///
    /// # Errors
    /// Returns `EngineError::StateConflict` if the session already finished
    pub async fn terminate(&self, session_id: &SessionId) -> Result<Session> {
        let session = self
            .transition(session_id, SessionStatus::Terminated, |_| {})
            .await?;
        self.runtime(session_id).cancel(CancelReason::Terminate);
        self.forget(session_id);
        log::info!("[{session_id}] terminated");
        Ok(session)
    }

    /// Mark an idle session as completed
    ///
    /// # Errors
    /// Returns `EngineError::StateConflict` unless the session is `active`
    pub async fn complete(&self, session_id: &SessionId) -> Result<Session> {
        let session = self
            .transition(session_id, SessionStatus::Completed, |_| {})
            .await?;
        self.forget(session_id);
        log::info!("[{session_id}] completed");
        Ok(session)
    }

    /// Subscribe to a session's live events
    ///
    /// # Errors
    /// Returns `EngineError::NotFound` for unknown sessions
    pub async fn subscribe(&self, session_id: &SessionId) -> Result<broadcast::Receiver<SessionEvent>> {
        self.get(session_id).await?;
        Ok(self.inner.events.subscribe(session_id))
    }

    /// Messages of a session in sequence order
    ///
    /// # Errors
    /// Returns error if the store fails
    pub async fn messages(
        &self,
        session_id: &SessionId,
        page: PageRequest,
    ) -> Result<Page<MessageRecord>> {
        self.inner.store.list_messages(session_id, page).await
    }

    /// Tool calls of a session in creation order
    ///
    /// # Errors
    /// Returns error if the store fails
    pub async fn tool_calls(&self, session_id: &SessionId, page: PageRequest) -> Result<Page<ToolCall>> {
        self.inner.store.list_tool_calls(session_id, page).await
    }

    /// Hook execution log of a session
    ///
    /// # Errors
    /// Returns error if the store fails
    pub async fn hook_executions(&self, session_id: &SessionId) -> Result<Vec<HookExecutionRecord>> {
        self.inner.store.list_hook_executions(session_id).await
    }

    /// Permission decision log of a session
    ///
    /// # Errors
    /// Returns error if the store fails
    pub async fn permission_decisions(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<PermissionDecisionRecord>> {
        self.inner.store.list_permission_decisions(session_id).await
    }

    // ------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------

    /// Build the hook pipeline and tool policy for a configuration
    ///
    /// # Errors
    /// Returns `EngineError::Validation` for malformed tool patterns
    pub fn tool_policy(&self, config: &SessionConfig) -> Result<ToolPolicy> {
        let gate = PermissionGate::new(
            &config.allowed_tools,
            &config.disallowed_tools,
            config.permission_mode,
        )?;
        let hooks = HookPipeline::new(
            config.hooks.clone(),
            self.inner.config.hook_timeout(),
            self.inner.config.hook_failure_policy,
        );
        Ok(ToolPolicy::new(gate, hooks, self.inner.approver.clone()))
    }

    /// Run the hooks registered for `event` on a session
    ///
    /// Used for events the engine does not raise itself (`SubagentStop`,
    /// `PreCompact`). Invocations are recorded on the session.
    ///
    /// # Errors
    /// Returns error if the session is unknown or a record cannot be stored
    pub async fn run_hooks(
        &self,
        session_id: &SessionId,
        event: HookEvent,
        payload: serde_json::Value,
    ) -> Result<HookRunOutcome> {
        let session = self.get(session_id).await?;
        let policy = self.tool_policy(&session.config)?;
        let sink = self.session_sink(session_id);
        policy.run_hooks(&sink, event, payload, None).await
    }

    fn session_sink(&self, session_id: &SessionId) -> SessionSink {
        SessionSink::new(
            session_id.clone(),
            Arc::clone(&self.inner.store),
            Arc::clone(&self.inner.events),
        )
    }

    /// Render and send a prompt, then consume the response
    ///
    /// Allowed from `created`, `active` and `paused`. Concurrent queries on
    /// the same session wait for each other.
    ///
    /// # Errors
    /// - `EngineError::Validation` if the prompt cannot be rendered (no
    ///   attempt is made and the status does not change)
    /// - `EngineError::Hook` if a `UserPromptSubmit` hook refuses the prompt
    /// - `EngineError::StateConflict` if the session cannot take a query
    /// - `EngineError::RetriesExhausted` once the attempt budget is spent
    ///   (the session is then `failed`)
    /// - `EngineError::Cancelled` after pause or terminate
    pub async fn query(
        &self,
        session_id: &SessionId,
        prompt: impl Into<PromptInput>,
        variables: &HashMap<String, String>,
    ) -> Result<QuerySummary> {
        self.query_with_cancel(session_id, prompt.into(), variables, None)
            .await
    }

    /// [`query`](Self::query) that also stops when `outer` is cancelled
    ///
    /// Cancellation through `outer` leaves the session `terminated`.
    pub(crate) async fn query_with_cancel(
        &self,
        session_id: &SessionId,
        prompt: PromptInput,
        variables: &HashMap<String, String>,
        outer: Option<&CancellationToken>,
    ) -> Result<QuerySummary> {
        let queryable = |session: &Session| -> Result<()> {
            if matches!(
                session.status,
                SessionStatus::Created | SessionStatus::Active | SessionStatus::Paused
            ) {
                Ok(())
            } else {
                Err(EngineError::state_conflict(format!(
                    "cannot query session {session_id} in status {}",
                    session.status
                )))
            }
        };
        // Finished sessions never get a runtime back
        queryable(&self.get(session_id).await?)?;

        let runtime = self.runtime(session_id);
        let _serialized = runtime.query_lock.lock().await;

        let session = self.get(session_id).await?;
        if let Err(e) = queryable(&session) {
            if session.status.is_terminal() {
                self.forget(session_id);
            }
            return Err(e);
        }

        let rendered = self.inner.renderer.render(&prompt, variables).await?;
        let policy = Arc::new(self.tool_policy(&session.config)?);
        let sink: Arc<dyn ExecutionSink> = Arc::new(self.session_sink(session_id));

        let submitted = policy
            .run_hooks(
                sink.as_ref(),
                HookEvent::UserPromptSubmit,
                serde_json::json!({ "prompt": rendered }),
                None,
            )
            .await?;
        if !submitted.continue_execution {
            return Err(EngineError::hook(
                submitted
                    .stop_reason
                    .unwrap_or_else(|| "prompt rejected by hook".to_string()),
            ));
        }
        let rendered = submitted
            .output
            .as_ref()
            .and_then(|o| o.get("prompt"))
            .and_then(serde_json::Value::as_str)
            .map_or(rendered, str::to_string);

        let mut config = session.config.clone();
        if let Some(sdk_session_id) = &session.sdk_session_id {
            config.resume = Some(sdk_session_id.clone());
            config.fork_session = false;
        }

        let cancel = runtime.arm(outer);
        log::info!("[{session_id}] query ({} chars)", rendered.len());

        let outcome = self
            .execute(
                session_id,
                &config,
                &session.working_directory,
                &rendered,
                Arc::clone(&sink),
                Arc::clone(&policy),
                &cancel,
            )
            .await;

        // A status change racing a pause or terminate surfaces as a conflict
        let outcome = match (outcome, runtime.reason()) {
            (Err(e), Some(reason)) if !e.is_cancellation() => {
                log::debug!("[{session_id}] {e} after {reason:?}");
                Err(EngineError::cancelled(format!("query cancelled ({reason:?})")))
            }
            (outcome, _) => outcome,
        };

        self.settle(session_id, &runtime, &outcome).await?;

        if let Ok(summary) = &outcome {
            let payload = serde_json::to_value(summary)?;
            policy
                .run_hooks(sink.as_ref(), HookEvent::Stop, payload, None)
                .await?;
        }
        outcome
    }

    /// Bring the session to a settled status after a query
    async fn settle(
        &self,
        session_id: &SessionId,
        runtime: &SessionRuntime,
        outcome: &Result<QuerySummary>,
    ) -> Result<()> {
        let current = self.get(session_id).await?;
        if current.status.is_terminal() {
            self.forget(session_id);
            return Ok(());
        }
        if current.status == SessionStatus::Paused {
            return Ok(());
        }

        match outcome {
            Ok(_) => {
                self.transition(session_id, SessionStatus::Active, |_| {})
                    .await?;
            }
            Err(e) if e.is_cancellation() => {
                // Pause and terminate already moved the status themselves
                if !matches!(
                    runtime.reason(),
                    Some(CancelReason::Pause | CancelReason::Terminate)
                ) {
                    self.transition(session_id, SessionStatus::Terminated, |s| {
                        s.error_message.get_or_insert_with(|| "query cancelled".to_string());
                    })
                    .await?;
                    self.forget(session_id);
                }
            }
            Err(e) => {
                let message = e.to_string();
                log::error!("[{session_id}] query failed: {message}");
                self.transition(session_id, SessionStatus::Failed, move |s| {
                    s.error_message = Some(message);
                    s.metrics.total_errors += 1;
                })
                .await?;
                self.forget(session_id);
            }
        }
        Ok(())
    }

    /// Retry `with_client { query; drain }` for one prompt
    ///
    /// The lock key serializes clients (a session id, or an execution id for
    /// unrecorded runs). Status changes go through `sink`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn execute(
        &self,
        lock_key: &SessionId,
        config: &SessionConfig,
        cwd: &Path,
        prompt: &str,
        sink: Arc<dyn ExecutionSink>,
        policy: Arc<ToolPolicy>,
        cancel: &CancellationToken,
    ) -> Result<QuerySummary> {
        let coordinator = RetryCoordinator::new(&config.retry);

        coordinator
            .run(
                cancel,
                |attempt| {
                    let sink = Arc::clone(&sink);
                    let policy = Arc::clone(&policy);
                    let cancel = cancel.clone();
                    let prompt = prompt.to_string();
                    async move {
                        log::debug!("[{lock_key}] attempt {attempt}");
                        sink.set_status(SessionStatus::Connecting).await?;
                        self.inner
                            .clients
                            .with_client(lock_key, config, Some(cwd), move |client| {
                                Box::pin(async move {
                                    sink.set_status(SessionStatus::Active).await?;
                                    client.query(&prompt).await?;
                                    sink.set_status(SessionStatus::Processing).await?;
                                    let stream = client.receive_response()?;
                                    StreamProcessor::new(sink.as_ref(), policy.as_ref(), &cancel)
                                        .run(client, stream)
                                        .await
                                })
                            })
                            .await
                    }
                },
                |event| {
                    let sink = Arc::clone(&sink);
                    async move {
                        if let Err(e) = sink.record_retry(&event).await {
                            log::warn!("[{lock_key}] failed to record retry: {e}");
                        }
                    }
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Fork and archive
    // ------------------------------------------------------------------

    /// Fork a session from its history
    ///
    /// With `at_sequence` only messages up to and including that sequence
    /// number are carried over; otherwise all of them, and the SDK
    /// conversation itself is forked on the next query.
    ///
    /// # Errors
    /// - `EngineError::StateConflict` if the parent has no messages
    /// - `EngineError::Validation` if `at_sequence` is beyond the history
    pub async fn fork(&self, session_id: &SessionId, request: ForkRequest) -> Result<Session> {
        let parent = self.get(session_id).await?;
        let history = self
            .inner
            .store
            .list_messages(session_id, PageRequest::all())
            .await?
            .items;
        let Some(last) = history.last().map(|m| m.sequence_number) else {
            return Err(EngineError::state_conflict(format!(
                "session {session_id} has no messages to fork"
            )));
        };
        let at = request.at_sequence.unwrap_or(last);
        if at == 0 || at > last {
            return Err(EngineError::validation(format!(
                "fork point {at} is outside 1..={last}"
            )));
        }

        let mut config = parent.config.clone();
        if at == last && parent.sdk_session_id.is_some() {
            config.resume.clone_from(&parent.sdk_session_id);
            config.fork_session = true;
        } else {
            // The SDK cannot fork mid-conversation; the fork starts a new one
            config.resume = None;
            config.fork_session = false;
        }

        let mut fork = self
            .create(CreateSession {
                owner: parent.owner.clone(),
                name: request
                    .name
                    .unwrap_or_else(|| format!("{} (fork)", parent.name)),
                mode: Some(SessionMode::Forked),
                config,
                working_directory: None,
            })
            .await?;

        let fork_id = fork.id.clone();
        let parent_id = parent.id.clone();
        let copied = history.iter().filter(|m| m.sequence_number <= at).count() as u64;
        fork = self
            .inner
            .store
            .modify_session(
                &fork_id,
                Box::new(move |s: &mut Session| {
                    s.parent_session_id = Some(parent_id);
                    s.is_fork = true;
                    s.forked_at_sequence = Some(at);
                    s.metrics.total_messages = copied;
                    Ok(())
                }),
            )
            .await?;

        let mut remapped: HashMap<MessageId, MessageId> = HashMap::new();
        for message in history.iter().filter(|m| m.sequence_number <= at) {
            let id = remapped
                .entry(message.id.clone())
                .or_insert_with(MessageId::generate)
                .clone();
            let parent_message_id = message.parent_message_id.as_ref().map(|p| {
                remapped
                    .entry(p.clone())
                    .or_insert_with(MessageId::generate)
                    .clone()
            });
            let copy = MessageRecord {
                id,
                session_id: fork.id.clone(),
                parent_message_id,
                ..message.clone()
            };
            self.inner.store.append_message(&copy).await?;
        }

        if request.copy_files && parent.working_directory.is_dir() {
            let files =
                copy_tree(parent.working_directory.clone(), fork.working_directory.clone()).await?;
            log::debug!("[{}] copied {files} file(s) from parent", fork.id);
        }

        log::info!("[{}] forked from {} at message {at}", fork.id, parent.id);
        Ok(fork)
    }

    /// Archive the working directory of a finished session
    ///
    /// On success the session records the archive id and moves to
    /// `archived`; the live directory is deleted when the engine is
    /// configured to purge after archiving.
    ///
    /// # Errors
    /// - `EngineError::StateConflict` unless the session is completed,
    ///   failed or terminated
    /// - `EngineError::Archive` if writing the archive failed (the live
    ///   directory is untouched)
    pub async fn archive(&self, session_id: &SessionId) -> Result<ArchiveMetadata> {
        let session = self.get(session_id).await?;
        if !matches!(
            session.status,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Terminated
        ) {
            return Err(EngineError::state_conflict(format!(
                "cannot archive session {session_id} in status {}",
                session.status
            )));
        }

        let metadata = self.inner.archives.archive(&session).await?;
        if metadata.status != ArchiveStatus::Completed {
            return Err(EngineError::archive(
                metadata
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "archive did not complete".to_string()),
            ));
        }

        let archive_id = metadata.id.clone();
        self.transition(session_id, SessionStatus::Archived, move |s| {
            s.archive_id = Some(archive_id);
        })
        .await?;

        let metadata = if self.inner.config.purge_after_archive {
            self.inner.archives.purge_working_directory(&metadata).await?
        } else {
            metadata
        };

        self.inner.events.close(session_id);
        self.forget(session_id);
        Ok(metadata)
    }
}
