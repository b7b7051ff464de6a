//! Unattended task executions
//!
//! [`TaskScheduler::execute`] records a `pending` [`TaskExecution`] and runs
//! it on its own tokio task. At most `max_concurrent_executions` run at once;
//! the rest wait as `queued`.
//!
//! Two recording modes exist. `async` (the default) keeps nothing but the
//! terminal summary on the execution record. `session` runs the task inside
//! a `background` session so every message, tool call, hook and permission
//! decision is kept like for an interactive session.
//!
//! Cancellation is cooperative: `cancel` flags the record and fires the
//! execution's token, which the stream processor observes between messages.
//! Retrying never touches the original execution; it clones it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::client::ClientFactory;
use crate::error::{EngineError, Result};
use crate::orchestrator::{CreateSession, SessionOrchestrator};
use crate::prompt::{PromptInput, TemplateRenderer};
use crate::retry::RetryEvent;
use crate::store::SessionStore;
use crate::stream::{ExecutionSink, QuerySummary};
use crate::types::identifiers::{ExecutionId, SessionId};
use crate::types::options::{RetryConfig, SessionConfig};
use crate::types::permissions::PermissionMode;
use crate::types::records::{
    HookExecutionRecord, MessageRecord, PermissionDecisionRecord, ToolCall, ToolCallStatus,
};
use crate::types::session::{SessionMode, SessionStatus};
use crate::types::task::{
    ExecutionMode, ExecutionStatus, TaskDefinition, TaskExecution, TriggerMetadata,
    TriggerSource,
};

/// Handle on a spawned execution
struct RunningExecution {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

struct Shared<F: ClientFactory> {
    orchestrator: SessionOrchestrator<F>,
    slots: Arc<Semaphore>,
    running: Mutex<HashMap<ExecutionId, RunningExecution>>,
}

/// Runs tasks in the background and tracks their executions
pub struct TaskScheduler<F: ClientFactory> {
    shared: Arc<Shared<F>>,
}

impl<F: ClientFactory> Clone for TaskScheduler<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ClientFactory> TaskScheduler<F> {
    /// Scheduler sharing the orchestrator's store and clients
    pub fn new(orchestrator: SessionOrchestrator<F>) -> Self {
        let permits = orchestrator.config().max_concurrent_executions;
        Self {
            shared: Arc::new(Shared {
                orchestrator,
                slots: Arc::new(Semaphore::new(permits)),
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn store(&self) -> &Arc<dyn SessionStore> {
        self.shared.orchestrator.store()
    }

    /// Start a run of `task`
    ///
    /// Caller variables override the task's defaults. The prompt and the
    /// configuration are checked before anything is recorded.
    ///
    /// # Errors
    /// - `EngineError::Validation` for a template that does not render or an
    ///   invalid configuration
    /// - store errors
    pub async fn execute(
        &self,
        task: &TaskDefinition,
        variables: HashMap<String, String>,
        trigger: TriggerMetadata,
    ) -> Result<ExecutionId> {
        let mut merged = task.default_variables.clone();
        merged.extend(variables);
        self.store().save_task(task).await?;
        self.spawn(task, merged, task.execution_mode, trigger).await
    }

    /// Clone an execution that is `pending`, `queued` or `failed` and run the
    /// clone with the same variables
    ///
    /// # Errors
    /// - `EngineError::StateConflict` from any other status
    /// - `EngineError::NotFound` for unknown executions or tasks
    pub async fn retry(&self, execution_id: &ExecutionId) -> Result<ExecutionId> {
        let original = self.store().get_execution(execution_id).await?;
        if !original.status.is_retryable() {
            return Err(EngineError::state_conflict(format!(
                "execution {execution_id} cannot be retried from status {:?}",
                original.status
            )));
        }
        let task = self.store().get_task(&original.task_id).await?;
        let trigger = TriggerMetadata {
            source: TriggerSource::Retry,
            triggered_by: original.trigger.triggered_by.clone(),
            retry_of: Some(original.id.clone()),
        };
        log::info!("[{execution_id}] retrying as a new execution");
        self.spawn(&task, original.variables, original.mode, trigger)
            .await
    }

    /// Request cooperative cancellation
    ///
    /// A running execution stops at its next stream boundary; one that never
    /// started is cancelled right away.
    ///
    /// # Errors
    /// Returns `EngineError::StateConflict` if the execution already finished
    pub async fn cancel(&self, execution_id: &ExecutionId) -> Result<TaskExecution> {
        let token = self
            .shared
            .running
            .lock()
            .get(execution_id)
            .map(|r| r.cancel.clone());
        let live = token.is_some();

        let execution = self
            .store()
            .modify_execution(
                execution_id,
                Box::new(move |e: &mut TaskExecution| {
                    if e.status.is_terminal() {
                        return Err(EngineError::state_conflict(format!(
                            "execution {} already {:?}",
                            e.id, e.status
                        )));
                    }
                    e.cancel_requested = true;
                    if !live {
                        e.status = ExecutionStatus::Cancelled;
                        e.completed_at = Some(Utc::now());
                    }
                    Ok(())
                }),
            )
            .await?;

        if let Some(token) = token {
            token.cancel();
        }
        log::info!("[{execution_id}] cancellation requested");
        Ok(execution)
    }

    /// Current record of an execution
    ///
    /// # Errors
    /// Returns `EngineError::NotFound` for unknown executions
    pub async fn status(&self, execution_id: &ExecutionId) -> Result<TaskExecution> {
        self.store().get_execution(execution_id).await
    }

    /// Wait until an execution has finished and return its final record
    ///
    /// # Errors
    /// Returns `EngineError::NotFound` for unknown executions
    pub async fn wait(&self, execution_id: &ExecutionId) -> Result<TaskExecution> {
        let done = self
            .shared
            .running
            .lock()
            .get(execution_id)
            .map(|r| r.done.clone());
        if let Some(mut done) = done {
            // The sender is dropped when the run ends, which also counts
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.status(execution_id).await
    }

    /// Cancel every running execution and wait for all of them to finish
    pub async fn shutdown(&self) {
        let running: Vec<(ExecutionId, CancellationToken, watch::Receiver<bool>)> = self
            .shared
            .running
            .lock()
            .iter()
            .map(|(id, r)| (id.clone(), r.cancel.clone(), r.done.clone()))
            .collect();

        log::info!("Shutting down {} execution(s)", running.len());
        for (_, cancel, _) in &running {
            cancel.cancel();
        }
        for (id, _, mut done) in running {
            let _ = done.wait_for(|finished| *finished).await;
            log::debug!("[{id}] stopped");
        }
    }

    async fn spawn(
        &self,
        task: &TaskDefinition,
        variables: HashMap<String, String>,
        mode: ExecutionMode,
        trigger: TriggerMetadata,
    ) -> Result<ExecutionId> {
        let prompt = TemplateRenderer::substitute(&task.prompt_template, &variables)?;
        if prompt.trim().is_empty() {
            return Err(EngineError::validation("rendered task prompt is empty"));
        }

        let mut config = task.config.clone();
        config.permission_mode = PermissionMode::AcceptEdits;
        if config.retry == RetryConfig::default() {
            config.retry = self.shared.orchestrator.config().default_retry.clone();
        }
        config.validate()?;

        let execution = TaskExecution {
            id: ExecutionId::generate(),
            task_id: task.id.clone(),
            session_id: None,
            status: ExecutionStatus::Pending,
            mode,
            variables,
            trigger,
            cancel_requested: false,
            result_data: None,
            message_count: 0,
            tool_call_count: 0,
            retry_count: 0,
            error_message: None,
            duration_ms: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.store().create_execution(&execution).await?;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.shared.running.lock().insert(
            execution.id.clone(),
            RunningExecution {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let run = Run {
            shared: Arc::clone(&self.shared),
            execution_id: execution.id.clone(),
            owner: task.owner.clone(),
            name: task.name.clone(),
            mode,
            prompt,
            config,
            cancel,
        };
        log::info!(
            "[{}] execution of task '{}' accepted ({mode:?})",
            execution.id,
            task.name
        );
        let id = execution.id;
        tokio::spawn(async move {
            let execution_id = run.execution_id.clone();
            let shared = Arc::clone(&run.shared);
            run.drive().await;
            shared.running.lock().remove(&execution_id);
            let _ = done_tx.send(true);
        });
        Ok(id)
    }
}

/// One spawned execution
struct Run<F: ClientFactory> {
    shared: Arc<Shared<F>>,
    execution_id: ExecutionId,
    owner: String,
    name: String,
    mode: ExecutionMode,
    prompt: String,
    config: SessionConfig,
    cancel: CancellationToken,
}

/// How a run ended
enum Outcome {
    Finished {
        summary: QuerySummary,
        retries: u32,
    },
    Failed {
        error: EngineError,
        retries: u32,
    },
}

impl<F: ClientFactory> Run<F> {
    fn store(&self) -> &Arc<dyn SessionStore> {
        self.shared.orchestrator.store()
    }

    async fn update(
        &self,
        change: impl FnOnce(&mut TaskExecution) + Send + 'static,
    ) -> Result<TaskExecution> {
        self.store()
            .modify_execution(
                &self.execution_id,
                Box::new(move |e: &mut TaskExecution| {
                    change(e);
                    Ok(())
                }),
            )
            .await
    }

    async fn drive(self) {
        let id = self.execution_id.clone();
        if let Err(e) = self.drive_inner().await {
            log::error!("[{id}] execution bookkeeping failed: {e}");
        }
    }

    async fn drive_inner(&self) -> Result<()> {
        let current = self
            .update(|e| {
                if e.status == ExecutionStatus::Pending {
                    e.status = ExecutionStatus::Queued;
                }
            })
            .await?;
        if current.status.is_terminal() {
            return Ok(());
        }

        let slots = Arc::clone(&self.shared.slots);
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            permit = slots.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return self.finish_cancelled(None).await;
        };

        let current = self.store().get_execution(&self.execution_id).await?;
        if current.cancel_requested || current.status.is_terminal() {
            return self.finish_cancelled(None).await;
        }

        self.update(|e| {
            e.status = ExecutionStatus::Running;
            e.started_at = Some(Utc::now());
        })
        .await?;
        log::info!("[{}] running", self.execution_id);

        let started = Instant::now();
        let outcome = match self.mode {
            ExecutionMode::Async => self.run_detached().await,
            ExecutionMode::Session => self
                .run_in_session()
                .await
                .unwrap_or_else(|error| Outcome::Failed { error, retries: 0 }),
        };
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Outcome::Failed { error, .. } if error.is_cancellation() || self.cancel.is_cancelled() => {
                self.finish_cancelled(Some(elapsed)).await
            }
            Outcome::Failed { error, retries } => {
                let message = error.to_string();
                log::error!("[{}] failed: {message}", self.execution_id);
                self.update(move |e| {
                    e.status = ExecutionStatus::Failed;
                    e.error_message = Some(message);
                    e.retry_count = retries;
                    e.duration_ms = Some(elapsed);
                    e.completed_at = Some(Utc::now());
                })
                .await
                .map(|_| ())
            }
            Outcome::Finished { summary, retries } => {
                let result_data = serde_json::to_value(&summary)?;
                log::info!(
                    "[{}] completed: {} message(s), {} tool call(s)",
                    self.execution_id,
                    summary.messages,
                    summary.tool_calls
                );
                self.update(move |e| {
                    e.status = ExecutionStatus::Completed;
                    e.message_count = summary.messages;
                    e.tool_call_count = summary.tool_calls;
                    e.retry_count = retries;
                    e.result_data = Some(result_data);
                    e.duration_ms = Some(elapsed);
                    e.completed_at = Some(Utc::now());
                })
                .await
                .map(|_| ())
            }
        }
    }

    /// Terminal `cancelled`; counters keep whatever they held before
    async fn finish_cancelled(&self, elapsed: Option<u64>) -> Result<()> {
        log::info!("[{}] cancelled", self.execution_id);
        self.update(move |e| {
            e.status = ExecutionStatus::Cancelled;
            e.cancel_requested = true;
            e.duration_ms = elapsed;
            e.completed_at = Some(Utc::now());
        })
        .await
        .map(|_| ())
    }

    /// Summary-only run in a scratch working directory
    ///
    /// The directory and the client lock live only as long as the run.
    async fn run_detached(&self) -> Outcome {
        let orchestrator = &self.shared.orchestrator;
        let scratch = match self.scratch_dir().await {
            Ok(scratch) => scratch,
            Err(error) => return Outcome::Failed { error, retries: 0 },
        };

        let policy = match orchestrator.tool_policy(&self.config) {
            Ok(policy) => Arc::new(policy),
            Err(error) => return Outcome::Failed { error, retries: 0 },
        };
        let sink = Arc::new(SummarySink::new(self.execution_id.clone()));
        let lock_key = SessionId::new(format!("exec-{}", self.execution_id));

        let result = orchestrator
            .execute(
                &lock_key,
                &self.config,
                scratch.path(),
                &self.prompt,
                Arc::clone(&sink) as Arc<dyn ExecutionSink>,
                policy,
                &self.cancel,
            )
            .await;
        orchestrator.release_client_lock(&lock_key);

        let path = scratch.path().to_path_buf();
        match tokio::task::spawn_blocking(move || scratch.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!(
                "[{}] scratch {} not removed: {e}",
                self.execution_id,
                path.display()
            ),
            Err(e) => log::warn!("[{}] scratch cleanup panicked: {e}", self.execution_id),
        }

        let retries = sink.retries();
        match result {
            Ok(summary) => Outcome::Finished { summary, retries },
            Err(error) => Outcome::Failed { error, retries },
        }
    }

    async fn scratch_dir(&self) -> Result<TempDir> {
        let root = &self.shared.orchestrator.config().workspace_root;
        tokio::fs::create_dir_all(root).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("exec-{}-", self.execution_id))
            .tempdir_in(root)?;
        Ok(scratch)
    }

    /// Full-detail run inside a fresh background session
    async fn run_in_session(&self) -> Result<Outcome> {
        let orchestrator = &self.shared.orchestrator;
        let session = orchestrator
            .create(CreateSession {
                owner: self.owner.clone(),
                name: self.name.clone(),
                mode: Some(SessionMode::Background),
                config: self.config.clone(),
                working_directory: None,
            })
            .await?;
        let session_id = session.id.clone();
        let linked = session_id.clone();
        self.update(move |e| e.session_id = Some(linked)).await?;

        let result = orchestrator
            .query_with_cancel(
                &session_id,
                PromptInput::String(self.prompt.clone()),
                &HashMap::new(),
                Some(&self.cancel),
            )
            .await;
        let session = orchestrator.get(&session_id).await?;
        let retries = session.metrics.total_retries;

        Ok(match result {
            Ok(summary) => {
                if session.status == SessionStatus::Active {
                    orchestrator.complete(&session_id).await?;
                }
                Outcome::Finished { summary, retries }
            }
            Err(error) => Outcome::Failed { error, retries },
        })
    }
}

/// Sink that keeps nothing but counters
///
/// Used by `async` executions: no session exists, so messages, tool calls
/// and audit records are dropped after being counted.
pub struct SummarySink {
    execution_id: ExecutionId,
    sequence: AtomicU64,
    messages: AtomicU64,
    tool_calls: AtomicU64,
    retries: AtomicU32,
}

impl SummarySink {
    /// Counting sink for one execution
    #[must_use]
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            sequence: AtomicU64::new(0),
            messages: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            retries: AtomicU32::new(0),
        }
    }

    /// Finalized messages seen
    #[must_use]
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::SeqCst)
    }

    /// Tool calls seen
    #[must_use]
    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::SeqCst)
    }

    /// Retryable failures seen
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionSink for SummarySink {
    fn session_id(&self) -> Option<&SessionId> {
        None
    }

    async fn last_sequence(&self) -> Result<u64> {
        Ok(self.sequence.load(Ordering::SeqCst))
    }

    async fn record_message(&self, message: &MessageRecord) -> Result<()> {
        self.sequence
            .fetch_max(message.sequence_number, Ordering::SeqCst);
        if !message.is_partial {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn record_tool_call(&self, call: &ToolCall) -> Result<()> {
        if call.status == ToolCallStatus::Pending {
            self.tool_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn record_permission(&self, _record: &PermissionDecisionRecord) -> Result<()> {
        Ok(())
    }

    async fn record_hook(&self, _record: &HookExecutionRecord) -> Result<()> {
        Ok(())
    }

    async fn set_status(&self, _status: SessionStatus) -> Result<()> {
        Ok(())
    }

    async fn record_summary(&self, summary: &QuerySummary) -> Result<()> {
        log::debug!(
            "[{}] result: {} turn(s), ${:.4}",
            self.execution_id,
            summary.num_turns,
            summary.cost_usd
        );
        Ok(())
    }

    async fn record_retry(&self, event: &RetryEvent) -> Result<()> {
        self.retries.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "[{}] attempt {}/{} failed: {}",
            self.execution_id,
            event.attempt,
            event.max_attempts,
            event.error
        );
        Ok(())
    }
}
