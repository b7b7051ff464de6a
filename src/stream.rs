//! Consumption of one query's message stream
//!
//! [`StreamProcessor`] drains the owned stream returned by
//! [`AgentClient::receive_response`], numbers and records every message,
//! turns tool-use blocks into [`ToolCall`]s routed through a
//! [`ToolAuthorizer`], and folds the terminal result into a
//! [`QuerySummary`].
//!
//! Tool uses are authorized as soon as the assistant announces them. The
//! answer is held until the CLI sends the matching `can_use_tool` control
//! request and is then written back under that request's id. Control
//! traffic is never recorded as a message.
//!
//! Streams are single-pass: once drained (or abandoned) they are never
//! resumed. A new query always gets a new stream.
//!
//! Where records go is decided by the [`ExecutionSink`]: a session-backed
//! sink persists everything and publishes live events, a summary sink only
//! counts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::client::{AgentClient, MessageStream};
use crate::error::{EngineError, Result};
use crate::retry::RetryEvent;
use crate::types::identifiers::{MessageId, SdkSessionId, SessionId, ToolCallId, ToolName};
use crate::types::messages::{ContentBlock, ControlRequest, Message};
use crate::types::permissions::{PermissionDecision, ToolAuthorization};
use crate::types::records::{
    HookExecutionRecord, MessageRecord, MessageType, PermissionDecisionRecord, ToolCall,
    ToolCallStatus,
};
use crate::types::session::SessionStatus;

/// Totals for one query, folded from its result message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySummary {
    /// Finalized messages recorded
    pub messages: u64,
    /// Partial chunks recorded
    pub partial_messages: u64,
    /// Tool calls observed
    pub tool_calls: u64,
    /// Tool calls refused
    pub denied_tool_calls: u64,
    /// Tool calls that failed
    pub failed_tool_calls: u64,
    /// Input tokens reported by the result
    pub input_tokens: u64,
    /// Output tokens reported by the result
    pub output_tokens: u64,
    /// Cost reported by the result
    pub cost_usd: f64,
    /// Duration reported by the result
    pub duration_ms: u64,
    /// Turns reported by the result
    pub num_turns: u32,
    /// Whether the result reported an error
    pub is_error: bool,
    /// Result subtype (`success`, `error_max_turns`, ...)
    pub subtype: Option<String>,
    /// Final result text
    pub result: Option<String>,
    /// Conversation id announced by the SDK
    pub sdk_session_id: Option<SdkSessionId>,
}

/// Final say on one tool use
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Allow or deny (never `ask`)
    pub decision: PermissionDecision,
    /// Human-readable reason
    pub reason: String,
    /// Input replacement supplied by a hook
    pub updated_input: Option<serde_json::Value>,
}

impl Authorization {
    /// Whether the tool may run
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.decision == PermissionDecision::Allow
    }
}

/// Where a stream's records go
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Session the records belong to, when there is one
    fn session_id(&self) -> Option<&SessionId>;

    /// Highest sequence number already used (0 when none)
    async fn last_sequence(&self) -> Result<u64>;

    /// Record a message (final or partial)
    async fn record_message(&self, message: &MessageRecord) -> Result<()>;

    /// Record a tool call when created and after each status change
    async fn record_tool_call(&self, call: &ToolCall) -> Result<()>;

    /// Record a permission evaluation
    async fn record_permission(&self, record: &PermissionDecisionRecord) -> Result<()>;

    /// Record a hook invocation
    async fn record_hook(&self, record: &HookExecutionRecord) -> Result<()>;

    /// Move the session along its state machine (`processing` / `waiting`)
    async fn set_status(&self, status: SessionStatus) -> Result<()>;

    /// Fold a finished query into running totals
    async fn record_summary(&self, summary: &QuerySummary) -> Result<()>;

    /// Count a retryable failure absorbed by the retry coordinator
    async fn record_retry(&self, event: &RetryEvent) -> Result<()>;
}

/// Decides whether an observed tool use may run
#[async_trait]
pub trait ToolAuthorizer: Send + Sync {
    /// Run pre-tool hooks and the permission chain for a pending call
    ///
    /// Must record exactly one permission decision through `sink` before
    /// returning `Ok`.
    async fn authorize(
        &self,
        call: &ToolCall,
        sink: &dyn ExecutionSink,
        cancel: &CancellationToken,
    ) -> Result<Authorization>;

    /// Run post-tool hooks for a call that produced a result
    async fn after_tool(&self, call: &ToolCall, sink: &dyn ExecutionSink) -> Result<()>;
}

/// Drains one query's stream
pub struct StreamProcessor<'a> {
    sink: &'a dyn ExecutionSink,
    authorizer: &'a dyn ToolAuthorizer,
    cancel: &'a CancellationToken,
    label: String,
}

/// Decision waiting for the CLI's permission prompt
struct HeldAnswer {
    tool_use_id: String,
    tool_name: String,
    reply: ToolAuthorization,
}

/// Mutable per-stream bookkeeping
struct StreamState {
    next_sequence: u64,
    pending_assistant: Option<MessageId>,
    open_calls: HashMap<String, ToolCall>,
    held: Vec<HeldAnswer>,
    summary: QuerySummary,
}

impl StreamState {
    /// Take the held answer for a prompt, by tool use id or else by tool name
    fn take_answer(&mut self, tool_use_id: Option<&str>, tool_name: &str) -> Option<ToolAuthorization> {
        let at = match tool_use_id {
            Some(id) => self.held.iter().position(|h| h.tool_use_id == id),
            None => self.held.iter().position(|h| h.tool_name == tool_name),
        }?;
        Some(self.held.remove(at).reply)
    }
}

impl<'a> StreamProcessor<'a> {
    /// Create a processor writing to `sink`
    pub fn new(
        sink: &'a dyn ExecutionSink,
        authorizer: &'a dyn ToolAuthorizer,
        cancel: &'a CancellationToken,
    ) -> Self {
        let label = sink
            .session_id()
            .map_or_else(|| "unrecorded".to_string(), ToString::to_string);
        Self {
            sink,
            authorizer,
            cancel,
            label,
        }
    }

    /// Consume `stream` until the result message, exhaustion, or cancellation
    ///
    /// Cancellation is checked before every message. Tool calls still open
    /// when processing stops are marked failed.
    ///
    /// # Errors
    /// - `EngineError::Cancelled` when the token fires
    /// - `EngineError::Connection` when the stream ends without a result
    /// - any error yielded by the stream or the sink
    pub async fn run<C>(&self, client: &mut C, mut stream: MessageStream) -> Result<QuerySummary>
    where
        C: AgentClient + ?Sized,
    {
        let mut state = StreamState {
            next_sequence: self.sink.last_sequence().await? + 1,
            pending_assistant: None,
            open_calls: HashMap::new(),
            held: Vec::new(),
            summary: QuerySummary::default(),
        };

        let outcome = self.drain(client, &mut stream, &mut state).await;
        drop(stream);

        if outcome.as_ref().is_err_and(EngineError::is_cancellation) {
            // Cancelled work records nothing further
            return outcome.map(|()| state.summary);
        }

        self.fail_open_calls(&mut state).await?;
        outcome?;
        self.sink.record_summary(&state.summary).await?;
        Ok(state.summary)
    }

    async fn drain<C>(
        &self,
        client: &mut C,
        stream: &mut MessageStream,
        state: &mut StreamState,
    ) -> Result<()>
    where
        C: AgentClient + ?Sized,
    {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    log::info!("[{}] stream cancelled", self.label);
                    return Err(EngineError::cancelled("query cancelled while streaming"));
                }
                next = stream.next() => next,
            };

            let Some(message) = next else {
                return Err(EngineError::connection(
                    "message stream ended before a result",
                ));
            };

            if self.handle(client, message?, state).await? {
                return Ok(());
            }
        }
    }

    /// Returns `true` once the result message has been handled
    async fn handle<C>(&self, client: &mut C, message: Message, state: &mut StreamState) -> Result<bool>
    where
        C: AgentClient + ?Sized,
    {
        if let Some(id) = message.sdk_session_id() {
            state.summary.sdk_session_id = Some(id);
        }

        match &message {
            Message::StreamEvent { event, .. } => {
                let parent = state
                    .pending_assistant
                    .get_or_insert_with(MessageId::generate)
                    .clone();
                let record =
                    self.build_record(state, MessageType::Assistant, event.clone(), true, Some(parent), None);
                self.sink.record_message(&record).await?;
                state.summary.partial_messages += 1;
                Ok(false)
            }
            Message::Assistant { message: content, .. } => {
                let id = state
                    .pending_assistant
                    .take()
                    .unwrap_or_else(MessageId::generate);
                let mut record = self.build_record(
                    state,
                    MessageType::Assistant,
                    serde_json::to_value(&message)?,
                    false,
                    None,
                    Some(content.model.clone()),
                );
                record.id = id.clone();
                self.sink.record_message(&record).await?;
                state.summary.messages += 1;

                for block in &content.content {
                    if let ContentBlock::ToolUse { id: tool_use_id, name, input } = block {
                        self.handle_tool_use(state, &record.id, tool_use_id, name, input)
                            .await?;
                    }
                }
                Ok(false)
            }
            Message::User { .. } => {
                let record = self.build_record(
                    state,
                    MessageType::User,
                    serde_json::to_value(&message)?,
                    false,
                    None,
                    None,
                );
                self.sink.record_message(&record).await?;
                state.summary.messages += 1;

                for block in message.blocks() {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } = block
                    {
                        let output = content.as_ref().map(|c| c.to_json());
                        self.handle_tool_result(state, tool_use_id, output, is_error.unwrap_or(false))
                            .await?;
                    }
                }
                Ok(false)
            }
            Message::System { .. } => {
                let record = self.build_record(
                    state,
                    MessageType::System,
                    serde_json::to_value(&message)?,
                    false,
                    None,
                    None,
                );
                self.sink.record_message(&record).await?;
                state.summary.messages += 1;
                Ok(false)
            }
            Message::ControlRequest {
                request_id,
                request,
            } => {
                self.handle_control_request(client, state, request_id, request)
                    .await?;
                Ok(false)
            }
            Message::ControlCancelRequest { request_id } => {
                log::debug!("[{}] control request {request_id} withdrawn", self.label);
                Ok(false)
            }
            Message::Result {
                subtype,
                duration_ms,
                is_error,
                num_turns,
                total_cost_usd,
                usage,
                result,
                ..
            } => {
                let record = self.build_record(
                    state,
                    MessageType::Result,
                    serde_json::to_value(&message)?,
                    false,
                    None,
                    None,
                );
                self.sink.record_message(&record).await?;

                let summary = &mut state.summary;
                summary.messages += 1;
                summary.subtype = Some(subtype.clone());
                summary.duration_ms = *duration_ms;
                summary.is_error = *is_error;
                summary.num_turns = *num_turns;
                summary.cost_usd = total_cost_usd.unwrap_or(0.0);
                summary.result.clone_from(result);
                if let Some(usage) = usage {
                    summary.input_tokens = token_count(usage, "input_tokens");
                    summary.output_tokens = token_count(usage, "output_tokens");
                }

                log::info!(
                    "[{}] result {} after {} turn(s), {} ms",
                    self.label,
                    subtype,
                    num_turns,
                    duration_ms
                );
                Ok(true)
            }
        }
    }

    fn build_record(
        &self,
        state: &mut StreamState,
        message_type: MessageType,
        content: serde_json::Value,
        is_partial: bool,
        parent_message_id: Option<MessageId>,
        model: Option<String>,
    ) -> MessageRecord {
        let sequence_number = state.next_sequence;
        state.next_sequence += 1;
        MessageRecord {
            id: MessageId::generate(),
            session_id: record_session(self.sink),
            sequence_number,
            message_type,
            content,
            is_partial,
            parent_message_id,
            model,
            created_at: Utc::now(),
        }
    }

    async fn handle_tool_use(
        &self,
        state: &mut StreamState,
        message_id: &MessageId,
        tool_use_id: &str,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<()> {
        let call = self.new_call(Some(message_id.clone()), tool_use_id, name, input);
        self.sink.record_tool_call(&call).await?;
        state.summary.tool_calls += 1;

        let reply = self.decide(state, call).await?;
        state.held.push(HeldAnswer {
            tool_use_id: tool_use_id.to_string(),
            tool_name: name.to_string(),
            reply,
        });
        Ok(())
    }

    async fn handle_control_request<C>(
        &self,
        client: &mut C,
        state: &mut StreamState,
        request_id: &str,
        request: &ControlRequest,
    ) -> Result<()>
    where
        C: AgentClient + ?Sized,
    {
        let ControlRequest::CanUseTool {
            tool_name,
            input,
            tool_use_id,
            ..
        } = request
        else {
            log::warn!("[{}] refusing control request {request_id}", self.label);
            return client
                .reject_request(request_id, "unsupported control request")
                .await;
        };

        let reply = match state.take_answer(tool_use_id.as_deref(), tool_name) {
            Some(reply) => reply,
            None => {
                // Prompt for a tool use the assistant has not announced
                let id = tool_use_id.as_deref().unwrap_or(request_id);
                let call = self.new_call(None, id, tool_name, input);
                self.sink.record_tool_call(&call).await?;
                state.summary.tool_calls += 1;
                self.decide(state, call).await?
            }
        };

        log::debug!(
            "[{}] answering {request_id} for {tool_name}: {}",
            self.label,
            if reply.is_allowed() { "allow" } else { "deny" }
        );
        client.respond_to_tool(request_id, &reply).await
    }

    fn new_call(
        &self,
        message_id: Option<MessageId>,
        tool_use_id: &str,
        name: &str,
        input: &serde_json::Value,
    ) -> ToolCall {
        ToolCall {
            id: ToolCallId::generate(),
            session_id: record_session(self.sink),
            message_id,
            tool_use_id: tool_use_id.to_string(),
            tool_name: ToolName::new(name),
            input: input.clone(),
            output: None,
            status: ToolCallStatus::Pending,
            permission_decision: None,
            reason: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Authorize a pending call and build the answer for the CLI
    async fn decide(&self, state: &mut StreamState, mut call: ToolCall) -> Result<ToolAuthorization> {
        let authorization = self.authorizer.authorize(&call, self.sink, self.cancel).await?;

        call.permission_decision = Some(authorization.decision);
        call.reason = Some(authorization.reason.clone());
        let reply = if authorization.is_allowed() {
            if let Some(updated) = authorization.updated_input {
                call.input = updated;
            }
            call.status = ToolCallStatus::Running;
            call.started_at = Some(Utc::now());
            // The CLI runs whatever input comes back with an allow
            ToolAuthorization::Allow {
                updated_input: Some(call.input.clone()),
            }
        } else {
            call.status = ToolCallStatus::Denied;
            call.completed_at = Some(Utc::now());
            state.summary.denied_tool_calls += 1;
            log::info!(
                "[{}] denied {} ({}): {}",
                self.label,
                call.tool_name,
                call.tool_use_id,
                authorization.reason
            );
            ToolAuthorization::Deny {
                message: authorization.reason,
            }
        };
        self.sink.record_tool_call(&call).await?;

        if call.status == ToolCallStatus::Running {
            state.open_calls.insert(call.tool_use_id.clone(), call);
        }
        Ok(reply)
    }

    async fn handle_tool_result(
        &self,
        state: &mut StreamState,
        tool_use_id: &str,
        output: Option<serde_json::Value>,
        is_error: bool,
    ) -> Result<()> {
        let Some(mut call) = state.open_calls.remove(tool_use_id) else {
            log::debug!(
                "[{}] tool result for {tool_use_id} has no running call",
                self.label
            );
            return Ok(());
        };

        let now = Utc::now();
        call.status = if is_error {
            ToolCallStatus::Failed
        } else {
            ToolCallStatus::Completed
        };
        if is_error {
            call.error_message = Some(
                output
                    .as_ref()
                    .map_or_else(|| "tool reported an error".to_string(), value_text),
            );
            state.summary.failed_tool_calls += 1;
        }
        call.output = output;
        call.completed_at = Some(now);
        call.duration_ms = call
            .started_at
            .map(|start| u64::try_from((now - start).num_milliseconds()).unwrap_or(0));
        self.sink.record_tool_call(&call).await?;

        self.authorizer.after_tool(&call, self.sink).await
    }

    async fn fail_open_calls(&self, state: &mut StreamState) -> Result<()> {
        for (_, mut call) in state.open_calls.drain() {
            call.status = ToolCallStatus::Failed;
            call.error_message = Some("query ended before the tool returned".to_string());
            call.completed_at = Some(Utc::now());
            state.summary.failed_tool_calls += 1;
            self.sink.record_tool_call(&call).await?;
        }
        Ok(())
    }
}

fn record_session(sink: &dyn ExecutionSink) -> SessionId {
    sink.session_id()
        .cloned()
        .unwrap_or_else(|| SessionId::new("unrecorded"))
}

fn token_count(usage: &serde_json::Value, key: &str) -> u64 {
    usage.get(key).and_then(serde_json::Value::as_u64).unwrap_or(0)
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
