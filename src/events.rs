//! Live per-session event channel
//!
//! Every session gets a broadcast channel on first use. The orchestrator is
//! the only writer; any number of subscribers may listen. Delivery is best
//! effort: a subscriber that lags or joins late misses events and should
//! resync from the store.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::identifiers::SessionId;
use crate::types::records::{MessageRecord, ToolCall};
use crate::types::session::SessionStatus;

/// One observable change to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message (final or partial) was persisted
    MessageAppended {
        /// The stored message
        message: MessageRecord,
    },
    /// A tool call was authorized and handed to the SDK
    ToolCallStarted {
        /// The tool call in `running` status
        tool_call: ToolCall,
    },
    /// A tool call reached a final status
    ToolCallCompleted {
        /// The tool call in `completed`, `failed` or `denied` status
        tool_call: ToolCall,
    },
    /// The session moved along its state machine
    StatusChanged {
        /// Session
        session_id: SessionId,
        /// Previous status
        from: SessionStatus,
        /// New status
        to: SessionStatus,
    },
}

/// Registry of per-session broadcast channels
pub struct EventBus {
    capacity: usize,
    channels: Mutex<HashMap<SessionId, broadcast::Sender<SessionEvent>>>,
}

impl EventBus {
    /// Create a bus whose channels buffer `capacity` events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, session_id: &SessionId) -> broadcast::Sender<SessionEvent> {
        self.channels
            .lock()
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to a session's events from now on
    pub fn subscribe(&self, session_id: &SessionId) -> broadcast::Receiver<SessionEvent> {
        self.sender(session_id).subscribe()
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn publish(&self, session_id: &SessionId, event: SessionEvent) {
        let sender = self.channels.lock().get(session_id).cloned();
        if let Some(sender) = sender
            && sender.send(event).is_err()
        {
            log::trace!("[{session_id}] no live subscribers");
        }
    }

    /// Drop a session's channel; current subscribers see the stream close
    pub fn close(&self, session_id: &SessionId) {
        self.channels.lock().remove(session_id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
