//! Agent clients and scoped client acquisition
//!
//! An [`AgentClient`] is one live conversation with the agent SDK: it is
//! connected, sent a prompt, drained, then disconnected. Clients are never
//! shared between attempts or sessions; [`ClientManager::with_client`] owns
//! that lifecycle so a failed, cancelled or panicking attempt still tears
//! its subprocess down.
//!
//! ```text
//!   with_client(session) ──► per-session lock
//!                            │
//!                            ├─ factory.create() + connect()
//!                            ├─ run body (query, drain stream)
//!                            ├─ disconnect()          (always)
//!                            └─ abort() on drop       (cancelled future)
//! ```

mod manager;
mod subprocess;

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::messages::Message;
use crate::types::options::SessionConfig;
use crate::types::permissions::ToolAuthorization;

pub use manager::ClientManager;
pub use subprocess::{SubprocessClient, SubprocessClientFactory};

/// Owned stream of messages for one query
pub type MessageStream = BoxStream<'static, Result<Message>>;

/// One connection to the agent SDK
#[async_trait]
pub trait AgentClient: Send {
    /// Establish the connection (spawn the CLI)
    ///
    /// # Errors
    /// Returns error if the connection cannot be established
    async fn connect(&mut self) -> Result<()>;

    /// Send a user prompt
    ///
    /// # Errors
    /// Returns error if the prompt cannot be delivered
    async fn query(&mut self, prompt: &str) -> Result<()>;

    /// Take the response stream for the current query
    ///
    /// The stream is owned so tool decisions can be written while it is
    /// being drained. It ends after the result message or when the CLI exits.
    ///
    /// # Errors
    /// Returns error if not connected or the stream was already taken
    fn receive_response(&mut self) -> Result<MessageStream>;

    /// Answer a `can_use_tool` control request with the engine's decision
    ///
    /// # Errors
    /// Returns error if the decision cannot be written
    async fn respond_to_tool(
        &mut self,
        request_id: &str,
        decision: &ToolAuthorization,
    ) -> Result<()>;

    /// Refuse a control request the engine does not serve
    ///
    /// # Errors
    /// Returns error if the response cannot be written
    async fn reject_request(&mut self, request_id: &str, message: &str) -> Result<()>;

    /// Close the connection gracefully
    ///
    /// # Errors
    /// Returns error if cleanup fails
    async fn disconnect(&mut self) -> Result<()>;

    /// Tear the connection down immediately, without awaiting
    fn abort(&mut self);
}

/// Builds fresh clients for a session configuration
pub trait ClientFactory: Send + Sync + 'static {
    /// Client type produced by this factory
    type Client: AgentClient + 'static;

    /// Create an unconnected client
    ///
    /// # Errors
    /// Returns error if the client cannot be built (e.g. CLI not found)
    fn create(&self, config: &SessionConfig, cwd: Option<&Path>) -> Result<Self::Client>;
}
