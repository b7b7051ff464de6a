//! Line-delimited JSON channel to the agent CLI
//!
//! A transport owns one CLI process for the duration of one query. Clients
//! send JSON values down it and drain parsed JSON values back out; the
//! transport never interprets message contents.

pub mod subprocess;

use tokio::sync::mpsc;

use crate::error::Result;

/// Bidirectional JSON-lines channel to a running CLI
pub trait Transport: Send + Sync {
    /// Start the process
    ///
    /// Calling it on a connected transport is a no-op.
    ///
    /// # Errors
    /// Returns `EngineError::Connection` if the process cannot be started
    fn connect(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Serialize `value` and write it as one line
    ///
    /// # Errors
    /// Returns `EngineError::Transport` if the transport is not connected or
    /// the write fails
    fn send(
        &mut self,
        value: &serde_json::Value,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Hand over everything the process prints
    ///
    /// The reader runs in a background task so writes can continue while
    /// output is consumed. The receiver closes when the process stops
    /// printing. Only the first call yields output.
    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<serde_json::Value>>;

    /// Whether `send` may be called
    fn is_ready(&self) -> bool;

    /// Close stdin and give the process a grace period to exit
    ///
    /// # Errors
    /// Returns error if waiting on the process fails
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Tear down synchronously, killing the process if it still runs
    fn kill(&mut self);
}

pub use subprocess::{PromptInput, SubprocessTransport};
