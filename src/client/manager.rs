//! Scoped client acquisition

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::types::identifiers::SessionId;
use crate::types::options::SessionConfig;

use super::{AgentClient, ClientFactory};

/// Hands out one fresh, connected client per call and always tears it down
pub struct ClientManager<F: ClientFactory> {
    factory: Arc<F>,
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Aborts the client if the owning future is dropped mid-use
struct ClientGuard<C: AgentClient> {
    client: C,
    released: bool,
}

impl<C: AgentClient> Drop for ClientGuard<C> {
    fn drop(&mut self) {
        if !self.released {
            self.client.abort();
        }
    }
}

impl<F: ClientFactory> ClientManager<F> {
    /// Create a manager around a client factory
    pub fn new(factory: Arc<F>) -> Self {
        Self {
            factory,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying factory
    #[must_use]
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    fn session_lock(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(session_id.clone())
            .or_default()
            .clone()
    }

    /// Number of per-session locks currently held in memory
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }

    /// Forget the per-session lock once a session is done for good
    pub fn release(&self, session_id: &SessionId) {
        self.locks.lock().remove(session_id);
    }

    /// Run `body` with a freshly connected client for `session_id`
    ///
    /// At most one client per session is live at a time. The client is
    /// disconnected whether `body` succeeds, fails or panics (the panic is
    /// resumed afterwards). If the returned future is dropped before
    /// completion the client is aborted synchronously.
    ///
    /// # Errors
    /// - `EngineError::Connection` if the client cannot connect
    /// - whatever `body` returns
    pub async fn with_client<T, B>(
        &self,
        session_id: &SessionId,
        config: &SessionConfig,
        cwd: Option<&Path>,
        body: B,
    ) -> Result<T>
    where
        B: for<'c> FnOnce(&'c mut F::Client) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let lock = self.session_lock(session_id);
        let _held = lock.lock().await;

        let client = self.factory.create(config, cwd)?;
        let mut guard = ClientGuard {
            client,
            released: false,
        };

        if let Err(e) = guard.client.connect().await {
            log::warn!("[{session_id}] connect failed: {e}");
            return Err(match e {
                EngineError::Connection(_) | EngineError::CliNotFound(_) => e,
                other => EngineError::connection(other.to_string()),
            });
        }
        log::debug!("[{session_id}] client connected");

        let outcome = AssertUnwindSafe(body(&mut guard.client))
            .catch_unwind()
            .await;

        let disconnected = guard.client.disconnect().await;
        guard.released = true;
        if let Err(e) = &disconnected {
            log::warn!("[{session_id}] disconnect failed: {e}");
        } else {
            log::debug!("[{session_id}] client disconnected");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
