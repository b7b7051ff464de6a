//! Client backed by a Claude Code subprocess

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::{EngineError, Result};
use crate::message::parse_message;
use crate::transport::{PromptInput, SubprocessTransport, Transport};
use crate::types::options::SessionConfig;
use crate::types::permissions::ToolAuthorization;

use super::{AgentClient, ClientFactory, MessageStream};

/// Streaming-mode client talking JSON lines to the CLI
pub struct SubprocessClient {
    transport: SubprocessTransport,
    messages: Option<mpsc::UnboundedReceiver<Result<serde_json::Value>>>,
}

impl SubprocessClient {
    /// Create an unconnected client
    ///
    /// # Errors
    /// Returns error if the CLI cannot be located
    pub fn new(
        config: SessionConfig,
        cwd: Option<PathBuf>,
        cli_path: Option<PathBuf>,
    ) -> Result<Self> {
        let transport = SubprocessTransport::new(PromptInput::Stream, config, cwd, cli_path)?;
        Ok(Self {
            transport,
            messages: None,
        })
    }
}

#[async_trait]
impl AgentClient for SubprocessClient {
    async fn connect(&mut self) -> Result<()> {
        self.transport.connect().await?;
        // Start reading right away so nothing the CLI prints is lost
        self.messages = Some(self.transport.read_messages());
        Ok(())
    }

    async fn query(&mut self, prompt: &str) -> Result<()> {
        let message = serde_json::json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": prompt
            }
        });
        self.transport.send(&message).await
    }

    fn receive_response(&mut self) -> Result<MessageStream> {
        let rx = self
            .messages
            .take()
            .ok_or_else(|| EngineError::transport("response stream not available"))?;

        let mut rx = rx;
        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item.and_then(parse_message);
            }
        };
        Ok(stream.boxed())
    }

    async fn respond_to_tool(
        &mut self,
        request_id: &str,
        decision: &ToolAuthorization,
    ) -> Result<()> {
        let response = serde_json::json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": decision,
            }
        });
        self.transport.send(&response).await
    }

    async fn reject_request(&mut self, request_id: &str, message: &str) -> Result<()> {
        let response = serde_json::json!({
            "type": "control_response",
            "response": {
                "subtype": "error",
                "request_id": request_id,
                "error": message,
            }
        });
        self.transport.send(&response).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.messages = None;
        self.transport.close().await
    }

    fn abort(&mut self) {
        self.messages = None;
        self.transport.kill();
    }
}

/// Factory producing [`SubprocessClient`]s
#[derive(Debug, Clone, Default)]
pub struct SubprocessClientFactory {
    cli_path: Option<PathBuf>,
}

impl SubprocessClientFactory {
    /// Use the given CLI binary, or search `PATH` when `None`
    #[must_use]
    pub const fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }
}

impl ClientFactory for SubprocessClientFactory {
    type Client = SubprocessClient;

    fn create(&self, config: &SessionConfig, cwd: Option<&Path>) -> Result<Self::Client> {
        SubprocessClient::new(
            config.clone(),
            cwd.map(Path::to_path_buf),
            self.cli_path.clone(),
        )
    }
}
