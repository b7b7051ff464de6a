//! Message reading logic for subprocess transport

use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use crate::error::{EngineError, Result};

use super::config::READ_LINE_TIMEOUT_SECS;
use super::transport::SubprocessTransport;

impl SubprocessTransport {
    /// Read messages from the subprocess output
    ///
    /// Spawns a background task that parses newline-delimited JSON from
    /// stdout. The child moves into the task so its exit code can be
    /// reported once stdout closes; aborting the task drops the child,
    /// which kills it.
    pub(super) fn read_messages_impl(
        &mut self,
    ) -> mpsc::UnboundedReceiver<Result<serde_json::Value>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let stdout = self.stdout.take();
        let process = self.process.take();
        let max_buffer_size = self.max_buffer_size;

        let task = tokio::spawn(async move {
            let Some(mut stdout) = stdout else {
                let _ = tx.send(Err(EngineError::connection(
                    "Not connected - stdout not available",
                )));
                return;
            };
            let mut json_buffer = String::new();

            loop {
                let mut line = String::new();

                match tokio::time::timeout(
                    Duration::from_secs(READ_LINE_TIMEOUT_SECS),
                    stdout.read_line(&mut line),
                )
                .await
                {
                    Ok(Ok(0)) => break,
                    Ok(Ok(_)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        // Accumulate partial JSON until we can parse it
                        json_buffer.push_str(line);

                        if json_buffer.len() > max_buffer_size {
                            let _ = tx.send(Err(EngineError::JsonDecode(serde_json::Error::io(
                                std::io::Error::new(
                                    std::io::ErrorKind::InvalidData,
                                    format!(
                                        "JSON message exceeded maximum buffer size of {max_buffer_size} bytes"
                                    ),
                                ),
                            ))));
                            json_buffer.clear();
                            continue;
                        }

                        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&json_buffer) {
                            json_buffer.clear();
                            if tx.send(Ok(data)).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        let _ = tx.send(Err(EngineError::transport(format!(
                            "Failed to read from stdout: {e}"
                        ))));
                        break;
                    }
                    Err(_) => {
                        let _ = tx.send(Err(EngineError::attempt_timeout(READ_LINE_TIMEOUT_SECS)));
                        break;
                    }
                }
            }

            if let Some(mut child) = process {
                match child.wait().await {
                    Ok(status) if !status.success() => {
                        let code = status.code().unwrap_or(-1);
                        let _ = tx.send(Err(EngineError::process(
                            "Claude Code exited with an error",
                            code,
                            Some("Check debug logs for stderr output".to_string()),
                        )));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(Err(EngineError::Io(e)));
                    }
                }
            }
        });

        self.reader_task = Some(task);

        rx
    }
}
