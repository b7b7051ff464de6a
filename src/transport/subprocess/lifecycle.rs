//! Lifecycle management for subprocess transport (connect, close)

use std::collections::HashMap;
use std::env;
use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::VERSION;
use crate::error::{EngineError, Result};

use super::command::CommandBuilder;
use super::config::{CLOSE_GRACE_SECS, DANGEROUS_ENV_VARS, PromptInput};
use super::transport::SubprocessTransport;

impl SubprocessTransport {
    /// Spawn the Claude Code CLI process and set up stdio pipes
    ///
    /// # Errors
    /// Returns error if process spawning fails or stdio handles cannot be obtained
    pub(super) async fn connect_impl(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        let builder = CommandBuilder::new(&self.cli_path, &self.prompt, &self.config);
        let mut cmd = builder.build();

        let mut process_env = env::vars().collect::<HashMap<_, _>>();
        for (key, value) in &self.config.env {
            if DANGEROUS_ENV_VARS.contains(&key.as_str()) {
                log::warn!("Ignoring blocked environment variable {key}");
                continue;
            }
            process_env.insert(key.clone(), value.clone());
        }

        process_env.insert("CLAUDE_CODE_ENTRYPOINT".to_string(), "sdk-rust".to_string());
        process_env.insert("CLAUDE_AGENT_SDK_VERSION".to_string(), VERSION.to_string());

        if let Some(ref cwd) = self.cwd {
            process_env.insert("PWD".to_string(), cwd.to_string_lossy().to_string());
            cmd.current_dir(cwd);
        }

        cmd.envs(process_env);

        // stderr is piped, never inherited, so the child cannot touch our terminal
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = self.cwd
                && !cwd.exists()
            {
                return EngineError::connection(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                ));
            }
            EngineError::connection(format!("Failed to start Claude Code: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::connection("Failed to get stdin handle"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::connection("Failed to get stdout handle"))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::connection("Failed to get stderr handle"))?;

        let pid = child.id().unwrap_or_default();
        let stderr_task = tokio::spawn(async move {
            use tokio::io::AsyncBufReadExt;
            let mut lines = tokio::io::BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("[claude:{pid}] {line}");
            }
        });

        log::debug!("Spawned Claude Code (pid {pid}) from {}", self.cli_path.display());

        self.stdin = Some(stdin);
        self.stdout = Some(tokio::io::BufReader::new(stdout));
        self.process = Some(child);
        self.stderr_task = Some(stderr_task);
        self.ready.store(true, Ordering::SeqCst);

        // For string mode, close stdin immediately
        if matches!(self.prompt, PromptInput::String(_))
            && let Some(mut stdin) = self.stdin.take()
        {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.shutdown().await;
        }

        Ok(())
    }

    /// Close the transport and clean up resources
    ///
    /// # Errors
    /// Returns error if waiting on the process fails
    pub(super) async fn close_impl(&mut self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        if let Some(mut stdin) = self.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.shutdown().await;
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        self.stdout = None;

        if let Some(mut child) = self.process.take() {
            match tokio::time::timeout(Duration::from_secs(CLOSE_GRACE_SECS), child.wait()).await {
                Ok(Ok(_status)) => {}
                Ok(Err(e)) => {
                    return Err(EngineError::Io(e));
                }
                Err(_) => {
                    log::debug!("Claude Code did not exit within {CLOSE_GRACE_SECS}s, killing");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }

        Ok(())
    }

    /// Synchronous teardown used by `Drop` and `kill`
    pub(super) fn drop_impl(&mut self) {
        self.ready.store(false, Ordering::SeqCst);

        if let Some(stdin) = self.stdin.take() {
            drop(stdin);
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
        }
    }
}
