//! Per-session SDK configuration
//!
//! [`SessionConfig`] is what a session (or task) carries: model, tool
//! allow/deny patterns, permission mode, hooks, and retry/timeout settings.
//! It is built with [`SessionConfigBuilder`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use super::identifiers::SdkSessionId;
use super::permissions::PermissionMode;
use crate::error::{EngineError, Result};
use crate::hooks::HookRegistry;
use crate::permissions::ToolPattern;

/// Upper bound for `max_turns`
pub const MAX_ALLOWED_TURNS: u32 = 1000;

/// Upper bound for `max_retries`
pub const MAX_ALLOWED_RETRIES: u32 = 20;

/// Upper bound for `retry_delay_secs`, matching the backoff ceiling
pub const MAX_RETRY_DELAY_SECS: f64 = 60.0;

/// Retry and timeout configuration for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed before the session fails
    pub max_retries: u32,
    /// Fixed delay, or base delay when backoff is exponential
    pub retry_delay_secs: f64,
    /// Double the delay after every failure
    pub exponential_backoff: bool,
    /// Per-attempt ceiling
    pub timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 2.0,
            exponential_backoff: false,
            timeout_seconds: 120,
        }
    }
}

impl RetryConfig {
    /// Per-attempt ceiling as a duration
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Check bounds
    ///
    /// # Errors
    /// Returns `EngineError::Validation` when a value is out of range
    pub fn validate(&self) -> Result<()> {
        if self.max_retries > MAX_ALLOWED_RETRIES {
            return Err(EngineError::validation(format!(
                "max_retries {} exceeds maximum allowed: {MAX_ALLOWED_RETRIES}",
                self.max_retries
            )));
        }
        if !self.retry_delay_secs.is_finite() || self.retry_delay_secs < 0.0 {
            return Err(EngineError::validation(
                "retry_delay_secs must be a non-negative number",
            ));
        }
        if self.retry_delay_secs > MAX_RETRY_DELAY_SECS {
            return Err(EngineError::validation(format!(
                "retry_delay_secs {} exceeds maximum allowed: {MAX_RETRY_DELAY_SECS}",
                self.retry_delay_secs
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(EngineError::validation("timeout_seconds must be positive"));
        }
        Ok(())
    }
}

/// SDK configuration for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model to use
    pub model: Option<String>,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Allow patterns (`Bash`, `*`, `Bash(kubectl get:*)`)
    pub allowed_tools: Vec<String>,
    /// Deny patterns, same grammar; deny wins
    pub disallowed_tools: Vec<String>,
    /// Permission mode
    pub permission_mode: PermissionMode,
    /// Maximum conversation turns per query
    pub max_turns: Option<u32>,
    /// Retry/timeout settings
    pub retry: RetryConfig,
    /// Extra environment for the CLI process
    pub env: HashMap<String, String>,
    /// Additional directories exposed to the agent
    pub add_dirs: Vec<PathBuf>,
    /// Ask the CLI for partial assistant chunks
    pub include_partial_messages: bool,
    /// Conversation to resume
    pub resume: Option<SdkSessionId>,
    /// Fork the resumed conversation instead of continuing it
    pub fork_session: bool,
    /// Maximum size of one JSON line from the CLI
    pub max_buffer_size: Option<usize>,
    /// Registered hooks (not persisted)
    #[serde(skip)]
    pub hooks: HookRegistry,
}

impl SessionConfig {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validate bounds and tool pattern syntax
    ///
    /// # Errors
    /// Returns `EngineError::Validation` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if let Some(turns) = self.max_turns
            && turns > MAX_ALLOWED_TURNS
        {
            return Err(EngineError::validation(format!(
                "max_turns {turns} exceeds maximum allowed: {MAX_ALLOWED_TURNS}"
            )));
        }
        self.retry.validate()?;
        for pattern in self.allowed_tools.iter().chain(&self.disallowed_tools) {
            ToolPattern::parse(pattern)?;
        }
        Ok(())
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Add an allow pattern
    #[must_use]
    pub fn allowed_tool(mut self, pattern: impl Into<String>) -> Self {
        self.config.allowed_tools.push(pattern.into());
        self
    }

    /// Add a deny pattern
    #[must_use]
    pub fn disallowed_tool(mut self, pattern: impl Into<String>) -> Self {
        self.config.disallowed_tools.push(pattern.into());
        self
    }

    /// Set permission mode
    #[must_use]
    pub const fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.config.permission_mode = mode;
        self
    }

    /// Set max turns (bounds are checked by [`SessionConfig::validate`])
    #[must_use]
    pub const fn max_turns(mut self, turns: u32) -> Self {
        self.config.max_turns = Some(turns);
        self
    }

    /// Set retry configuration
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Add an environment variable for the CLI
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    /// Add a directory
    #[must_use]
    pub fn add_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.add_dirs.push(dir.into());
        self
    }

    /// Enable partial assistant chunks
    #[must_use]
    pub const fn include_partial_messages(mut self, enabled: bool) -> Self {
        self.config.include_partial_messages = enabled;
        self
    }

    /// Set hooks
    #[must_use]
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.config.hooks = hooks;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> SessionConfig {
        self.config
    }
}
