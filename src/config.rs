//! Engine-wide configuration
//!
//! Loaded from a JSON file (every field optional), then overridden from
//! `KODEGEN_SESSIONS_*` environment variables, then validated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::hooks::HookFailurePolicy;
use crate::types::options::RetryConfig;

/// Environment variable overriding [`EngineConfig::workspace_root`]
pub const ENV_WORKSPACE_ROOT: &str = "KODEGEN_SESSIONS_WORKSPACE_ROOT";
/// Environment variable overriding [`EngineConfig::archive_root`]
pub const ENV_ARCHIVE_ROOT: &str = "KODEGEN_SESSIONS_ARCHIVE_ROOT";
/// Environment variable overriding [`EngineConfig::cli_path`]
pub const ENV_CLI_PATH: &str = "KODEGEN_SESSIONS_CLI_PATH";
/// Environment variable overriding [`EngineConfig::max_concurrent_executions`]
pub const ENV_MAX_CONCURRENT: &str = "KODEGEN_SESSIONS_MAX_CONCURRENT";

/// Settings shared by every session the engine runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parent of live session working directories
    pub workspace_root: PathBuf,
    /// Destination for archives
    pub archive_root: PathBuf,
    /// Explicit Claude Code binary; searched on `PATH` when unset
    pub cli_path: Option<PathBuf>,
    /// Per-hook execution ceiling
    pub hook_timeout_ms: u64,
    /// Whether failing hooks block execution
    pub hook_failure_policy: HookFailurePolicy,
    /// Live event buffer per session
    pub event_buffer: usize,
    /// Background executions running at once
    pub max_concurrent_executions: usize,
    /// Delete the live working directory once its archive is durable
    pub purge_after_archive: bool,
    /// Retry settings for sessions that do not set their own
    pub default_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let base = std::env::temp_dir().join("kodegen-agent-sessions");
        Self {
            workspace_root: base.join("workspaces"),
            archive_root: base.join("archives"),
            cli_path: None,
            hook_timeout_ms: 30_000,
            hook_failure_policy: HookFailurePolicy::Continue,
            event_buffer: 256,
            max_concurrent_executions: 4,
            purge_after_archive: true,
            default_retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read a JSON configuration file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            EngineError::validation(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Apply `KODEGEN_SESSIONS_*` overrides from the process environment
    ///
    /// # Errors
    /// Returns `EngineError::Validation` if a numeric override does not parse
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    ///
    /// # Errors
    /// Returns `EngineError::Validation` if a numeric override does not parse
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(root) = lookup(ENV_WORKSPACE_ROOT) {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(root) = lookup(ENV_ARCHIVE_ROOT) {
            self.archive_root = PathBuf::from(root);
        }
        if let Some(path) = lookup(ENV_CLI_PATH) {
            self.cli_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT) {
            self.max_concurrent_executions = raw.trim().parse().map_err(|_| {
                EngineError::validation(format!("{ENV_MAX_CONCURRENT} must be a number, got '{raw}'"))
            })?;
        }
        Ok(self)
    }

    /// Check values for consistency
    ///
    /// # Errors
    /// Returns `EngineError::Validation` listing every problem found
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.hook_timeout_ms == 0 {
            errors.push("hook_timeout_ms must be greater than 0".to_string());
        }
        if self.event_buffer == 0 {
            errors.push("event_buffer must be greater than 0".to_string());
        }
        if self.max_concurrent_executions == 0 {
            errors.push("max_concurrent_executions must be greater than 0".to_string());
        }
        if self.workspace_root == self.archive_root {
            errors.push("workspace_root and archive_root must differ".to_string());
        }
        if let Err(e) = self.default_retry.validate() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::validation(errors.join("; ")))
        }
    }

    /// Hook timeout as a duration
    #[must_use]
    pub const fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }
}
