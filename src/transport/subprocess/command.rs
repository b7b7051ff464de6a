//! CLI command building logic for subprocess transport

use tokio::process::Command;

use crate::types::options::SessionConfig;
use crate::types::permissions::PermissionMode;

use super::config::PromptInput;

/// Command builder for Claude CLI
pub struct CommandBuilder<'a> {
    cli_path: &'a std::path::Path,
    prompt: &'a PromptInput,
    config: &'a SessionConfig,
}

impl<'a> CommandBuilder<'a> {
    /// Create a new command builder
    pub const fn new(
        cli_path: &'a std::path::Path,
        prompt: &'a PromptInput,
        config: &'a SessionConfig,
    ) -> Self {
        Self {
            cli_path,
            prompt,
            config,
        }
    }

    /// Argument vector, without the program
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--print".into(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
        ];

        if let Some(ref system_prompt) = self.config.system_prompt {
            args.push("--system-prompt".into());
            args.push(system_prompt.clone());
        }

        self.add_configuration_args(&mut args);
        self.add_session_args(&mut args);

        match self.prompt {
            PromptInput::Stream => {
                args.push("--input-format".into());
                args.push("stream-json".into());
            }
            PromptInput::String(s) => {
                args.push("--".into());
                args.push(s.clone());
            }
        }

        args
    }

    /// Build the complete CLI command with all arguments
    #[must_use]
    pub fn build(&self) -> Command {
        let mut cmd = Command::new(self.cli_path);
        cmd.args(self.args());
        cmd
    }

    fn add_configuration_args(&self, args: &mut Vec<String>) {
        if let Some(max_turns) = self.config.max_turns {
            args.push("--max-turns".into());
            args.push(max_turns.to_string());
        }

        if let Some(ref model) = self.config.model {
            args.push("--model".into());
            args.push(model.clone());
        }

        // Tool allow/deny lists stay with the engine's gate. The CLI runs in
        // its default mode so every gated tool use comes back over stdio as
        // a `can_use_tool` control request.
        args.push("--permission-prompt-tool".into());
        args.push("stdio".into());

        if self.config.permission_mode == PermissionMode::Plan {
            args.push("--permission-mode".into());
            args.push(PermissionMode::Plan.as_cli_str().into());
        }
    }

    fn add_session_args(&self, args: &mut Vec<String>) {
        if let Some(ref session_id) = self.config.resume {
            args.push("--resume".into());
            args.push(session_id.as_str().into());
            if self.config.fork_session {
                args.push("--fork-session".into());
            }
        }

        for dir in &self.config.add_dirs {
            args.push("--add-dir".into());
            args.push(dir.to_string_lossy().into_owned());
        }

        if self.config.include_partial_messages {
            args.push("--include-partial-messages".into());
        }
    }
}
