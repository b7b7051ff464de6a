// One-shot session runner
//
// Creates a session against the installed Claude Code CLI, sends one prompt,
// logs live events while it runs and prints the summary as JSON.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kodegen_agent_sessions::{
    CreateSession, EngineConfig, InMemoryStore, PermissionMode, SessionConfig, SessionEvent,
    SessionOrchestrator, SubprocessClientFactory,
};

#[derive(Parser, Debug)]
#[command(name = "kodegen-agent-sessions", version, about = "Run Claude Code agent sessions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single prompt in a fresh session
    Run {
        /// Prompt, may contain {{variable}} placeholders
        #[arg(long)]
        prompt: String,

        /// Working directory (a fresh one under the workspace root otherwise)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Model override
        #[arg(long)]
        model: Option<String>,

        /// Allowed tool pattern, e.g. "Bash(kubectl get:*)"
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// Denied tool pattern
        #[arg(long = "deny")]
        deny: Vec<String>,

        /// Allow tools that no pattern matches
        #[arg(long)]
        accept_edits: bool,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Template variable as key=value
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
}

fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Command::Run {
        prompt,
        cwd,
        model,
        allow,
        deny,
        accept_edits,
        config,
        vars,
    } = Cli::parse().command;

    let engine = match config {
        Some(path) => EngineConfig::from_file(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .apply_env()?;

    let mut builder = SessionConfig::builder();
    if let Some(model) = model {
        builder = builder.model(model);
    }
    for pattern in allow {
        builder = builder.allowed_tool(pattern);
    }
    for pattern in deny {
        builder = builder.disallowed_tool(pattern);
    }
    if accept_edits {
        builder = builder.permission_mode(PermissionMode::AcceptEdits);
    }

    let factory = Arc::new(SubprocessClientFactory::new(engine.cli_path.clone()));
    let orchestrator = SessionOrchestrator::builder(Arc::new(InMemoryStore::new()), factory)
        .config(engine)
        .build()?;

    let session = orchestrator
        .create(CreateSession {
            owner: whoami(),
            name: "cli".into(),
            config: builder.build(),
            working_directory: cwd,
            ..CreateSession::default()
        })
        .await?;

    let mut events = orchestrator.subscribe(&session.id).await?;
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::StatusChanged { from, to, .. } => log::info!("status {from} -> {to}"),
                SessionEvent::ToolCallStarted { tool_call } => {
                    log::info!("tool {} started", tool_call.tool_name);
                }
                SessionEvent::ToolCallCompleted { tool_call } => log::info!(
                    "tool {} {:?}{}",
                    tool_call.tool_name,
                    tool_call.status,
                    tool_call
                        .reason
                        .as_deref()
                        .map_or_else(String::new, |r| format!(": {r}"))
                ),
                SessionEvent::MessageAppended { message } if !message.is_partial => {
                    log::debug!("message #{} ({:?})", message.sequence_number, message.message_type);
                }
                SessionEvent::MessageAppended { .. } => {}
            }
        }
    });

    let variables: HashMap<String, String> = vars.into_iter().collect();
    let outcome = tokio::select! {
        outcome = orchestrator.query(&session.id, prompt, &variables) => outcome,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("interrupted, terminating session");
            orchestrator.terminate(&session.id).await?;
            bail!("interrupted");
        }
    };
    watcher.abort();

    let summary = outcome?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.is_error {
        bail!(
            "query ended with {}",
            summary.subtype.as_deref().unwrap_or("an error")
        );
    }
    Ok(())
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".to_string())
}
