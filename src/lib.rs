//! # Agent session engine
//!
//! Runs Claude Code agent sessions end to end: every query gets a scoped
//! CLI subprocess, its message stream is numbered and recorded, every tool
//! use passes through hooks and a permission gate before it may run, and
//! transient failures are retried within a bounded budget. Sessions can be
//! paused, resumed, terminated, forked and archived; tasks run the same
//! machinery unattended.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use kodegen_agent_sessions::{
//!     CreateSession, InMemoryStore, SessionConfig, SessionOrchestrator, SubprocessClientFactory,
//! };
//!
//! # async fn example() -> kodegen_agent_sessions::Result<()> {
//! let orchestrator = SessionOrchestrator::builder(
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(SubprocessClientFactory::new(None)),
//! )
//! .build()?;
//!
//! let session = orchestrator
//!     .create(CreateSession {
//!         owner: "alice".into(),
//!         config: SessionConfig::builder()
//!             .allowed_tool("Read")
//!             .allowed_tool("Bash(kubectl get:*)")
//!             .build(),
//!         ..CreateSession::default()
//!     })
//!     .await?;
//!
//! let summary = orchestrator
//!     .query(&session.id, "List the pods in staging", &HashMap::new())
//!     .await?;
//! log::info!("{} message(s), ${:.4}", summary.messages, summary.cost_usd);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`orchestrator`] - session lifecycle, the query path and the tool policy chain
//! - [`client`] - the agent SDK seam and scoped client acquisition
//! - [`stream`] - consumption of one query's message stream
//! - [`permissions`] and [`hooks`] - the checks every tool use goes through
//! - [`retry`] - bounded retry with backoff around a whole query
//! - [`scheduler`] - unattended task executions
//! - [`archive`] - durable archives of finished sessions
//! - [`store`] and [`events`] - persistence seam and live subscribers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod message;
pub mod orchestrator;
pub mod permissions;
pub mod prompt;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod stream;
pub mod transport;
pub mod types;

pub use archive::ArchiveManager;
pub use client::{AgentClient, ClientFactory, ClientManager, SubprocessClient, SubprocessClientFactory};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use events::{EventBus, SessionEvent};
pub use hooks::{HookPipeline, HookRegistry, HookRunOutcome};
pub use message::parse_message;
pub use orchestrator::{
    ApprovalDecision, ApprovalRequest, Approver, CreateSession, ForkRequest, SessionOrchestrator,
    ToolPolicy,
};
pub use permissions::{PermissionGate, ToolPattern};
pub use prompt::{PromptInput, PromptRenderer, PromptTemplateInput, TemplateRenderer};
pub use retry::{RetryCoordinator, RetryEvent};
pub use scheduler::{SummarySink, TaskScheduler};
pub use store::{InMemoryStore, Page, PageRequest, SessionStore};
pub use stream::{ExecutionSink, QuerySummary, StreamProcessor, ToolAuthorizer};
pub use transport::{PromptInput as TransportPromptInput, SubprocessTransport, Transport};

pub use types::*;

/// Version reported to the CLI subprocess
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
