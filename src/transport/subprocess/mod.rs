//! Subprocess transport implementation using Claude Code CLI
//!
//! Spawns the Claude Code CLI as a child process and talks to it over
//! stdin/stdout. stderr is forwarded to the `log` facade at debug level.

mod command;
mod config;
mod lifecycle;
mod reader;
mod transport;

pub use command::CommandBuilder;
pub use config::{DEFAULT_MAX_BUFFER_SIZE, PromptInput};
pub use transport::SubprocessTransport;
