//! Configuration constants and types for subprocess transport

/// Default maximum buffer size for JSON messages (1MB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Idle ceiling for one stdout line; the attempt timeout usually fires first
pub const READ_LINE_TIMEOUT_SECS: u64 = 300;

/// Grace period for the CLI to exit after stdin closes
pub const CLOSE_GRACE_SECS: u64 = 5;

/// Dangerous environment variables that should not be passed to subprocess
///
/// These variables can affect how the subprocess loads and executes code.
pub const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

/// Prompt input type
#[derive(Debug)]
pub enum PromptInput {
    /// Single string prompt passed on the command line
    String(String),
    /// Stream of JSON messages on stdin
    Stream,
}

impl From<String> for PromptInput {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for PromptInput {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}
