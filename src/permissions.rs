//! Tool permission gate
//!
//! A pure function of configuration and tool input. It never talks to the
//! SDK; the orchestrator persists its verdict before the tool may run.
//!
//! # Pattern grammar
//!
//! | Pattern | Matches |
//! |---|---|
//! | `*` | every tool |
//! | `Bash` | every invocation of `Bash` |
//! | `Bash(kubectl get:*)` | `Bash` whose command starts with `kubectl get` |
//! | `Bash(npm test)` | `Bash` whose command is exactly `npm test` |
//!
//! # Evaluation order (deny wins)
//!
//! 1. any disallowed pattern matches → deny
//! 2. any allowed pattern matches → allow
//! 3. the tool has scoped allow patterns but none matched → deny
//! 4. otherwise by mode: `default` → ask, `acceptEdits` → allow, else deny
//!
//! ```
//! use kodegen_agent_sessions::permissions::PermissionGate;
//! use kodegen_agent_sessions::{PermissionDecision, PermissionMode, ToolName};
//!
//! let gate = PermissionGate::new(
//!     &["Bash(kubectl get:*)".to_string()],
//!     &[],
//!     PermissionMode::Default,
//! ).unwrap();
//! let verdict = gate.evaluate(
//!     &ToolName::new("Bash"),
//!     &serde_json::json!({"command": "kubectl get nodes"}),
//! );
//! assert_eq!(verdict.decision, PermissionDecision::Allow);
//! ```

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::types::identifiers::ToolName;
use crate::types::permissions::{PermissionDecision, PermissionMode, PermissionVerdict};

/// Input keys consulted, in order, for a scoped pattern's argument
const SCOPE_ARGUMENT_KEYS: &[&str] = &["command", "file_path", "path", "url", "pattern"];

/// Argument restriction inside a scoped pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolScope {
    /// `prefix:*`
    Prefix(String),
    /// exact argument
    Exact(String),
}

/// One parsed allow/deny pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPattern {
    /// `*`
    Any,
    /// Bare tool name
    Tool(String),
    /// `Tool(scope)`
    Scoped {
        /// Tool name
        tool: String,
        /// Argument restriction
        scope: ToolScope,
    },
}

impl ToolPattern {
    /// Parse one pattern
    ///
    /// # Errors
    /// Returns `EngineError::Validation` for empty names, unbalanced
    /// parentheses, or trailing text after the closing parenthesis
    pub fn parse(raw: &str) -> Result<Self> {
        let pattern = raw.trim();
        if pattern.is_empty() {
            return Err(EngineError::validation("empty tool pattern"));
        }
        if pattern == "*" {
            return Ok(Self::Any);
        }

        let Some(open) = pattern.find('(') else {
            if pattern.contains(')') {
                return Err(EngineError::validation(format!(
                    "unbalanced parentheses in tool pattern '{raw}'"
                )));
            }
            return Ok(Self::Tool(pattern.to_string()));
        };

        let tool = pattern[..open].trim();
        if tool.is_empty() {
            return Err(EngineError::validation(format!(
                "missing tool name in pattern '{raw}'"
            )));
        }
        let Some(inner) = pattern[open + 1..].strip_suffix(')') else {
            return Err(EngineError::validation(format!(
                "unbalanced parentheses in tool pattern '{raw}'"
            )));
        };
        if inner.contains('(') || inner.contains(')') {
            return Err(EngineError::validation(format!(
                "nested parentheses in tool pattern '{raw}'"
            )));
        }

        let inner = inner.trim();
        if inner.is_empty() || inner == "*" {
            return Ok(Self::Tool(tool.to_string()));
        }
        let scope = match inner.strip_suffix(":*") {
            Some(prefix) => ToolScope::Prefix(prefix.to_string()),
            None => ToolScope::Exact(inner.to_string()),
        };
        Ok(Self::Scoped {
            tool: tool.to_string(),
            scope,
        })
    }

    /// Tool this pattern is about (`None` for `*`)
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Tool(tool) | Self::Scoped { tool, .. } => Some(tool),
        }
    }

    /// Whether the pattern restricts arguments
    #[must_use]
    pub const fn is_scoped(&self) -> bool {
        matches!(self, Self::Scoped { .. })
    }

    /// Check the pattern against one invocation
    #[must_use]
    pub fn matches(&self, tool_name: &str, input: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Tool(tool) => tool == tool_name,
            Self::Scoped { tool, scope } => {
                if tool != tool_name {
                    return false;
                }
                let Some(argument) = scope_argument(input) else {
                    return false;
                };
                match scope {
                    ToolScope::Prefix(prefix) => argument.starts_with(prefix.as_str()),
                    ToolScope::Exact(exact) => argument.trim() == exact,
                }
            }
        }
    }
}

impl std::fmt::Display for ToolPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Tool(tool) => f.write_str(tool),
            Self::Scoped {
                tool,
                scope: ToolScope::Prefix(prefix),
            } => write!(f, "{tool}({prefix}:*)"),
            Self::Scoped {
                tool,
                scope: ToolScope::Exact(exact),
            } => write!(f, "{tool}({exact})"),
        }
    }
}

/// The argument a scoped pattern is checked against
fn scope_argument(input: &Value) -> Option<&str> {
    SCOPE_ARGUMENT_KEYS
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
}

/// Parse a list of patterns
///
/// # Errors
/// Returns the first pattern's validation error
pub fn parse_patterns(patterns: &[String]) -> Result<Vec<ToolPattern>> {
    patterns.iter().map(|p| ToolPattern::parse(p)).collect()
}

/// Evaluates tool invocations against a session's policy
#[derive(Debug, Clone)]
pub struct PermissionGate {
    allowed: Vec<ToolPattern>,
    disallowed: Vec<ToolPattern>,
    mode: PermissionMode,
}

impl PermissionGate {
    /// Build a gate from raw allow/deny lists
    ///
    /// # Errors
    /// Returns `EngineError::Validation` if any pattern is malformed
    pub fn new(allowed: &[String], disallowed: &[String], mode: PermissionMode) -> Result<Self> {
        Ok(Self {
            allowed: parse_patterns(allowed)?,
            disallowed: parse_patterns(disallowed)?,
            mode,
        })
    }

    /// Permission mode in effect
    #[must_use]
    pub const fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Evaluate one invocation
    #[must_use]
    pub fn evaluate(&self, tool_name: &ToolName, input: &Value) -> PermissionVerdict {
        let name = tool_name.as_str();

        if let Some(rule) = self.disallowed.iter().find(|p| p.matches(name, input)) {
            return PermissionVerdict::new(
                PermissionDecision::Deny,
                format!("{name} is disallowed by rule '{rule}'"),
                Some(rule.to_string()),
            );
        }

        if let Some(rule) = self.allowed.iter().find(|p| p.matches(name, input)) {
            return PermissionVerdict::new(
                PermissionDecision::Allow,
                format!("{name} is allowed by rule '{rule}'"),
                Some(rule.to_string()),
            );
        }

        let scoped: Vec<String> = self
            .allowed
            .iter()
            .filter(|p| p.is_scoped() && p.tool() == Some(name))
            .map(ToString::to_string)
            .collect();
        if !scoped.is_empty() {
            return PermissionVerdict::new(
                PermissionDecision::Deny,
                format!(
                    "{name} invocation outside allowed scopes ({})",
                    scoped.join(", ")
                ),
                None,
            );
        }

        match self.mode {
            PermissionMode::Default => PermissionVerdict::new(
                PermissionDecision::Ask,
                format!("{name} matched no rule; approval required"),
                None,
            ),
            PermissionMode::AcceptEdits => PermissionVerdict::new(
                PermissionDecision::Allow,
                format!("{name} matched no rule; allowed by acceptEdits mode"),
                None,
            ),
            mode => PermissionVerdict::new(
                PermissionDecision::Deny,
                format!(
                    "{name} matched no rule; denied in {} mode",
                    mode.as_cli_str()
                ),
                None,
            ),
        }
    }
}

/// Evaluate without building a gate
///
/// # Errors
/// Returns `EngineError::Validation` if any pattern is malformed
pub fn evaluate(
    tool_name: &ToolName,
    input: &Value,
    allowed: &[String],
    disallowed: &[String],
    mode: PermissionMode,
) -> Result<PermissionVerdict> {
    Ok(PermissionGate::new(allowed, disallowed, mode)?.evaluate(tool_name, input))
}
