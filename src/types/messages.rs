//! Wire message types produced by the agent SDK
//!
//! These mirror the `stream-json` output of Claude Code. They are what an
//! [`AgentClient`](crate::client::AgentClient) yields; the persisted form is
//! [`MessageRecord`](super::records::MessageRecord).

use super::identifiers::SdkSessionId;
use serde::{Deserialize, Serialize};

/// Content value for tool results
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentValue {
    /// String content
    String(String),
    /// Structured content blocks
    Blocks(Vec<serde_json::Value>),
}

impl ContentValue {
    /// Flatten to JSON for storage on the tool call record
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Blocks(blocks) => serde_json::Value::Array(blocks.clone()),
        }
    }
}

/// Content block types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content block
    Text {
        /// Text content
        text: String,
    },
    /// Thinking content block (extended thinking)
    Thinking {
        /// Thinking content
        thinking: String,
        /// Signature for verification
        #[serde(default)]
        signature: String,
    },
    /// Tool use request
    ToolUse {
        /// Provider-issued tool use ID
        id: String,
        /// Tool name
        name: String,
        /// Tool input parameters
        input: serde_json::Value,
    },
    /// Tool execution result
    ToolResult {
        /// ID of the tool use this is a result for
        tool_use_id: String,
        /// Result content
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<ContentValue>,
        /// Whether this is an error result
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Coarse classification of a content block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Text or thinking
    Text,
    /// Tool invocation request
    ToolUse,
    /// Tool invocation result
    ToolResult,
}

impl ContentBlock {
    /// Classify the block as text / tool-use / tool-result
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        match self {
            Self::Text { .. } | Self::Thinking { .. } => BlockKind::Text,
            Self::ToolUse { .. } => BlockKind::ToolUse,
            Self::ToolResult { .. } => BlockKind::ToolResult,
        }
    }
}

/// User message content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessageContent {
    /// Message role (always "user")
    pub role: String,
    /// Message content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<UserContent>,
}

/// User content can be string or blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    /// Plain string content
    String(String),
    /// Structured content blocks
    Blocks(Vec<ContentBlock>),
}

/// Assistant message content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessageContent {
    /// Model that generated the message
    pub model: String,
    /// Message content blocks
    pub content: Vec<ContentBlock>,
}

/// Request the CLI sends when it needs an answer from the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Permission prompt for one tool use
    CanUseTool {
        /// Tool the agent wants to run
        tool_name: String,
        /// Tool input as the CLI will run it
        #[serde(default)]
        input: serde_json::Value,
        /// Tool use this prompt belongs to, when the CLI reports it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_use_id: Option<String>,
        /// Rule suggestions offered by the CLI
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission_suggestions: Option<serde_json::Value>,
    },
    /// Any request this engine does not serve (hook callbacks, MCP, ...)
    #[serde(other)]
    Unsupported,
}

/// Message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// User message (prompts echoed back and tool results)
    User {
        /// Parent tool use ID for nested conversations
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        /// Message content
        message: UserMessageContent,
        /// SDK conversation id
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SdkSessionId>,
    },
    /// Assistant message
    Assistant {
        /// Parent tool use ID for nested conversations
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
        /// Message content
        message: AssistantMessageContent,
        /// SDK conversation id
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SdkSessionId>,
    },
    /// System message
    System {
        /// System message subtype
        subtype: String,
        /// Additional system message data
        #[serde(flatten)]
        data: serde_json::Value,
    },
    /// Terminal result message with metrics
    Result {
        /// Result subtype
        subtype: String,
        /// Total duration in milliseconds
        duration_ms: u64,
        /// API call duration in milliseconds
        #[serde(default)]
        duration_api_ms: u64,
        /// Whether this is an error result
        is_error: bool,
        /// Number of conversation turns
        num_turns: u32,
        /// SDK conversation id
        session_id: SdkSessionId,
        /// Total cost in USD
        #[serde(skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
        /// Token usage statistics
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<serde_json::Value>,
        /// Result message
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    /// Stream event carrying a partial assistant chunk
    StreamEvent {
        /// Event UUID
        uuid: String,
        /// SDK conversation id
        session_id: SdkSessionId,
        /// Raw stream event data
        event: serde_json::Value,
        /// Parent tool use ID
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_tool_use_id: Option<String>,
    },
    /// Request from the CLI awaiting a `control_response`
    ControlRequest {
        /// Id the response must echo
        request_id: String,
        /// Request body
        request: ControlRequest,
    },
    /// The CLI withdrew an earlier control request
    ControlCancelRequest {
        /// Id of the withdrawn request
        request_id: String,
    },
}

impl Message {
    /// Content blocks carried by this message, if any
    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Assistant { message, .. } => &message.content,
            Self::User { message, .. } => match &message.content {
                Some(UserContent::Blocks(blocks)) => blocks,
                _ => &[],
            },
            _ => &[],
        }
    }

    /// SDK conversation id announced by this message, if any
    #[must_use]
    pub fn sdk_session_id(&self) -> Option<SdkSessionId> {
        match self {
            Self::User { session_id, .. } | Self::Assistant { session_id, .. } => {
                session_id.clone()
            }
            Self::Result { session_id, .. } | Self::StreamEvent { session_id, .. } => {
                Some(session_id.clone())
            }
            Self::System { data, .. } => data
                .get("session_id")
                .and_then(serde_json::Value::as_str)
                .map(SdkSessionId::from),
            Self::ControlRequest { .. } | Self::ControlCancelRequest { .. } => None,
        }
    }

    /// Whether this is host-protocol traffic rather than conversation
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Self::ControlRequest { .. } | Self::ControlCancelRequest { .. }
        )
    }

    /// Whether this is the terminal result event
    #[must_use]
    pub const fn is_result(&self) -> bool {
        matches!(self, Self::Result { .. })
    }
}
