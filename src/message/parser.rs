//! Message parser for Claude Code CLI output

use crate::error::{EngineError, Result};
use crate::types::messages::Message;

/// Parse a JSON value into a typed Message
///
/// # Errors
/// Returns `EngineError::MessageParse` carrying the raw value if it does not
/// match any known message shape
pub fn parse_message(data: serde_json::Value) -> Result<Message> {
    serde_json::from_value(data.clone()).map_err(|e| {
        EngineError::message_parse(format!("Failed to parse message: {e}"), Some(data))
    })
}
