//! Frames carried on a chat response stream

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One `data: <JSON>` event of a message stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Incremental assistant text
    Content {
        #[serde(default)]
        text: String,
    },
    /// Normal end of stream
    Done {
        #[serde(
            default,
            rename = "messageId",
            deserialize_with = "crate::wire::opt_string_or_number",
            skip_serializing_if = "Option::is_none"
        )]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens: Option<u64>,
    },
    /// Server-side failure, with a human-readable message
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl StreamFrame {
    pub fn content(text: impl Into<String>) -> Self {
        StreamFrame::Content { text: text.into() }
    }

    pub fn done() -> Self {
        StreamFrame::Done {
            message_id: None,
            tokens: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamFrame::Error {
            message: Some(message.into()),
        }
    }

    /// Frames after which the parser stops consuming input
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Done { .. } | StreamFrame::Error { .. })
    }

    /// Render as a wire line, newline included.
    pub fn to_sse_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {json}\n")
    }
}

/// A `data:` line whose payload could not be decoded.
///
/// Never fatal: the parser logs it and keeps reading.
#[derive(Debug, Clone, Error)]
#[error("malformed stream frame ({reason}): {line}")]
pub struct FrameParseError {
    pub line: String,
    pub reason: String,
}
