//! Folding stream frames into a message

use super::frame::StreamFrame;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Content may still grow
    Streaming,
    Complete,
    /// Stopped early; content holds whatever arrived before the failure
    Errored,
}

/// A chat message as seen by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub status: MessageStatus,
    /// Server id, known once the stream completes
    pub id: Option<String>,
    pub tokens: Option<u64>,
    pub error: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
            status: MessageStatus::Complete,
            id: None,
            tokens: None,
            error: None,
        }
    }

    pub fn assistant_streaming() -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            status: MessageStatus::Streaming,
            id: None,
            tokens: None,
            error: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }
}

/// Builds one assistant message from frames in arrival order.
#[derive(Debug, Clone)]
pub struct TranscriptAccumulator {
    message: Message,
}

impl Default for TranscriptAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self {
            message: Message::assistant_streaming(),
        }
    }

    /// Apply a frame. Returns true if the message changed.
    ///
    /// Once the message is complete or errored it is frozen and every later
    /// frame is ignored.
    pub fn apply(&mut self, frame: StreamFrame) -> bool {
        if !self.message.is_streaming() {
            return false;
        }
        match frame {
            StreamFrame::Content { text } => {
                if text.is_empty() {
                    return false;
                }
                self.message.content.push_str(&text);
            }
            StreamFrame::Done { message_id, tokens } => {
                self.message.status = MessageStatus::Complete;
                self.message.id = message_id;
                self.message.tokens = tokens;
            }
            StreamFrame::Error { message } => {
                self.message.status = MessageStatus::Errored;
                self.message.error =
                    Some(message.unwrap_or_else(|| "Streaming failed".to_string()));
            }
        }
        true
    }

    /// Mark the message errored after a transport failure, keeping its text.
    pub fn interrupt(&mut self, reason: impl Into<String>) {
        if self.message.is_streaming() {
            self.message.status = MessageStatus::Errored;
            self.message.error = Some(reason.into());
        }
    }

    pub fn text(&self) -> &str {
        &self.message.content
    }

    pub fn status(&self) -> MessageStatus {
        self.message.status
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}
