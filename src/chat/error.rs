//! Chat session errors

use crate::stream::Message;
use crate::transport::TransportError;
use thiserror::Error;

/// Failures surfaced by [`super::ConversationSession`].
///
/// Every variant raised after a response stream opened carries the partial
/// assistant message accumulated up to that point.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Failed to create conversation: {source}")]
    ConversationCreate {
        #[source]
        source: TransportError,
    },
    #[error("A message is already streaming in this session")]
    SessionBusy,
    #[error("Failed to send message: {source}")]
    Request {
        #[source]
        source: TransportError,
    },
    #[error("Stream interrupted: {source}")]
    StreamInterrupted {
        partial: Message,
        #[source]
        source: TransportError,
    },
    #[error("Server reported a streaming failure: {message}")]
    Remote { message: String, partial: Message },
    #[error("Stream cancelled")]
    Cancelled { partial: Message },
}

impl ChatError {
    /// The assistant text received before the failure, if a stream had opened
    pub fn partial(&self) -> Option<&Message> {
        match self {
            ChatError::StreamInterrupted { partial, .. }
            | ChatError::Remote { partial, .. }
            | ChatError::Cancelled { partial } => Some(partial),
            ChatError::ConversationCreate { .. }
            | ChatError::SessionBusy
            | ChatError::Request { .. } => None,
        }
    }

    /// Whether sending the same text again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ChatError::ConversationCreate { source }
            | ChatError::Request { source }
            | ChatError::StreamInterrupted { source, .. } => source.is_retryable(),
            ChatError::Remote { .. } => true,
            ChatError::SessionBusy | ChatError::Cancelled { .. } => false,
        }
    }
}
