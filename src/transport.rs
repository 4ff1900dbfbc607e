//! Trait abstractions for network I/O
//!
//! The chat and reconciliation layers only talk to the server through these
//! traits, so tests can drive them with scripted transports.

mod error;
mod http;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{TransportError, TransportErrorKind};
pub use http::HttpTransport;

use crate::chat::Conversation;
use crate::reconcile::{SubmissionReceipt, SubmissionRequest, SubmitTarget};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Raw body chunks of a streaming response, in arrival order.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Server endpoints used by conversation sessions
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// `POST /chat/conversations`
    async fn create_conversation(&self, title: Option<&str>)
        -> Result<Conversation, TransportError>;

    /// `POST /chat/conversations/{id}/messages`, returning the unread body
    async fn open_message_stream(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<ByteStream, TransportError>;
}

/// Server endpoint used to hand in finalized attempts
#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    /// POST the attempt to `target`, keyed by its idempotency key
    async fn submit(
        &self,
        target: &SubmitTarget,
        request: &SubmissionRequest,
    ) -> Result<SubmissionReceipt, TransportError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ChatTransport + ?Sized> ChatTransport for Arc<T> {
    async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<Conversation, TransportError> {
        (**self).create_conversation(title).await
    }

    async fn open_message_stream(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<ByteStream, TransportError> {
        (**self).open_message_stream(conversation_id, content).await
    }
}

#[async_trait]
impl<T: SubmissionTransport + ?Sized> SubmissionTransport for Arc<T> {
    async fn submit(
        &self,
        target: &SubmitTarget,
        request: &SubmissionRequest,
    ) -> Result<SubmissionReceipt, TransportError> {
        (**self).submit(target, request).await
    }
}
