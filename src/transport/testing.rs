//! Scripted transports for tests
//!
//! Responses are queued up front and handed out in order; every call is
//! recorded for later assertions.

use super::{ByteStream, ChatTransport, SubmissionTransport, TransportError};
use crate::chat::Conversation;
use crate::reconcile::{SubmissionReceipt, SubmissionRequest, SubmitTarget};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub type ChunkSender = mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>;

// ============================================================================
// Chat
// ============================================================================

#[derive(Default)]
pub struct ScriptedChatTransport {
    conversations: Mutex<VecDeque<Result<Conversation, TransportError>>>,
    streams: Mutex<VecDeque<Result<ByteStream, TransportError>>>,
    created: AtomicUsize,
    create_gate: Mutex<Option<Arc<Notify>>>,
    /// `(conversation_id, content)` of every message request
    pub sent: Mutex<Vec<(String, String)>>,
    /// Title passed to every creation request
    pub titles: Mutex<Vec<Option<String>>>,
}

impl ScriptedChatTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_conversation(&self, id: &str) {
        self.conversations
            .lock()
            .unwrap()
            .push_back(Ok(Conversation::new(id)));
    }

    pub fn queue_create_error(&self, error: TransportError) {
        self.conversations.lock().unwrap().push_back(Err(error));
    }

    /// Queue a body delivered as exactly these chunks, then closed.
    pub fn queue_chunks(&self, chunks: &[&str]) {
        let items: Vec<Result<Vec<u8>, TransportError>> = chunks
            .iter()
            .map(|c| Ok(c.as_bytes().to_vec()))
            .collect();
        self.push_stream(futures::stream::iter(items).boxed());
    }

    /// Queue a body that fails with `error` after its chunks.
    pub fn queue_chunks_then_error(&self, chunks: &[&str], error: TransportError) {
        let mut items: Vec<Result<Vec<u8>, TransportError>> = chunks
            .iter()
            .map(|c| Ok(c.as_bytes().to_vec()))
            .collect();
        items.push(Err(error));
        self.push_stream(futures::stream::iter(items).boxed());
    }

    pub fn queue_open_error(&self, error: TransportError) {
        self.streams.lock().unwrap().push_back(Err(error));
    }

    /// Queue a body fed by hand; it stays open until the sender is dropped.
    pub fn queue_channel(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded();
        self.push_stream(rx.boxed());
        tx
    }

    /// Block conversation creation until the returned handle is notified.
    pub fn hold_create(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.create_gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn push_stream(&self, stream: ByteStream) {
        self.streams.lock().unwrap().push_back(Ok(stream));
    }
}

#[async_trait]
impl ChatTransport for ScriptedChatTransport {
    async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<Conversation, TransportError> {
        self.titles.lock().unwrap().push(title.map(str::to_string));
        let gate = self.create_gate.lock().unwrap().clone();
        self.created.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.conversations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("No conversation queued")))
    }

    async fn open_message_stream(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<ByteStream, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), content.to_string()));
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::network("No stream queued")))
    }
}

// ============================================================================
// Submission
// ============================================================================

/// Acknowledges every submission with an empty receipt unless told otherwise.
#[derive(Default)]
pub struct ScriptedSubmissionTransport {
    responses: Mutex<VecDeque<Result<SubmissionReceipt, TransportError>>>,
    requests: Mutex<Vec<(SubmitTarget, SubmissionRequest)>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl ScriptedSubmissionTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_receipt(&self, receipt: SubmissionReceipt) {
        self.responses.lock().unwrap().push_back(Ok(receipt));
    }

    pub fn queue_error(&self, error: TransportError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Hold every request until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub fn requests(&self) -> Vec<(SubmitTarget, SubmissionRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionTransport for ScriptedSubmissionTransport {
    async fn submit(
        &self,
        target: &SubmitTarget,
        request: &SubmissionRequest,
    ) -> Result<SubmissionReceipt, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((target.clone(), request.clone()));
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SubmissionReceipt::default()))
    }
}
