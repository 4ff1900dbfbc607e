//! Conversation session: create, send, consume stream

use super::{ChatError, Conversation};
use crate::stream::{Message, MessageStatus, StreamFrameParser, TranscriptAccumulator};
use crate::transport::{ByteStream, ChatTransport, TransportError};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// One chat interaction against a single server conversation.
///
/// At most one response stream is open at a time. The session can be shared
/// (`Arc`) so another task can [`cancel`](Self::cancel) an in-flight send.
pub struct ConversationSession<T: ChatTransport> {
    transport: T,
    conversation: OnceCell<Conversation>,
    history: Mutex<Vec<Message>>,
    streaming: AtomicBool,
    /// Token of the in-flight send, if any
    cancel_token: Mutex<Option<CancellationToken>>,
}

/// Holds the busy flag for the duration of one send.
struct StreamGuard<'a> {
    streaming: &'a AtomicBool,
    cancel_token: &'a Mutex<Option<CancellationToken>>,
}

impl<'a> StreamGuard<'a> {
    /// Check-and-set in one step; no await happens between the two.
    fn acquire(
        streaming: &'a AtomicBool,
        cancel_token: &'a Mutex<Option<CancellationToken>>,
    ) -> Option<(Self, CancellationToken)> {
        streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        let token = CancellationToken::new();
        *cancel_token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Some((
            Self {
                streaming,
                cancel_token,
            },
            token,
        ))
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        *self
            .cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.streaming.store(false, Ordering::Release);
    }
}

impl<T: ChatTransport> ConversationSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            conversation: OnceCell::new(),
            history: Mutex::new(Vec::new()),
            streaming: AtomicBool::new(false),
            cancel_token: Mutex::new(None),
        }
    }

    /// Resume an existing server conversation.
    pub fn with_conversation(transport: T, conversation: Conversation) -> Self {
        let session = Self::new(transport);
        // a fresh OnceCell cannot already be set
        let _ = session.conversation.set(conversation);
        session
    }

    /// Create the server conversation. Later calls return the same one.
    pub async fn start(&self) -> Result<Conversation, ChatError> {
        self.start_inner(None).await
    }

    pub async fn start_with_title(&self, title: &str) -> Result<Conversation, ChatError> {
        self.start_inner(Some(title)).await
    }

    async fn start_inner(&self, title: Option<&str>) -> Result<Conversation, ChatError> {
        self.conversation
            .get_or_try_init(|| async {
                let conversation = self
                    .transport
                    .create_conversation(title)
                    .await
                    .map_err(|source| {
                        tracing::warn!(error = %source, "Conversation creation failed");
                        ChatError::ConversationCreate { source }
                    })?;
                tracing::info!(conversation_id = %conversation.id, "Conversation created");
                Ok::<_, ChatError>(conversation)
            })
            .await
            .cloned()
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.get()
    }

    /// Send `text` and stream the reply.
    ///
    /// `on_update` sees the assistant message after every frame that changed
    /// it. Starts the conversation first if [`start`](Self::start) was never
    /// called. Fails with [`ChatError::SessionBusy`] while another send is in
    /// flight.
    pub async fn send<F>(&self, text: &str, mut on_update: F) -> Result<Message, ChatError>
    where
        F: FnMut(&Message) + Send,
    {
        let Some((_guard, token)) = StreamGuard::acquire(&self.streaming, &self.cancel_token)
        else {
            return Err(ChatError::SessionBusy);
        };

        let conversation = tokio::select! {
            biased;
            () = token.cancelled() => return Err(cancelled(TranscriptAccumulator::new())),
            started = self.start() => started?,
        };
        self.record(Message::user(text));

        let opened = tokio::select! {
            biased;
            () = token.cancelled() => None,
            opened = self.transport.open_message_stream(&conversation.id, text) => Some(opened),
        };
        let stream = match opened {
            None => return Err(cancelled(TranscriptAccumulator::new())),
            Some(Err(source)) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    error = %source,
                    "Message request failed"
                );
                return Err(ChatError::Request { source });
            }
            Some(Ok(stream)) => stream,
        };

        let result = consume(stream, &token, &mut on_update).await;
        match &result {
            Ok(message) => {
                tracing::info!(
                    conversation_id = %conversation.id,
                    chars = message.content.len(),
                    "Assistant message complete"
                );
                self.record(message.clone());
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation.id, error = %e, "Send ended early");
                if let Some(partial) = e.partial() {
                    self.record(partial.clone());
                }
            }
        }
        result
    }

    /// Abort the in-flight read. No further updates are delivered afterwards.
    ///
    /// Idempotent, and a no-op when nothing is streaming.
    pub fn cancel(&self) {
        if let Some(token) = self
            .cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if !token.is_cancelled() {
                tracing::debug!("Cancelling message stream");
                token.cancel();
            }
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// User and assistant messages in send order, including partial replies
    pub fn history(&self) -> Vec<Message> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, message: Message) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

impl<T: ChatTransport> Drop for ConversationSession<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Read the body to its terminal frame, cancellation, or failure.
async fn consume<F>(
    mut stream: ByteStream,
    token: &CancellationToken,
    on_update: &mut F,
) -> Result<Message, ChatError>
where
    F: FnMut(&Message) + Send,
{
    let mut parser = StreamFrameParser::new();
    let mut acc = TranscriptAccumulator::new();

    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return Err(cancelled(acc)),
            next = stream.next() => next,
        };

        let (frames, eof) = match next {
            Some(Ok(chunk)) => (parser.push(&chunk), false),
            Some(Err(source)) => {
                acc.interrupt(source.to_string());
                return Err(ChatError::StreamInterrupted {
                    partial: acc.into_message(),
                    source,
                });
            }
            None => (parser.finish(), true),
        };

        for frame in frames {
            if token.is_cancelled() {
                return Err(cancelled(acc));
            }
            if acc.apply(frame) {
                on_update(acc.message());
            }
        }

        if parser.is_finished() {
            break;
        }
        if eof {
            let source = TransportError::network("Stream closed before a done frame");
            acc.interrupt(source.to_string());
            return Err(ChatError::StreamInterrupted {
                partial: acc.into_message(),
                source,
            });
        }
    }
    drop(stream);

    let skipped = parser.skipped_frames();
    if skipped > 0 {
        tracing::warn!(skipped, "Stream finished with malformed frames skipped");
    }

    let message = acc.into_message();
    match message.status {
        MessageStatus::Complete => Ok(message),
        MessageStatus::Errored => Err(ChatError::Remote {
            message: message
                .error
                .clone()
                .unwrap_or_else(|| "Streaming failed".to_string()),
            partial: message,
        }),
        MessageStatus::Streaming => Err(ChatError::StreamInterrupted {
            source: TransportError::network("Stream ended without a terminal frame"),
            partial: message,
        }),
    }
}

fn cancelled(mut acc: TranscriptAccumulator) -> ChatError {
    acc.interrupt("cancelled");
    ChatError::Cancelled {
        partial: acc.into_message(),
    }
}
