//! Real-time study session engine
//!
//! Two halves share one transport layer:
//!
//! - [`chat`]: conversations whose replies arrive as a stream of
//!   `data: <JSON>` frames, folded into a message as they arrive.
//! - [`runtime`]: timed practice sessions that settle exactly once, on
//!   submit or at the deadline, with server-side score reconciliation.

pub mod attempt;
pub mod chat;
pub mod config;
pub mod reconcile;
pub mod runtime;
pub mod scoring;
pub mod state_machine;
pub mod stream;
pub mod telemetry;
pub mod timing;
pub mod transport;

mod wire;

pub use attempt::{Answers, Attempt};
pub use chat::{ChatError, Conversation, ConversationSession};
pub use config::EngineConfig;
pub use reconcile::{ReconcileError, Reconciled, ReconciliationLayer, RetryPolicy, SubmitTarget};
pub use runtime::{SessionError, SessionSnapshot, Settlement, TimedSessionController};
pub use scoring::{score, AnswerKey, KeyEntry, QuestionKind, ScoreBreakdown};
pub use state_machine::{SessionContext, SessionKind, SessionStatus};
pub use stream::{Message, MessageStatus, StreamFrame, StreamFrameParser, TranscriptAccumulator};
pub use timing::{Clock, DeadlineClock, ManualClock, SystemClock};
pub use transport::{HttpTransport, TransportError, TransportErrorKind};
