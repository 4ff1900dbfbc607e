//! Streaming chat responses
//!
//! A response body is a sequence of `data: <JSON>\n` lines delivered in
//! arbitrary chunks. [`StreamFrameParser`] turns chunks into [`StreamFrame`]s
//! and [`TranscriptAccumulator`] folds those frames into a [`Message`].

mod frame;
mod parser;
mod transcript;

#[cfg(test)]
mod proptests;

pub use frame::{FrameParseError, StreamFrame};
pub use parser::{parse_line, StreamFrameParser};
pub use transcript::{Message, MessageRole, MessageStatus, TranscriptAccumulator};
