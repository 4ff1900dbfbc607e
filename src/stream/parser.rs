//! Line framing for chunked `data: <JSON>` response bodies

use super::frame::{FrameParseError, StreamFrame};

/// Incremental parser over arbitrarily split response chunks.
///
/// Bytes are buffered until a newline arrives, so a chunk boundary may fall
/// anywhere: inside the `data:` prefix, inside the JSON payload, or inside a
/// multi-byte UTF-8 character. After a terminal frame (`done` or `error`) all
/// further input is discarded.
#[derive(Debug, Default)]
pub struct StreamFrameParser {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline
    scanned: usize,
    finished: bool,
    skipped: usize,
}

impl StreamFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk, returning every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        if self.finished {
            return Vec::new();
        }
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.pending[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            let line = &self.pending[consumed..end];
            consumed = end + 1;
            search_from = consumed;

            match parse_line(line) {
                Ok(Some(frame)) => {
                    let terminal = frame.is_terminal();
                    frames.push(frame);
                    if terminal {
                        self.finished = true;
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, "Skipping malformed stream frame");
                }
            }
        }

        if self.finished {
            self.pending.clear();
        } else {
            self.pending.drain(..consumed);
        }
        self.scanned = self.pending.len();
        frames
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<StreamFrame> {
        self.push(chunk.as_bytes())
    }

    /// Signal end of input. A trailing line without its newline is parsed
    /// as if it had one.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        if self.finished || self.pending.is_empty() {
            self.pending.clear();
            self.scanned = 0;
            return Vec::new();
        }
        self.push(b"\n")
    }

    /// True once a terminal frame has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of `data:` lines dropped because they failed to decode
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    /// Bytes held back waiting for a newline
    pub fn buffered_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decode a single line (without its newline).
///
/// Returns `Ok(None)` for blank lines, comments and anything else that is not
/// a `data:` event.
pub fn parse_line(line: &[u8]) -> Result<Option<StreamFrame>, FrameParseError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let Some(payload) = line.strip_prefix(b"data:") else {
        return Ok(None);
    };
    let payload = payload.strip_prefix(b" ").unwrap_or(payload);
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let text = std::str::from_utf8(payload).map_err(|e| FrameParseError {
        line: String::from_utf8_lossy(line).into_owned(),
        reason: format!("invalid utf-8: {e}"),
    })?;
    let frame = serde_json::from_str(text).map_err(|e| FrameParseError {
        line: text.to_string(),
        reason: e.to_string(),
    })?;
    tracing::debug!(?frame, "Parsed stream frame");
    Ok(Some(frame))
}
