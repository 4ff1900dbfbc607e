//! Property-based tests for stream reassembly
//!
//! However the network splits a well-formed body, the reassembled message
//! must match the one produced from the unsplit body.

use super::*;
use proptest::prelude::*;

fn reassemble(chunks: &[&[u8]]) -> Message {
    let mut parser = StreamFrameParser::new();
    let mut acc = TranscriptAccumulator::new();
    for chunk in chunks {
        for frame in parser.push(chunk) {
            acc.apply(frame);
        }
    }
    for frame in parser.finish() {
        acc.apply(frame);
    }
    acc.into_message()
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => "\\PC{0,16}",
        1 => Just("line\nbreak".to_string()),
        1 => Just("quote\"d \\ slash".to_string()),
        1 => Just("\u{e9}\u{1f600}\u{4e2d}".to_string()),
    ]
}

fn arb_terminal() -> impl Strategy<Value = StreamFrame> {
    prop_oneof![
        Just(StreamFrame::done()),
        ("[a-z0-9-]{1,12}", 0u64..5000).prop_map(|(id, tokens)| StreamFrame::Done {
            message_id: Some(id),
            tokens: Some(tokens),
        }),
        "[a-zA-Z ]{1,20}".prop_map(StreamFrame::error),
    ]
}

/// A body of content frames and a terminal frame, with optional
/// keep-alive lines sprinkled between events.
fn arb_body() -> impl Strategy<Value = (Vec<String>, StreamFrame, String)> {
    (
        proptest::collection::vec((arb_text(), any::<bool>()), 0..10),
        arb_terminal(),
    )
        .prop_map(|(parts, terminal)| {
            let mut body = String::new();
            let mut texts = Vec::new();
            for (text, keep_alive) in parts {
                body.push_str(&StreamFrame::content(text.clone()).to_sse_line());
                if keep_alive {
                    body.push('\n');
                }
                texts.push(text);
            }
            body.push_str(&terminal.to_sse_line());
            (texts, terminal, body)
        })
}

fn split_at_points(bytes: &[u8], points: &[prop::sample::Index]) -> Vec<Vec<u8>> {
    let mut offsets: Vec<usize> = points.iter().map(|i| i.index(bytes.len() + 1)).collect();
    offsets.sort_unstable();
    offsets.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for offset in offsets {
        chunks.push(bytes[start..offset].to_vec());
        start = offset;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

proptest! {
    #[test]
    fn chunk_boundaries_do_not_change_transcript(
        (texts, terminal, body) in arb_body(),
        points in proptest::collection::vec(any::<prop::sample::Index>(), 0..24),
    ) {
        let whole = reassemble(&[body.as_bytes()]);

        let chunks = split_at_points(body.as_bytes(), &points);
        let chunk_refs: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
        let split = reassemble(&chunk_refs);

        prop_assert_eq!(&split, &whole);
        prop_assert_eq!(split.content, texts.concat());
        let expected_status = match terminal {
            StreamFrame::Error { .. } => MessageStatus::Errored,
            _ => MessageStatus::Complete,
        };
        prop_assert_eq!(split.status, expected_status);
    }

    #[test]
    fn byte_at_a_time_matches_whole(
        (_texts, _terminal, body) in arb_body(),
    ) {
        let whole = reassemble(&[body.as_bytes()]);
        let singles: Vec<&[u8]> = body.as_bytes().chunks(1).collect();
        prop_assert_eq!(reassemble(&singles), whole);
    }

    #[test]
    fn trailing_garbage_after_terminal_is_ignored(
        (_texts, _terminal, body) in arb_body(),
        garbage in "\\PC{0,40}",
    ) {
        let whole = reassemble(&[body.as_bytes()]);
        let with_tail = format!("{body}data: {{\"type\":\"content\",\"text\":\"late\"}}\n{garbage}");
        prop_assert_eq!(reassemble(&[with_tail.as_bytes()]), whole);
    }
}
