//! Chunking-invariance tests for the frame parser.
//!
//! The parser must emit the same ordered frame sequence no matter how the
//! byte stream is sliced, including splits inside a line, inside a
//! payload, and exactly on a payload boundary. These tests enumerate every
//! one- and two-point split of a representative stream and compare against
//! the unsplit result.

use plume_protocol::{Frame, FrameParser};

/// A stream exercising every parser transition: plain lines, a payload
/// with embedded CRLF, a zero-size payload, a payload with a reply-to
/// header, and trailing operations after each payload boundary.
const STREAM: &[u8] = b"INFO {\"server_id\":\"a1\"}\r\n\
MSG greet 1 5\r\nhello\r\n\
PING\r\n\
MSG greet 1 12\r\nHello\r\nNats!\r\n\
MSG other 2 _INBOX.r 0\r\n\r\n\
+OK\r\n\
PONG\r\n";

fn parse_whole(bytes: &[u8]) -> Vec<Frame> {
    let mut parser = FrameParser::new();
    let mut out = Vec::new();
    parser.feed(bytes, &mut out);
    out
}

fn parse_chunked(chunks: &[&[u8]]) -> Vec<Frame> {
    let mut parser = FrameParser::new();
    let mut out = Vec::new();
    for chunk in chunks {
        parser.feed(chunk, &mut out);
    }
    out
}

#[test]
fn test_unsplit_stream_decodes_expected_frames() {
    let frames = parse_whole(STREAM);
    assert_eq!(frames.len(), 7);
    assert_eq!(frames[0].line, "INFO {\"server_id\":\"a1\"}");
    assert_eq!(frames[1].payload.as_deref(), Some(&b"hello"[..]));
    assert_eq!(frames[2].line, "PING");
    assert_eq!(frames[3].payload.as_deref(), Some(&b"Hello\r\nNats!"[..]));
    assert_eq!(frames[4].line, "MSG other 2 _INBOX.r 0");
    assert_eq!(frames[4].payload.as_deref(), Some(&b""[..]));
    assert_eq!(frames[5].line, "+OK");
    assert_eq!(frames[6].line, "PONG");
}

#[test]
fn test_every_single_split_point_is_equivalent() {
    let expected = parse_whole(STREAM);
    for i in 0..=STREAM.len() {
        let frames = parse_chunked(&[&STREAM[..i], &STREAM[i..]]);
        assert_eq!(frames, expected, "split at byte {i}");
    }
}

#[test]
fn test_every_double_split_point_is_equivalent() {
    let expected = parse_whole(STREAM);
    for i in 0..=STREAM.len() {
        for j in i..=STREAM.len() {
            let frames = parse_chunked(&[&STREAM[..i], &STREAM[i..j], &STREAM[j..]]);
            assert_eq!(frames, expected, "split at bytes {i} and {j}");
        }
    }
}

#[test]
fn test_byte_at_a_time_is_equivalent() {
    let expected = parse_whole(STREAM);
    let mut parser = FrameParser::new();
    let mut out = Vec::new();
    for &byte in STREAM {
        parser.feed(&[byte], &mut out);
    }
    assert_eq!(out, expected);
}

#[test]
fn test_reset_between_streams_emits_fresh_frames_only() {
    let mut parser = FrameParser::new();
    let mut out = Vec::new();
    // Abandon a session mid-payload, then start over.
    parser.feed(b"MSG greet 1 64\r\nonly part of the payload", &mut out);
    assert!(out.is_empty());
    parser.reset();
    parser.feed(STREAM, &mut out);
    assert_eq!(out, parse_whole(STREAM));
}
