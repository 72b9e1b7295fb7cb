//! Incremental frame parser.
//!
//! The broker speaks a line-oriented text protocol where one operation,
//! `MSG`, is followed by a binary payload of a size declared on the line
//! itself. Bytes arrive in arbitrary slices: a read may end mid-line,
//! mid-payload, or carry several complete frames at once. The parser is a
//! two-state machine that absorbs chunks of any shape and emits complete
//! frames in arrival order.
//!
//! The load-bearing contract: when a chunk completes a payload, the bytes
//! left over in that same chunk re-enter line parsing immediately. Payload
//! completion never requires a dedicated read.

/// One complete protocol unit: an operation line plus an optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The operation line, without its terminator.
    pub line: String,
    /// Payload bytes for `MSG` frames; `None` for line-only operations.
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug)]
enum ParseState {
    /// Accumulating bytes into the line buffer until `\n`.
    AwaitingLine,
    /// Copying `remaining` payload bytes for the pending `MSG` line.
    AwaitingPayload { remaining: usize },
}

/// Incremental parser turning a byte stream into [`Frame`]s.
///
/// No I/O, pure transformation, restartable: [`FrameParser::reset`] drops
/// all partial state so a parser can be reused across reconnects without
/// leaking bytes from the previous session.
#[derive(Debug)]
pub struct FrameParser {
    state: ParseState,
    line: Vec<u8>,
    pending_line: Option<String>,
    payload: Vec<u8>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Creates a parser with the default line-buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(512)
    }

    /// Creates a parser with a specific initial line-buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: ParseState::AwaitingLine,
            line: Vec::with_capacity(capacity),
            pending_line: None,
            payload: Vec::new(),
        }
    }

    /// Absorbs one chunk of bytes, appending every frame it completes to
    /// `out` in arrival order.
    pub fn feed(&mut self, mut chunk: &[u8], out: &mut Vec<Frame>) {
        while !chunk.is_empty() {
            chunk = match self.state {
                ParseState::AwaitingLine => self.feed_line(chunk, out),
                ParseState::AwaitingPayload { .. } => self.feed_payload(chunk, out),
            };
        }
    }

    /// Drops all partial state and returns to line parsing.
    ///
    /// Called whenever the underlying transport is replaced, so a
    /// half-collected line or payload never leaks across connections.
    pub fn reset(&mut self) {
        self.state = ParseState::AwaitingLine;
        self.line.clear();
        self.pending_line = None;
        self.payload = Vec::new();
    }

    fn feed_line<'a>(&mut self, chunk: &'a [u8], out: &mut Vec<Frame>) -> &'a [u8] {
        for (i, &byte) in chunk.iter().enumerate() {
            match byte {
                b'\r' => {}
                b'\n' => {
                    // Stray terminator with nothing buffered: skip.
                    if self.line.is_empty() {
                        continue;
                    }
                    let line = String::from_utf8_lossy(&self.line).into_owned();
                    self.line.clear();

                    match msg_payload_size(&line) {
                        Some(0) => {
                            // Zero-size payload completes immediately
                            // without consuming further bytes.
                            out.push(Frame {
                                line,
                                payload: Some(Vec::new()),
                            });
                        }
                        Some(size) => {
                            self.pending_line = Some(line);
                            self.payload = Vec::with_capacity(size);
                            self.state = ParseState::AwaitingPayload { remaining: size };
                            return &chunk[i + 1..];
                        }
                        // Not a MSG line, or a MSG line with a bad size
                        // token; the decoder reports that one.
                        None => out.push(Frame { line, payload: None }),
                    }
                }
                _ => self.line.push(byte),
            }
        }
        &[]
    }

    fn feed_payload<'a>(&mut self, chunk: &'a [u8], out: &mut Vec<Frame>) -> &'a [u8] {
        let ParseState::AwaitingPayload { remaining } = &mut self.state else {
            unreachable!("feed_payload called outside AwaitingPayload");
        };

        let take = (*remaining).min(chunk.len());
        self.payload.extend_from_slice(&chunk[..take]);
        *remaining -= take;

        if *remaining == 0 {
            let line = self.pending_line.take().unwrap_or_default();
            out.push(Frame {
                line,
                payload: Some(std::mem::take(&mut self.payload)),
            });
            self.state = ParseState::AwaitingLine;
        }

        // Whatever follows the payload boundary is the start of the next
        // line and is parsed from the same chunk.
        &chunk[take..]
    }
}

/// For a completed `MSG` line, the declared payload size from the trailing
/// token. `None` for every other line, and for `MSG` lines whose trailing
/// token is not numeric (those are emitted as plain frames and rejected by
/// the decoder instead).
fn msg_payload_size(line: &str) -> Option<usize> {
    let rest = line.strip_prefix("MSG ")?;
    rest.rsplit(' ').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut FrameParser, bytes: &[u8]) -> Vec<Frame> {
        let mut out = Vec::new();
        parser.feed(bytes, &mut out);
        out
    }

    #[test]
    fn test_emits_line_frame() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, b"PING\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].line, "PING");
        assert_eq!(frames[0].payload, None);
    }

    #[test]
    fn test_emits_all_frames_in_one_chunk() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, b"PING\r\nPONG\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].line, "PING");
        assert_eq!(frames[1].line, "PONG");
    }

    #[test]
    fn test_msg_frame_collects_payload() {
        let mut parser = FrameParser::new();
        // The payload may itself contain CRLF bytes; they are data, not
        // terminators, while inside the declared size.
        let frames = feed_all(&mut parser, b"MSG greet 1 12\r\nHello\r\nNats!\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].line, "MSG greet 1 12");
        assert_eq!(frames[0].payload.as_deref(), Some(&b"Hello\r\nNats!"[..]));
    }

    #[test]
    fn test_zero_size_payload_completes_immediately() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, b"MSG greet 1 0\r\n\r\nPING\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].line, "MSG greet 1 0");
        assert_eq!(frames[0].payload.as_deref(), Some(&b""[..]));
        assert_eq!(frames[1].line, "PING");
    }

    #[test]
    fn test_payload_completion_reenters_line_parsing() {
        let mut parser = FrameParser::new();
        // One chunk finishes the payload and starts the next operation.
        let frames = feed_all(&mut parser, b"MSG a 1 2\r\nhi\r\n+OK\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload.as_deref(), Some(&b"hi"[..]));
        assert_eq!(frames[1].line, "+OK");
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        parser.feed(b"some me", &mut out);
        assert!(out.is_empty());
        parser.feed(b"ssage\r\n", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, "some message");
    }

    #[test]
    fn test_payload_split_across_chunks() {
        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        parser.feed(b"MSG greet 1 5\r\nhe", &mut out);
        assert!(out.is_empty());
        parser.feed(b"llo\r\n", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_stray_terminators_are_skipped() {
        let mut parser = FrameParser::new();
        let frames = feed_all(&mut parser, b"\r\n\nPING\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].line, "PING");
    }

    #[test]
    fn test_msg_line_with_bad_size_token_passes_through() {
        let mut parser = FrameParser::new();
        // The decoding layer reports this one; the parser must not stall.
        let frames = feed_all(&mut parser, b"MSG greet 1 oops\r\nPING\r\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].line, "MSG greet 1 oops");
        assert_eq!(frames[0].payload, None);
        assert_eq!(frames[1].line, "PING");
    }

    #[test]
    fn test_reset_discards_partial_line() {
        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        parser.feed(b"partial message", &mut out);
        parser.reset();
        parser.feed(b"PING\r\n", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, "PING");
    }

    #[test]
    fn test_reset_discards_partial_payload() {
        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        parser.feed(b"MSG greet 1 20\r\npartial payload", &mut out);
        parser.reset();
        parser.feed(b"PING\r\n", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].line, "PING");
        assert_eq!(out[0].payload, None);
    }
}
