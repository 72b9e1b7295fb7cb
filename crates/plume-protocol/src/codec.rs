//! Frame decoding and command encoding.
//!
//! [`decode`] maps a parsed [`Frame`] to a typed [`ProtocolEvent`]; the
//! encoder functions produce write-ready byte buffers for every command the
//! client sends. Each encoded command is a single buffer so one transport
//! write keeps it atomic on the wire.

use crate::error::ProtocolError;
use crate::parser::Frame;
use crate::types::{ConnectOptions, IncomingMessage, ProtocolEvent, ServerInfo};

/// Keepalive probe, pre-encoded.
pub const PING: &[u8] = b"PING\r\n";
/// Keepalive answer, pre-encoded.
pub const PONG: &[u8] = b"PONG\r\n";

/// Decodes one frame into a typed protocol event.
///
/// # Errors
/// Returns [`ProtocolError`] for a malformed `INFO` body or `MSG` header.
/// Decode failures are per-frame and recoverable: callers skip the frame
/// and keep the connection alive.
pub fn decode(frame: Frame) -> Result<ProtocolEvent, ProtocolError> {
    let Frame { line, payload } = frame;
    let (op, rest) = match line.split_once(' ') {
        Some((op, rest)) => (op, rest),
        None => (line.as_str(), ""),
    };

    match op {
        "INFO" => {
            let info: ServerInfo =
                serde_json::from_str(rest).map_err(ProtocolError::Decode)?;
            Ok(ProtocolEvent::Info(info))
        }
        "MSG" => decode_msg(rest, payload.unwrap_or_default()).map(ProtocolEvent::Msg),
        "PING" => Ok(ProtocolEvent::Ping),
        "PONG" => Ok(ProtocolEvent::Pong),
        "+OK" => Ok(ProtocolEvent::Ok),
        "-ERR" => Ok(ProtocolEvent::Err(rest.trim().to_string())),
        _ => Ok(ProtocolEvent::Unknown {
            op: op.to_string(),
            rest: rest.to_string(),
        }),
    }
}

/// Parses a `MSG` header: `subject sid [reply-to] size`.
/// The reply-to subject is present iff the header has four tokens.
fn decode_msg(header: &str, payload: Vec<u8>) -> Result<IncomingMessage, ProtocolError> {
    let malformed = || ProtocolError::MalformedHeader(header.to_string());

    let mut tokens = header.split(' ').filter(|t| !t.is_empty());
    let subject = tokens.next().ok_or_else(malformed)?;
    let sid = tokens.next().ok_or_else(malformed)?;
    let third = tokens.next().ok_or_else(malformed)?;
    let fourth = tokens.next();
    if tokens.next().is_some() {
        return Err(malformed());
    }

    let (reply_to, size_token) = match fourth {
        Some(size) => (Some(third), size),
        None => (None, third),
    };

    let sid: u64 = sid.parse().map_err(|_| malformed())?;
    let declared: usize = size_token.parse().map_err(|_| malformed())?;
    if declared != payload.len() {
        return Err(ProtocolError::PayloadSizeMismatch {
            declared,
            actual: payload.len(),
        });
    }

    Ok(IncomingMessage {
        subject: subject.to_string(),
        sid,
        reply_to: reply_to.map(str::to_string),
        payload,
    })
}

/// Encodes the `CONNECT` handshake command.
///
/// # Errors
/// Returns [`ProtocolError::Encode`] if the options fail to serialize.
pub fn connect(options: &ConnectOptions) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_string(options).map_err(ProtocolError::Encode)?;
    Ok(format!("CONNECT {json}\r\n").into_bytes())
}

/// Encodes `PUB subject [reply-to] size\r\npayload\r\n` as one buffer.
///
/// A zero-length payload is legal and encodes size `0` with an empty
/// payload segment.
pub fn publish(subject: &str, reply_to: Option<&str>, payload: &[u8]) -> Vec<u8> {
    let header = match reply_to {
        Some(reply) => format!("PUB {subject} {reply} {}", payload.len()),
        None => format!("PUB {subject} {}", payload.len()),
    };
    let mut bytes = Vec::with_capacity(header.len() + payload.len() + 4);
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(b"\r\n");
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// Encodes `SUB subject sid`.
pub fn subscribe(subject: &str, sid: u64) -> Vec<u8> {
    format!("SUB {subject} {sid}\r\n").into_bytes()
}

/// Encodes a bounded subscribe as one buffer: `SUB subject sid` directly
/// followed by `UNSUB sid limit`, so the broker stops delivery by itself
/// after `limit` messages.
pub fn subscribe_with_limit(subject: &str, sid: u64, limit: u64) -> Vec<u8> {
    format!("SUB {subject} {sid}\r\nUNSUB {sid} {limit}\r\n").into_bytes()
}

/// Encodes `UNSUB sid [max-messages]`.
pub fn unsubscribe(sid: u64, max_messages: Option<u64>) -> Vec<u8> {
    match max_messages {
        Some(max) => format!("UNSUB {sid} {max}\r\n").into_bytes(),
        None => format!("UNSUB {sid}\r\n").into_bytes(),
    }
}
