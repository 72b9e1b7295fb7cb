//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding protocol frames.
///
/// Decode errors are recoverable per frame: the connection skips the
/// offending frame and keeps reading. Only the frame that failed is lost.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a command body (the `CONNECT` JSON) failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserializing a frame body (the `INFO` JSON) failed.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A `MSG` header did not match `subject sid [reply-to] size`.
    #[error("malformed MSG header: {0}")]
    MalformedHeader(String),

    /// The payload length does not match the size declared in the header.
    #[error("declared payload size {declared} does not match actual size {actual}")]
    PayloadSizeMismatch {
        /// Size declared by the frame header.
        declared: usize,
        /// Actual payload byte count.
        actual: usize,
    },
}
