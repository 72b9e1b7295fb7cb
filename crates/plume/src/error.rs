//! Unified error type for the Plume client.

use plume_protocol::ProtocolError;
use plume_transport::TransportError;

/// Top-level error for every client-facing operation.
///
/// Transport failures and per-frame decode failures are handled internally
/// (reconnect, skip); what crosses this boundary is what a caller can act
/// on: an operation attempted in the wrong state, a spent retry budget, a
/// timeout, or invalid input. The `#[from]` variants wrap lower-layer
/// errors when an operation fails directly against that layer.
#[derive(Debug, thiserror::Error)]
pub enum PlumeError {
    /// A transport-level failure surfaced by an in-flight operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level encode/decode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The operation requires a live session and there is none right now.
    #[error("not connected to a broker")]
    NotConnected,

    /// The connection was disposed; every subsequent operation fails fast.
    #[error("connection is disposed")]
    Disposed,

    /// Every connect attempt failed and the retry budget is spent.
    #[error("connect retries exhausted after {attempts} attempts")]
    ConnectRetriesExhausted {
        /// Number of failed attempts before giving up.
        attempts: u32,
    },

    /// No reply arrived before the request deadline.
    #[error("request timed out")]
    RequestTimeout,

    /// A bounded subscription was asked for zero messages.
    #[error("message count must be greater than zero")]
    InvalidMessageCount,

    /// The configuration has no servers to connect to.
    #[error("server list must contain at least one server")]
    EmptyServerList,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::Closed;
        let plume_err: PlumeError = err.into();
        assert!(matches!(plume_err, PlumeError::Transport(_)));
        assert_eq!(plume_err.to_string(), "transport closed");
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::MalformedHeader("MSG x".to_string());
        let plume_err: PlumeError = err.into();
        assert!(matches!(plume_err, PlumeError::Protocol(_)));
    }

    #[test]
    fn test_retry_exhaustion_message_carries_attempts() {
        let err = PlumeError::ConnectRetriesExhausted { attempts: 10 };
        assert!(err.to_string().contains("10"));
    }
}
