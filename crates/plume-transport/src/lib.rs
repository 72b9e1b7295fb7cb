//! Transport abstraction layer for Plume.
//!
//! Provides the [`Transport`] and [`Dialer`] traits that abstract over the
//! raw duplex byte channel to the broker, plus the default TCP
//! implementation with an in-place TLS upgrade.
//!
//! The connection layer never touches sockets directly: it owns exactly
//! one `Transport` at a time and replaces it on reconnect. Tests substitute
//! an in-memory transport through the [`Dialer`] seam.

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{TcpDialer, TcpTransport, TrustPolicy};

use std::future::Future;

/// A duplex byte channel to one broker.
///
/// The trait methods return named `impl Future + Send` types (rather than
/// plain `async fn`) so that generic code holding a `Transport` can be
/// spawned onto the Tokio runtime.
pub trait Transport: Send + 'static {
    /// Writes the whole buffer to the peer.
    ///
    /// A single call must hit the wire as one contiguous byte sequence;
    /// callers rely on this to keep protocol commands atomic.
    fn write(
        &mut self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Reads available bytes into `buf`, returning how many were read.
    ///
    /// Returning `Ok(0)` means "no data within an internal idle window",
    /// not end-of-stream. A closed or broken channel is an `Err`;
    /// implementations must map peer EOF to [`TransportError::Closed`].
    fn read(
        &mut self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Upgrades the channel to TLS in place.
    ///
    /// Idempotent: calling this on an already-encrypted channel is a no-op.
    fn upgrade_tls(
        &mut self,
        policy: &TrustPolicy,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Acquires new [`Transport`] instances.
///
/// This is the seam between the connection state machine and the network:
/// the reconnect loop calls `dial` once per attempt, and tests provide a
/// dialer that hands out in-memory channels instead of sockets.
pub trait Dialer: Send + Sync + 'static {
    /// The transport type produced by this dialer.
    type Transport: Transport;

    /// Opens a fresh channel to `host:port`.
    fn dial(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}
