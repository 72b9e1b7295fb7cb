/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("dial failed: {0}")]
    DialFailed(#[source] std::io::Error),

    /// Writing to the peer failed.
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// Reading from the peer failed.
    #[error("read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    /// The TLS handshake failed during the in-place upgrade.
    #[error("tls upgrade failed: {0}")]
    TlsUpgrade(#[source] std::io::Error),

    /// The host name is not a valid TLS server name.
    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),

    /// A certificate in the trust policy could not be loaded.
    #[error("invalid trust root: {0}")]
    InvalidTrustRoot(String),

    /// The peer closed the channel.
    #[error("transport closed")]
    Closed,
}
