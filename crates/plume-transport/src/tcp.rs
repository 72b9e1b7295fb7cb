//! TCP transport with an in-place rustls upgrade.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::{Dialer, Transport, TransportError};

/// Which certificates to trust when upgrading to TLS.
#[derive(Debug, Clone, Default)]
pub enum TrustPolicy {
    /// Trust the Mozilla web-PKI root set (via `webpki-roots`).
    #[default]
    WebPkiRoots,
    /// Trust only the given DER-encoded root certificates.
    CustomRoots(Vec<CertificateDer<'static>>),
}

impl TrustPolicy {
    fn client_config(&self) -> Result<ClientConfig, TransportError> {
        let mut roots = RootCertStore::empty();
        match self {
            TrustPolicy::WebPkiRoots => {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
            TrustPolicy::CustomRoots(certs) => {
                for cert in certs {
                    roots
                        .add(cert.clone())
                        .map_err(|e| TransportError::InvalidTrustRoot(e.to_string()))?;
                }
            }
        }
        Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }
}

/// Opens plain TCP connections for [`TcpTransport`].
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// How long to wait for the TCP connect before giving up.
    pub connect_timeout: Duration,
    /// Disable Nagle's algorithm. On by default: protocol commands are
    /// small and latency-sensitive.
    pub nodelay: bool,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            nodelay: true,
        }
    }
}

impl Dialer for TcpDialer {
    type Transport = TcpTransport;

    async fn dial(&self, host: &str, port: u16) -> Result<TcpTransport, TransportError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                TransportError::DialFailed(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })?
            .map_err(TransportError::DialFailed)?;
        stream.set_nodelay(self.nodelay).map_err(TransportError::DialFailed)?;
        tracing::debug!(host, port, "tcp transport connected");
        Ok(TcpTransport {
            host: host.to_string(),
            stream: Some(Stream::Plain(stream)),
        })
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// A TCP channel to one broker, optionally upgraded to TLS.
pub struct TcpTransport {
    /// Host name the connection was dialed with; used as the TLS SNI name.
    host: String,
    /// `None` only if a TLS upgrade failed mid-flight; every operation on
    /// such a transport reports [`TransportError::Closed`].
    stream: Option<Stream>,
}

impl TcpTransport {
    fn stream_mut(&mut self) -> Result<&mut Stream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for TcpTransport {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let result = match self.stream_mut()? {
            Stream::Plain(s) => s.write_all(data).await.and(s.flush().await),
            Stream::Tls(s) => s.write_all(data).await.and(s.flush().await),
        };
        result.map_err(TransportError::WriteFailed)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = match self.stream_mut()? {
            Stream::Plain(s) => s.read(buf).await,
            Stream::Tls(s) => s.read(buf).await,
        }
        .map_err(TransportError::ReadFailed)?;
        // A zero-byte TCP read is EOF; the Transport contract reserves
        // Ok(0) for "no data yet", so surface the close as an error.
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(n)
    }

    async fn upgrade_tls(&mut self, policy: &TrustPolicy) -> Result<(), TransportError> {
        match self.stream_mut()? {
            Stream::Tls(_) => return Ok(()),
            Stream::Plain(_) => {}
        }
        let Some(Stream::Plain(plain)) = self.stream.take() else {
            return Err(TransportError::Closed);
        };

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|_| TransportError::InvalidServerName(self.host.clone()))?;
        let connector = TlsConnector::from(Arc::new(policy.client_config()?));
        let tls = connector
            .connect(server_name, plain)
            .await
            .map_err(TransportError::TlsUpgrade)?;

        tracing::debug!(host = %self.host, "transport upgraded to tls");
        self.stream = Some(Stream::Tls(Box::new(tls)));
        Ok(())
    }
}
