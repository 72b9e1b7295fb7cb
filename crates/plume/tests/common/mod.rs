//! In-memory broker harness for integration tests.
//!
//! [`MockDialer`] hands out [`tokio::io::duplex`] channels instead of TCP
//! sockets; the other end of each channel is wrapped in a [`MockBroker`]
//! that scripts the broker side of the conversation line by line. A queued
//! session can be written to before the client dials it (the duplex
//! channel buffers), which is how tests stage the `INFO` greeting.

// Each test binary uses a different subset of the harness.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use plume::{ConnectionConfig, Dialer, Transport, TransportError, TrustPolicy};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::time::Duration;

// ============================================================
// Transport over an in-memory duplex channel
// ============================================================

pub struct MockTransport {
    stream: DuplexStream,
}

impl Transport for MockTransport {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream
            .write_all(data)
            .await
            .map_err(TransportError::WriteFailed)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf).await {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(e) => Err(TransportError::ReadFailed(e)),
        }
    }

    async fn upgrade_tls(&mut self, _policy: &TrustPolicy) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Hands out pre-queued duplex channels, one per dial. Dialing with an
/// empty queue fails like a refused TCP connection.
#[derive(Clone, Default)]
pub struct MockDialer {
    sessions: Arc<Mutex<VecDeque<DuplexStream>>>,
    dialed: Arc<Mutex<Vec<String>>>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues one future session and returns the broker-side end.
    pub fn add_session(&self) -> DuplexStream {
        let (client_end, broker_end) = tokio::io::duplex(16 * 1024);
        self.sessions.lock().unwrap().push_back(client_end);
        broker_end
    }

    /// Every `host:port` dialed so far, in order, successful or not.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().unwrap().clone()
    }
}

impl Dialer for MockDialer {
    type Transport = MockTransport;

    async fn dial(&self, host: &str, port: u16) -> Result<MockTransport, TransportError> {
        self.dialed.lock().unwrap().push(format!("{host}:{port}"));
        self.sessions
            .lock()
            .unwrap()
            .pop_front()
            .map(|stream| MockTransport { stream })
            .ok_or_else(|| {
                TransportError::DialFailed(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "no session queued",
                ))
            })
    }
}

// ============================================================
// Scripted broker
// ============================================================

pub const INFO_JSON: &str = r#"{"server_id":"mock-1","version":"2.0.0","go":"go1.22","host":"127.0.0.1","port":4222,"auth_required":false,"ssl_required":false,"max_payload":1048576}"#;

/// Drives the broker side of one session.
pub struct MockBroker {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockBroker {
    pub fn new(stream: DuplexStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer
            .write_all(bytes)
            .await
            .expect("broker write should succeed");
    }

    /// Sends the standard `INFO` greeting that starts a session.
    pub async fn send_info(&mut self) {
        self.send_raw(format!("INFO {INFO_JSON}\r\n").as_bytes()).await;
    }

    /// Reads one CRLF-terminated command line, without the terminator.
    pub async fn recv_line(&mut self) -> String {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .expect("broker read should succeed");
        assert!(n > 0, "client closed the connection");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Reads a `size`-byte payload plus its trailing CRLF.
    pub async fn recv_payload(&mut self, size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; size + 2];
        self.reader
            .read_exact(&mut buf)
            .await
            .expect("broker read should succeed");
        assert_eq!(&buf[size..], b"\r\n", "payload not CRLF-terminated");
        buf.truncate(size);
        buf
    }

    /// Reads and discards everything until the client closes its end.
    pub async fn drain_until_closed(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match self.reader.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    /// Delivers one message to the client.
    pub async fn deliver(&mut self, subject: &str, sid: u64, reply_to: Option<&str>, payload: &[u8]) {
        let header = match reply_to {
            Some(reply) => format!("MSG {subject} {sid} {reply} {}\r\n", payload.len()),
            None => format!("MSG {subject} {sid} {}\r\n", payload.len()),
        };
        let mut bytes = header.into_bytes();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(b"\r\n");
        self.send_raw(&bytes).await;
    }
}

// ============================================================
// Config presets
// ============================================================

/// Installs a tracing subscriber honoring `RUST_LOG`, once per process,
/// so a failing test can be rerun with the driver's internal logging.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Config with keepalive effectively disabled, for tests that script the
/// whole conversation and must not see stray `PING`s.
pub fn quiet_config() -> ConnectionConfig {
    let mut config = ConnectionConfig::new("mock", 4222);
    config.ping_interval = Duration::from_secs(60);
    config.ping_timeout = Duration::from_secs(60);
    config.connect_retry_delay = Duration::from_millis(10);
    config.max_connect_retries = 3;
    config
}

/// Config with an aggressive keepalive, for tests that exercise the
/// PING/PONG machinery.
pub fn keepalive_config() -> ConnectionConfig {
    let mut config = quiet_config();
    config.ping_interval = Duration::from_millis(50);
    config.ping_timeout = Duration::from_millis(100);
    config
}

/// Queues one session on the dialer and stages the `INFO` greeting on it,
/// so a subsequent connect completes its handshake immediately.
pub async fn staged_broker(dialer: &MockDialer) -> MockBroker {
    init_tracing();
    let mut broker = MockBroker::new(dialer.add_session());
    broker.send_info().await;
    broker
}

/// Asserts that a command line is a `CONNECT` and returns its JSON body.
pub fn connect_body(line: &str) -> String {
    line.strip_prefix("CONNECT ")
        .unwrap_or_else(|| panic!("expected CONNECT, got: {line}"))
        .to_string()
}
