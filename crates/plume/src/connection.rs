//! The connection state machine.
//!
//! A [`Connection`] is a cheap, cloneable handle; the actual work happens
//! in a driver task that exclusively owns the transport. The driver runs
//! the read loop, the handshake, the keepalive probe, and the reconnect
//! loop, and fans decoded events out on a broadcast channel:
//!
//! ```text
//!              ┌────────────────── driver task ──────────────────┐
//! Transport ──→│ read loop → FrameParser → codec::decode → handle │──→ broadcast events
//!              │      keepalive timer ── PING/PONG ──┐            │──→ watch  state
//!              │      command channel ── writes ─────┘            │──→ watch  connect info
//!              └──────────────────────────────────────────────────┘
//! ```
//!
//! Writes are serialized through the command channel, so no two commands
//! can interleave their bytes. State transitions happen only inside the
//! driver; handles observe them through watch channels but never mutate.

use std::collections::HashSet;

use plume_protocol::{FrameParser, ProtocolEvent, ServerInfo, codec};
use plume_transport::{Dialer, TcpDialer, Transport};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use crate::config::{ConnectionConfig, ServerAddress};
use crate::error::PlumeError;

/// Lifecycle of a connection. Exactly one value at a time; transitions are
/// the only place connection lifecycle truth lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, and no attempt in progress.
    Disconnected,
    /// Acquiring a transport or awaiting the handshake.
    Connecting,
    /// Handshake completed; operations may flow.
    Connected,
}

/// Read buffer size for the driver's read loop.
const READ_BUFFER_SIZE: usize = 512;
/// Capacity of the decoded-event broadcast channel. A slow subscriber
/// lagging past this many events starts losing the oldest ones.
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

struct WriteCommand {
    bytes: Vec<u8>,
    done: oneshot::Sender<Result<(), PlumeError>>,
}

/// Handle to one broker session with automatic reconnection.
///
/// Clones share the same underlying session. The event stream keeps its
/// identity across reconnects: subscribers of [`Connection::events`] never
/// need to resubscribe to the stream itself.
#[derive(Clone)]
pub struct Connection {
    commands: mpsc::Sender<WriteCommand>,
    /// Out-of-band disposal signal. A watch send never blocks, so dispose
    /// cannot be starved by a full command channel.
    dispose: watch::Sender<bool>,
    events: broadcast::Sender<ProtocolEvent>,
    state: watch::Receiver<ConnectionState>,
    connected: watch::Receiver<Option<ServerInfo>>,
    max_connect_retries: u32,
}

impl Connection {
    /// Connects to the configured brokers over TCP and completes the
    /// handshake before returning.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, PlumeError> {
        Self::connect_with(config, TcpDialer::default()).await
    }

    /// Connects through a custom [`Dialer`]. Tests use this seam to run
    /// against an in-memory transport.
    pub async fn connect_with<D: Dialer>(
        config: ConnectionConfig,
        dialer: D,
    ) -> Result<Self, PlumeError> {
        if config.servers.is_empty() {
            return Err(PlumeError::EmptyServerList);
        }

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (dispose_tx, dispose_rx) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (connected_tx, connected_rx) = watch::channel(None);
        let max_connect_retries = config.max_connect_retries;

        let driver = Driver {
            dialer,
            config,
            parser: FrameParser::new(),
            events: events_tx.clone(),
            state: state_tx,
            connected: connected_tx,
            commands: commands_rx,
            disposed: dispose_rx,
            server_info: None,
        };
        tokio::spawn(driver.run());

        let connection = Self {
            commands: commands_tx,
            dispose: dispose_tx,
            events: events_tx,
            state: state_rx,
            connected: connected_rx,
            max_connect_retries,
        };
        connection.wait_connected().await?;
        Ok(connection)
    }

    /// Waits for the driver to reach `Connected`, or reports why it never
    /// will (the driver only exits after exhausting its retry budget or
    /// being disposed).
    async fn wait_connected(&self) -> Result<(), PlumeError> {
        let mut state = self.state.clone();
        loop {
            if *state.borrow_and_update() == ConnectionState::Connected {
                return Ok(());
            }
            if state.changed().await.is_err() {
                return Err(PlumeError::ConnectRetriesExhausted {
                    attempts: self.max_connect_retries,
                });
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Broker metadata as of the last completed handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.connected.borrow().clone()
    }

    /// Subscribes to the decoded-event stream.
    ///
    /// The stream is a broadcast: every subscriber observes every event,
    /// in wire order, without affecting other subscribers.
    pub fn events(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.events.subscribe()
    }

    /// Connect-notification stream with replay-latest semantics: the
    /// current value is `Some(info)` while connected, so a late subscriber
    /// observes the present state rather than only future transitions.
    pub fn on_connect(&self) -> watch::Receiver<Option<ServerInfo>> {
        self.connected.clone()
    }

    /// Writes one pre-encoded command.
    ///
    /// The write is atomic: the whole buffer is handed to the transport in
    /// one call, and concurrent writers cannot interleave bytes.
    ///
    /// # Errors
    /// [`PlumeError::Disposed`] after disposal, [`PlumeError::NotConnected`]
    /// while a session is down, or the transport failure that killed the
    /// write (which also triggers a reconnect).
    pub async fn write(&self, bytes: Vec<u8>) -> Result<(), PlumeError> {
        if *self.dispose.borrow() || self.commands.is_closed() {
            return Err(PlumeError::Disposed);
        }
        if self.state() != ConnectionState::Connected {
            return Err(PlumeError::NotConnected);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(WriteCommand {
                bytes,
                done: done_tx,
            })
            .await
            .map_err(|_| PlumeError::Disposed)?;
        done_rx.await.map_err(|_| PlumeError::Disposed)?
    }

    /// Tears down the session and fails all subsequent operations.
    /// Idempotent.
    pub fn dispose(&self) {
        let _ = self.dispose.send(true);
    }
}

/// How one transport session ended.
enum SessionEnd {
    /// Explicit disposal (or every handle dropped): stop for good.
    Disposed,
    /// The transport died; `reached_connected` says whether the handshake
    /// had completed. Sessions that never connect count against the retry
    /// budget so a broker that accepts TCP but never completes a handshake
    /// cannot trap the driver in an endless loop.
    Lost { reached_connected: bool },
}

struct Driver<D: Dialer> {
    dialer: D,
    config: ConnectionConfig,
    parser: FrameParser,
    events: broadcast::Sender<ProtocolEvent>,
    state: watch::Sender<ConnectionState>,
    connected: watch::Sender<Option<ServerInfo>>,
    commands: mpsc::Receiver<WriteCommand>,
    disposed: watch::Receiver<bool>,
    /// Latest broker metadata, refreshed by every `INFO` frame; feeds the
    /// cluster-discovery candidate list on reconnect.
    server_info: Option<ServerInfo>,
}

impl<D: Dialer> Driver<D> {
    async fn run(mut self) {
        let mut failed_sessions: u32 = 0;

        loop {
            if *self.disposed.borrow() {
                break;
            }
            let _ = self.state.send(ConnectionState::Connecting);
            let _ = self.connected.send(None);

            let transport = match self.acquire_transport().await {
                Ok(Some(t)) => t,
                // Disposed while dialing.
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "giving up: connect retries exhausted");
                    break;
                }
            };

            self.parser.reset();
            match self.run_session(transport).await {
                SessionEnd::Disposed => break,
                SessionEnd::Lost { reached_connected } => {
                    if reached_connected {
                        failed_sessions = 0;
                        tracing::warn!("connection lost, reconnecting");
                    } else {
                        failed_sessions += 1;
                        tracing::warn!(
                            failures = failed_sessions,
                            "session ended before handshake completed"
                        );
                        if failed_sessions > self.config.max_connect_retries {
                            tracing::error!("giving up: handshake retries exhausted");
                            break;
                        }
                        if !self.wait_retry_delay().await {
                            break;
                        }
                    }
                }
            }
        }

        let _ = self.state.send(ConnectionState::Disconnected);
        let _ = self.connected.send(None);
        // Fail whatever is still queued, then stop accepting commands.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            let _ = command.done.send(Err(PlumeError::Disposed));
        }
        tracing::debug!("connection driver stopped");
    }

    /// Resolves once the connection is disposed, either explicitly or by
    /// every handle being dropped.
    async fn wait_disposed(disposed: &mut watch::Receiver<bool>) {
        loop {
            if *disposed.borrow_and_update() {
                return;
            }
            if disposed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Candidate brokers for the next connect: the configured list,
    /// unioned with the addresses the broker advertised for cluster
    /// discovery when the client speaks protocol 1.
    fn candidate_servers(&self) -> Vec<ServerAddress> {
        let mut servers = self.config.servers.clone();
        let mut seen: HashSet<ServerAddress> = servers.iter().cloned().collect();

        if self.config.options.protocol == 1 {
            let discovered = self
                .server_info
                .as_ref()
                .and_then(|info| info.connect_urls.as_deref())
                .unwrap_or_default();
            for url in discovered {
                match url.parse::<ServerAddress>() {
                    Ok(addr) => {
                        if seen.insert(addr.clone()) {
                            servers.push(addr);
                        }
                    }
                    Err(e) => tracing::warn!(url, error = %e, "skipping discovery address"),
                }
            }
        }
        servers
    }

    /// Dials candidates in round-robin order until one accepts, the retry
    /// budget is spent, or the connection is disposed (`Ok(None)`).
    async fn acquire_transport(&mut self) -> Result<Option<D::Transport>, PlumeError> {
        let servers = self.candidate_servers();
        let mut attempts: u32 = 0;
        let mut next = 0usize;

        loop {
            if *self.disposed.borrow() {
                return Ok(None);
            }
            let server = &servers[next % servers.len()];
            match self.dialer.dial(&server.host, server.port).await {
                Ok(transport) => {
                    tracing::debug!(server = %server, "transport acquired");
                    return Ok(Some(transport));
                }
                Err(e) => {
                    attempts += 1;
                    if attempts > self.config.max_connect_retries {
                        return Err(PlumeError::ConnectRetriesExhausted { attempts });
                    }
                    tracing::debug!(server = %server, error = %e, attempts, "dial failed, retrying");
                    next += 1;
                    if !self.wait_retry_delay().await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Sleeps for the retry delay while staying responsive to commands.
    /// Returns `false` if the connection was disposed in the meantime.
    async fn wait_retry_delay(&mut self) -> bool {
        let deadline = Instant::now() + self.config.connect_retry_delay;
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return true,
                _ = Self::wait_disposed(&mut self.disposed) => return false,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        let _ = command.done.send(Err(PlumeError::NotConnected));
                    }
                    None => return false,
                },
            }
        }
    }

    /// Runs one transport session: read loop, handshake, keepalive, and
    /// serialized writes, until the session ends.
    async fn run_session(&mut self, mut transport: D::Transport) -> SessionEnd {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut frames = Vec::new();
        let mut connected = false;

        let mut ping_timer = time::interval_at(
            Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Deadline for the answer to our own PING; None while no probe is
        // outstanding.
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = Self::wait_disposed(&mut self.disposed) => return SessionEnd::Disposed,

                command = self.commands.recv() => match command {
                    Some(WriteCommand { bytes, done }) => {
                        // A command queued while the previous session was
                        // dying must not ride into this one ahead of the
                        // handshake (with TLS it would even go out in
                        // cleartext).
                        if !connected {
                            let _ = done.send(Err(PlumeError::NotConnected));
                            continue;
                        }
                        tokio::select! {
                            result = transport.write(&bytes) => match result {
                                Ok(()) => {
                                    let _ = done.send(Ok(()));
                                }
                                Err(e) => {
                                    tracing::debug!(error = %e, "write failed");
                                    let _ = done.send(Err(PlumeError::Transport(e)));
                                    return SessionEnd::Lost { reached_connected: connected };
                                }
                            },
                            // A stalled transport must not make disposal
                            // wait for the peer to drain.
                            _ = Self::wait_disposed(&mut self.disposed) => {
                                let _ = done.send(Err(PlumeError::Disposed));
                                return SessionEnd::Disposed;
                            }
                        }
                    }
                    None => return SessionEnd::Disposed,
                },

                read = transport.read(&mut buf) => match read {
                    // No data within the transport's idle window.
                    Ok(0) => {}
                    Ok(n) => {
                        self.parser.feed(&buf[..n], &mut frames);
                        for frame in frames.drain(..) {
                            let event = match codec::decode(frame) {
                                Ok(event) => event,
                                Err(e) => {
                                    // Recoverable per frame: skip it, keep
                                    // the session alive.
                                    tracing::warn!(error = %e, "skipping undecodable frame");
                                    continue;
                                }
                            };
                            match &event {
                                ProtocolEvent::Info(info) => {
                                    self.server_info = Some(info.clone());
                                    if !connected {
                                        if let Err(e) = self.handshake(&mut transport, info).await {
                                            tracing::warn!(error = %e, "handshake failed");
                                            return SessionEnd::Lost { reached_connected: false };
                                        }
                                        connected = true;
                                        let _ = self.state.send(ConnectionState::Connected);
                                        let _ = self.connected.send(Some(info.clone()));
                                        tracing::info!(server_id = %info.server_id, "connected");
                                    } else {
                                        tracing::debug!(server_id = %info.server_id, "server info refreshed");
                                    }
                                }
                                ProtocolEvent::Ping => {
                                    // Broker-initiated probe: answer right
                                    // away, independent of our own timer.
                                    if let Err(e) = transport.write(codec::PONG).await {
                                        tracing::debug!(error = %e, "pong write failed");
                                        return SessionEnd::Lost { reached_connected: connected };
                                    }
                                }
                                ProtocolEvent::Pong => {
                                    pong_deadline = None;
                                }
                                ProtocolEvent::Err(text) => {
                                    tracing::warn!(text = %text, "broker reported error");
                                }
                                _ => {}
                            }
                            let _ = self.events.send(event);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "read failed");
                        return SessionEnd::Lost { reached_connected: connected };
                    }
                },

                // Keepalive probe: only while connected and no probe is
                // already outstanding.
                _ = ping_timer.tick(), if connected && pong_deadline.is_none() => {
                    if let Err(e) = transport.write(codec::PING).await {
                        tracing::debug!(error = %e, "ping write failed");
                        return SessionEnd::Lost { reached_connected: connected };
                    }
                    pong_deadline = Some(Instant::now() + self.config.ping_timeout);
                }

                _ = time::sleep_until(pong_deadline.unwrap_or_else(far_future)),
                    if pong_deadline.is_some() =>
                {
                    tracing::warn!("keepalive pong timed out");
                    return SessionEnd::Lost { reached_connected: connected };
                }
            }
        }
    }

    /// Completes the handshake against a freshly announced broker:
    /// optional TLS upgrade, then the `CONNECT` command.
    async fn handshake(
        &mut self,
        transport: &mut D::Transport,
        info: &ServerInfo,
    ) -> Result<(), PlumeError> {
        if self.config.options.ssl_required || info.ssl_required {
            transport.upgrade_tls(&self.config.trust_policy).await?;
        }
        let command = codec::connect(&self.config.options)?;
        transport.write(&command).await?;
        Ok(())
    }
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400)
}
