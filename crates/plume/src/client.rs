//! The high-level publish/subscribe client.
//!
//! [`Client`] layers subscription multiplexing and request-reply on top of
//! a [`Connection`]. It owns the sid counter, the subscription registry,
//! and a per-client inbox namespace for request-reply, and it spawns the
//! resubscriber task that replays the registry after every reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use plume_protocol::{IncomingMessage, ProtocolEvent, ServerInfo, codec};
use plume_transport::{Dialer, TcpDialer};
use rand::Rng;
use tokio::sync::{OnceCell, broadcast, watch};
use tokio::time::{self, Duration};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::PlumeError;
use crate::subscription::{Registry, Subscription, SubscriptionEntry};

/// Async publish/subscribe client.
///
/// Cheap to clone; all clones share one connection, one sid space, and one
/// inbox namespace.
#[derive(Clone)]
pub struct Client {
    connection: Connection,
    registry: Registry,
    next_sid: Arc<AtomicU64>,
    /// Subject namespace for request-reply inboxes, unique per client so
    /// concurrent clients on one broker never receive each other's replies.
    inbox_prefix: Arc<String>,
    /// Sid of the shared wildcard inbox subscription, created lazily by
    /// the first request.
    inbox_sid: Arc<OnceCell<u64>>,
}

impl Client {
    /// Connects to the configured brokers over TCP.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, PlumeError> {
        Self::connect_with(config, TcpDialer::default()).await
    }

    /// Connects through a custom [`Dialer`].
    pub async fn connect_with<D: Dialer>(
        config: ConnectionConfig,
        dialer: D,
    ) -> Result<Self, PlumeError> {
        let connection = Connection::connect_with(config, dialer).await?;
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(resubscribe_on_reconnect(
            connection.clone(),
            connection.on_connect(),
            registry.clone(),
        ));

        Ok(Self {
            connection,
            registry,
            next_sid: Arc::new(AtomicU64::new(1)),
            inbox_prefix: Arc::new(format!("_INBOX.{}.", generate_token())),
            inbox_sid: Arc::new(OnceCell::new()),
        })
    }

    /// The underlying connection handle.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Broker metadata as of the last completed handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.connection.server_info()
    }

    /// Connect-notification stream; see [`Connection::on_connect`].
    pub fn on_connect(&self) -> watch::Receiver<Option<ServerInfo>> {
        self.connection.on_connect()
    }

    /// Publishes a payload to a subject. Fire-and-forget: success means
    /// the bytes were handed to the transport, not that anyone received
    /// them.
    pub async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), PlumeError> {
        self.connection
            .write(codec::publish(subject, None, payload))
            .await
    }

    /// Publishes with a reply-to subject attached, for receivers that
    /// answer manually instead of through [`Client::request`].
    pub async fn publish_with_reply(
        &self,
        subject: &str,
        reply_to: &str,
        payload: &[u8],
    ) -> Result<(), PlumeError> {
        self.connection
            .write(codec::publish(subject, Some(reply_to), payload))
            .await
    }

    /// Subscribes to a subject. The subscription survives reconnects
    /// until the handle is dropped or unsubscribed.
    pub async fn subscribe(&self, subject: &str) -> Result<Subscription, PlumeError> {
        self.start_subscription(subject, None).await
    }

    /// Subscribes for at most `limit` messages.
    ///
    /// The limit is advertised to the broker up front, so the broker
    /// stops delivering (and drops the subscription) after `limit`
    /// messages on its own; [`Subscription::next`] then returns `None`.
    /// If the handle is dropped early, the broker is told to stop
    /// immediately.
    pub async fn subscribe_with_limit(
        &self,
        subject: &str,
        limit: u64,
    ) -> Result<Subscription, PlumeError> {
        if limit == 0 {
            return Err(PlumeError::InvalidMessageCount);
        }
        self.start_subscription(subject, Some(limit)).await
    }

    async fn start_subscription(
        &self,
        subject: &str,
        limit: Option<u64>,
    ) -> Result<Subscription, PlumeError> {
        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
        let remaining = limit.map(|n| Arc::new(AtomicU64::new(n)));

        // Register before writing so a reconnect racing this call still
        // replays the subscription; deregister if the write never went out.
        self.registry.lock().unwrap().insert(
            sid,
            SubscriptionEntry {
                subject: subject.to_string(),
                remaining: remaining.clone(),
            },
        );

        // Take the event stream before the SUB goes out so the first
        // delivery cannot slip past the handle.
        let events = self.connection.events();
        let command = match limit {
            Some(n) => codec::subscribe_with_limit(subject, sid, n),
            None => codec::subscribe(subject, sid),
        };
        if let Err(e) = self.connection.write(command).await {
            self.registry.lock().unwrap().remove(&sid);
            return Err(e);
        }

        tracing::debug!(sid, subject, "subscribed");
        Ok(Subscription::new(
            sid,
            subject.to_string(),
            events,
            remaining,
            self.connection.clone(),
            self.registry.clone(),
        ))
    }

    /// A fresh, unique subject under this client's private inbox
    /// namespace, for manual request patterns built from
    /// [`Client::subscribe`] plus [`Client::publish_with_reply`].
    pub fn new_inbox(&self) -> String {
        format!("{}{}", self.inbox_prefix, generate_token())
    }

    /// Publishes a request and waits for the first reply, up to `timeout`.
    ///
    /// Replies arrive on a per-request inbox subject under this client's
    /// inbox namespace; one shared wildcard subscription covers all of
    /// them, created lazily on the first request and replayed across
    /// reconnects like any other subscription.
    pub async fn request(
        &self,
        subject: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<IncomingMessage, PlumeError> {
        let inbox_sid = self.ensure_inbox_subscription().await?;
        let inbox = self.new_inbox();

        // Listen before publishing, otherwise a fast responder could win
        // the race against our receiver.
        let mut events = self.connection.events();
        self.connection
            .write(codec::publish(subject, Some(&inbox), payload))
            .await?;

        let reply = time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(ProtocolEvent::Msg(message))
                        if message.sid == inbox_sid && message.subject == inbox =>
                    {
                        return Ok(message);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "request listener lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(PlumeError::Disposed);
                    }
                }
            }
        })
        .await
        .map_err(|_| PlumeError::RequestTimeout)??;

        Ok(reply)
    }

    /// Creates the shared wildcard inbox subscription once per client.
    async fn ensure_inbox_subscription(&self) -> Result<u64, PlumeError> {
        self.inbox_sid
            .get_or_try_init(|| async {
                let sid = self.next_sid.fetch_add(1, Ordering::Relaxed);
                let subject = format!("{}*", self.inbox_prefix);
                self.registry.lock().unwrap().insert(
                    sid,
                    SubscriptionEntry {
                        subject: subject.clone(),
                        remaining: None,
                    },
                );
                if let Err(e) = self.connection.write(codec::subscribe(&subject, sid)).await {
                    self.registry.lock().unwrap().remove(&sid);
                    return Err(e);
                }
                tracing::debug!(sid, subject = %subject, "inbox subscription created");
                Ok(sid)
            })
            .await
            .copied()
    }

    /// Tears down the connection; every operation on any clone fails fast
    /// afterwards. Idempotent.
    pub fn dispose(&self) {
        self.connection.dispose();
    }
}

/// Replays the subscription registry to the broker after each reconnect.
/// Bounded subscriptions are replayed with their remaining budget only.
async fn resubscribe_on_reconnect(
    connection: Connection,
    mut on_connect: watch::Receiver<Option<ServerInfo>>,
    registry: Registry,
) {
    // Skip whatever state the connection is already in; only transitions
    // from here on need replaying.
    on_connect.borrow_and_update();

    while on_connect.changed().await.is_ok() {
        if on_connect.borrow_and_update().is_none() {
            continue;
        }
        let entries: Vec<(u64, String, Option<u64>)> = registry
            .lock()
            .unwrap()
            .iter()
            .map(|(sid, entry)| {
                (
                    *sid,
                    entry.subject.clone(),
                    entry.remaining.as_ref().map(|r| r.load(Ordering::Acquire)),
                )
            })
            .collect();

        for (sid, subject, remaining) in entries {
            let command = match remaining {
                Some(n) => codec::subscribe_with_limit(&subject, sid, n),
                None => codec::subscribe(&subject, sid),
            };
            match connection.write(command).await {
                Ok(()) => tracing::debug!(sid, subject = %subject, "resubscribed"),
                Err(e) => {
                    tracing::warn!(sid, subject = %subject, error = %e, "resubscribe failed")
                }
            }
        }
    }
}

/// 128-bit random token, hex-encoded. Used for inbox namespaces and
/// per-request inbox subjects.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
