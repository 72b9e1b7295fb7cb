//! Subscription handles and the client-side subscription registry.
//!
//! A [`Subscription`] is a pull-based stream over the connection's
//! broadcast events, filtered down to one sid. The registry is the
//! client's record of every live subscription; the resubscriber task
//! replays it to the broker after each reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use plume_protocol::{IncomingMessage, ProtocolEvent, codec};
use tokio::sync::broadcast;

use crate::connection::Connection;
use crate::error::PlumeError;

/// What the client must replay to restore one subscription after a
/// reconnect.
pub(crate) struct SubscriptionEntry {
    pub(crate) subject: String,
    /// Shared remaining-message budget for bounded subscriptions. The
    /// handle decrements it as messages arrive, so a resubscribe asks the
    /// broker only for what is still owed.
    pub(crate) remaining: Option<Arc<AtomicU64>>,
}

/// Live subscriptions keyed by sid. Shared between the client, every
/// subscription handle, and the resubscriber task.
pub(crate) type Registry = Arc<Mutex<HashMap<u64, SubscriptionEntry>>>;

/// A stream of messages for one subject.
///
/// Messages are pulled with [`Subscription::next`]. Dropping the handle
/// unsubscribes at the broker; for deterministic cleanup use
/// [`Subscription::unsubscribe`] instead.
pub struct Subscription {
    sid: u64,
    subject: String,
    events: broadcast::Receiver<ProtocolEvent>,
    remaining: Option<Arc<AtomicU64>>,
    connection: Connection,
    registry: Registry,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(
        sid: u64,
        subject: String,
        events: broadcast::Receiver<ProtocolEvent>,
        remaining: Option<Arc<AtomicU64>>,
        connection: Connection,
        registry: Registry,
    ) -> Self {
        Self {
            sid,
            subject,
            events,
            remaining,
            connection,
            registry,
            active: true,
        }
    }

    /// The subject this subscription listens on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The broker-visible subscription id.
    pub fn sid(&self) -> u64 {
        self.sid
    }

    /// Waits for the next message on this subscription.
    ///
    /// Returns `None` once the stream is finished: a bounded subscription
    /// delivered its full budget, the handle was unsubscribed, or the
    /// connection was disposed. Messages arrive in the order the broker
    /// sent them.
    pub async fn next(&mut self) -> Option<IncomingMessage> {
        if !self.active {
            return None;
        }
        loop {
            match self.events.recv().await {
                Ok(ProtocolEvent::Msg(message)) if message.sid == self.sid => {
                    if let Some(remaining) = &self.remaining {
                        let before = remaining.fetch_sub(1, Ordering::AcqRel);
                        if before <= 1 {
                            // Budget spent. The broker stops on its own
                            // after the advertised limit, so no UNSUB is
                            // owed.
                            self.registry.lock().unwrap().remove(&self.sid);
                            self.active = false;
                        }
                    }
                    return Some(message);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        sid = self.sid,
                        skipped,
                        "subscription lagged behind the event stream"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.registry.lock().unwrap().remove(&self.sid);
                    self.active = false;
                    return None;
                }
            }
        }
    }

    /// Unsubscribes at the broker and consumes the handle.
    ///
    /// Unlike dropping, this surfaces the result of the `UNSUB` write.
    pub async fn unsubscribe(mut self) -> Result<(), PlumeError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.registry.lock().unwrap().remove(&self.sid);
        self.connection
            .write(codec::unsubscribe(self.sid, None))
            .await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.registry.lock().unwrap().remove(&self.sid);
        let connection = self.connection.clone();
        let sid = self.sid;
        // Cleanup is async; detach it so drop stays non-blocking. A write
        // failure here means the session is gone, and a gone session has
        // no subscription to remove.
        tokio::spawn(async move {
            if let Err(e) = connection.write(codec::unsubscribe(sid, None)).await {
                tracing::debug!(sid, error = %e, "unsubscribe on drop failed");
            }
        });
    }
}
