//! # Plume
//!
//! Async publish/subscribe messaging client speaking the NATS text
//! protocol.
//!
//! Plume layers three pieces on top of [`plume_protocol`] and
//! [`plume_transport`]:
//!
//! - [`Connection`]: one broker session with handshake, optional TLS
//!   upgrade, keepalive, and automatic reconnection, driven by a
//!   background task that fans decoded events out to subscribers.
//! - [`Subscription`]: a pull-based message stream for one subject,
//!   unbounded or limited to a message count, replayed across reconnects.
//! - [`Client`]: the application-facing API with publish, subscribe, and
//!   request-reply over a per-client inbox namespace.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plume::{Client, ConnectionConfig};
//! use tokio::time::Duration;
//!
//! # async fn run() -> Result<(), plume::PlumeError> {
//! let client = Client::connect(ConnectionConfig::new("localhost", 4222)).await?;
//!
//! let mut updates = client.subscribe("orders.*").await?;
//! client.publish("orders.created", b"order 42").await?;
//!
//! if let Some(message) = updates.next().await {
//!     println!("{}: {} bytes", message.subject, message.payload.len());
//! }
//!
//! let reply = client
//!     .request("inventory.check", b"item 7", Duration::from_secs(2))
//!     .await?;
//! println!("reply: {} bytes", reply.payload.len());
//! # Ok(()) }
//! ```

mod client;
mod config;
mod connection;
mod error;
mod subscription;

pub use client::Client;
pub use config::{ConnectionConfig, ServerAddress};
pub use connection::{Connection, ConnectionState};
pub use error::PlumeError;
pub use subscription::Subscription;

// The wire and transport layers are part of the public API surface:
// callers see `ServerInfo`, `IncomingMessage`, and `TrustPolicy`.
pub use plume_protocol::{ConnectOptions, IncomingMessage, ProtocolEvent, ServerInfo};
pub use plume_transport::{Dialer, TcpDialer, Transport, TransportError, TrustPolicy};
