//! Core protocol types: broker metadata, handshake options, and the typed
//! events the decoder produces.

use serde::{Deserialize, Serialize};

/// Broker-announced metadata, received in the `INFO` frame.
///
/// Immutable once received; replaced wholesale on each new handshake.
/// Every field is defaulted so a sparse `INFO` body still decodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// Unique identifier of the broker instance.
    pub server_id: String,
    /// Broker version string.
    #[serde(rename = "version")]
    pub server_version: String,
    /// Runtime version the broker was built with.
    #[serde(rename = "go")]
    pub go_version: String,
    /// Host the broker advertises.
    pub host: String,
    /// Port the broker advertises.
    pub port: u16,
    /// Whether the broker requires authentication.
    pub auth_required: bool,
    /// Whether the broker requires a TLS upgrade before `CONNECT`.
    pub ssl_required: bool,
    /// Maximum payload size the broker accepts, in bytes.
    pub max_payload: u64,
    /// Alternate broker addresses (`host:port`) for cluster discovery.
    /// Only sent by discovery-aware brokers (protocol >= 1).
    pub connect_urls: Option<Vec<String>>,
}

/// Client-declared handshake parameters, serialized verbatim into the
/// `CONNECT` command.
///
/// Immutable for the life of a connection. The serde field names are the
/// wire names, so the struct doubles as the JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Ask the broker to echo `+OK` after each command.
    pub verbose: bool,
    /// Ask the broker for strict subject checking.
    pub pedantic: bool,
    /// Declare that this client requires a TLS upgrade.
    pub ssl_required: bool,
    /// Token credential, if the broker authenticates by token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// User name credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    /// Client display name shown in broker monitoring.
    pub name: String,
    /// Client implementation language.
    pub lang: String,
    /// Client implementation version.
    pub version: String,
    /// Protocol level: 0 = plain, 1 = cluster-discovery-aware.
    pub protocol: u8,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            ssl_required: false,
            auth_token: None,
            user: None,
            pass: None,
            name: "plume".to_string(),
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: 0,
        }
    }
}

/// One message delivered by the broker on an active subscription.
///
/// Constructed once per `MSG` frame; the payload is never null: a message
/// without a body carries an empty `Vec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Subject the message was published to.
    pub subject: String,
    /// Subscription this delivery belongs to.
    pub sid: u64,
    /// Subject to publish a reply to, for request/reply traffic.
    pub reply_to: Option<String>,
    /// Payload bytes; length always equals the size declared on the wire.
    pub payload: Vec<u8>,
}

/// A decoded protocol frame, tagged by operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// `INFO`: broker metadata, opens (or refreshes) a session.
    Info(ServerInfo),
    /// `PING`: broker-initiated keepalive probe.
    Ping,
    /// `PONG`: answer to a client keepalive probe.
    Pong,
    /// `MSG`: a delivered subscription message.
    Msg(IncomingMessage),
    /// `+OK`: acknowledgement (verbose mode).
    Ok,
    /// `-ERR`: broker-reported error with its message text.
    Err(String),
    /// Any operation this client does not recognize.
    Unknown {
        /// The operation keyword.
        op: String,
        /// Everything after the keyword, verbatim.
        rest: String,
    },
}
