//! Connection configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use plume_protocol::ConnectOptions;
use plume_transport::TrustPolicy;

/// One broker address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Host name or IP.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerAddress {
    /// Creates an address from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = String;

    /// Parses `host:port`, the shape broker discovery lists use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in address: {s}"))?;
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port in address: {s}"))?;
        if host.is_empty() {
            return Err(format!("missing host in address: {s}"));
        }
        Ok(Self::new(host, port))
    }
}

/// Operational tuning for one connection.
///
/// Supplied at construction and never mutated afterward. The defaults
/// mirror a conservative production setup: 5 s keepalive cadence and
/// timeout, 10 connect retries with 5 s between attempts.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Candidate brokers, tried in round-robin order.
    pub servers: Vec<ServerAddress>,
    /// How long to stay quiet before probing the broker with `PING`.
    pub ping_interval: Duration,
    /// How long to wait for the matching `PONG` before declaring the
    /// connection dead.
    pub ping_timeout: Duration,
    /// How many failed connect attempts to tolerate before giving up.
    pub max_connect_retries: u32,
    /// Pause between connect attempts.
    pub connect_retry_delay: Duration,
    /// Certificates to trust when the session upgrades to TLS.
    pub trust_policy: TrustPolicy,
    /// Handshake parameters serialized into the `CONNECT` command.
    pub options: ConnectOptions,
}

impl ConnectionConfig {
    /// Creates a config targeting a single broker, with default tuning.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            servers: vec![ServerAddress::new(host, port)],
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerAddress::new("localhost", 4222)],
            ping_interval: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(5),
            max_connect_retries: 10,
            connect_retry_delay: Duration::from_secs(5),
            trust_policy: TrustPolicy::default(),
            options: ConnectOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_address_parse() {
        let addr: ServerAddress = "10.0.0.2:4222".parse().unwrap();
        assert_eq!(addr, ServerAddress::new("10.0.0.2", 4222));
        assert_eq!(addr.to_string(), "10.0.0.2:4222");
    }

    #[test]
    fn test_server_address_parse_rejects_garbage() {
        assert!("no-port".parse::<ServerAddress>().is_err());
        assert!("host:NaN".parse::<ServerAddress>().is_err());
        assert!(":4222".parse::<ServerAddress>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.servers, vec![ServerAddress::new("localhost", 4222)]);
        assert_eq!(config.max_connect_retries, 10);
        assert_eq!(config.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_new_targets_single_server() {
        let config = ConnectionConfig::new("broker.example", 4223);
        assert_eq!(
            config.servers,
            vec![ServerAddress::new("broker.example", 4223)]
        );
    }
}
