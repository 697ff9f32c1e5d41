//! Client configuration from environment variables.

use std::time::Duration;

use crate::ws::ReconnectPolicy;

/// Which physical transport the client opens to the order hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPreference {
    /// WebSocket first, server-sent events when the socket cannot be opened.
    Auto,
    WebSocket,
    ServerSentEvents,
}

impl TransportPreference {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Some(TransportPreference::Auto),
            "websocket" | "ws" => Some(TransportPreference::WebSocket),
            "sse" | "server-sent-events" => Some(TransportPreference::ServerSentEvents),
            _ => None,
        }
    }
}

/// Settings for one real-time client context.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the order service, e.g. `https://orders.example.com`.
    pub base_url: String,
    /// Path of the push endpoint below `base_url`.
    pub hub_path: String,
    pub transport: TransportPreference,
    pub reconnect: ReconnectPolicy,
    /// Bound on a single connect attempt, enforced by the transport.
    pub connect_timeout: Duration,
    /// How long a join/leave may wait for its `Ack` before it is reported as failed.
    pub ack_timeout: Duration,
    /// Close the link when the server stays silent this long. `None` disables the check.
    pub server_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            hub_path: "/hubs/orders".to_string(),
            transport: TransportPreference::Auto,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            server_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ORDERLINK_BASE_URL`: service base URL (default: "http://localhost:5000")
    /// - `ORDERLINK_HUB_PATH`: push endpoint path (default: "/hubs/orders")
    /// - `ORDERLINK_TRANSPORT`: "auto" | "websocket" | "sse" (default: "auto")
    /// - `ORDERLINK_MAX_RECONNECT_ATTEMPTS`: reconnect attempts before giving up (default: 5)
    /// - `ORDERLINK_CONNECT_TIMEOUT_MS`: connect timeout (default: 10000)
    /// - `ORDERLINK_ACK_TIMEOUT_MS`: join/leave acknowledgement timeout (default: 10000)
    /// - `ORDERLINK_SERVER_TIMEOUT_MS`: server silence timeout, 0 disables (default: 30000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(base_url) = lookup("ORDERLINK_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(hub_path) = lookup("ORDERLINK_HUB_PATH") {
            config.hub_path = hub_path;
        }
        if let Some(raw) = lookup("ORDERLINK_TRANSPORT") {
            match TransportPreference::parse(&raw) {
                Some(transport) => config.transport = transport,
                None => tracing::warn!("Ignoring unknown ORDERLINK_TRANSPORT '{}'", raw),
            }
        }
        if let Some(attempts) = parse_number(&lookup, "ORDERLINK_MAX_RECONNECT_ATTEMPTS") {
            match u32::try_from(attempts) {
                Ok(attempts) => config.reconnect.max_attempts = attempts,
                Err(_) => tracing::warn!(
                    "Ignoring out-of-range ORDERLINK_MAX_RECONNECT_ATTEMPTS={}",
                    attempts
                ),
            }
        }
        if let Some(ms) = parse_number(&lookup, "ORDERLINK_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "ORDERLINK_ACK_TIMEOUT_MS") {
            config.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "ORDERLINK_SERVER_TIMEOUT_MS") {
            config.server_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        config
    }

    /// Full URL of the push endpoint.
    pub fn hub_url(&self) -> String {
        let path = self.hub_path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring non-numeric {}='{}'", key, raw);
            None
        }
    }
}
