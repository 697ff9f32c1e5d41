//! WebSocket transport using tokio-tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use orderlink_shared::{ClientCommand, RealtimeError, RealtimeResult, ServerEvent, WsEnvelope};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{Transport, TransportLink};
use crate::config::ClientConfig;

pub struct WebSocketTransport {
    endpoint: Url,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(config: &ClientConfig) -> RealtimeResult<Self> {
        Ok(Self {
            endpoint: websocket_url(&config.hub_url())?,
            connect_timeout: config.connect_timeout,
        })
    }

    /// The endpoint with the token attached as `access_token`.
    fn url_with_token(&self, token: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("access_token", token);
        url
    }
}

/// Convert an `http(s)` hub URL to its `ws(s)` form.
pub(crate) fn websocket_url(hub_url: &str) -> RealtimeResult<Url> {
    let mut url = Url::parse(hub_url)
        .map_err(|e| RealtimeError::Transport(format!("invalid hub url '{}': {}", hub_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::Transport(format!(
                "unsupported scheme '{}' in hub url",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::Transport(format!("cannot use {} for '{}'", scheme, hub_url)))?;
    Ok(url)
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn connect(&self, token: &str) -> RealtimeResult<TransportLink> {
        let url = self.url_with_token(token);
        tracing::debug!("Opening WebSocket to {}", self.endpoint);

        let (ws_stream, _response) =
            match tokio::time::timeout(self.connect_timeout, connect_async(url.as_str())).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(e)) => return Err(RealtimeError::transport(e)),
                Err(_) => return Err(RealtimeError::ConnectTimeout(self.connect_timeout)),
            };
        tracing::info!("WebSocket connected to {}", self.endpoint);

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut commands) = mpsc::unbounded_channel::<WsEnvelope<ClientCommand>>();
        let (events, inbound) = mpsc::unbounded_channel::<WsEnvelope<ServerEvent>>();

        // Read task: owns the only event sender, so its exit closes the link.
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            loop {
                let msg_result = tokio::select! {
                    _ = events.closed() => {
                        tracing::debug!("Link to {} dropped by client", endpoint);
                        break;
                    }
                    next = read.next() => match next {
                        Some(msg_result) => msg_result,
                        None => break,
                    },
                };

                match msg_result {
                    Ok(Message::Text(text)) => {
                        tracing::debug!("WebSocket received: {}", text.as_str());
                        match serde_json::from_str::<WsEnvelope<ServerEvent>>(text.as_str()) {
                            Ok(event) => {
                                if events.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::error!("Failed to parse message: {}", e),
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!("WebSocket to {} received close frame: {:?}", endpoint, frame);
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        // Pong is handled automatically by tungstenite
                        tracing::trace!("Received ping: {:?}", data);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
            tracing::info!("WebSocket to {} closed", endpoint);
        });

        tokio::spawn(async move {
            while let Some(cmd) = commands.recv().await {
                match serde_json::to_string(&cmd) {
                    Ok(json) => {
                        tracing::debug!("Sending: {}", json);
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            tracing::error!("Send failed: {}", e);
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Serialize failed: {}", e),
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("Closing WebSocket sink: {}", e);
            }
        });

        Ok(TransportLink { outbound, inbound })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_schemes_map_to_websocket() {
        assert_eq!(
            websocket_url("http://localhost:5000/hubs/orders").unwrap().as_str(),
            "ws://localhost:5000/hubs/orders"
        );
        assert_eq!(
            websocket_url("https://orders.example.com/hubs/orders").unwrap().scheme(),
            "wss"
        );
        assert!(websocket_url("ftp://example.com/hub").is_err());
        assert!(websocket_url("not a url").is_err());
    }

    #[test]
    fn token_travels_as_query_parameter() {
        let transport = WebSocketTransport::new(&ClientConfig::default()).unwrap();
        let url = transport.url_with_token("a b&c");

        let token: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(token, vec![("access_token".to_string(), "a b&c".to_string())]);
        assert!(transport.endpoint.query().is_none());
    }
}
