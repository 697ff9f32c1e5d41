//! Physical connection to the order hub.
//!
//! A [`Transport`] opens one link and hands back a pair of channels. The
//! link is over when the inbound receiver yields `None`; dropping the
//! outbound sender closes it from our side.

use std::sync::Arc;

use async_trait::async_trait;
use orderlink_shared::{ClientCommand, RealtimeResult, ServerEvent, WsEnvelope};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::config::{ClientConfig, TransportPreference};

mod sse;
mod websocket;

pub use sse::{SseDecoder, SseMessage, SseTransport};
pub use websocket::WebSocketTransport;

/// Connection state for the order hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Gave up after `attempts` failed reconnects. Only `start()` leaves this state.
    Lost { attempts: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn is_lost(&self) -> bool {
        matches!(self, ConnectionState::Lost { .. })
    }
}

/// Both directions of an open link.
pub struct TransportLink {
    pub outbound: UnboundedSender<WsEnvelope<ClientCommand>>,
    pub inbound: UnboundedReceiver<WsEnvelope<ServerEvent>>,
}

/// Opens links to the order hub.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Open a link authenticated with `token`.
    ///
    /// Implementations bound the attempt by their own connect timeout.
    async fn connect(&self, token: &str) -> RealtimeResult<TransportLink>;
}

/// Tries `primary` and falls back to `secondary` when it cannot connect.
pub struct FallbackTransport {
    primary: Arc<dyn Transport>,
    secondary: Arc<dyn Transport>,
}

impl FallbackTransport {
    pub fn new(primary: Arc<dyn Transport>, secondary: Arc<dyn Transport>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    fn name(&self) -> &'static str {
        "auto"
    }

    async fn connect(&self, token: &str) -> RealtimeResult<TransportLink> {
        match self.primary.connect(token).await {
            Ok(link) => Ok(link),
            Err(e) => {
                tracing::warn!(
                    "{} transport failed ({}), falling back to {}",
                    self.primary.name(),
                    e,
                    self.secondary.name()
                );
                self.secondary.connect(token).await
            }
        }
    }
}

/// Build the transport selected by `config.transport`.
pub fn transport_for(config: &ClientConfig) -> RealtimeResult<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.transport {
        TransportPreference::WebSocket => Arc::new(WebSocketTransport::new(config)?),
        TransportPreference::ServerSentEvents => Arc::new(SseTransport::new(config)?),
        TransportPreference::Auto => Arc::new(FallbackTransport::new(
            Arc::new(WebSocketTransport::new(config)?),
            Arc::new(SseTransport::new(config)?),
        )),
    };
    Ok(transport)
}
