//! The client context object shared by every consumer in an application.

use std::sync::Arc;

use orderlink_shared::{EventKind, GroupKey, OrderEvent, RealtimeResult};
use tokio::sync::watch;

use super::connection::{transport_for, ConnectionState, Transport};
use super::dispatcher::{EventDispatcher, Subscription};
use super::registry::GroupRegistry;
use super::supervisor::Supervisor;
use crate::auth::TokenProvider;
use crate::config::ClientConfig;

struct ClientInner {
    config: ClientConfig,
    supervisor: Supervisor,
    registry: GroupRegistry,
    dispatcher: EventDispatcher,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.supervisor.stop();
    }
}

/// Handle to one real-time connection and its groups and handlers.
///
/// Cloning is cheap and every clone talks to the same connection. The
/// connection is stopped when the last clone is dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// Build a client using the transport selected by `config.transport`.
    pub fn new(config: ClientConfig, tokens: impl TokenProvider + 'static) -> RealtimeResult<Self> {
        let transport = transport_for(&config)?;
        Ok(Self::with_transport(config, Arc::new(tokens), transport))
    }

    /// Build a client over an explicit transport.
    pub fn with_transport(
        config: ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let registry = GroupRegistry::new();
        let dispatcher = EventDispatcher::new();
        let supervisor = Supervisor::new(
            transport,
            tokens,
            config.reconnect.clone(),
            config.ack_timeout,
            config.server_timeout,
            registry.clone(),
            dispatcher.clone(),
        );

        Self {
            inner: Arc::new(ClientInner {
                config,
                supervisor,
                registry,
                dispatcher,
            }),
        }
    }

    /// Connect if not already connected. See [`ConnectionState`] for the lifecycle.
    pub async fn start(&self) -> RealtimeResult<()> {
        self.inner.supervisor.start().await
    }

    pub fn stop(&self) {
        self.inner.supervisor.stop();
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.supervisor.state_changes()
    }

    /// Current reconnect attempt, or the number of failed attempts once `Lost`.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.supervisor.reconnect_attempts()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&OrderEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.subscribe(kind, handler)
    }

    pub fn join(&self, group: GroupKey) {
        self.inner.registry.join(group);
    }

    pub fn leave(&self, group: &GroupKey) {
        self.inner.registry.leave(group);
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("hub_url", &self.inner.config.hub_url())
            .field("state", &self.state())
            .finish()
    }
}
