//! Scripted in-memory transport for integration testing.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use orderlink_client::ws::{ConnectionState, RealtimeClient, Transport, TransportLink};
use orderlink_client::{ClientConfig, StaticToken};
use orderlink_shared::{
    ClientCommand, Decimal, OrderCreated, OrderEvent, OrderStatus, OrderStatusChanged,
    RealtimeError, RealtimeResult, ServerEvent, WsEnvelope,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Generous bound for waits; virtual under `start_paused`.
pub const WAIT: Duration = Duration::from_secs(600);

/// Simulated handshake time for every connect.
pub const CONNECT_LATENCY: Duration = Duration::from_millis(10);

/// What the next `connect` call does.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Accept,
    Fail,
}

/// The server end of one accepted link.
pub struct ServerSide {
    pub commands: UnboundedReceiver<WsEnvelope<ClientCommand>>,
    pub events: UnboundedSender<WsEnvelope<ServerEvent>>,
}

impl ServerSide {
    pub fn push(&self, event: OrderEvent) {
        self.events
            .send(WsEnvelope::new(ServerEvent::from(event)))
            .expect("client side of the link is gone");
    }

    /// Answer `command` with an `Ack`.
    pub fn ack(&self, command: &WsEnvelope<ClientCommand>) {
        let reply = WsEnvelope::reply(
            ServerEvent::Ack {
                target: command.payload.target().to_string(),
            },
            command.id.clone(),
        );
        self.events.send(reply).expect("client side of the link is gone");
    }

    pub async fn next_command(&mut self) -> WsEnvelope<ClientCommand> {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .expect("timed out waiting for a command")
            .expect("link closed before a command arrived")
    }

    /// Commands already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ClientCommand> {
        let mut commands = Vec::new();
        while let Ok(envelope) = self.commands.try_recv() {
            commands.push(envelope.payload);
        }
        commands
    }
}

/// A transport whose connects follow a script. An empty script fails.
pub struct MockTransport {
    script: Mutex<VecDeque<Outcome>>,
    connects: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    servers: UnboundedSender<ServerSide>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<ServerSide>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            servers,
        });
        (transport, accepted)
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, token: &str) -> RealtimeResult<TransportLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(token.to_string());
        tokio::time::sleep(CONNECT_LATENCY).await;

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Outcome::Fail);
        match outcome {
            Outcome::Fail => Err(RealtimeError::Transport("connection refused".to_string())),
            Outcome::Accept => {
                let (outbound, commands) = mpsc::unbounded_channel();
                let (events, inbound) = mpsc::unbounded_channel();
                let _ = self.servers.send(ServerSide { commands, events });
                Ok(TransportLink { outbound, inbound })
            }
        }
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        server_timeout: None,
        ..ClientConfig::default()
    }
}

pub fn client_with(transport: Arc<MockTransport>, config: ClientConfig) -> RealtimeClient {
    RealtimeClient::with_transport(config, Arc::new(StaticToken::new("abc")), transport)
}

pub fn client(transport: Arc<MockTransport>) -> RealtimeClient {
    client_with(transport, test_config())
}

pub async fn next_server(accepted: &mut UnboundedReceiver<ServerSide>) -> ServerSide {
    tokio::time::timeout(WAIT, accepted.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

pub async fn wait_for_state(
    client: &RealtimeClient,
    mut predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut states = client.state_changes();
    let state = tokio::time::timeout(WAIT, states.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for connection state")
        .expect("state channel closed");
    state.clone()
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

pub fn status_changed(
    order_id: &str,
    new_status: OrderStatus,
    eta: Option<DateTime<Utc>>,
) -> OrderEvent {
    OrderEvent::StatusChanged(OrderStatusChanged {
        order_id: order_id.to_string(),
        order_code: format!("#{}", order_id),
        old_status: None,
        new_status,
        timestamp: at(10, 0),
        eta,
        vendor_id: None,
    })
}

pub fn order_created(order_id: &str, vendor_id: &str, customer_id: &str) -> OrderEvent {
    OrderEvent::Created(OrderCreated {
        order_id: order_id.to_string(),
        order_code: format!("#{}", order_id),
        vendor_id: vendor_id.to_string(),
        customer_id: customer_id.to_string(),
        total_price: Decimal::new(2450, 2),
        status: OrderStatus::Pending,
        created_at: at(9, 55),
        eta: None,
    })
}
