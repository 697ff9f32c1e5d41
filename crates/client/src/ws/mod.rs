//! Real-time order updates from the order hub.
//!
//! This module provides:
//! - Connection management with bounded auto-reconnect
//! - Reference-counted interest groups, rejoined after every reconnect
//! - A typed event bus that consumers subscribe to
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   RealtimeClient                    │
//! │       (context object shared by all consumers)      │
//! └─────────────────────────────────────────────────────┘
//!          │                 │                 │
//!          ▼                 ▼                 ▼
//!   ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ Supervisor │──▶│GroupRegistry │   │EventDispatcher│
//!   │ (state,    │   │ (ref counts, │   │ (handlers per │
//!   │  retries)  │   │  rejoin)     │   │  event kind)  │
//!   └────────────┘   └──────────────┘   └──────────────┘
//!          │                                   ▲
//!          ▼                                   │
//!   ┌─────────────────────┐     events         │
//!   │ Transport           │────────────────────┘
//!   │ (WebSocket or SSE)  │
//!   └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! Consumers normally use the hooks in [`crate::hooks`], which filter events
//! by entity and tie group membership to their own lifetime. The raw API:
//!
//! ```rust,ignore
//! let client = RealtimeClient::new(ClientConfig::from_env(), StaticToken::new(token))?;
//! client.start().await?;
//!
//! let _sub = client.dispatcher().on_status_changed(|e| {
//!     println!("{} is now {:?}", e.order_code, e.new_status);
//! });
//! client.join(GroupKey::order("ord-1"));
//! ```

mod backoff;
mod client;
mod connection;
mod dispatcher;
mod link;
mod registry;
mod supervisor;

pub use backoff::{next_delay, ReconnectPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RECONNECT_SCHEDULE};
pub use client::RealtimeClient;
pub use connection::{
    transport_for, ConnectionState, FallbackTransport, SseDecoder, SseMessage, SseTransport,
    Transport, TransportLink, WebSocketTransport,
};
pub use dispatcher::{EventDispatcher, Subscription, SubscriptionId};
pub use link::LinkHandle;
pub use registry::GroupRegistry;
