//! Orderlink Client - real-time order updates
//!
//! This crate keeps one auto-reconnecting connection to the order hub and
//! fans its order events out to independently mounted consumers: single
//! order trackers, vendor dashboards and customer order lists.

pub mod audio;
pub mod auth;
pub mod config;
pub mod hooks;
pub mod ws;

pub use audio::{NotificationSound, Silent, TerminalBell};
pub use auth::{StaticToken, TokenProvider};
pub use config::{ClientConfig, TransportPreference};
pub use hooks::{CustomerOrderFeed, OrderTracker, VendorOrderFeed};
pub use ws::{ConnectionState, RealtimeClient, Subscription};
