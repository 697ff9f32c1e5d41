//! Shared types for the orderlink real-time client and the services it talks to.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;

pub use rust_decimal::Decimal;
