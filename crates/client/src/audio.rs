//! Notification sounds for new orders.
//!
//! The vendor feed plays a sound when an order for its vendor arrives. What
//! "playing" means is up to the embedding application; this module provides
//! the trait plus a terminal bell and a silent implementation.

use std::io::Write;

/// Something that can announce a new order audibly.
pub trait NotificationSound: Send + Sync {
    fn play(&self);
}

impl<F> NotificationSound for F
where
    F: Fn() + Send + Sync,
{
    fn play(&self) {
        self()
    }
}

/// Rings the terminal bell (BEL) on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl NotificationSound for TerminalBell {
    fn play(&self) {
        let mut stdout = std::io::stdout();
        if let Err(e) = stdout.write_all(b"\x07").and_then(|_| stdout.flush()) {
            tracing::debug!("Failed to ring terminal bell: {}", e);
        }
    }
}

/// Plays nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl NotificationSound for Silent {
    fn play(&self) {}
}
