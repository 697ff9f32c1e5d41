//! Reconnect delay schedule.

use std::time::Duration;

/// Delays before each reconnect attempt; the last entry repeats.
pub const DEFAULT_RECONNECT_SCHEDULE: [Duration; 4] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay before reconnect attempt `attempt` (zero-based) under the default schedule.
pub fn next_delay(attempt: u32) -> Duration {
    delay_from(&DEFAULT_RECONNECT_SCHEDULE, attempt)
}

fn delay_from(schedule: &[Duration], attempt: u32) -> Duration {
    schedule
        .get(attempt as usize)
        .or_else(|| schedule.last())
        .copied()
        .unwrap_or(Duration::ZERO)
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before the connection is declared lost.
    /// Zero disables reconnecting altogether.
    pub max_attempts: u32,
    /// Delay per attempt; attempts past the end reuse the last entry.
    pub schedule: Vec<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            schedule: DEFAULT_RECONNECT_SCHEDULE.to_vec(),
        }
    }
}

impl ReconnectPolicy {
    pub fn next_delay(&self, attempt: u32) -> Duration {
        delay_from(&self.schedule, attempt)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}
