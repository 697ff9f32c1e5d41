//! Live view of a single order, e.g. a customer's order status page.

use chrono::{DateTime, Utc};
use orderlink_shared::{EventKind, GroupKey, OrderEvent, OrderStatus};

use super::scoped::{ScopedHook, ScopedState};

/// Most recent delay announcement for the tracked order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayInfo {
    pub delay_minutes: i32,
    pub reason: Option<String>,
    pub new_eta: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTrackingState {
    pub order_id: String,
    pub order_code: Option<String>,
    pub status: Option<OrderStatus>,
    pub eta: Option<DateTime<Utc>>,
    /// Local receive time of the last applied event.
    pub last_update: Option<DateTime<Utc>>,
    pub delay_info: Option<DelayInfo>,
    pub error: Option<String>,
}

impl OrderTrackingState {
    fn note_code(&mut self, order_code: &str) {
        if !order_code.is_empty() {
            self.order_code = Some(order_code.to_string());
        }
    }
}

impl ScopedState for OrderTrackingState {
    const KINDS: &'static [EventKind] = &[
        EventKind::OrderStatusChanged,
        EventKind::OrderEtaUpdated,
        EventKind::OrderDelayed,
    ];

    fn for_entity(order_id: String) -> Self {
        Self {
            order_id,
            order_code: None,
            status: None,
            eta: None,
            last_update: None,
            delay_info: None,
            error: None,
        }
    }

    fn entity_id(&self) -> &str {
        &self.order_id
    }

    fn group(order_id: &str) -> GroupKey {
        GroupKey::order(order_id)
    }

    fn apply(&mut self, event: &OrderEvent) -> bool {
        if event.order_id() != self.order_id {
            return false;
        }

        match event {
            OrderEvent::StatusChanged(e) => {
                self.note_code(&e.order_code);
                self.status = Some(e.new_status);
                if e.eta.is_some() {
                    self.eta = e.eta;
                }
            }
            OrderEvent::EtaUpdated(e) => {
                self.note_code(&e.order_code);
                self.eta = Some(e.new_eta);
            }
            OrderEvent::Delayed(e) => {
                self.note_code(&e.order_code);
                if e.new_eta.is_some() {
                    self.eta = e.new_eta;
                }
                self.delay_info = Some(DelayInfo {
                    delay_minutes: e.delay_minutes,
                    reason: e.reason.clone(),
                    new_eta: e.new_eta,
                });
            }
            OrderEvent::Created(_) => return false,
        }

        self.last_update = Some(Utc::now());
        true
    }

    fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    fn set_error(&mut self, error: Option<String>) -> bool {
        if self.error == error {
            return false;
        }
        self.error = error;
        true
    }
}

/// Tracks one order: joins `order:{id}` while alive and folds its status,
/// ETA and delay events.
pub type OrderTracker = ScopedHook<OrderTrackingState>;
