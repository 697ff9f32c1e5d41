//! A customer's active orders across vendors.

use chrono::{DateTime, Utc};
use orderlink_shared::{Decimal, EventKind, GroupKey, OrderEvent, OrderStatus};

use super::order_tracking::DelayInfo;
use super::scoped::{prune_finished, ScopedHook, ScopedState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerOrder {
    pub order_id: String,
    pub order_code: String,
    pub vendor_id: String,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub eta: Option<DateTime<Utc>>,
    pub delay_info: Option<DelayInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerOrdersState {
    pub customer_id: String,
    /// Orders created for this customer while the feed was mounted. Only the
    /// newest [`FINISHED_ORDERS_KEPT`](super::FINISHED_ORDERS_KEPT) completed
    /// or cancelled orders are kept.
    pub orders: Vec<CustomerOrder>,
    pub last_update: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl CustomerOrdersState {
    pub fn order(&self, order_id: &str) -> Option<&CustomerOrder> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    /// Orders that have not reached a final status.
    pub fn active(&self) -> impl Iterator<Item = &CustomerOrder> {
        self.orders.iter().filter(|o| !o.status.is_final())
    }

    fn order_mut(&mut self, order_id: &str) -> Option<&mut CustomerOrder> {
        self.orders.iter_mut().find(|o| o.order_id == order_id)
    }
}

impl ScopedState for CustomerOrdersState {
    const KINDS: &'static [EventKind] = &EventKind::ALL;

    fn for_entity(customer_id: String) -> Self {
        Self {
            customer_id,
            orders: Vec::new(),
            last_update: None,
            error: None,
        }
    }

    fn entity_id(&self) -> &str {
        &self.customer_id
    }

    fn group(customer_id: &str) -> GroupKey {
        GroupKey::customer(customer_id)
    }

    fn apply(&mut self, event: &OrderEvent) -> bool {
        match event {
            OrderEvent::Created(e) => {
                if e.customer_id != self.customer_id {
                    return false;
                }
                let order = CustomerOrder {
                    order_id: e.order_id.clone(),
                    order_code: e.order_code.clone(),
                    vendor_id: e.vendor_id.clone(),
                    total_price: e.total_price,
                    status: e.status,
                    eta: e.eta,
                    delay_info: None,
                };
                match self.order_mut(&e.order_id) {
                    Some(existing) => *existing = order,
                    None => self.orders.push(order),
                }
            }
            OrderEvent::StatusChanged(e) => {
                let Some(order) = self.order_mut(&e.order_id) else {
                    return false;
                };
                order.status = e.new_status;
                if e.eta.is_some() {
                    order.eta = e.eta;
                }
                prune_finished(&mut self.orders, |o| o.status.is_final());
            }
            OrderEvent::EtaUpdated(e) => {
                let Some(order) = self.order_mut(&e.order_id) else {
                    return false;
                };
                order.eta = Some(e.new_eta);
            }
            OrderEvent::Delayed(e) => {
                let Some(order) = self.order_mut(&e.order_id) else {
                    return false;
                };
                if e.new_eta.is_some() {
                    order.eta = e.new_eta;
                }
                order.delay_info = Some(DelayInfo {
                    delay_minutes: e.delay_minutes,
                    reason: e.reason.clone(),
                    new_eta: e.new_eta,
                });
            }
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

/// Feed of one customer's orders, joined to `customer:{id}` while alive.
pub type CustomerOrderFeed = ScopedHook<CustomerOrdersState>;
