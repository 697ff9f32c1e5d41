//! Vendor dashboard feed: new orders for one vendor plus their status changes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use orderlink_shared::{
    Decimal, EventKind, GroupKey, OrderCreated, OrderEvent, OrderStatus, OrderStatusChanged,
};

use super::scoped::{prune_finished, ScopedHook, ScopedState};
use crate::audio::NotificationSound;
use crate::ws::RealtimeClient;

/// An order seen by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorOrder {
    pub order_id: String,
    pub order_code: String,
    pub customer_id: String,
    pub total_price: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub eta: Option<DateTime<Utc>>,
}

impl From<&OrderCreated> for VendorOrder {
    fn from(e: &OrderCreated) -> Self {
        Self {
            order_id: e.order_id.clone(),
            order_code: e.order_code.clone(),
            customer_id: e.customer_id.clone(),
            total_price: e.total_price,
            status: e.status,
            created_at: e.created_at,
            eta: e.eta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorOrdersState {
    pub vendor_id: String,
    /// New orders since the last `reset_count()`.
    pub new_order_count: u32,
    /// Orders created while the feed was mounted, oldest first. Only the
    /// newest [`FINISHED_ORDERS_KEPT`](super::FINISHED_ORDERS_KEPT) completed
    /// or cancelled orders are kept.
    pub orders: Vec<VendorOrder>,
    pub last_status_change: Option<OrderStatusChanged>,
    pub last_update: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl VendorOrdersState {
    pub fn order(&self, order_id: &str) -> Option<&VendorOrder> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    fn apply_created(&mut self, e: &OrderCreated) -> bool {
        if e.vendor_id != self.vendor_id {
            return false;
        }
        self.new_order_count += 1;
        match self.orders.iter_mut().find(|o| o.order_id == e.order_id) {
            Some(existing) => *existing = VendorOrder::from(e),
            None => self.orders.push(VendorOrder::from(e)),
        }
        true
    }

    fn apply_status(&mut self, e: &OrderStatusChanged) -> bool {
        let known = self.orders.iter_mut().find(|o| o.order_id == e.order_id);
        let ours = e.vendor_id.as_deref() == Some(self.vendor_id.as_str());
        if !ours && known.is_none() {
            return false;
        }

        if let Some(order) = known {
            order.status = e.new_status;
            if e.eta.is_some() {
                order.eta = e.eta;
            }
            prune_finished(&mut self.orders, |o| o.status.is_final());
        }
        self.last_status_change = Some(e.clone());
        true
    }
}

impl ScopedState for VendorOrdersState {
    const KINDS: &'static [EventKind] = &[EventKind::OrderCreated, EventKind::OrderStatusChanged];

    fn for_entity(vendor_id: String) -> Self {
        Self {
            vendor_id,
            new_order_count: 0,
            orders: Vec::new(),
            last_status_change: None,
            last_update: None,
            error: None,
        }
    }

    fn entity_id(&self) -> &str {
        &self.vendor_id
    }

    fn group(vendor_id: &str) -> GroupKey {
        GroupKey::vendor(vendor_id)
    }

    fn apply(&mut self, event: &OrderEvent) -> bool {
        let changed = match event {
            OrderEvent::Created(e) => self.apply_created(e),
            OrderEvent::StatusChanged(e) => self.apply_status(e),
            OrderEvent::EtaUpdated(_) | OrderEvent::Delayed(_) => false,
        };
        if changed {
            self.last_update = Some(Utc::now());
        }
        changed
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

/// Feed of one vendor's orders, joined to `vendor:{id}` while alive.
pub type VendorOrderFeed = ScopedHook<VendorOrdersState>;

impl ScopedHook<VendorOrdersState> {
    /// Mount the feed and play `sound` for every new order of this vendor.
    pub async fn mount_with_sound(
        client: &RealtimeClient,
        vendor_id: impl Into<String>,
        sound: impl NotificationSound + 'static,
    ) -> Self {
        let feed = Self::attach_with_sound(client, vendor_id, sound);
        feed.connect().await;
        feed
    }

    pub fn attach_with_sound(
        client: &RealtimeClient,
        vendor_id: impl Into<String>,
        sound: impl NotificationSound + 'static,
    ) -> Self {
        let sound: Arc<dyn NotificationSound> = Arc::new(sound);
        Self::attach_with(
            client,
            vendor_id.into(),
            Some(Arc::new(move |event: &OrderEvent| {
                if event.kind() == EventKind::OrderCreated {
                    sound.play();
                }
            })),
        )
    }

    /// Acknowledge the new orders seen so far.
    pub fn reset_count(&self) {
        self.modify(|s| std::mem::take(&mut s.new_order_count) != 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::FINISHED_ORDERS_KEPT;

    fn created(order_id: &str, vendor_id: &str) -> OrderEvent {
        OrderEvent::Created(OrderCreated {
            order_id: order_id.to_string(),
            order_code: format!("C-{}", order_id),
            vendor_id: vendor_id.to_string(),
            customer_id: "cus-1".to_string(),
            total_price: Decimal::new(1250, 2),
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            eta: None,
        })
    }

    fn status(order_id: &str, vendor_id: Option<&str>) -> OrderEvent {
        OrderEvent::StatusChanged(OrderStatusChanged {
            order_id: order_id.to_string(),
            order_code: String::new(),
            old_status: Some(OrderStatus::Pending),
            new_status: OrderStatus::Confirmed,
            timestamp: Utc::now(),
            eta: None,
            vendor_id: vendor_id.map(str::to_string),
        })
    }

    #[test]
    fn counts_only_this_vendors_orders() {
        let mut state = VendorOrdersState::for_entity("ven-1".to_string());
        assert!(state.apply(&created("o1", "ven-1")));
        assert!(!state.apply(&created("o2", "ven-2")));
        assert!(state.apply(&created("o3", "ven-1")));

        assert_eq!(state.new_order_count, 2);
        let ids: Vec<&str> = state.orders.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o3"]);
        assert_eq!(state.order("o1").unwrap().total_price, Decimal::new(1250, 2));
    }

    #[test]
    fn status_changes_match_vendor_or_known_order() {
        let mut state = VendorOrdersState::for_entity("ven-1".to_string());
        state.apply(&created("o1", "ven-1"));

        assert!(state.apply(&status("o1", None)));
        assert_eq!(state.order("o1").unwrap().status, OrderStatus::Confirmed);

        assert!(state.apply(&status("o9", Some("ven-1"))));
        assert!(!state.apply(&status("o8", Some("ven-2"))));
        assert!(!state.apply(&status("o7", None)));
        assert_eq!(
            state.last_status_change.as_ref().map(|e| e.order_id.as_str()),
            Some("o9")
        );
    }

    #[test]
    fn finished_orders_are_capped() {
        let mut state = VendorOrdersState::for_entity("ven-1".to_string());
        state.apply(&created("open", "ven-1"));
        let total = FINISHED_ORDERS_KEPT + 5;
        for i in 0..total {
            let id = format!("o{}", i);
            state.apply(&created(&id, "ven-1"));
            let mut done = status(&id, Some("ven-1"));
            if let OrderEvent::StatusChanged(e) = &mut done {
                e.new_status = OrderStatus::Completed;
            }
            state.apply(&done);
        }

        assert_eq!(state.orders.len(), FINISHED_ORDERS_KEPT + 1);
        assert!(state.order("open").is_some());
        assert!(state.order("o0").is_none());
        assert!(state.order("o4").is_none());
        assert!(state.order("o5").is_some());
        assert_eq!(state.new_order_count as usize, total + 1);
    }
}
