//! Order lifecycle payloads pushed by the order hub.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// --- Common Definitions ---

/// Lifecycle status of an order as reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Completed,
    Cancelled,
    /// A status this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Whether the order has left the queue for good.
    pub fn is_final(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

// --- Events ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusChanged {
    pub order_id: String,
    #[serde(default)]
    pub order_code: String,
    #[serde(default)]
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vendor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderEtaUpdated {
    pub order_id: String,
    #[serde(default)]
    pub order_code: String,
    #[serde(rename = "oldETA", default)]
    pub old_eta: Option<DateTime<Utc>>,
    #[serde(rename = "newETA")]
    pub new_eta: DateTime<Utc>,
    #[serde(default)]
    pub delay_minutes: i32,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    #[serde(default)]
    pub order_code: String,
    pub vendor_id: String,
    pub customer_id: String,
    pub total_price: Decimal,
    pub status: OrderStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderDelayed {
    pub order_id: String,
    #[serde(default)]
    pub order_code: String,
    pub delay_minutes: i32,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(rename = "newETA", default)]
    pub new_eta: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Name of a server-pushed order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderStatusChanged,
    OrderEtaUpdated,
    OrderCreated,
    OrderDelayed,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::OrderStatusChanged,
        EventKind::OrderEtaUpdated,
        EventKind::OrderCreated,
        EventKind::OrderDelayed,
    ];

    /// The event name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderStatusChanged => "OrderStatusChanged",
            EventKind::OrderEtaUpdated => "OrderETAUpdated",
            EventKind::OrderCreated => "OrderCreated",
            EventKind::OrderDelayed => "OrderDelayed",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any of the order events a consumer can subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEvent {
    StatusChanged(OrderStatusChanged),
    EtaUpdated(OrderEtaUpdated),
    Created(OrderCreated),
    Delayed(OrderDelayed),
}

impl OrderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            OrderEvent::StatusChanged(_) => EventKind::OrderStatusChanged,
            OrderEvent::EtaUpdated(_) => EventKind::OrderEtaUpdated,
            OrderEvent::Created(_) => EventKind::OrderCreated,
            OrderEvent::Delayed(_) => EventKind::OrderDelayed,
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            OrderEvent::StatusChanged(e) => &e.order_id,
            OrderEvent::EtaUpdated(e) => &e.order_id,
            OrderEvent::Created(e) => &e.order_id,
            OrderEvent::Delayed(e) => &e.order_id,
        }
    }

    /// Vendor the event belongs to, when the payload carries one.
    pub fn vendor_id(&self) -> Option<&str> {
        match self {
            OrderEvent::StatusChanged(e) => e.vendor_id.as_deref(),
            OrderEvent::Created(e) => Some(&e.vendor_id),
            OrderEvent::EtaUpdated(_) | OrderEvent::Delayed(_) => None,
        }
    }
}

impl From<OrderStatusChanged> for OrderEvent {
    fn from(event: OrderStatusChanged) -> Self {
        OrderEvent::StatusChanged(event)
    }
}

impl From<OrderEtaUpdated> for OrderEvent {
    fn from(event: OrderEtaUpdated) -> Self {
        OrderEvent::EtaUpdated(event)
    }
}

impl From<OrderCreated> for OrderEvent {
    fn from(event: OrderCreated) -> Self {
        OrderEvent::Created(event)
    }
}

impl From<OrderDelayed> for OrderEvent {
    fn from(event: OrderDelayed) -> Self {
        OrderEvent::Delayed(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_changed_accepts_sparse_payload() {
        let event: OrderStatusChanged = serde_json::from_str(
            r#"{"orderId":"ord-1","newStatus":"Preparing","eta":"2024-01-01T10:05:00Z"}"#,
        )
        .unwrap();

        assert_eq!(event.order_id, "ord-1");
        assert_eq!(event.new_status, OrderStatus::Preparing);
        assert_eq!(event.eta.unwrap().to_rfc3339(), "2024-01-01T10:05:00+00:00");
        assert!(event.vendor_id.is_none());
        assert!(event.old_status.is_none());
    }

    #[test]
    fn unknown_status_does_not_reject_the_event() {
        let event: OrderStatusChanged =
            serde_json::from_str(r#"{"orderId":"ord-1","newStatus":"OutForDelivery"}"#).unwrap();
        assert_eq!(event.new_status, OrderStatus::Unknown);
    }

    #[test]
    fn eta_fields_use_upper_case_wire_names() {
        let event: OrderEtaUpdated = serde_json::from_str(
            r#"{
                "orderId": "ord-7",
                "orderCode": "A-007",
                "oldETA": "2024-01-01T10:00:00Z",
                "newETA": "2024-01-01T10:15:00Z",
                "delayMinutes": 15,
                "timestamp": "2024-01-01T09:58:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(event.delay_minutes, 15);
        assert!(event.old_eta.unwrap() < event.new_eta);

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("newETA").is_some());
        assert!(json.get("newEta").is_none());
    }

    #[test]
    fn order_created_parses_numeric_price() {
        let event: OrderCreated = serde_json::from_str(
            r#"{
                "orderId": "ord-9",
                "orderCode": "B-001",
                "vendorId": "ven-1",
                "customerId": "cus-1",
                "totalPrice": 12.5,
                "status": "Pending",
                "createdAt": "2024-01-01T09:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(event.total_price, Decimal::new(125, 1));
        assert_eq!(OrderEvent::from(event).vendor_id(), Some("ven-1"));
    }

    #[test]
    fn event_kind_wire_names() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::OrderEtaUpdated.to_string(), "OrderETAUpdated");
        assert_eq!(EventKind::from_wire("OrderEtaUpdated"), None);
    }
}
