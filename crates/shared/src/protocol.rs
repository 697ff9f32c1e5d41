//! Order hub wire protocol: envelopes, client invocations and server events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    OrderCreated, OrderDelayed, OrderEtaUpdated, OrderEvent, OrderStatusChanged,
};

/// Envelope wrapping every frame exchanged with the order hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> WsEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            ts: Utc::now(),
            correlation_id: None,
        }
    }

    /// Build a frame answering the envelope with id `correlation_id`.
    pub fn reply(payload: T, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            ..Self::new(payload)
        }
    }
}

/// Hub methods the client may invoke.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    #[serde(rename_all = "camelCase")]
    JoinOrderGroup { order_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveOrderGroup { order_id: String },
    #[serde(rename_all = "camelCase")]
    JoinVendorOrders { vendor_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveVendorOrders { vendor_id: String },
    #[serde(rename_all = "camelCase")]
    JoinCustomerOrders { customer_id: String },
    #[serde(rename_all = "camelCase")]
    LeaveCustomerOrders { customer_id: String },
}

impl ClientCommand {
    /// Hub method name, as echoed back in `Ack` frames.
    pub fn target(&self) -> &'static str {
        match self {
            ClientCommand::JoinOrderGroup { .. } => "JoinOrderGroup",
            ClientCommand::LeaveOrderGroup { .. } => "LeaveOrderGroup",
            ClientCommand::JoinVendorOrders { .. } => "JoinVendorOrders",
            ClientCommand::LeaveVendorOrders { .. } => "LeaveVendorOrders",
            ClientCommand::JoinCustomerOrders { .. } => "JoinCustomerOrders",
            ClientCommand::LeaveCustomerOrders { .. } => "LeaveCustomerOrders",
        }
    }

    /// The group this command joins or leaves.
    pub fn group(&self) -> GroupKey {
        match self {
            ClientCommand::JoinOrderGroup { order_id }
            | ClientCommand::LeaveOrderGroup { order_id } => GroupKey::Order(order_id.clone()),
            ClientCommand::JoinVendorOrders { vendor_id }
            | ClientCommand::LeaveVendorOrders { vendor_id } => {
                GroupKey::Vendor(vendor_id.clone())
            }
            ClientCommand::JoinCustomerOrders { customer_id }
            | ClientCommand::LeaveCustomerOrders { customer_id } => {
                GroupKey::Customer(customer_id.clone())
            }
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(
            self,
            ClientCommand::JoinOrderGroup { .. }
                | ClientCommand::JoinVendorOrders { .. }
                | ClientCommand::JoinCustomerOrders { .. }
        )
    }
}

/// Frames pushed by the order hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    OrderStatusChanged(OrderStatusChanged),
    #[serde(rename = "OrderETAUpdated")]
    OrderEtaUpdated(OrderEtaUpdated),
    OrderCreated(OrderCreated),
    OrderDelayed(OrderDelayed),
    /// An invocation succeeded. The envelope's `correlation_id` names it.
    Ack { target: String },
    /// An invocation was rejected.
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Split off the order payload, if this frame carries one.
    pub fn into_order_event(self) -> Option<OrderEvent> {
        match self {
            ServerEvent::OrderStatusChanged(e) => Some(OrderEvent::StatusChanged(e)),
            ServerEvent::OrderEtaUpdated(e) => Some(OrderEvent::EtaUpdated(e)),
            ServerEvent::OrderCreated(e) => Some(OrderEvent::Created(e)),
            ServerEvent::OrderDelayed(e) => Some(OrderEvent::Delayed(e)),
            ServerEvent::Ack { .. } | ServerEvent::Error { .. } => None,
        }
    }
}

impl From<OrderEvent> for ServerEvent {
    fn from(event: OrderEvent) -> Self {
        match event {
            OrderEvent::StatusChanged(e) => ServerEvent::OrderStatusChanged(e),
            OrderEvent::EtaUpdated(e) => ServerEvent::OrderEtaUpdated(e),
            OrderEvent::Created(e) => ServerEvent::OrderCreated(e),
            OrderEvent::Delayed(e) => ServerEvent::OrderDelayed(e),
        }
    }
}

/// Server-side routing key deciding which connections receive an order's events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum GroupKey {
    Order(String),
    Vendor(String),
    Customer(String),
}

impl GroupKey {
    pub fn order(order_id: impl Into<String>) -> Self {
        GroupKey::Order(order_id.into())
    }

    pub fn vendor(vendor_id: impl Into<String>) -> Self {
        GroupKey::Vendor(vendor_id.into())
    }

    pub fn customer(customer_id: impl Into<String>) -> Self {
        GroupKey::Customer(customer_id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            GroupKey::Order(id) | GroupKey::Vendor(id) | GroupKey::Customer(id) => id,
        }
    }

    pub fn join_command(&self) -> ClientCommand {
        match self {
            GroupKey::Order(id) => ClientCommand::JoinOrderGroup {
                order_id: id.clone(),
            },
            GroupKey::Vendor(id) => ClientCommand::JoinVendorOrders {
                vendor_id: id.clone(),
            },
            GroupKey::Customer(id) => ClientCommand::JoinCustomerOrders {
                customer_id: id.clone(),
            },
        }
    }

    pub fn leave_command(&self) -> ClientCommand {
        match self {
            GroupKey::Order(id) => ClientCommand::LeaveOrderGroup {
                order_id: id.clone(),
            },
            GroupKey::Vendor(id) => ClientCommand::LeaveVendorOrders {
                vendor_id: id.clone(),
            },
            GroupKey::Customer(id) => ClientCommand::LeaveCustomerOrders {
                customer_id: id.clone(),
            },
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Order(id) => write!(f, "order:{}", id),
            GroupKey::Vendor(id) => write!(f, "vendor:{}", id),
            GroupKey::Customer(id) => write!(f, "customer:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use serde_json::json;

    #[test]
    fn join_command_wire_format() {
        let envelope = WsEnvelope::new(GroupKey::order("ord-1").join_command());
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["type"], "JoinOrderGroup");
        assert_eq!(json["data"], json!({ "orderId": "ord-1" }));
        assert!(json.get("correlationId").is_none());
    }

    #[test]
    fn server_event_envelope_decodes() {
        let text = json!({
            "id": "evt-1",
            "type": "OrderStatusChanged",
            "data": {
                "orderId": "ord-1",
                "orderCode": "A-001",
                "oldStatus": "Confirmed",
                "newStatus": "Preparing",
                "timestamp": "2024-01-01T10:00:00Z",
                "eta": "2024-01-01T10:05:00Z",
                "vendorId": "ven-1"
            },
            "ts": "2024-01-01T10:00:00Z"
        })
        .to_string();

        let envelope: WsEnvelope<ServerEvent> = serde_json::from_str(&text).unwrap();
        let event = envelope.payload.into_order_event().unwrap();
        assert_eq!(event.order_id(), "ord-1");
        assert_eq!(event.vendor_id(), Some("ven-1"));
        match event {
            OrderEvent::StatusChanged(e) => assert_eq!(e.new_status, OrderStatus::Preparing),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn ack_carries_correlation() {
        let ack = WsEnvelope::reply(
            ServerEvent::Ack {
                target: "JoinVendorOrders".to_string(),
            },
            "cmd-42",
        );
        let text = serde_json::to_string(&ack).unwrap();
        let decoded: WsEnvelope<ServerEvent> = serde_json::from_str(&text).unwrap();

        assert_eq!(decoded.correlation_id.as_deref(), Some("cmd-42"));
        assert!(decoded.payload.into_order_event().is_none());
    }

    #[test]
    fn group_commands_round_out_each_kind() {
        for group in [
            GroupKey::order("o"),
            GroupKey::vendor("v"),
            GroupKey::customer("c"),
        ] {
            let join = group.join_command();
            let leave = group.leave_command();
            assert!(join.is_join());
            assert!(!leave.is_join());
            assert_eq!(join.group(), group);
            assert_eq!(leave.group(), group);
        }
        assert_eq!(GroupKey::vendor("v-1").to_string(), "vendor:v-1");
        assert_eq!(GroupKey::customer("c-1").join_command().target(), "JoinCustomerOrders");
    }
}
