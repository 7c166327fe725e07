use std::collections::HashMap;

use uuid::Uuid;

use super::aggregate::Order;

// ============================================================================
// Order Events - What the orders service announces on the broker
// ============================================================================

/// Well-known queue (topic) for newly created orders
pub const ORDER_CREATED_QUEUE: &str = "order.created";

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Message header names set alongside the injected trace context
pub mod headers {
    pub const CONTENT_TYPE: &str = "content-type";
    pub const EVENT_TYPE: &str = "event-type";
    pub const EVENT_ID: &str = "event-id";
    pub const ORDER_ID: &str = "order-id";
}

/// Serialized "order created" announcement.
///
/// The body is the JSON-encoded order, nothing else, so consumers decode it
/// straight into an `Order`.
#[derive(Debug, Clone)]
pub struct OrderCreatedEvent {
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub payload: Vec<u8>,
}

impl OrderCreatedEvent {
    pub const EVENT_TYPE: &'static str = "order.created";

    pub fn from_order(order: &Order) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            order_id: order.id,
            payload: serde_json::to_vec(order)?,
        })
    }

    /// Broker headers: trace context first, then the event's own metadata
    /// (which wins on a name clash).
    pub fn headers(&self, trace_context: HashMap<String, String>) -> HashMap<String, String> {
        let mut headers = trace_context;
        headers.insert(headers::CONTENT_TYPE.to_string(), CONTENT_TYPE_JSON.to_string());
        headers.insert(headers::EVENT_TYPE.to_string(), Self::EVENT_TYPE.to_string());
        headers.insert(headers::EVENT_ID.to_string(), self.event_id.to_string());
        headers.insert(headers::ORDER_ID.to_string(), self.order_id.to_string());
        headers
    }

    pub fn decode(payload: &[u8]) -> Result<Order, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}
