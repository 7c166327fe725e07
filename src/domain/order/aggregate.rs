use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::StatusExtra;
use super::errors::OrderError;
use super::value_objects::{OrderItem, OrderStatus};

// ============================================================================
// Order - Domain record owned by the orders service
// ============================================================================
//
// Items and customer are fixed at creation. Post-creation, only `status` and
// `payment_link` change, and only through the methods below. `published_at`
// is bookkeeping for the order-created event and is set once.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub customer_id: String,

    // Contents (immutable)
    pub items: Vec<OrderItem>,

    // Mutable state
    pub status: OrderStatus,
    pub payment_link: Option<String>,

    /// When the broker accepted the order-created event. `None` until then,
    /// also across restarts, so any instance can finish the announcement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Materialize a new `Pending` order from stock-resolved items
    pub fn new(customer_id: impl Into<String>, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        let customer_id = customer_id.into();
        if customer_id.trim().is_empty() {
            return Err(OrderError::EmptyCustomer);
        }

        Self::validate_items(&items)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            customer_id,
            items,
            status: OrderStatus::Pending,
            payment_link: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
        if items.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    item_id: item.id.clone(),
                    quantity: item.quantity,
                });
            }
        }

        Ok(())
    }

    /// Move to `next` if the state machine allows it.
    /// Returns whether anything changed.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<bool, OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        if self.status == next {
            return Ok(false);
        }

        self.status = next;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Set the payment link exactly once. The same link again is a no-op;
    /// a pending order starts awaiting payment once it has a link.
    pub fn attach_payment_link(&mut self, link: &str) -> Result<bool, OrderError> {
        if link.trim().is_empty() {
            return Err(OrderError::EmptyPaymentLink);
        }

        match self.payment_link.as_deref() {
            Some(existing) if existing == link => return Ok(false),
            Some(_) => return Err(OrderError::PaymentLinkConflict),
            None => {}
        }

        match self.status {
            OrderStatus::Pending | OrderStatus::AwaitingPayment => {}
            other => {
                return Err(OrderError::InvalidTransition {
                    from: other,
                    to: OrderStatus::AwaitingPayment,
                })
            }
        }

        self.payment_link = Some(link.to_string());
        self.status = OrderStatus::AwaitingPayment;
        self.updated_at = Utc::now();
        Ok(true)
    }

    /// Apply a status change plus its extra data atomically: either every
    /// part applies or the order is left untouched.
    pub fn apply(&mut self, status: OrderStatus, extra: &StatusExtra) -> Result<bool, OrderError> {
        let mut next = self.clone();
        let mut changed = false;

        if let Some(link) = extra.payment_link.as_deref() {
            changed |= next.attach_payment_link(link)?;
        }
        changed |= next.transition_to(status)?;

        if changed {
            *self = next;
        }
        Ok(changed)
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Record that the event went out. The first timestamp wins.
    pub fn mark_published(&mut self, at: DateTime<Utc>) -> bool {
        if self.published_at.is_some() {
            return false;
        }
        self.published_at = Some(at);
        true
    }

    /// Total in minor currency units
    pub fn total(&self) -> i64 {
        self.items
            .iter()
            .map(|item| item.unit_price * i64::from(item.quantity))
            .sum()
    }
}
