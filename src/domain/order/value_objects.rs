use serde::{Deserialize, Serialize};

// ============================================================================
// Order Value Objects
// ============================================================================

/// Line item as requested by the customer, before stock resolution
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RequestedItem {
    pub id: String,
    pub quantity: u32,
}

impl RequestedItem {
    pub fn new(id: impl Into<String>, quantity: u32) -> Self {
        Self {
            id: id.into(),
            quantity,
        }
    }
}

/// Line item resolved by the stock validator (authoritative price attached)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OrderItem {
    pub id: String,
    pub name: String,
    pub quantity: u32,
    pub price_id: String,
    /// Unit price in minor currency units
    pub unit_price: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    AwaitingPayment,
    Paid,
    Cancelled,
    Fulfilled,
}

impl OrderStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Re-entering the current status is always allowed so that repeated
    /// downstream callbacks stay idempotent.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Pending, AwaitingPayment)
                | (Pending, Cancelled)
                | (AwaitingPayment, Paid)
                | (AwaitingPayment, Cancelled)
                | (Paid, Fulfilled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::AwaitingPayment => "AwaitingPayment",
            OrderStatus::Paid => "Paid",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Fulfilled => "Fulfilled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(OrderStatus::Pending),
            "AwaitingPayment" => Ok(OrderStatus::AwaitingPayment),
            "Paid" => Ok(OrderStatus::Paid),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            "Fulfilled" => Ok(OrderStatus::Fulfilled),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
