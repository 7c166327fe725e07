use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Customer id cannot be empty")]
    EmptyCustomer,

    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Item id cannot be empty")]
    EmptyItemId,

    #[error("Invalid quantity {quantity} for item {item_id}")]
    InvalidQuantity { item_id: String, quantity: u32 },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Payment link already set to a different value")]
    PaymentLinkConflict,

    #[error("Payment link cannot be empty")]
    EmptyPaymentLink,

    #[error("Order items are immutable after creation")]
    ItemsImmutable,
}
