use async_trait::async_trait;
use opentelemetry::Context;

use crate::domain::order::{OrderItem, RequestedItem};
use crate::utils::{CircuitState, IsTransient};

// ============================================================================
// Stock Validator - port
// ============================================================================

/// Result of an availability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCheck {
    pub all_in_stock: bool,
    /// Authoritative details for the items the validator could resolve
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StockError {
    #[error("unknown customer: {0}")]
    UnknownCustomer(String),

    #[error("stock validator unreachable: {message}")]
    Transport { message: String, transient: bool },

    #[error("stock check timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl IsTransient for StockError {
    fn is_transient(&self) -> bool {
        match self {
            StockError::UnknownCustomer(_) => false,
            StockError::Transport { transient, .. } => *transient,
            StockError::Timeout { .. } => true,
        }
    }
}

#[async_trait]
pub trait StockGateway: Send + Sync {
    /// `cx` carries the caller's trace context for remote implementations
    async fn check_availability(
        &self,
        cx: &Context,
        customer_id: &str,
        items: &[RequestedItem],
    ) -> Result<StockCheck, StockError>;

    async fn circuit_state(&self) -> CircuitState {
        CircuitState::Closed
    }
}
