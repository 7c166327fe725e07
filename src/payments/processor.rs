use async_trait::async_trait;

use crate::domain::order::Order;
use crate::utils::IsTransient;

// ============================================================================
// Payment Processor - creates the link a customer pays through
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("payment processor failed: {0}")]
    Processor(String),

    #[error("orders callback failed: {message}")]
    Callback { message: String, transient: bool },

    #[error("malformed order-created event: {0}")]
    Decode(String),
}

impl IsTransient for PaymentError {
    fn is_transient(&self) -> bool {
        matches!(self, PaymentError::Callback { transient: true, .. })
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_link(&self, order: &Order) -> Result<String, PaymentError>;
}

/// Deterministic links under a base URL, one per order
#[derive(Debug, Clone)]
pub struct InMemoryProcessor {
    base_url: String,
}

impl InMemoryProcessor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryProcessor {
    async fn create_payment_link(&self, order: &Order) -> Result<String, PaymentError> {
        if order.total() <= 0 {
            return Err(PaymentError::Processor(format!(
                "order {} has nothing to pay",
                order.id
            )));
        }
        Ok(format!("{}/{}", self.base_url.trim_end_matches('/'), order.id))
    }
}
