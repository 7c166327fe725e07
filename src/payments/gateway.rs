use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::processor::PaymentError;
use crate::service::{OrderService, OrderServiceError};

// ============================================================================
// Orders Gateway - the payments side's view of the orders service
// ============================================================================

#[async_trait]
pub trait OrdersGateway: Send + Sync {
    async fn update_order_after_payment_link(&self, order_id: Uuid, link: &str) -> Result<(), PaymentError>;
}

/// Calls the orders service in-process
pub struct LocalOrdersGateway {
    orders: Arc<OrderService>,
}

impl LocalOrdersGateway {
    pub fn new(orders: Arc<OrderService>) -> Self {
        Self { orders }
    }
}

#[async_trait]
impl OrdersGateway for LocalOrdersGateway {
    async fn update_order_after_payment_link(&self, order_id: Uuid, link: &str) -> Result<(), PaymentError> {
        self.orders
            .update_order_after_payment_link(order_id, link)
            .await
            .map(|_| ())
            .map_err(|e| PaymentError::Callback {
                transient: matches!(e, OrderServiceError::Persistence(_)),
                message: e.to_string(),
            })
    }
}
