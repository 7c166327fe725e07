use std::sync::Arc;

use crate::domain::order::Order;
use crate::utils::{retry_on_transient, RetryConfig};

use super::gateway::OrdersGateway;
use super::processor::{PaymentError, PaymentProcessor};

// ============================================================================
// Payments Service
// ============================================================================
//
// For each new order: create a payment link, then report it back to the
// orders service. The callback is idempotent on the orders side, so it is
// safe to retry when it fails transiently.
//
// ============================================================================

pub struct PaymentsService {
    processor: Arc<dyn PaymentProcessor>,
    gateway: Arc<dyn OrdersGateway>,
    retry: RetryConfig,
}

impl PaymentsService {
    pub fn new(processor: Arc<dyn PaymentProcessor>, gateway: Arc<dyn OrdersGateway>) -> Self {
        Self {
            processor,
            gateway,
            retry: RetryConfig::for_callbacks(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn create_payment(&self, order: &Order) -> Result<String, PaymentError> {
        let link = self.processor.create_payment_link(order).await?;

        retry_on_transient(&self.retry, "payment_link_callback", |_attempt| {
            self.gateway.update_order_after_payment_link(order.id, &link)
        })
        .await
        .map_err(|e| e.into_inner())?;

        tracing::info!(order_id = %order.id, link = %link, "Payment link created");
        Ok(link)
    }
}
