use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::Context;

use super::gateway::{StockCheck, StockError, StockGateway};
use crate::domain::order::RequestedItem;
use crate::utils::{
    retry_on_transient, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    RetryConfig,
};

// ============================================================================
// Resilient Stock Client
// ============================================================================
//
// Decorates any StockGateway with:
// 1. a timeout on every attempt
// 2. bounded retries for transient transport failures
// 3. a circuit breaker so a dead validator fails fast
//
// Non-transient errors (unknown customer) pass straight through.
//
// ============================================================================

pub struct ResilientStockClient {
    inner: Arc<dyn StockGateway>,
    retry: RetryConfig,
    attempt_timeout: Duration,
    circuit_breaker: CircuitBreaker,
}

impl ResilientStockClient {
    pub fn new(inner: Arc<dyn StockGateway>, retry: RetryConfig, attempt_timeout: Duration) -> Self {
        Self {
            inner,
            retry,
            attempt_timeout,
            circuit_breaker: CircuitBreaker::new("stock", CircuitBreakerConfig::default()),
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = CircuitBreaker::new("stock", config);
        self
    }

    async fn attempt(
        &self,
        cx: &Context,
        customer_id: &str,
        items: &[RequestedItem],
    ) -> Result<StockCheck, StockError> {
        let call = async {
            tokio::time::timeout(
                self.attempt_timeout,
                self.inner.check_availability(cx, customer_id, items),
            )
            .await
            .unwrap_or(Err(StockError::Timeout {
                timeout_ms: self.attempt_timeout.as_millis() as u64,
            }))
        };

        // Only transport-class failures count against the breaker
        let guarded = self.circuit_breaker.call(async {
            match call.await {
                Err(e @ StockError::UnknownCustomer(_)) => Ok(Err(e)),
                other => other.map(Ok),
            }
        });

        match guarded.await {
            Ok(result) => result,
            Err(CircuitBreakerError::Open(_)) => Err(StockError::Transport {
                message: "circuit breaker open".to_string(),
                transient: false,
            }),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }
}

#[async_trait]
impl StockGateway for ResilientStockClient {
    async fn check_availability(
        &self,
        cx: &Context,
        customer_id: &str,
        items: &[RequestedItem],
    ) -> Result<StockCheck, StockError> {
        retry_on_transient(&self.retry, "stock_check", |_attempt| {
            self.attempt(cx, customer_id, items)
        })
        .await
        .map_err(|e| e.into_inner())
    }

    async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::{CatalogEntry, InMemoryStock};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    fn inner() -> Arc<InMemoryStock> {
        Arc::new(
            InMemoryStock::new()
                .with_customer("c1")
                .with_item(CatalogEntry::new("sku-1", "Burger", 500, 10)),
        )
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let stock = inner();
        stock.fail_next_calls(2, true);
        let client = ResilientStockClient::new(stock.clone(), fast_retry(), Duration::from_secs(1));

        let check = client
            .check_availability(&Context::new(), "c1", &[RequestedItem::new("sku-1", 1)])
            .await
            .unwrap();

        assert!(check.all_in_stock);
        assert_eq!(stock.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_transport_failure_is_not_retried() {
        let stock = inner();
        stock.fail_next_calls(1, false);
        let client = ResilientStockClient::new(stock.clone(), fast_retry(), Duration::from_secs(1));

        let err = client
            .check_availability(&Context::new(), "c1", &[RequestedItem::new("sku-1", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, StockError::Transport { transient: false, .. }));
        assert_eq!(stock.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_customer_does_not_trip_breaker() {
        let stock = inner();
        let client = ResilientStockClient::new(stock, fast_retry(), Duration::from_secs(1))
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 1,
                open_timeout: Duration::from_secs(60),
                success_threshold: 1,
            });

        let err = client
            .check_availability(&Context::new(), "stranger", &[RequestedItem::new("sku-1", 1)])
            .await
            .unwrap_err();

        assert!(matches!(err, StockError::UnknownCustomer(_)));
        assert_eq!(client.circuit_state().await, CircuitState::Closed);
    }
}
