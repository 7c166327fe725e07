use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::context::{Interrupted, RequestContext};
use super::errors::OrderServiceError;
use super::ledger::UnpublishedLedger;
use crate::config::PipelineConfig;
use crate::domain::order::{
    CreateOrderRequest, Order, OrderCreatedEvent, OrderItem, RequestedItem, StatusExtra,
    CONTENT_TYPE_JSON, ORDER_CREATED_QUEUE,
};
use crate::messaging::{EventPublisher, OutboundMessage, PublishError};
use crate::metrics::Metrics;
use crate::repository::OrderRepository;
use crate::stock::{StockError, StockGateway};
use crate::telemetry::Telemetry;

// ============================================================================
// Order Service - creation pipeline and the synchronous order operations
// ============================================================================
//
// CreateOrder runs, in strict order, each step an abort point:
// 1. Validate   - request shape, then the stock validator
// 2. Create     - materialize the Pending order in the repository
// 3. Serialize  - JSON payload for the order-created event
// 4. Propagate  - inject the trace context into the message headers
// 5. Publish    - durable hand-off to the order-created queue
//
// Nothing is written before step 2 and nothing reaches the broker before
// step 5. A step-5 failure leaves an order that exists but was never
// announced; what happens to it is decided by `PublishFailurePolicy`.
// A successful step 5 is recorded on the stored order (`published_at`), and
// that marker, not process memory, is what `republish` consults.
//
// ============================================================================

/// What to do with an order whose event could not be published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishFailurePolicy {
    /// Keep the order and let the caller retry publication alone
    #[default]
    RetryPublication,
    /// Delete the order again; the caller still gets the publish error
    Compensate,
}

impl fmt::Display for PublishFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishFailurePolicy::RetryPublication => f.write_str("retry-publication"),
            PublishFailurePolicy::Compensate => f.write_str("compensate"),
        }
    }
}

impl FromStr for PublishFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retry" | "retry-publication" | "retry_publication" => Ok(PublishFailurePolicy::RetryPublication),
            "compensate" | "rollback" => Ok(PublishFailurePolicy::Compensate),
            other => Err(format!(
                "unknown publish failure policy '{}', expected retry-publication or compensate",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub queue: String,
    pub publish_timeout: Duration,
    pub publish_failure_policy: PublishFailurePolicy,
}

impl ServiceSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            queue: config.queue.clone(),
            publish_timeout: config.publish_timeout,
            publish_failure_policy: config.publish_failure_policy,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            queue: ORDER_CREATED_QUEUE.to_string(),
            publish_timeout: Duration::from_secs(5),
            publish_failure_policy: PublishFailurePolicy::default(),
        }
    }
}

pub struct OrderService {
    stock: Arc<dyn StockGateway>,
    repository: Arc<dyn OrderRepository>,
    publisher: Arc<dyn EventPublisher>,
    telemetry: Telemetry,
    metrics: Arc<Metrics>,
    settings: ServiceSettings,
    ledger: UnpublishedLedger,
    /// Serializes republish calls made through this instance
    republishing: Mutex<()>,
}

impl OrderService {
    pub fn new(
        stock: Arc<dyn StockGateway>,
        repository: Arc<dyn OrderRepository>,
        publisher: Arc<dyn EventPublisher>,
        telemetry: Telemetry,
        metrics: Arc<Metrics>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            stock,
            repository,
            publisher,
            telemetry,
            metrics,
            settings,
            ledger: UnpublishedLedger::new(),
            republishing: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &UnpublishedLedger {
        &self.ledger
    }

    pub fn stock(&self) -> &Arc<dyn StockGateway> {
        &self.stock
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    fn child_context(&self, parent: &Context, name: &'static str) -> Context {
        let span = self.telemetry.tracer().start_with_context(name, parent);
        parent.with_span(span)
    }

    // ========================================================================
    // CreateOrder
    // ========================================================================

    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        request: CreateOrderRequest,
    ) -> Result<Order, OrderServiceError> {
        let cx = self.child_context(&ctx.trace, "orders.create_order");
        cx.span()
            .set_attribute(KeyValue::new("customer.id", request.customer_id.clone()));

        let result = self.run_create(ctx, &cx, request).await;

        match &result {
            Ok(order) => {
                cx.span().set_attribute(KeyValue::new("order.id", order.id.to_string()));
                cx.span().set_status(Status::Ok);
            }
            Err(e) => {
                if let Some(order_id) = e.order_id() {
                    cx.span().set_attribute(KeyValue::new("order.id", order_id.to_string()));
                }
                cx.span().set_status(Status::error(e.to_string()));
            }
        }
        cx.span().end();

        result
    }

    async fn run_create(
        &self,
        ctx: &RequestContext,
        cx: &Context,
        request: CreateOrderRequest,
    ) -> Result<Order, OrderServiceError> {
        // 1. Validate
        let items = self.validate(ctx, cx, &request).await?;

        // 2. Create
        ctx.check().map_err(|reason| OrderServiceError::Cancelled {
            step: "create",
            order_id: None,
            reason,
        })?;

        let started = Instant::now();
        let order = Order::new(request.customer_id, items)
            .map_err(|e| OrderServiceError::Validation(e.to_string()))?;
        self.repository
            .create(&order)
            .await
            .map_err(OrderServiceError::Persistence)?;
        self.metrics.record_step("create", started.elapsed().as_secs_f64());

        tracing::info!(
            order_id = %order.id,
            customer_id = %order.customer_id,
            items = order.items.len(),
            total = order.total(),
            "Order created"
        );

        // 3-5. Serialize, propagate, publish
        if let Err(failure) = self.announce(ctx, cx, &order).await {
            return Err(self.handle_unannounced(&order, failure).await);
        }

        self.metrics.orders_created.inc();
        tracing::info!(order_id = %order.id, queue = %self.settings.queue, "Order announced");

        Ok(self.record_published(order).await)
    }

    /// Persist the published marker. The event is already out, so a failed
    /// write is only logged; a later republish may then send it again.
    async fn record_published(&self, order: Order) -> Order {
        match self.repository.mark_published(order.id).await {
            Ok(marked) => marked,
            Err(e) => {
                tracing::warn!(
                    order_id = %order.id,
                    error = %e,
                    "Order event published but the marker was not stored"
                );
                order
            }
        }
    }

    /// Shape checks, duplicate merging and the stock check. Returns the
    /// items the order will be created with.
    async fn validate(
        &self,
        ctx: &RequestContext,
        cx: &Context,
        request: &CreateOrderRequest,
    ) -> Result<Vec<OrderItem>, OrderServiceError> {
        if let Err(e) = request.validate() {
            return Err(self.reject("invalid_request", e.to_string()));
        }

        let requested = request.merged_items();
        let started = Instant::now();

        let stock_cx = self.child_context(cx, "stock.check_availability");
        let outcome = ctx
            .bound(
                self.stock
                    .check_availability(&stock_cx, &request.customer_id, &requested),
            )
            .await;
        stock_cx.span().end();
        self.metrics.record_step("validate", started.elapsed().as_secs_f64());

        let check = match outcome {
            Err(reason) => {
                return Err(OrderServiceError::Cancelled {
                    step: "validate",
                    order_id: None,
                    reason,
                })
            }
            Ok(Err(StockError::UnknownCustomer(customer))) => {
                return Err(self.reject("unknown_customer", format!("unknown customer: {}", customer)))
            }
            // Unreachable or broken validator: reject rather than guess
            Ok(Err(e)) => {
                tracing::warn!(customer_id = %request.customer_id, error = %e, "Stock check failed");
                return Err(self.reject("stock_unavailable", format!("stock check failed: {}", e)));
            }
            Ok(Ok(check)) => check,
        };

        if !check.all_in_stock {
            return Err(self.reject("out_of_stock", "one or more items are out of stock".to_string()));
        }

        resolve_items(&requested, check.items).map_err(|reason| self.reject("unresolved_item", reason))
    }

    fn reject(&self, reason: &'static str, message: String) -> OrderServiceError {
        self.metrics.record_rejection(reason);
        tracing::info!(reason, %message, "Order request rejected");
        OrderServiceError::Validation(message)
    }

    /// Steps 3-5 for an order that already exists
    async fn announce(
        &self,
        ctx: &RequestContext,
        cx: &Context,
        order: &Order,
    ) -> Result<(), OrderServiceError> {
        // 3. Serialize
        let event = OrderCreatedEvent::from_order(order)?;

        // 4. Propagate trace context
        let publish_cx = self.child_context(cx, "orders.publish");
        publish_cx
            .span()
            .set_attribute(KeyValue::new("messaging.destination", self.settings.queue.clone()));
        let headers = event.headers(self.telemetry.propagator().inject(&publish_cx));

        let message = OutboundMessage {
            queue: self.settings.queue.clone(),
            key: order.id.to_string(),
            payload: event.payload,
            headers,
            content_type: CONTENT_TYPE_JSON.to_string(),
        };

        // 5. Publish
        let started = Instant::now();
        let result = self.publish_bounded(ctx, message).await;
        self.metrics.record_step("publish", started.elapsed().as_secs_f64());
        self.metrics
            .update_circuit_breaker_state(self.publisher.name(), self.publisher.circuit_state().await);

        if let Err(e) = &result {
            publish_cx.span().set_status(Status::error(e.to_string()));
        }
        publish_cx.span().end();

        result.map_err(|failure| match failure {
            PublishFailure::Broker(source) => OrderServiceError::Publish {
                order_id: order.id,
                source,
            },
            PublishFailure::Interrupted(reason) => OrderServiceError::Cancelled {
                step: "publish",
                order_id: Some(order.id),
                reason,
            },
        })
    }

    async fn publish_bounded(
        &self,
        ctx: &RequestContext,
        message: OutboundMessage,
    ) -> Result<(), PublishFailure> {
        let queue = message.queue.clone();
        let timeout = self.settings.publish_timeout;

        match ctx
            .bound(tokio::time::timeout(timeout, self.publisher.publish(message)))
            .await
        {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(PublishFailure::Broker(e)),
            Ok(Err(_elapsed)) => Err(PublishFailure::Broker(PublishError::Timeout {
                queue,
                timeout_ms: timeout.as_millis() as u64,
            })),
            Err(reason) => Err(PublishFailure::Interrupted(reason)),
        }
    }

    /// Apply the publish-failure policy to a created but unannounced order
    async fn handle_unannounced(&self, order: &Order, error: OrderServiceError) -> OrderServiceError {
        self.metrics.record_publish_failure(&self.settings.queue);

        if self.settings.publish_failure_policy == PublishFailurePolicy::Compensate {
            match self.repository.delete(order.id).await {
                Ok(_) => {
                    self.metrics.compensations_total.inc();
                    tracing::warn!(order_id = %order.id, error = %error, "Order event not published, order removed");
                    return error;
                }
                Err(e) => {
                    tracing::error!(
                        order_id = %order.id,
                        error = %e,
                        "Compensation failed, keeping order for republication"
                    );
                }
            }
        }

        self.ledger.record(order.id, &error.to_string()).await;
        self.metrics.unpublished_orders.set(self.ledger.len().await as i64);
        tracing::warn!(
            order_id = %order.id,
            error = %error,
            "Order created but its event was not published"
        );
        error
    }

    // ========================================================================
    // Republish - retry publication alone
    // ========================================================================

    /// Publish the order-created event for an order whose first publication
    /// failed, on this or any other instance. Orders whose stored marker
    /// says they were announced are returned unchanged.
    pub async fn republish(&self, ctx: &RequestContext, order_id: Uuid) -> Result<Order, OrderServiceError> {
        let _guard = self.republishing.lock().await;

        let order = self.repository.get(order_id).await?;

        if order.is_published() {
            if self.ledger.remove(order_id).await {
                self.metrics.unpublished_orders.set(self.ledger.len().await as i64);
            }
            tracing::info!(order_id = %order_id, "Order already published, nothing to do");
            return Ok(order);
        }

        let cx = self.child_context(&ctx.trace, "orders.republish");
        cx.span().set_attribute(KeyValue::new("order.id", order_id.to_string()));

        let result = match self.announce(ctx, &cx, &order).await {
            Ok(()) => {
                self.ledger.remove(order_id).await;
                self.metrics.record_republish(true);
                self.metrics.orders_created.inc();
                tracing::info!(order_id = %order_id, "Order event republished");
                Ok(self.record_published(order).await)
            }
            Err(e) => {
                self.ledger.record(order_id, &e.to_string()).await;
                self.metrics.record_republish(false);
                cx.span().set_status(Status::error(e.to_string()));
                tracing::warn!(order_id = %order_id, error = %e, "Republication failed");
                Err(e)
            }
        };
        self.metrics.unpublished_orders.set(self.ledger.len().await as i64);
        cx.span().end();

        result
    }

    // ========================================================================
    // Lookups and downstream callbacks
    // ========================================================================

    /// An order owned by another customer is reported as not found
    pub async fn get_order(&self, order_id: Uuid, customer_id: &str) -> Result<Order, OrderServiceError> {
        let order = self.repository.get(order_id).await?;
        if order.customer_id != customer_id {
            return Err(OrderServiceError::NotFound(order_id));
        }
        Ok(order)
    }

    /// Push from a downstream service. Only status and payment link may
    /// differ from the stored record.
    pub async fn update_order(&self, order: Order) -> Result<Order, OrderServiceError> {
        let stored = self.repository.get(order.id).await?;

        if stored.customer_id != order.customer_id || stored.items != order.items {
            return Err(OrderServiceError::Validation(
                "order items and customer are immutable after creation".to_string(),
            ));
        }

        let extra = StatusExtra {
            payment_link: order.payment_link.clone(),
        };
        let updated = self
            .repository
            .update_status(order.id, order.status, &extra)
            .await?;

        self.metrics.record_status_update(updated.status.as_str());
        tracing::info!(order_id = %updated.id, status = %updated.status, "Order updated");
        Ok(updated)
    }

    /// Idempotent: the same link twice is a no-op success
    pub async fn update_order_after_payment_link(
        &self,
        order_id: Uuid,
        link: &str,
    ) -> Result<Order, OrderServiceError> {
        let updated = self.repository.attach_payment_link(order_id, link).await?;

        self.metrics.record_status_update(updated.status.as_str());
        tracing::info!(order_id = %order_id, status = %updated.status, "Payment link attached");
        Ok(updated)
    }
}

#[derive(Debug, thiserror::Error)]
enum PublishFailure {
    #[error(transparent)]
    Broker(PublishError),
    #[error(transparent)]
    Interrupted(Interrupted),
}

/// Order items from the merged request and the validator's resolution:
/// quantity from the request, name and price from the validator.
fn resolve_items(requested: &[RequestedItem], resolved: Vec<OrderItem>) -> Result<Vec<OrderItem>, String> {
    requested
        .iter()
        .map(|item| {
            resolved
                .iter()
                .find(|candidate| candidate.id == item.id)
                .map(|found| OrderItem {
                    quantity: item.quantity,
                    ..found.clone()
                })
                .ok_or_else(|| format!("stock validator did not resolve item {}", item.id))
        })
        .collect()
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus;
    use crate::messaging::{InMemoryBroker, TracePropagator};
    use crate::repository::InMemoryOrderRepository;
    use crate::stock::{CatalogEntry, InMemoryStock};
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};

    struct Harness {
        service: OrderService,
        stock: Arc<InMemoryStock>,
        repository: Arc<InMemoryOrderRepository>,
        broker: Arc<InMemoryBroker>,
        metrics: Arc<Metrics>,
        exporter: InMemorySpanExporter,
        provider: SdkTracerProvider,
    }

    fn harness_with(settings: ServiceSettings, broker: InMemoryBroker) -> Harness {
        let stock = Arc::new(
            InMemoryStock::new()
                .with_customer("c1")
                .with_customer("c2")
                .with_item(CatalogEntry::new("sku-1", "Burger", 500, 10))
                .with_item(CatalogEntry::new("sku-2", "Fries", 250, 1)),
        );
        let repository = Arc::new(InMemoryOrderRepository::new());
        let broker = Arc::new(broker);
        let metrics = Arc::new(Metrics::new().unwrap());

        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();

        let service = OrderService::new(
            stock.clone(),
            repository.clone(),
            broker.clone(),
            Telemetry::from_provider(&provider, "orders-test"),
            metrics.clone(),
            settings,
        );

        Harness {
            service,
            stock,
            repository,
            broker,
            metrics,
            exporter,
            provider,
        }
    }

    fn harness() -> Harness {
        harness_with(ServiceSettings::default(), InMemoryBroker::new())
    }

    fn request(items: &[(&str, u32)]) -> CreateOrderRequest {
        CreateOrderRequest::new(
            "c1",
            items
                .iter()
                .map(|(id, quantity)| RequestedItem::new(*id, *quantity))
                .collect(),
        )
    }

    async fn published(h: &Harness) -> Vec<OutboundMessage> {
        h.broker.messages(ORDER_CREATED_QUEUE).await
    }

    /// Another service instance sharing the repository and broker, with its
    /// own empty ledger (a restarted process or a second replica)
    fn second_instance(h: &Harness) -> OrderService {
        OrderService::new(
            h.stock.clone(),
            h.repository.clone(),
            h.broker.clone(),
            Telemetry::from_provider(&h.provider, "orders-test"),
            Arc::new(Metrics::new().unwrap()),
            ServiceSettings::default(),
        )
    }

    /// The event payload is the order as created, before the marker was set
    fn as_announced(order: &Order) -> Order {
        Order {
            published_at: None,
            ..order.clone()
        }
    }

    #[tokio::test]
    async fn test_create_order_scenario() {
        let h = harness();

        let order = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 2)]))
            .await
            .unwrap();

        assert_eq!(order.customer_id, "c1");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].id, "sku-1");
        assert_eq!(order.items[0].quantity, 2);
        assert_eq!(order.items[0].unit_price, 500);
        assert_eq!(order.items[0].price_id, "price_sku-1");

        assert!(order.is_published());
        assert_eq!(h.repository.get(order.id).await.unwrap(), order);

        let messages = published(&h).await;
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.key, order.id.to_string());
        assert_eq!(message.content_type, CONTENT_TYPE_JSON);
        assert_eq!(
            message.headers.get("content-type").map(String::as_str),
            Some(CONTENT_TYPE_JSON)
        );
        assert!(message.headers.contains_key("traceparent"));

        // Body round-trips to the order as it was announced
        assert_eq!(OrderCreatedEvent::decode(&message.payload).unwrap(), as_announced(&order));
        assert_eq!(h.metrics.orders_created.get(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_items_are_merged() {
        let h = harness();

        let order = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1), ("sku-1", 2)]))
            .await
            .unwrap();

        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 3);
        assert_eq!(order.total(), 1500);
    }

    #[tokio::test]
    async fn test_out_of_stock_creates_nothing() {
        let h = harness();

        for items in [vec![("sku-2", 5)], vec![("sku-1", 1), ("sku-2", 2)], vec![("sku-404", 1)]] {
            let err = h
                .service
                .create_order(&RequestContext::background(), request(&items))
                .await
                .unwrap_err();
            assert!(matches!(err, OrderServiceError::Validation(_)), "{:?}", err);
        }

        assert_eq!(h.repository.count().await.unwrap(), 0);
        assert!(published(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_customer_is_rejected() {
        let h = harness();

        let err = h
            .service
            .create_order(
                &RequestContext::background(),
                CreateOrderRequest::new("stranger", vec![RequestedItem::new("sku-1", 1)]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, OrderServiceError::Validation(_)));
        assert_eq!(h.repository.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_request_never_reaches_stock() {
        let h = harness();

        let err = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 0)]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrderServiceError::Validation(_)));
        assert_eq!(h.stock.calls(), 0);
    }

    #[tokio::test]
    async fn test_stock_transport_failure_rejects_order() {
        let h = harness();
        h.stock.fail_next_calls(1, false);

        let err = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrderServiceError::Validation(_)));
        assert_eq!(h.repository.count().await.unwrap(), 0);
        assert!(published(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_publishes_nothing() {
        let h = harness();
        h.repository.fail_next_writes(1);

        let err = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1)]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrderServiceError::Persistence(_)));
        assert!(published(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_then_republish() {
        let h = harness();
        h.broker.fail_next_publishes(1);
        let ctx = RequestContext::background();

        let err = h
            .service
            .create_order(&ctx, request(&[("sku-1", 2)]))
            .await
            .unwrap_err();

        let order_id = match err {
            OrderServiceError::Publish { order_id, .. } => order_id,
            other => panic!("expected publish error, got {:?}", other),
        };
        assert!(published(&h).await.is_empty());
        assert!(h.service.ledger().contains(order_id).await);
        assert_eq!(h.metrics.unpublished_orders.get(), 1);

        assert!(!h.repository.get(order_id).await.unwrap().is_published());

        let order = h.service.republish(&ctx, order_id).await.unwrap();
        assert_eq!(order.id, order_id);
        assert!(order.is_published());

        let messages = published(&h).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(OrderCreatedEvent::decode(&messages[0].payload).unwrap(), as_announced(&order));
        assert_eq!(h.repository.count().await.unwrap(), 1);
        assert!(h.service.ledger().is_empty().await);

        // A second retry does not announce the order twice
        h.service.republish(&ctx, order_id).await.unwrap();
        assert_eq!(published(&h).await.len(), 1);
        assert_eq!(h.repository.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_republish_from_another_instance_publishes() {
        let h = harness();
        h.broker.fail_next_publishes(1);
        let ctx = RequestContext::background();

        let order_id = h
            .service
            .create_order(&ctx, request(&[("sku-1", 2)]))
            .await
            .unwrap_err()
            .order_id()
            .unwrap();

        let restarted = second_instance(&h);
        assert!(restarted.ledger().is_empty().await);

        let order = restarted.republish(&ctx, order_id).await.unwrap();
        assert!(order.is_published());
        assert!(h.repository.get(order_id).await.unwrap().is_published());

        let messages = published(&h).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, order_id.to_string());

        // The first instance now sees the stored marker and sends nothing,
        // dropping its stale ledger entry on the way
        assert!(h.service.ledger().contains(order_id).await);
        h.service.republish(&ctx, order_id).await.unwrap();
        assert_eq!(published(&h).await.len(), 1);
        assert!(h.service.ledger().is_empty().await);
        assert_eq!(h.metrics.unpublished_orders.get(), 0);
    }

    #[tokio::test]
    async fn test_republish_during_first_publication_is_not_a_false_success() {
        let h = harness();
        let ctx = RequestContext::background();

        // Stored by one instance, whose publish has not finished yet
        let order = Order::new(
            "c1",
            vec![OrderItem {
                id: "sku-1".to_string(),
                name: "Burger".to_string(),
                quantity: 1,
                price_id: "price_sku-1".to_string(),
                unit_price: 500,
            }],
        )
        .unwrap();
        h.repository.create(&order).await.unwrap();

        let republished = second_instance(&h).republish(&ctx, order.id).await.unwrap();

        assert!(republished.is_published());
        let messages = published(&h).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(OrderCreatedEvent::decode(&messages[0].payload).unwrap(), order);
    }

    #[tokio::test]
    async fn test_declare_failure_is_a_publish_error_and_redeclares() {
        let h = harness();
        h.broker.fail_next_declares(1);
        let ctx = RequestContext::background();

        let err = h
            .service
            .create_order(&ctx, request(&[("sku-1", 1)]))
            .await
            .unwrap_err();

        let order_id = match err {
            OrderServiceError::Publish {
                order_id,
                source: PublishError::Declare { ref queue, .. },
            } => {
                assert_eq!(queue, ORDER_CREATED_QUEUE);
                order_id
            }
            other => panic!("expected declare failure, got {:?}", other),
        };
        assert_eq!(h.broker.declare_calls(), 1);
        assert!(published(&h).await.is_empty());
        assert!(h.service.ledger().contains(order_id).await);
        assert!(!h.repository.get(order_id).await.unwrap().is_published());

        // The failed declaration was not cached, so the retry declares again
        let order = h.service.republish(&ctx, order_id).await.unwrap();
        assert_eq!(h.broker.declare_calls(), 2);
        assert!(order.is_published());
        assert_eq!(published(&h).await.len(), 1);
        assert!(h.service.ledger().is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_republish_keeps_ledger_entry() {
        let h = harness();
        h.broker.fail_next_publishes(2);
        let ctx = RequestContext::background();

        let order_id = h
            .service
            .create_order(&ctx, request(&[("sku-1", 1)]))
            .await
            .unwrap_err()
            .order_id()
            .unwrap();

        let err = h.service.republish(&ctx, order_id).await.unwrap_err();
        assert!(matches!(err, OrderServiceError::Publish { order_id: id, .. } if id == order_id));
        assert_eq!(h.service.ledger().get(order_id).await.unwrap().attempts, 2);

        h.service.republish(&ctx, order_id).await.unwrap();
        assert_eq!(published(&h).await.len(), 1);
    }

    #[tokio::test]
    async fn test_compensate_policy_removes_order() {
        let settings = ServiceSettings {
            publish_failure_policy: PublishFailurePolicy::Compensate,
            ..ServiceSettings::default()
        };
        let h = harness_with(settings, InMemoryBroker::new());
        h.broker.fail_next_publishes(1);

        let err = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1)]))
            .await
            .unwrap_err();

        let order_id = err.order_id().unwrap();
        assert!(matches!(err, OrderServiceError::Publish { .. }));
        assert_eq!(h.repository.count().await.unwrap(), 0);
        assert!(!h.service.ledger().contains(order_id).await);
        assert_eq!(h.metrics.compensations_total.get(), 1);

        let err = h
            .service
            .republish(&RequestContext::background(), order_id)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_publish_timeout_surfaces_publish_error() {
        let settings = ServiceSettings {
            publish_timeout: Duration::from_millis(20),
            ..ServiceSettings::default()
        };
        let h = harness_with(settings, InMemoryBroker::new().with_latency(Duration::from_secs(5)));

        let err = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1)]))
            .await
            .unwrap_err();

        match err {
            OrderServiceError::Publish { order_id, source } => {
                assert!(matches!(source, PublishError::Timeout { .. }));
                assert!(h.service.ledger().contains(order_id).await);
            }
            other => panic!("expected publish timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_request_creates_nothing() {
        let h = harness();
        let ctx = RequestContext::background();
        ctx.cancel.cancel();

        let err = h
            .service
            .create_order(&ctx, request(&[("sku-1", 1)]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrderServiceError::Cancelled {
                step: "validate",
                order_id: None,
                reason: Interrupted::Cancelled
            }
        ));
        assert_eq!(h.repository.count().await.unwrap(), 0);
        assert!(published(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_during_publish_is_not_success() {
        let h = harness_with(
            ServiceSettings::default(),
            InMemoryBroker::new().with_latency(Duration::from_secs(5)),
        );
        let ctx = RequestContext::background().with_timeout(Duration::from_millis(50));

        let err = h
            .service
            .create_order(&ctx, request(&[("sku-1", 1)]))
            .await
            .unwrap_err();

        match err {
            OrderServiceError::Cancelled {
                step: "publish",
                order_id: Some(order_id),
                reason: Interrupted::DeadlineExceeded,
            } => assert!(h.service.ledger().contains(order_id).await),
            other => panic!("expected deadline during publish, got {:?}", other),
        }
        assert!(published(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_published_trace_context_continues_caller_trace() {
        let h = harness();

        let parent = SpanContext::new(
            TraceId::from_bytes(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736_u128.to_be_bytes()),
            SpanId::from_bytes(0x00f0_67aa_0ba9_02b7_u64.to_be_bytes()),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let ctx = RequestContext::new(Context::new().with_remote_span_context(parent.clone()));

        h.service
            .create_order(&ctx, request(&[("sku-1", 1)]))
            .await
            .unwrap();

        let messages = published(&h).await;
        let remote = TracePropagator::new().extract(&messages[0].headers);
        let remote_span = remote.span().span_context().clone();
        assert!(remote_span.is_remote());
        assert_eq!(remote_span.trace_id(), parent.trace_id());
        assert_ne!(remote_span.span_id(), parent.span_id());

        let spans = h.exporter.get_finished_spans().unwrap();
        let create = spans
            .iter()
            .find(|span| span.name == "orders.create_order")
            .unwrap();
        assert_eq!(create.parent_span_id, parent.span_id());
        assert_eq!(create.span_context.trace_id(), parent.trace_id());

        let publish = spans.iter().find(|span| span.name == "orders.publish").unwrap();
        assert_eq!(publish.span_context.span_id(), remote_span.span_id());
        assert_eq!(publish.parent_span_id, create.span_context.span_id());
    }

    #[tokio::test]
    async fn test_get_order_checks_owner() {
        let h = harness();
        let order = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1)]))
            .await
            .unwrap();

        assert_eq!(h.service.get_order(order.id, "c1").await.unwrap(), order);
        assert!(matches!(
            h.service.get_order(order.id, "c2").await,
            Err(OrderServiceError::NotFound(_))
        ));
        assert!(matches!(
            h.service.get_order(Uuid::new_v4(), "c1").await,
            Err(OrderServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_payment_link_callback_is_idempotent() {
        let h = harness();
        let order = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1)]))
            .await
            .unwrap();

        let first = h
            .service
            .update_order_after_payment_link(order.id, "https://pay/abc")
            .await
            .unwrap();
        let second = h
            .service
            .update_order_after_payment_link(order.id, "https://pay/abc")
            .await
            .unwrap();

        assert_eq!(first.payment_link.as_deref(), Some("https://pay/abc"));
        assert_eq!(second, first);
        assert_eq!(second.status, OrderStatus::AwaitingPayment);

        let err = h
            .service
            .update_order_after_payment_link(order.id, "https://pay/other")
            .await
            .unwrap_err();
        assert!(matches!(err, OrderServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_order_walks_state_machine() {
        let h = harness();
        let mut order = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1)]))
            .await
            .unwrap();

        for status in [OrderStatus::AwaitingPayment, OrderStatus::Paid, OrderStatus::Fulfilled] {
            order.status = status;
            order = h.service.update_order(order.clone()).await.unwrap();
            assert_eq!(order.status, status);
        }

        for status in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Cancelled] {
            let mut attempt = order.clone();
            attempt.status = status;
            let err = h.service.update_order(attempt).await.unwrap_err();
            assert!(matches!(
                err,
                OrderServiceError::InvalidTransition { from: OrderStatus::Fulfilled, .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_update_order_rejects_item_changes() {
        let h = harness();
        let order = h
            .service
            .create_order(&RequestContext::background(), request(&[("sku-1", 1)]))
            .await
            .unwrap();

        let mut tampered = order.clone();
        tampered.items[0].quantity = 9;

        let err = h.service.update_order(tampered).await.unwrap_err();
        assert!(matches!(err, OrderServiceError::Validation(_)));
        assert_eq!(h.repository.get(order.id).await.unwrap().items, order.items);
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "compensate".parse::<PublishFailurePolicy>(),
            Ok(PublishFailurePolicy::Compensate)
        );
        assert_eq!(
            "retry-publication".parse::<PublishFailurePolicy>(),
            Ok(PublishFailurePolicy::RetryPublication)
        );
        assert!("ignore".parse::<PublishFailurePolicy>().is_err());
    }
}
