// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};

use crate::utils::CircuitState;

// Re-export for public API
pub use server::{encode_metrics, metrics_handler};

// ============================================================================
// Metrics Module - Prometheus metrics for the order pipeline
// ============================================================================
//
// Provides metrics for:
// - Order creation outcomes (created, rejected, publish failures)
// - Per-step latency of the creation pipeline
// - Publication retries and compensations
// - Downstream status updates and payment handling
// - Circuit breaker state per collaborator
//
// The registry is owned by a `Metrics` value handed to whoever records;
// nothing is registered globally. Scraped via GET /metrics.
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Order Creation Metrics
    pub orders_created: IntCounter,
    pub validation_rejections: IntCounterVec,
    pub publish_failures: IntCounterVec,
    pub step_duration: HistogramVec,

    // Recovery Metrics
    pub republish_total: IntCounterVec,
    pub compensations_total: IntCounter,
    pub unpublished_orders: IntGauge,

    // Downstream Metrics
    pub status_updates: IntCounterVec,
    pub payments_processed: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Order Creation Metrics
        let orders_created = IntCounter::new("orders_created_total", "Orders created and announced")?;
        registry.register(Box::new(orders_created.clone()))?;

        let validation_rejections = IntCounterVec::new(
            Opts::new("order_validation_rejections_total", "Order requests rejected before creation"),
            &["reason"],
        )?;
        registry.register(Box::new(validation_rejections.clone()))?;

        let publish_failures = IntCounterVec::new(
            Opts::new("order_publish_failures_total", "Order-created events that could not be published"),
            &["queue"],
        )?;
        registry.register(Box::new(publish_failures.clone()))?;

        let step_duration = HistogramVec::new(
            HistogramOpts::new("order_pipeline_step_duration_seconds", "Duration of each order creation step")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["step"],
        )?;
        registry.register(Box::new(step_duration.clone()))?;

        // Recovery Metrics
        let republish_total = IntCounterVec::new(
            Opts::new("order_republish_total", "Publication retries for already created orders"),
            &["outcome"],
        )?;
        registry.register(Box::new(republish_total.clone()))?;

        let compensations_total = IntCounter::new(
            "order_compensations_total",
            "Orders deleted after their event could not be published",
        )?;
        registry.register(Box::new(compensations_total.clone()))?;

        let unpublished_orders = IntGauge::new(
            "order_unpublished",
            "Created orders whose event is still waiting to be published",
        )?;
        registry.register(Box::new(unpublished_orders.clone()))?;

        // Downstream Metrics
        let status_updates = IntCounterVec::new(
            Opts::new("order_status_updates_total", "Status updates applied by downstream callbacks"),
            &["status"],
        )?;
        registry.register(Box::new(status_updates.clone()))?;

        let payments_processed = IntCounterVec::new(
            Opts::new("payments_processed_total", "Order-created events handled by the payments consumer"),
            &["outcome"],
        )?;
        registry.register(Box::new(payments_processed.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["breaker"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            validation_rejections,
            publish_failures,
            step_duration,
            republish_total,
            compensations_total,
            unpublished_orders,
            status_updates,
            payments_processed,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_step(&self, step: &str, duration_secs: f64) {
        self.step_duration.with_label_values(&[step]).observe(duration_secs);
    }

    pub fn record_rejection(&self, reason: &str) {
        self.validation_rejections.with_label_values(&[reason]).inc();
    }

    pub fn record_publish_failure(&self, queue: &str) {
        self.publish_failures.with_label_values(&[queue]).inc();
    }

    pub fn record_republish(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.republish_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_status_update(&self, status: &str) {
        self.status_updates.with_label_values(&[status]).inc();
    }

    pub fn record_payment(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.payments_processed.with_label_values(&[outcome]).inc();
    }

    pub fn update_circuit_breaker_state(&self, breaker: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[breaker])
            .set(state.as_gauge());
    }
}
