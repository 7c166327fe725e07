use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;

use super::processor::PaymentError;
use super::service::PaymentsService;
use crate::domain::order::OrderCreatedEvent;
use crate::messaging::{InboundMessage, MessageHandler};
use crate::metrics::Metrics;
use crate::telemetry::Telemetry;

// ============================================================================
// Order-Created Handler - payments consumer
// ============================================================================
//
// Resumes the producer's trace from the message headers, so the payment
// span is a child of the orders service's publish span even though it runs
// on the other side of the broker.
//
// ============================================================================

pub struct OrderCreatedHandler {
    payments: Arc<PaymentsService>,
    telemetry: Telemetry,
    metrics: Arc<Metrics>,
}

impl OrderCreatedHandler {
    pub fn new(payments: Arc<PaymentsService>, telemetry: Telemetry, metrics: Arc<Metrics>) -> Self {
        Self {
            payments,
            telemetry,
            metrics,
        }
    }

    async fn process(&self, message: &InboundMessage) -> Result<String, PaymentError> {
        let order = OrderCreatedEvent::decode(&message.payload)
            .map_err(|e| PaymentError::Decode(e.to_string()))?;
        self.payments.create_payment(&order).await
    }
}

#[async_trait]
impl MessageHandler for OrderCreatedHandler {
    async fn handle(&self, message: InboundMessage) -> anyhow::Result<()> {
        let parent = self.telemetry.propagator().extract(&message.headers);
        let tracer = self.telemetry.tracer();
        let span = tracer
            .span_builder("payments.handle_order_created")
            .with_kind(SpanKind::Consumer)
            .with_attributes(vec![KeyValue::new("messaging.source", message.queue.clone())])
            .start_with_context(tracer, &parent);
        let cx = parent.with_span(span);

        let result = self.process(&message).await;
        self.metrics.record_payment(result.is_ok());

        if let Err(e) = &result {
            cx.span().set_status(Status::error(e.to_string()));
        }
        cx.span().end();

        result.map(|_| ()).map_err(anyhow::Error::from)
    }
}
