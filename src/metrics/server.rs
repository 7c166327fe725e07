use actix_web::{web, HttpResponse, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use super::Metrics;

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics(registry: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

/// GET /metrics
pub async fn metrics_handler(metrics: web::Data<Arc<Metrics>>) -> impl Responder {
    match encode_metrics(metrics.registry()) {
        Ok(buffer) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_registered_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.orders_created.inc();

        let text = String::from_utf8(encode_metrics(metrics.registry()).unwrap()).unwrap();
        assert!(text.contains("orders_created_total 1"));
    }
}
