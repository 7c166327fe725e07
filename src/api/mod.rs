// ============================================================================
// HTTP API - actix-web routes over the order service
// ============================================================================
//
// POST /api/customers/{customer_id}/orders              create an order
// GET  /api/customers/{customer_id}/orders/{order_id}   read an owned order
// PUT  /api/orders/{order_id}                           downstream status push
// POST /api/orders/{order_id}/payment-link              payment link callback
// POST /api/orders/{order_id}/publish                   retry publication
// GET  /metrics                                         Prometheus scrape
// GET  /health                                          aggregated health
//
// ============================================================================

mod error;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use kameo::actor::ActorRef;

use crate::lifecycle::HealthMonitorActor;
use crate::messaging::TracePropagator;
use crate::metrics::metrics_handler;
use crate::service::OrderService;

pub use error::ApiError;
pub use handlers::{CreateOrderBody, PaymentLinkBody};

/// Shared by every worker. `Data<Arc<Metrics>>` is registered separately for
/// the metrics handler.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub health: Option<ActorRef<HealthMonitorActor>>,
    pub propagator: TracePropagator,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(orders: Arc<OrderService>, request_timeout: Duration) -> Self {
        Self {
            orders,
            health: None,
            propagator: TracePropagator::new(),
            request_timeout,
        }
    }

    pub fn with_health(mut self, monitor: ActorRef<HealthMonitorActor>) -> Self {
        self.health = Some(monitor);
        self
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/customers/{customer_id}/orders", web::post().to(handlers::create_order))
            .route(
                "/customers/{customer_id}/orders/{order_id}",
                web::get().to(handlers::get_order),
            )
            .route("/orders/{order_id}", web::put().to(handlers::update_order))
            .route(
                "/orders/{order_id}/payment-link",
                web::post().to(handlers::attach_payment_link),
            )
            .route("/orders/{order_id}/publish", web::post().to(handlers::republish)),
    )
    .route("/metrics", web::get().to(metrics_handler))
    .route("/health", web::get().to(handlers::health));
}
