// ============================================================================
// order_pipeline - order creation, event publication and payment hand-off
// ============================================================================
//
// Request path:  api -> service (stock -> repository -> messaging)
// Event path:    messaging -> payments -> service (payment link callback)
//
// ============================================================================

pub mod api;
pub mod config;
pub mod domain;
pub mod lifecycle;
pub mod messaging;
pub mod metrics;
pub mod payments;
pub mod repository;
pub mod service;
pub mod stock;
pub mod telemetry;
pub mod utils;
