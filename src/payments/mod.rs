// ============================================================================
// Payments - downstream consumer of order-created events
// ============================================================================
//
// Consumes the order-created queue, creates a payment link per order and
// calls back into the orders service to attach it.
//
// ============================================================================

mod gateway;
mod handler;
mod processor;
mod service;

pub use gateway::{LocalOrdersGateway, OrdersGateway};
pub use handler::OrderCreatedHandler;
pub use processor::{InMemoryProcessor, PaymentError, PaymentProcessor};
pub use service::PaymentsService;
