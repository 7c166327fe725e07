// ============================================================================
// Order Domain - Business rules for the order record
// ============================================================================
//
// - Value objects (RequestedItem, OrderItem, OrderStatus state machine)
// - Commands (CreateOrderRequest, StatusExtra)
// - Errors (OrderError)
// - Aggregate (Order)
// - Events (OrderCreatedEvent wire format)
//
// ============================================================================

pub mod value_objects;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod events;

// Re-export for convenience
pub use value_objects::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use events::{OrderCreatedEvent, ORDER_CREATED_QUEUE, CONTENT_TYPE_JSON};
