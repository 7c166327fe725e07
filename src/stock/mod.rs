// ============================================================================
// Stock Validator Client
// ============================================================================
//
// Availability and price resolution at order-creation time. The orders
// service only sees the `StockGateway` port; the in-memory catalog backs
// local runs and tests, `ResilientStockClient` wraps whichever is in use.
//
// ============================================================================

mod gateway;
mod memory;
mod resilient;

pub use gateway::{StockCheck, StockError, StockGateway};
pub use memory::{CatalogEntry, InMemoryStock};
pub use resilient::ResilientStockClient;
