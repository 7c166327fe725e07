// ============================================================================
// Service Layer - the orders service's operations
// ============================================================================

mod context;
mod errors;
mod ledger;
mod orders;

pub use context::{Interrupted, RequestContext};
pub use errors::OrderServiceError;
pub use ledger::{UnpublishedEntry, UnpublishedLedger};
pub use orders::{OrderService, PublishFailurePolicy, ServiceSettings};
