// ============================================================================
// Order Repository
// ============================================================================
//
// Owns creation and mutation of order records. Writes to one order are
// serialized; unrelated orders proceed in parallel. Every mutation goes
// through the `Order` state machine, so both backends reject the same
// transitions.
//
// ============================================================================

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::order::{Order, OrderStatus, StatusExtra};

mod error;
mod memory;
mod scylla_store;

pub use error::RepositoryError;
pub use memory::InMemoryOrderRepository;
pub use scylla_store::ScyllaOrderRepository;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Store a new order. Fails with `Duplicate` if the ID is taken.
    async fn create(&self, order: &Order) -> Result<(), RepositoryError>;

    async fn get(&self, order_id: Uuid) -> Result<Order, RepositoryError>;

    /// Apply a status change (and its extra data) and return the stored order
    async fn update_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        extra: &StatusExtra,
    ) -> Result<Order, RepositoryError>;

    /// Set the payment link once; the same link again is a no-op
    async fn attach_payment_link(&self, order_id: Uuid, link: &str) -> Result<Order, RepositoryError>;

    /// Mark the order-created event as published. Idempotent; the first
    /// timestamp is kept.
    async fn mark_published(&self, order_id: Uuid) -> Result<Order, RepositoryError>;

    /// Compensating removal. Returns whether a record existed.
    async fn delete(&self, order_id: Uuid) -> Result<bool, RepositoryError>;

    async fn count(&self) -> Result<usize, RepositoryError>;

    fn name(&self) -> &'static str;
}
