use uuid::Uuid;

use crate::domain::order::{OrderError, OrderStatus};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("order already exists: {0}")]
    Duplicate(Uuid),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("payment link already set to a different value")]
    PaymentLinkConflict,

    #[error("rejected update: {0}")]
    Rejected(OrderError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<OrderError> for RepositoryError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { from, to } => RepositoryError::InvalidTransition { from, to },
            OrderError::PaymentLinkConflict => RepositoryError::PaymentLinkConflict,
            other => RepositoryError::Rejected(other),
        }
    }
}
