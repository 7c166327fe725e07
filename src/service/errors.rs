use uuid::Uuid;

use super::context::Interrupted;
use crate::domain::order::OrderStatus;
use crate::messaging::PublishError;
use crate::repository::RepositoryError;

// ============================================================================
// Order Service Errors
// ============================================================================
//
// Validation, Serialization and step-1/2 Persistence errors happen before
// any broker interaction. `Publish` always names the order that now exists
// so the caller can retry publication alone.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderServiceError {
    /// Caller-correctable; nothing was created
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("persistence failed: {0}")]
    Persistence(RepositoryError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("order {order_id} created but its event was not published: {source}")]
    Publish {
        order_id: Uuid,
        #[source]
        source: PublishError,
    },

    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("conflict: {0}")]
    Conflict(String),

    /// The request was cancelled or ran out of time. `order_id` is set when
    /// the order had already been created.
    #[error("{reason} during {step}")]
    Cancelled {
        step: &'static str,
        order_id: Option<Uuid>,
        reason: Interrupted,
    },
}

impl OrderServiceError {
    /// ID of an order that exists despite the error
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            OrderServiceError::Publish { order_id, .. } => Some(*order_id),
            OrderServiceError::Cancelled { order_id, .. } => *order_id,
            _ => None,
        }
    }
}

impl From<RepositoryError> for OrderServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => OrderServiceError::NotFound(id),
            RepositoryError::InvalidTransition { from, to } => {
                OrderServiceError::InvalidTransition { from, to }
            }
            RepositoryError::PaymentLinkConflict => {
                OrderServiceError::Conflict("payment link already set to a different value".to_string())
            }
            RepositoryError::Rejected(reason) => OrderServiceError::Validation(reason.to_string()),
            other => OrderServiceError::Persistence(other),
        }
    }
}
