use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;

use crate::service::OrderServiceError;

// ============================================================================
// HTTP error mapping
// ============================================================================
//
// Validation -> 422, NotFound -> 404, InvalidTransition/Conflict -> 409,
// Publish -> 502, Cancelled -> 504, anything else -> 500.
// Errors that leave an order behind carry its ID in the body.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] OrderServiceError),

    #[error("{0}")]
    BadRequest(String),

    #[error("request task failed: {0}")]
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Service(e) => match e {
                OrderServiceError::Validation(_) => "validation_error",
                OrderServiceError::Persistence(_) => "persistence_error",
                OrderServiceError::Serialization(_) => "serialization_error",
                OrderServiceError::Publish { .. } => "publish_error",
                OrderServiceError::NotFound(_) => "not_found",
                OrderServiceError::InvalidTransition { .. } => "invalid_transition",
                OrderServiceError::Conflict(_) => "conflict",
                OrderServiceError::Cancelled { .. } => "cancelled",
            },
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Service(e) => match e {
                OrderServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                OrderServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                OrderServiceError::InvalidTransition { .. } | OrderServiceError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                OrderServiceError::Publish { .. } => StatusCode::BAD_GATEWAY,
                OrderServiceError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let order_id = match self {
            ApiError::Service(e) => e.order_id(),
            _ => None,
        };

        let mut body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let Some(order_id) = order_id {
            body["order_id"] = json!(order_id);
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}
