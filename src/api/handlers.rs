use std::collections::HashMap;
use std::future::Future;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::error::ApiError;
use super::AppState;
use crate::domain::order::{CreateOrderRequest, Order, RequestedItem};
use crate::lifecycle::GetSystemHealth;
use crate::service::{OrderServiceError, RequestContext};

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub items: Vec<RequestedItem>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentLinkBody {
    pub link: String,
}

// ============================================================================
// Request context
// ============================================================================

/// Continue the caller's trace from its `traceparent` header and bound the
/// request by the configured timeout.
fn request_context(req: &HttpRequest, state: &AppState) -> RequestContext {
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    RequestContext::new(state.propagator.extract(&headers)).with_timeout(state.request_timeout)
}

/// Run a pipeline call on its own task. actix drops the handler future when
/// the client goes away; the drop guard turns that into a cancellation the
/// pipeline observes, instead of abandoning it between two steps.
async fn run_detached<T, W, F>(ctx: RequestContext, work: W) -> Result<T, ApiError>
where
    W: FnOnce(RequestContext) -> F,
    F: Future<Output = Result<T, OrderServiceError>> + Send + 'static,
    T: Send + 'static,
{
    let disconnect = ctx.cancel.clone().drop_guard();
    let joined = tokio::spawn(work(ctx)).await;
    disconnect.disarm();

    match joined {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/customers/{customer_id}/orders
pub async fn create_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CreateOrderBody>,
) -> Result<HttpResponse, ApiError> {
    let request = CreateOrderRequest::new(path.into_inner(), body.into_inner().items);
    let ctx = request_context(&req, &state);
    let orders = state.orders.clone();

    let order = run_detached(ctx, move |ctx| async move { orders.create_order(&ctx, request).await }).await?;

    Ok(HttpResponse::Created().json(order))
}

/// GET /api/customers/{customer_id}/orders/{order_id}
pub async fn get_order(
    state: web::Data<AppState>,
    path: web::Path<(String, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (customer_id, order_id) = path.into_inner();
    let order = state.orders.get_order(order_id, &customer_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

/// PUT /api/orders/{order_id}
pub async fn update_order(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<Order>,
) -> Result<HttpResponse, ApiError> {
    let order_id = path.into_inner();
    let order = body.into_inner();
    if order.id != order_id {
        return Err(ApiError::BadRequest(format!(
            "body order id {} does not match path order id {}",
            order.id, order_id
        )));
    }

    let updated = state.orders.update_order(order).await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// POST /api/orders/{order_id}/payment-link
pub async fn attach_payment_link(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<PaymentLinkBody>,
) -> Result<HttpResponse, ApiError> {
    let updated = state
        .orders
        .update_order_after_payment_link(path.into_inner(), &body.link)
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// POST /api/orders/{order_id}/publish
pub async fn republish(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let order_id = path.into_inner();
    let ctx = request_context(&req, &state);
    let orders = state.orders.clone();

    let order = run_detached(ctx, move |ctx| async move { orders.republish(&ctx, order_id).await }).await?;

    Ok(HttpResponse::Ok().json(order))
}

/// GET /health
pub async fn health(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let Some(monitor) = &state.health else {
        return Ok(HttpResponse::Ok().json(json!({ "overall_status": { "status": "healthy" } })));
    };

    let health = monitor
        .ask(GetSystemHealth)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to get system health: {}", e)))?;

    let status = if health.overall_status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    Ok(HttpResponse::build(status).json(health))
}
