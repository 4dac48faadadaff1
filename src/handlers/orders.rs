use axum::{
    extract::{Path, State},
    response::{Json, Response},
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::handlers::common::{created_response, ShopperId};
use crate::services::checkout::{CreateOrderCommand, CreateOrderResult};
use crate::services::fulfillment::OrderTrackingView;
use crate::services::payments::{ChargeAuthorization, RetryPaymentCommand};
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub cart_id: Uuid,
    pub shopper_email: String,
    pub delivery_address: String,
    pub contact_phone: String,
    pub notes: Option<String>,
    pub callback_url: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RetryPaymentRequest {
    pub shopper_email: String,
    pub callback_url: String,
}

/// Check out the shopper's cart
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Create an order from the shopper's cart, one fulfillment group per vendor, and open the payment",
    request_body = CreateOrderRequest,
    params(("X-Shopper-Id" = Uuid, Header, description = "Authenticated shopper")),
    responses(
        (status = 201, description = "Order created; payment_error is set if the payment could not be opened", body = ApiResponse<CreateOrderResult>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request or empty cart", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing shopper identity", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cart changed or was already checked out", body = crate::errors::ErrorResponse),
        (status = 422, description = "A vendor has no delivery configuration", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Response, ServiceError> {
    let command = CreateOrderCommand {
        shopper_id,
        cart_id: request.cart_id,
        shopper_email: request.shopper_email,
        delivery_address: request.delivery_address,
        contact_phone: request.contact_phone,
        notes: request.notes,
        callback_url: request.callback_url,
    };

    let result = state.services.checkout.create_order(command).await?;
    Ok(created_response(result))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/tracking",
    summary = "Track order",
    description = "Per-vendor fulfillment state and delivery history of one of the shopper's orders",
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("X-Shopper-Id" = Uuid, Header, description = "Authenticated shopper"),
    ),
    responses(
        (status = 200, description = "Tracking view", body = ApiResponse<OrderTrackingView>),
        (status = 401, description = "Missing shopper identity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn track_order(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderTrackingView>>, ServiceError> {
    let view = state
        .services
        .fulfillment
        .track_order(order_id, shopper_id)
        .await?;
    Ok(Json(ApiResponse::success(view)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment/retry",
    summary = "Retry payment",
    description = "Open a new charge for an order whose payment never started or has failed",
    request_body = RetryPaymentRequest,
    params(
        ("id" = Uuid, Path, description = "Order ID"),
        ("X-Shopper-Id" = Uuid, Header, description = "Authenticated shopper"),
    ),
    responses(
        (status = 200, description = "Payment opened", body = ApiResponse<ChargeAuthorization>),
        (status = 400, description = "Invalid request, open charge pending, or order already paid", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    ShopperId(shopper_id): ShopperId,
    Path(order_id): Path<Uuid>,
    Json(request): Json<RetryPaymentRequest>,
) -> Result<Json<ApiResponse<ChargeAuthorization>>, ServiceError> {
    let authorization = state
        .services
        .payments
        .retry_payment(RetryPaymentCommand {
            order_id,
            shopper_id,
            shopper_email: request.shopper_email,
            callback_url: request.callback_url,
        })
        .await?;
    Ok(Json(ApiResponse::success(authorization)))
}
