use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::handlers::common::VendorId;
use crate::models::FulfillmentStatus;
use crate::services::fulfillment::{
    OrderItemStatusUpdated, UpdateOrderItemStatusCommand, VendorOrderItemView,
};
use crate::{errors::ServiceError, ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: FulfillmentStatus,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub tracking_number: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
}

#[utoipa::path(
    get,
    path = "/api/v1/vendor/order-items",
    summary = "List vendor order items",
    description = "Order items owned by the calling vendor, newest first",
    params(("X-Vendor-Id" = Uuid, Header, description = "Authenticated vendor")),
    responses(
        (status = 200, description = "The vendor's order items", body = ApiResponse<Vec<VendorOrderItemView>>),
        (status = 401, description = "Missing vendor identity", body = crate::errors::ErrorResponse),
    ),
    tag = "vendor"
)]
pub async fn list_order_items(
    State(state): State<AppState>,
    VendorId(vendor_id): VendorId,
) -> Result<Json<ApiResponse<Vec<VendorOrderItemView>>>, ServiceError> {
    let items = state
        .services
        .fulfillment
        .list_vendor_order_items(vendor_id)
        .await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    put,
    path = "/api/v1/vendor/order-items/{id}/status",
    summary = "Update fulfillment status",
    request_body = UpdateStatusRequest,
    params(
        ("id" = Uuid, Path, description = "Order item ID"),
        ("X-Vendor-Id" = Uuid, Header, description = "Authenticated vendor"),
    ),
    responses(
        (status = 200, description = "Status recorded", body = ApiResponse<OrderItemStatusUpdated>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 403, description = "Item belongs to another vendor", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order item not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse),
    ),
    tag = "vendor"
)]
pub async fn update_order_item_status(
    State(state): State<AppState>,
    VendorId(vendor_id): VendorId,
    Path(order_item_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<OrderItemStatusUpdated>>, ServiceError> {
    let updated = state
        .services
        .fulfillment
        .update_order_item_status(UpdateOrderItemStatusCommand {
            order_item_id,
            vendor_id,
            new_status: request.status,
            location: request.location,
            notes: request.notes,
            tracking_number: request.tracking_number,
            estimated_delivery_date: request.estimated_delivery_date,
        })
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}
