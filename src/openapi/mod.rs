use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace Orders API",
        version = "0.1.0",
        description = r#"
# Marketplace order orchestration

Checkout for a multi-vendor marketplace. A shopper's cart is split into one fulfillment
group per vendor, delivery fees are aggregated with a consolidation discount, and the
order is stored atomically before the payment is opened.

## Identity

Authentication happens upstream. Shopper endpoints read the caller from `X-Shopper-Id`,
vendor endpoints from `X-Vendor-Id`. A missing or malformed header is rejected with 401.

## Error Handling

Errors share one body:

```json
{
  "error": "Conflict",
  "message": "Cart is no longer available: cart 4f2c... was checked out concurrently",
  "request_id": "req-abc123",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    paths(
        crate::handlers::health::health_check,
        crate::handlers::orders::create_order,
        crate::handlers::orders::track_order,
        crate::handlers::orders::retry_payment,
        crate::handlers::payments::verify_payment,
        crate::handlers::vendor::list_order_items,
        crate::handlers::vendor::update_order_item_status,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::models::FulfillmentStatus,
        crate::models::PaymentStatus,
        crate::handlers::orders::CreateOrderRequest,
        crate::handlers::orders::RetryPaymentRequest,
        crate::handlers::vendor::UpdateStatusRequest,
        crate::services::checkout::CreateOrderResult,
        crate::services::checkout::VendorBreakdown,
        crate::services::fulfillment::OrderTrackingView,
        crate::services::fulfillment::TrackedOrderItem,
        crate::services::fulfillment::TrackingEventView,
        crate::services::fulfillment::OrderItemStatusUpdated,
        crate::services::fulfillment::VendorOrderItemView,
        crate::services::payments::ChargeAuthorization,
        crate::services::payments::PaymentVerificationResult,
        crate::handlers::health::HealthResponse,
    )),
    tags(
        (name = "orders", description = "Checkout and shopper tracking"),
        (name = "payments", description = "Payment hand-off and verification"),
        (name = "vendor", description = "Vendor fulfillment updates"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes() -> Router<AppState> {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
