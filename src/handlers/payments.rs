use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::services::payments::PaymentVerificationResult;
use crate::{errors::ServiceError, ApiResponse, AppState};

/// Confirm a charge with the gateway and settle the order's payment state.
/// Called from the gateway's callback redirect.
#[utoipa::path(
    get,
    path = "/api/v1/payments/verify/{reference}",
    summary = "Verify payment",
    params(("reference" = String, Path, description = "Gateway payment reference")),
    responses(
        (status = 200, description = "Payment state after verification", body = ApiResponse<PaymentVerificationResult>),
        (status = 402, description = "Charge does not match the order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown reference", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ApiResponse<PaymentVerificationResult>>, ServiceError> {
    let result = state.services.payments.verify_payment(&reference).await?;
    Ok(Json(ApiResponse::success(result)))
}
