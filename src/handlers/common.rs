use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::ApiResponse;

pub const SHOPPER_ID_HEADER: &str = "x-shopper-id";
pub const VENDOR_ID_HEADER: &str = "x-vendor-id";

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

fn identity_header(parts: &Parts, header: &str) -> Result<Uuid, ServiceError> {
    let raw = parts
        .headers
        .get(header)
        .ok_or_else(|| ServiceError::Unauthorized(format!("Missing {} header", header)))?;

    raw.to_str()
        .ok()
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| ServiceError::Unauthorized(format!("Malformed {} header", header)))
}

/// Authenticated shopper, resolved upstream and forwarded as `X-Shopper-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShopperId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for ShopperId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_header(parts, SHOPPER_ID_HEADER).map(ShopperId)
    }
}

/// Authenticated vendor, forwarded as `X-Vendor-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for VendorId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_header(parts, VENDOR_ID_HEADER).map(VendorId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::http::Request;

    fn parts(header: Option<(&str, &str)>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn shopper_header_is_parsed() {
        let id = Uuid::new_v4();
        let mut parts = parts(Some(("X-Shopper-Id", &id.to_string())));
        let shopper = ShopperId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(shopper, ShopperId(id));
    }

    #[tokio::test]
    async fn missing_or_malformed_identity_is_unauthorized() {
        let mut missing = parts(None);
        assert_matches!(
            VendorId::from_request_parts(&mut missing, &()).await,
            Err(ServiceError::Unauthorized(_))
        );

        let mut malformed = parts(Some(("X-Vendor-Id", "vendor-7")));
        assert_matches!(
            VendorId::from_request_parts(&mut malformed, &()).await,
            Err(ServiceError::Unauthorized(_))
        );
    }
}
