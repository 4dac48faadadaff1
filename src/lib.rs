//! Marketplace order orchestration
//!
//! Turns a multi-vendor cart into a single order with per-vendor fulfillment groups,
//! aggregates delivery fees with a consolidation discount, hands the grand total to an
//! external payment gateway and tracks each vendor's part of the delivery.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<events::EventSender>,
        gateway: Arc<dyn services::PaymentGateway>,
    ) -> Self {
        let services = handlers::AppServices::new(
            db.clone(),
            event_sender.clone(),
            gateway,
            config.fees.policy(),
        );
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn request_id_is_omitted_outside_a_request() {
        let body = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert_eq!(body["success"], true);
        assert!(body["meta"].get("request_id").is_none());
    }
}

/// Routes mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    let shopper = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:id/tracking", get(handlers::orders::track_order))
        .route(
            "/orders/:id/payment/retry",
            post(handlers::orders::retry_payment),
        );

    let payments = Router::new().route(
        "/payments/verify/:reference",
        get(handlers::payments::verify_payment),
    );

    let vendor = Router::new()
        .route(
            "/vendor/order-items",
            get(handlers::vendor::list_order_items),
        )
        .route(
            "/vendor/order-items/:id/status",
            put(handlers::vendor::update_order_item_status),
        );

    Router::new().merge(shopper).merge(payments).merge(vendor)
}

/// The full application without transport middleware.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(openapi::openapi_routes())
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}
