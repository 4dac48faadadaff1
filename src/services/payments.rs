//! Payment hand-off for orders.
//!
//! Charges are created against an external gateway after the order has committed. The
//! gateway returns a redirect URL and a reference; completion is confirmed later through
//! [`PaymentService::verify_payment`].

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::PaymentGatewayConfig;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::PaymentStatus;

/// Order identity attached to a charge so the gateway can echo it back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeMetadata {
    pub order_id: Uuid,
    pub shopper_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub payer_email: String,
    /// Major currency units
    pub amount: Decimal,
    pub callback_url: String,
    pub metadata: ChargeMetadata,
}

/// Redirect handle for the shopper to complete payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChargeAuthorization {
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Success,
    Failed,
    Abandoned,
    /// Anything the gateway still considers in flight
    #[serde(other)]
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeVerification {
    pub reference: String,
    pub status: ChargeStatus,
    /// Major currency units
    pub amount: Decimal,
    pub metadata: Option<ChargeMetadata>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_charge(
        &self,
        request: ChargeRequest,
    ) -> Result<ChargeAuthorization, ServiceError>;

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, ServiceError>;
}

/// Converts a major-unit amount to the gateway's integer minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", amount)))
}

pub fn from_minor_units(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    reference: String,
    status: ChargeStatus,
    amount: i64,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Paystack-style REST gateway client
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        })
    }

    async fn read_envelope<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        let envelope: GatewayEnvelope<T> = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!(
                "unreadable gateway response ({}): {}",
                status, e
            ))
        })?;

        match envelope.data {
            Some(data) if status.is_success() && envelope.status => Ok(data),
            _ if status == reqwest::StatusCode::NOT_FOUND => {
                Err(ServiceError::NotFound(envelope.message))
            }
            _ => Err(ServiceError::ExternalServiceError(format!(
                "gateway rejected request ({}): {}",
                status, envelope.message
            ))),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_id = %request.metadata.order_id))]
    async fn initialize_charge(
        &self,
        request: ChargeRequest,
    ) -> Result<ChargeAuthorization, ServiceError> {
        let body = serde_json::json!({
            "email": request.payer_email,
            "amount": to_minor_units(request.amount)?,
            "callback_url": request.callback_url,
            "metadata": request.metadata,
        });

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway unreachable: {}", e)))?;

        let data: InitializeData = Self::read_envelope(response).await?;
        Ok(ChargeAuthorization {
            authorization_url: data.authorization_url,
            reference: data.reference,
        })
    }

    #[instrument(skip(self))]
    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, ServiceError> {
        let response = self
            .client
            .get(format!("{}/transaction/verify/{}", self.base_url, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway unreachable: {}", e)))?;

        let data: VerifyData = Self::read_envelope(response).await?;
        Ok(ChargeVerification {
            reference: data.reference,
            status: data.status,
            amount: from_minor_units(data.amount),
            metadata: data
                .metadata
                .and_then(|value| serde_json::from_value(value).ok()),
        })
    }
}

/// Outcome of settling a charge against its order
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PaymentVerificationResult {
    pub order_id: Uuid,
    pub reference: String,
    pub payment_status: PaymentStatus,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RetryPaymentCommand {
    pub order_id: Uuid,
    pub shopper_id: Uuid,
    #[validate(email)]
    pub shopper_email: String,
    #[validate(url)]
    pub callback_url: String,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    async fn publish(&self, event: Event) {
        if let Err(e) = self.event_sender.send(event).await {
            warn!("Failed to publish payment event: {}", e);
        }
    }

    /// Opens a charge for the order's grand total and records the reference.
    ///
    /// On gateway failure the order is left as it was and a
    /// `PaymentInitializationFailed` event is raised.
    #[instrument(skip(self, order, shopper_email, callback_url), fields(order_id = %order.id))]
    pub async fn initialize_for_order(
        &self,
        order: &order::Model,
        shopper_email: &str,
        callback_url: &str,
    ) -> Result<ChargeAuthorization, ServiceError> {
        let request = ChargeRequest {
            payer_email: shopper_email.to_string(),
            amount: order.grand_total(),
            callback_url: callback_url.to_string(),
            metadata: ChargeMetadata {
                order_id: order.id,
                shopper_id: order.shopper_id,
            },
        };

        let authorization = match self.gateway.initialize_charge(request).await {
            Ok(authorization) => authorization,
            Err(e) => {
                warn!(order_id = %order.id, "Payment initialization failed: {}", e);
                counter!("marketplace_payment_initialization_failures_total", 1);
                self.publish(Event::PaymentInitializationFailed {
                    order_id: order.id,
                    reason: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        let mut active: order::ActiveModel = order.clone().into();
        active.payment_status = Set(PaymentStatus::Initialized);
        active.payment_reference = Set(Some(authorization.reference.clone()));
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        info!(
            order_id = %order.id,
            reference = %authorization.reference,
            "Payment initialized"
        );
        self.publish(Event::PaymentInitialized {
            order_id: order.id,
            reference: authorization.reference.clone(),
        })
        .await;

        Ok(authorization)
    }

    /// Confirms a charge with the gateway and settles the order's payment state.
    ///
    /// A successful charge must match the order's grand total to the cent; a mismatch is
    /// reported as `PaymentFailed` and the order is left untouched.
    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        reference: &str,
    ) -> Result<PaymentVerificationResult, ServiceError> {
        let order = order::Entity::find()
            .filter(order::Column::PaymentReference.eq(reference))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No order for payment reference {}", reference))
            })?;

        if order.payment_status == PaymentStatus::Paid {
            return Ok(PaymentVerificationResult {
                order_id: order.id,
                reference: reference.to_string(),
                payment_status: PaymentStatus::Paid,
                amount: order.grand_total(),
            });
        }

        let verification = self.gateway.verify_charge(reference).await?;

        if let Some(metadata) = &verification.metadata {
            if metadata.order_id != order.id {
                warn!(order_id = %order.id, reference, "Charge metadata names a different order");
                return Err(ServiceError::PaymentFailed(
                    "charge does not belong to this order".to_string(),
                ));
            }
        }

        let new_status = match verification.status {
            ChargeStatus::Success => {
                let expected = order.grand_total().round_dp(2);
                if verification.amount.round_dp(2) != expected {
                    warn!(
                        order_id = %order.id,
                        charged = %verification.amount,
                        expected = %expected,
                        "Charged amount does not match order total"
                    );
                    return Err(ServiceError::PaymentFailed(format!(
                        "charged {} but order total is {}",
                        verification.amount, expected
                    )));
                }
                PaymentStatus::Paid
            }
            ChargeStatus::Failed | ChargeStatus::Abandoned => PaymentStatus::Failed,
            ChargeStatus::Pending => order.payment_status,
        };

        if new_status != order.payment_status {
            let mut active: order::ActiveModel = order.clone().into();
            active.payment_status = Set(new_status);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;
            counter!("marketplace_payments_verified_total", 1, "status" => new_status.to_string());
        }

        info!(order_id = %order.id, status = %new_status, "Payment verified");
        self.publish(Event::PaymentVerified {
            order_id: order.id,
            reference: reference.to_string(),
            status: new_status,
        })
        .await;

        Ok(PaymentVerificationResult {
            order_id: order.id,
            reference: reference.to_string(),
            payment_status: new_status,
            amount: verification.amount,
        })
    }

    /// Opens a fresh charge for an order whose payment never started or failed.
    ///
    /// An order with an open charge keeps its reference; the shopper either completes it
    /// or it is settled as failed through [`Self::verify_payment`] before a retry.
    #[instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn retry_payment(
        &self,
        command: RetryPaymentCommand,
    ) -> Result<ChargeAuthorization, ServiceError> {
        command.validate()?;

        let order = order::Entity::find_by_id(command.order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.shopper_id == command.shopper_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", command.order_id)))?;

        if !order.payment_status.accepts_new_charge() {
            let reason = match order.payment_status {
                PaymentStatus::Paid => format!("Order {} is already paid", order.id),
                _ => format!(
                    "Order {} has an open charge {}; verify it before retrying",
                    order.id,
                    order.payment_reference.as_deref().unwrap_or("")
                ),
            };
            return Err(ServiceError::ValidationError(reason));
        }

        self.initialize_for_order(&order, &command.shopper_email, &command.callback_url)
            .await
    }
}
