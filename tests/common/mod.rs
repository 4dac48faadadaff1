#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use marketplace_orders::{
    app_router,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{cart, cart_item, order, vendor_delivery_setting},
    errors::ServiceError,
    events::{self, Event, EventHandler, EventSender},
    services::{
        payments::{ChargeAuthorization, ChargeRequest, ChargeVerification},
        DbDeliverySettingsLookup, EventNotifier, FeePolicy, OrderCheckoutService, PaymentGateway,
        PaymentService,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// How the fake gateway answers `initialize_charge`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayMode {
    Available,
    Down,
}

/// In-process stand-in for the payment provider.
///
/// Records every charge and whether the order was already committed when the charge was
/// opened.
pub struct FakeGateway {
    db: Arc<DatabaseConnection>,
    mode: Mutex<GatewayMode>,
    pub charges: Mutex<Vec<ChargeRequest>>,
    pub order_committed_at_charge: Mutex<Vec<bool>>,
    pub verification: Mutex<Option<ChargeVerification>>,
}

impl FakeGateway {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            mode: Mutex::new(GatewayMode::Available),
            charges: Mutex::new(Vec::new()),
            order_committed_at_charge: Mutex::new(Vec::new()),
            verification: Mutex::new(None),
        }
    }

    pub fn set_mode(&self, mode: GatewayMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_verification(&self, verification: ChargeVerification) {
        *self.verification.lock().unwrap() = Some(verification);
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize_charge(
        &self,
        request: ChargeRequest,
    ) -> Result<ChargeAuthorization, ServiceError> {
        let committed = order::Entity::find_by_id(request.metadata.order_id)
            .one(&*self.db)
            .await?
            .is_some();
        self.order_committed_at_charge.lock().unwrap().push(committed);
        self.charges.lock().unwrap().push(request);

        let mode = *self.mode.lock().unwrap();
        match mode {
            GatewayMode::Available => {
                let reference = format!("ref_{}", Uuid::new_v4().simple());
                Ok(ChargeAuthorization {
                    authorization_url: format!("https://checkout.example.com/{reference}"),
                    reference,
                })
            }
            GatewayMode::Down => Err(ServiceError::ExternalServiceError(
                "payment gateway unreachable".to_string(),
            )),
        }
    }

    async fn verify_charge(&self, reference: &str) -> Result<ChargeVerification, ServiceError> {
        self.verification
            .lock()
            .unwrap()
            .clone()
            .filter(|v| v.reference == reference)
            .ok_or_else(|| ServiceError::NotFound(format!("unknown reference {reference}")))
    }
}

/// Keeps every event that reaches the event loop.
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Application state backed by a migrated in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub gateway: Arc<FakeGateway>,
    pub event_sender: Arc<EventSender>,
    pub recorder: Arc<RecordingHandler>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        // One connection: every new in-memory SQLite connection is a fresh database.
        let pool = db::establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let recorder = Arc::new(RecordingHandler::default());
        let handlers: Vec<Arc<dyn EventHandler>> = vec![recorder.clone()];
        let event_task = tokio::spawn(events::process_events(event_rx, handlers));

        let gateway = Arc::new(FakeGateway::new(db.clone()));
        let cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        let state = AppState::new(db.clone(), cfg, event_sender.clone(), gateway.clone());
        let router = app_router(state.clone()).layer(axum::middleware::from_fn(
            marketplace_orders::tracing::request_id_middleware,
        ));

        Self {
            router,
            state,
            db,
            gateway,
            event_sender,
            recorder,
            _event_task: event_task,
        }
    }

    /// Checkout service with a non-default fee policy.
    pub fn checkout_with_policy(&self, policy: FeePolicy) -> OrderCheckoutService {
        let payments = Arc::new(PaymentService::new(
            self.db.clone(),
            self.gateway.clone(),
            self.event_sender.clone(),
        ));
        OrderCheckoutService::new(
            self.db.clone(),
            Arc::new(DbDeliverySettingsLookup::new(self.db.clone())),
            payments,
            Arc::new(EventNotifier::new(self.event_sender.clone())),
            policy,
        )
    }

    pub async fn seed_cart(&self, shopper_id: Uuid) -> Uuid {
        let now = Utc::now();
        cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            shopper_id: Set(shopper_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("insert cart")
        .id
    }

    /// Adds a line to a cart. Lines are timestamped in insertion order.
    pub async fn add_cart_item(
        &self,
        cart_id: Uuid,
        vendor_id: Uuid,
        vendor_name: &str,
        product_name: &str,
        unit_price: Decimal,
        quantity: i32,
    ) -> cart_item::Model {
        let position = cart_item::Entity::find()
            .all(&*self.db)
            .await
            .expect("count cart items")
            .len() as i64;
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            product_id: Set(Uuid::new_v4()),
            product_name: Set(product_name.to_string()),
            vendor_id: Set(vendor_id),
            vendor_name: Set(vendor_name.to_string()),
            quantity: Set(quantity),
            unit_price: Set(unit_price),
            created_at: Set(Utc::now() + Duration::milliseconds(position)),
        }
        .insert(&*self.db)
        .await
        .expect("insert cart item")
    }

    pub async fn seed_delivery_setting(
        &self,
        vendor_id: Uuid,
        base_fee: Decimal,
        additional_fee: Decimal,
        is_active: bool,
    ) {
        let now = Utc::now();
        vendor_delivery_setting::ActiveModel {
            id: Set(Uuid::new_v4()),
            vendor_id: Set(vendor_id),
            zone_name: Set("Metro".to_string()),
            base_fee: Set(base_fee),
            additional_fee: Set(additional_fee),
            is_active: Set(is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("insert delivery setting");
    }

    /// Lets the event loop drain what has been sent so far.
    pub async fn settle_events(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    pub fn recorded_events(&self) -> Vec<Event> {
        self.recorder.events.lock().unwrap().clone()
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, String)],
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Parses a decimal carried as a JSON string or number.
pub fn json_decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
