pub mod common;
pub mod health;
pub mod orders;
pub mod payments;
pub mod vendor;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    DbDeliverySettingsLookup, EventNotifier, FeePolicy, FulfillmentService, OrderCheckoutService,
    PaymentGateway, PaymentService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<OrderCheckoutService>,
    pub payments: Arc<PaymentService>,
    pub fulfillment: Arc<FulfillmentService>,
}

impl AppServices {
    /// Wires the order pipeline against one database pool and one payment gateway.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        fee_policy: FeePolicy,
    ) -> Self {
        let payments = Arc::new(PaymentService::new(
            db_pool.clone(),
            gateway,
            event_sender.clone(),
        ));
        let checkout = Arc::new(OrderCheckoutService::new(
            db_pool.clone(),
            Arc::new(DbDeliverySettingsLookup::new(db_pool.clone())),
            payments.clone(),
            Arc::new(EventNotifier::new(event_sender.clone())),
            fee_policy,
        ));
        let fulfillment = Arc::new(FulfillmentService::new(db_pool, event_sender));

        Self {
            checkout,
            payments,
            fulfillment,
        }
    }
}
