use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{FulfillmentStatus, PaymentStatus};

#[derive(Debug, Error)]
#[error("Failed to send event: channel closed")]
pub struct EventSendError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventPublishError {
    #[error("event channel is full")]
    Full,
    #[error("event channel is closed")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), EventSendError> {
        self.sender.send(event).await.map_err(|_| EventSendError)
    }

    /// Enqueues without waiting; the event is dropped when the channel is full.
    pub fn try_send(&self, event: Event) -> Result<(), EventPublishError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EventPublishError::Full,
            mpsc::error::TrySendError::Closed(_) => EventPublishError::Closed,
        })
    }
}

/// Domain events raised by the order pipeline. Consumers are best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        shopper_id: Uuid,
        grand_total: Decimal,
        vendor_count: usize,
    },
    /// One per vendor involved in an order
    VendorOrderReceived {
        order_id: Uuid,
        vendor_id: Uuid,
        order_item_ids: Vec<Uuid>,
    },
    OrderItemStatusChanged {
        order_id: Uuid,
        order_item_id: Uuid,
        vendor_id: Uuid,
        old_status: FulfillmentStatus,
        new_status: FulfillmentStatus,
        sequence: i32,
    },
    PaymentInitialized {
        order_id: Uuid,
        reference: String,
    },
    PaymentInitializationFailed {
        order_id: Uuid,
        reason: String,
    },
    PaymentVerified {
        order_id: Uuid,
        reference: String,
        status: PaymentStatus,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::VendorOrderReceived { .. } => "vendor_order_received",
            Event::OrderItemStatusChanged { .. } => "order_item_status_changed",
            Event::PaymentInitialized { .. } => "payment_initialized",
            Event::PaymentInitializationFailed { .. } => "payment_initialization_failed",
            Event::PaymentVerified { .. } => "payment_verified",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderCreated { order_id, .. }
            | Event::VendorOrderReceived { order_id, .. }
            | Event::OrderItemStatusChanged { order_id, .. }
            | Event::PaymentInitialized { order_id, .. }
            | Event::PaymentInitializationFailed { order_id, .. }
            | Event::PaymentVerified { order_id, .. } => *order_id,
        }
    }
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the event channel, logging each event and fanning it out to `handlers`.
/// A failing handler is logged and never stops the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(
            event = event.name(),
            order_id = %event.order_id(),
            "Received event"
        );

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(
                    event = event.name(),
                    order_id = %event.order_id(),
                    "Event handler failed: {}",
                    e
                );
            }
        }
    }

    info!("Event channel closed; event processing loop finished");
}
