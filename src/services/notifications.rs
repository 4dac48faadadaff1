//! Shopper and vendor notifications. Delivery is best-effort: a failure here is logged
//! and never surfaces to the caller of the operation that triggered it.

use async_trait::async_trait;
use metrics::counter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::{order, order_item};
use crate::errors::ServiceError;
use crate::events::{Event, EventHandler, EventSender};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify_order_created(
        &self,
        order: &order::Model,
        shopper_id: Uuid,
        vendor_count: usize,
    ) -> Result<(), ServiceError>;

    async fn notify_vendor_of_order(
        &self,
        order: &order::Model,
        vendor_id: Uuid,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError>;
}

/// Publishes notifications onto the event channel.
#[derive(Clone)]
pub struct EventNotifier {
    event_sender: Arc<EventSender>,
}

impl EventNotifier {
    pub fn new(event_sender: Arc<EventSender>) -> Self {
        Self { event_sender }
    }

    /// Never waits on a backed-up event loop; a full channel drops the notification.
    fn publish(&self, event: Event) -> Result<(), ServiceError> {
        let name = event.name();
        self.event_sender.try_send(event).map_err(|e| {
            counter!("marketplace_notifications_dropped_total", 1, "event" => name);
            ServiceError::InternalError(format!("{} notification dropped: {}", name, e))
        })
    }
}

#[async_trait]
impl OrderNotifier for EventNotifier {
    async fn notify_order_created(
        &self,
        order: &order::Model,
        shopper_id: Uuid,
        vendor_count: usize,
    ) -> Result<(), ServiceError> {
        self.publish(Event::OrderCreated {
            order_id: order.id,
            shopper_id,
            grand_total: order.grand_total(),
            vendor_count,
        })
    }

    async fn notify_vendor_of_order(
        &self,
        order: &order::Model,
        vendor_id: Uuid,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        self.publish(Event::VendorOrderReceived {
            order_id: order.id,
            vendor_id,
            order_item_ids: items.iter().map(|i| i.id).collect(),
        })
    }
}

/// Informs the shopper once and each vendor once about a new order.
pub async fn dispatch_order_notifications(
    notifier: &dyn OrderNotifier,
    order: &order::Model,
    items: &[order_item::Model],
) {
    let mut by_vendor: BTreeMap<Uuid, Vec<order_item::Model>> = BTreeMap::new();
    for item in items {
        by_vendor.entry(item.vendor_id).or_default().push(item.clone());
    }

    if let Err(e) = notifier
        .notify_order_created(order, order.shopper_id, by_vendor.len())
        .await
    {
        warn!(order_id = %order.id, "Failed to notify shopper: {}", e);
    }

    for (vendor_id, vendor_items) in &by_vendor {
        if let Err(e) = notifier
            .notify_vendor_of_order(order, *vendor_id, vendor_items)
            .await
        {
            warn!(order_id = %order.id, vendor_id = %vendor_id, "Failed to notify vendor: {}", e);
        }
    }
}

/// Event subscriber that hands notifications to the outbound channel. Transports such as
/// email or SMS plug in here; the default just records what would be sent.
pub struct NotificationLogHandler;

#[async_trait]
impl EventHandler for NotificationLogHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::OrderCreated {
                order_id,
                shopper_id,
                grand_total,
                vendor_count,
            } => info!(
                order_id = %order_id,
                shopper_id = %shopper_id,
                grand_total = %grand_total,
                vendor_count,
                "Notify shopper: order placed"
            ),
            Event::VendorOrderReceived {
                order_id,
                vendor_id,
                order_item_ids,
            } => info!(
                order_id = %order_id,
                vendor_id = %vendor_id,
                items = order_item_ids.len(),
                "Notify vendor: new order"
            ),
            Event::OrderItemStatusChanged {
                order_id,
                order_item_id,
                new_status,
                ..
            } => info!(
                order_id = %order_id,
                order_item_id = %order_item_id,
                status = %new_status,
                "Notify shopper: delivery update"
            ),
            _ => {}
        }
        Ok(())
    }
}
