use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::transaction::transaction_scope;
use crate::entities::{delivery_tracking_event, order, order_item};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{FulfillmentStatus, PaymentStatus};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderItemStatusCommand {
    pub order_item_id: Uuid,
    pub vendor_id: Uuid,
    pub new_status: FulfillmentStatus,
    #[validate(length(max = 255))]
    pub location: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub tracking_number: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderItemStatusUpdated {
    pub order_item_id: Uuid,
    pub order_id: Uuid,
    pub vendor_id: Uuid,
    pub old_status: FulfillmentStatus,
    pub new_status: FulfillmentStatus,
    pub sequence: i32,
    pub tracking_number: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackingEventView {
    pub sequence: i32,
    pub status: FulfillmentStatus,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<delivery_tracking_event::Model> for TrackingEventView {
    fn from(event: delivery_tracking_event::Model) -> Self {
        Self {
            sequence: event.sequence,
            status: event.status,
            location: event.location,
            notes: event.notes,
            created_at: event.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackedOrderItem {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub vendor_id: Uuid,
    pub vendor_name: String,
    pub quantity: i32,
    pub status: FulfillmentStatus,
    pub tracking_number: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
    /// Newest first
    pub history: Vec<TrackingEventView>,
}

/// Shopper-facing view of an order across all of its vendors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderTrackingView {
    pub order_id: Uuid,
    pub total_amount: Decimal,
    pub delivery_fee: Decimal,
    pub grand_total: Decimal,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub items: Vec<TrackedOrderItem>,
}

/// A vendor's view of one of its order items, with what it needs to ship it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VendorOrderItemView {
    pub order_item_id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub subtotal: Decimal,
    pub status: FulfillmentStatus,
    pub tracking_number: Option<String>,
    pub estimated_delivery_date: Option<DateTime<Utc>>,
    pub actual_delivery_date: Option<DateTime<Utc>>,
    pub delivery_address: String,
    pub contact_phone: String,
    pub created_at: DateTime<Utc>,
}

/// Vendor-driven status changes and shopper-side tracking.
#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl FulfillmentService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Moves an order item to a new fulfillment status on behalf of its vendor and
    /// appends the matching tracking event.
    #[instrument(skip(self, command), fields(order_item_id = %command.order_item_id, vendor_id = %command.vendor_id))]
    pub async fn update_order_item_status(
        &self,
        command: UpdateOrderItemStatusCommand,
    ) -> Result<OrderItemStatusUpdated, ServiceError> {
        command.validate()?;

        let updated = transaction_scope::<_, _, ServiceError>(&self.db, move |txn| {
            Box::pin(async move {
                let item = order_item::Entity::find_by_id(command.order_item_id)
                    .lock_exclusive()
                    .one(txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "Order item {} not found",
                            command.order_item_id
                        ))
                    })?;

                if item.vendor_id != command.vendor_id {
                    return Err(ServiceError::Forbidden(format!(
                        "Order item {} belongs to another vendor",
                        item.id
                    )));
                }

                let old_status = item.status;
                let new_status = old_status.transition_to(command.new_status)?;

                let last_sequence = delivery_tracking_event::Entity::find()
                    .filter(delivery_tracking_event::Column::OrderItemId.eq(item.id))
                    .order_by_desc(delivery_tracking_event::Column::Sequence)
                    .one(txn)
                    .await?
                    .map(|event| event.sequence)
                    .unwrap_or(0);
                let sequence = last_sequence + 1;

                let now = Utc::now();
                delivery_tracking_event::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_item_id: Set(item.id),
                    sequence: Set(sequence),
                    status: Set(new_status),
                    location: Set(command.location.clone()),
                    notes: Set(command.notes.clone()),
                    created_at: Set(now),
                }
                .insert(txn)
                .await?;

                let mut active: order_item::ActiveModel = item.into();
                active.status = Set(new_status);
                if let Some(tracking_number) = command.tracking_number.clone() {
                    active.tracking_number = Set(Some(tracking_number));
                }
                if let Some(estimate) = command.estimated_delivery_date {
                    active.estimated_delivery_date = Set(Some(estimate));
                }
                if new_status == FulfillmentStatus::Delivered {
                    active.actual_delivery_date = Set(Some(now));
                }
                active.updated_at = Set(now);
                let item = active.update(txn).await?;

                Ok(OrderItemStatusUpdated {
                    order_item_id: item.id,
                    order_id: item.order_id,
                    vendor_id: item.vendor_id,
                    old_status,
                    new_status,
                    sequence,
                    tracking_number: item.tracking_number,
                    estimated_delivery_date: item.estimated_delivery_date,
                    actual_delivery_date: item.actual_delivery_date,
                })
            })
        })
        .await?;

        counter!(
            "marketplace_order_item_status_updates_total",
            1,
            "status" => updated.new_status.to_string()
        );
        info!(
            order_id = %updated.order_id,
            order_item_id = %updated.order_item_id,
            from = %updated.old_status,
            to = %updated.new_status,
            sequence = updated.sequence,
            "Order item status updated"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::OrderItemStatusChanged {
                order_id: updated.order_id,
                order_item_id: updated.order_item_id,
                vendor_id: updated.vendor_id,
                old_status: updated.old_status,
                new_status: updated.new_status,
                sequence: updated.sequence,
            })
            .await
        {
            warn!(order_item_id = %updated.order_item_id, "Failed to publish status change: {}", e);
        }

        Ok(updated)
    }

    /// Consolidated tracking view of a shopper's order.
    ///
    /// Orders belonging to someone else are reported as not found.
    #[instrument(skip(self))]
    pub async fn track_order(
        &self,
        order_id: Uuid,
        shopper_id: Uuid,
    ) -> Result<OrderTrackingView, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.shopper_id == shopper_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::VendorId)
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db)
            .await?;

        let item_ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let events = delivery_tracking_event::Entity::find()
            .filter(delivery_tracking_event::Column::OrderItemId.is_in(item_ids))
            .order_by_desc(delivery_tracking_event::Column::Sequence)
            .all(&*self.db)
            .await?;

        let mut history: HashMap<Uuid, Vec<TrackingEventView>> = HashMap::new();
        for event in events {
            history
                .entry(event.order_item_id)
                .or_default()
                .push(event.into());
        }

        let items = items
            .into_iter()
            .map(|item| TrackedOrderItem {
                history: history.remove(&item.id).unwrap_or_default(),
                order_item_id: item.id,
                product_id: item.product_id,
                product_name: item.product_name,
                vendor_id: item.vendor_id,
                vendor_name: item.vendor_name,
                quantity: item.quantity,
                status: item.status,
                tracking_number: item.tracking_number,
                estimated_delivery_date: item.estimated_delivery_date,
                actual_delivery_date: item.actual_delivery_date,
            })
            .collect();

        Ok(OrderTrackingView {
            order_id: order.id,
            total_amount: order.total_amount,
            delivery_fee: order.delivery_fee,
            grand_total: order.grand_total(),
            payment_status: order.payment_status,
            created_at: order.created_at,
            items,
        })
    }

    /// The vendor's own order items, newest first.
    #[instrument(skip(self))]
    pub async fn list_vendor_order_items(
        &self,
        vendor_id: Uuid,
    ) -> Result<Vec<VendorOrderItemView>, ServiceError> {
        let rows = order_item::Entity::find()
            .filter(order_item::Column::VendorId.eq(vendor_id))
            .find_also_related(order::Entity)
            .order_by_desc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db)
            .await?;

        rows.into_iter()
            .map(|(item, order)| {
                let order = order.ok_or_else(|| {
                    ServiceError::InternalError(format!("Order item {} has no order", item.id))
                })?;
                Ok(VendorOrderItemView {
                    order_item_id: item.id,
                    order_id: item.order_id,
                    product_id: item.product_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    subtotal: item.subtotal,
                    status: item.status,
                    tracking_number: item.tracking_number,
                    estimated_delivery_date: item.estimated_delivery_date,
                    actual_delivery_date: item.actual_delivery_date,
                    delivery_address: order.delivery_address,
                    contact_phone: order.contact_phone,
                    created_at: item.created_at,
                })
            })
            .collect()
    }
}
