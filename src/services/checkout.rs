use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::transaction::transaction_scope;
use crate::entities::{cart, cart_item, delivery_tracking_event, order, order_item};
use crate::errors::ServiceError;
use crate::models::{FulfillmentStatus, PaymentStatus};
use crate::services::delivery_fees::{
    lookup_fees, price_groups, DeliverySettingsLookup, FeePolicy, VendorDeliveryFee,
};
use crate::services::grouping::{group_by_vendor, line_subtotal};
use crate::services::notifications::{dispatch_order_notifications, OrderNotifier};
use crate::services::payments::PaymentService;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderCommand {
    pub shopper_id: Uuid,
    pub cart_id: Uuid,
    #[validate(email)]
    pub shopper_email: String,
    #[validate(length(min = 5, max = 500))]
    pub delivery_address: String,
    #[validate(length(min = 7, max = 32))]
    pub contact_phone: String,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    /// Where the gateway sends the shopper after payment
    #[validate(url)]
    pub callback_url: String,
}

/// What one vendor contributes to an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VendorBreakdown {
    pub vendor_id: Uuid,
    pub vendor_name: String,
    pub item_count: usize,
    pub subtotal: Decimal,
    /// Undiscounted delivery fee booked for this vendor
    pub delivery_fee: Decimal,
    pub order_item_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResult {
    pub order_id: Uuid,
    pub total_amount: Decimal,
    /// Discounted delivery charge the shopper pays
    pub delivery_fee: Decimal,
    pub grand_total: Decimal,
    pub payment_authorization_url: Option<String>,
    pub payment_reference: Option<String>,
    /// Set when the order was saved but the payment could not be opened
    pub payment_error: Option<String>,
    pub vendor_breakdown: Vec<VendorBreakdown>,
}

struct PersistedOrder {
    order: order::Model,
    items: Vec<order_item::Model>,
    vendor_breakdown: Vec<VendorBreakdown>,
    waived_vendors: Vec<Uuid>,
}

/// Turns a shopper's cart into an order, one vendor group at a time, and opens the
/// payment once the order is safely stored.
#[derive(Clone)]
pub struct OrderCheckoutService {
    db: Arc<DatabaseConnection>,
    delivery_settings: Arc<dyn DeliverySettingsLookup>,
    payments: Arc<PaymentService>,
    notifier: Arc<dyn OrderNotifier>,
    fee_policy: FeePolicy,
}

impl OrderCheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        delivery_settings: Arc<dyn DeliverySettingsLookup>,
        payments: Arc<PaymentService>,
        notifier: Arc<dyn OrderNotifier>,
        fee_policy: FeePolicy,
    ) -> Self {
        Self {
            db,
            delivery_settings,
            payments,
            notifier,
            fee_policy,
        }
    }

    /// Creates an order from the shopper's cart.
    ///
    /// Everything up to and including clearing the cart happens in one transaction. The
    /// payment is opened only after commit; if that fails the order stays `pending` and
    /// the result carries `payment_error` instead of an authorization URL.
    #[instrument(skip(self, command), fields(shopper_id = %command.shopper_id, cart_id = %command.cart_id))]
    pub async fn create_order(
        &self,
        command: CreateOrderCommand,
    ) -> Result<CreateOrderResult, ServiceError> {
        command.validate()?;
        let started = std::time::Instant::now();

        // Fees are looked up before the transaction so no external read runs while rows
        // are held. The transaction re-reads the cart and fails if a new vendor shows up.
        let snapshot = load_cart_items(&*self.db, command.shopper_id, command.cart_id).await?;
        if snapshot.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let vendor_ids: BTreeSet<Uuid> = snapshot.iter().map(|i| i.vendor_id).collect();
        let fees = lookup_fees(self.delivery_settings.as_ref(), vendor_ids).await?;

        let persisted = self.persist_order(&command, fees).await.map_err(|e| {
            warn!("Order creation rolled back: {}", e);
            e
        })?;

        for vendor_id in &persisted.waived_vendors {
            warn!(
                order_id = %persisted.order.id,
                vendor_id = %vendor_id,
                "Vendor has no active delivery configuration; delivery fee waived"
            );
        }

        let order = persisted.order;
        counter!("marketplace_orders_created_total", 1);
        histogram!(
            "marketplace_order_creation_seconds",
            started.elapsed().as_secs_f64()
        );
        info!(
            order_id = %order.id,
            total_amount = %order.total_amount,
            delivery_fee = %order.delivery_fee,
            vendors = persisted.vendor_breakdown.len(),
            "Order created"
        );

        dispatch_order_notifications(self.notifier.as_ref(), &order, &persisted.items).await;

        let mut result = CreateOrderResult {
            order_id: order.id,
            total_amount: order.total_amount,
            delivery_fee: order.delivery_fee,
            grand_total: order.grand_total(),
            payment_authorization_url: None,
            payment_reference: None,
            payment_error: None,
            vendor_breakdown: persisted.vendor_breakdown,
        };

        match self
            .payments
            .initialize_for_order(&order, &command.shopper_email, &command.callback_url)
            .await
        {
            Ok(authorization) => {
                result.payment_authorization_url = Some(authorization.authorization_url);
                result.payment_reference = Some(authorization.reference);
            }
            Err(e) => {
                warn!(
                    order_id = %order.id,
                    "Order saved without payment authorization: {}",
                    e
                );
                result.payment_error = Some(e.response_message());
            }
        }

        Ok(result)
    }

    async fn persist_order(
        &self,
        command: &CreateOrderCommand,
        fees: HashMap<Uuid, Option<VendorDeliveryFee>>,
    ) -> Result<PersistedOrder, ServiceError> {
        let command = command.clone();
        let policy = self.fee_policy.clone();

        transaction_scope::<_, _, ServiceError>(&self.db, move |txn| {
            Box::pin(async move {
                let cart_items = load_cart_items(txn, command.shopper_id, command.cart_id).await?;
                if cart_items.is_empty() {
                    return Err(ServiceError::StaleCart(format!(
                        "cart {} was checked out concurrently",
                        command.cart_id
                    )));
                }
                let items_read = cart_items.len() as u64;

                let groups = group_by_vendor(cart_items)?;
                let priced = price_groups(groups, &fees, &policy)?;

                let now = Utc::now();
                let order = order::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    shopper_id: Set(command.shopper_id),
                    cart_id: Set(command.cart_id),
                    total_amount: Set(priced.items_total),
                    delivery_fee: Set(priced.order_delivery_fee_total),
                    delivery_address: Set(command.delivery_address.clone()),
                    contact_phone: Set(command.contact_phone.clone()),
                    notes: Set(command.notes.clone()),
                    payment_status: Set(PaymentStatus::Pending),
                    payment_reference: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(txn)
                .await?;

                let mut items = Vec::new();
                let mut vendor_breakdown = Vec::with_capacity(priced.groups.len());

                for priced_group in &priced.groups {
                    let group = &priced_group.group;
                    let mut order_item_ids = Vec::with_capacity(group.items.len());

                    for (cart_line, fee_share) in
                        group.items.iter().zip(priced_group.item_fee_shares.iter())
                    {
                        let item = order_item::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            order_id: Set(order.id),
                            vendor_id: Set(group.vendor_id),
                            vendor_name: Set(group.vendor_name.clone()),
                            product_id: Set(cart_line.product_id),
                            product_name: Set(cart_line.product_name.clone()),
                            quantity: Set(cart_line.quantity),
                            unit_price: Set(cart_line.unit_price),
                            subtotal: Set(line_subtotal(cart_line)),
                            item_fee_share: Set(*fee_share),
                            status: Set(FulfillmentStatus::Pending),
                            tracking_number: Set(None),
                            estimated_delivery_date: Set(None),
                            actual_delivery_date: Set(None),
                            created_at: Set(now),
                            updated_at: Set(now),
                        }
                        .insert(txn)
                        .await?;

                        delivery_tracking_event::ActiveModel {
                            id: Set(Uuid::new_v4()),
                            order_item_id: Set(item.id),
                            sequence: Set(1),
                            status: Set(FulfillmentStatus::Pending),
                            location: Set(None),
                            notes: Set(Some("Order placed".to_string())),
                            created_at: Set(now),
                        }
                        .insert(txn)
                        .await?;

                        order_item_ids.push(item.id);
                        items.push(item);
                    }

                    vendor_breakdown.push(VendorBreakdown {
                        vendor_id: group.vendor_id,
                        vendor_name: group.vendor_name.clone(),
                        item_count: group.items.len(),
                        subtotal: group.subtotal(),
                        delivery_fee: priced_group.delivery_fee,
                        order_item_ids,
                    });
                }

                let deleted = cart_item::Entity::delete_many()
                    .filter(cart_item::Column::CartId.eq(command.cart_id))
                    .exec(txn)
                    .await?
                    .rows_affected;
                if deleted < items_read {
                    return Err(ServiceError::StaleCart(format!(
                        "cart {} changed during checkout",
                        command.cart_id
                    )));
                }

                Ok(PersistedOrder {
                    order,
                    items,
                    vendor_breakdown,
                    waived_vendors: priced.waived_vendors,
                })
            })
        })
        .await
    }
}

/// Loads the shopper's cart items in cart order.
///
/// A cart that is missing or owned by someone else is reported as `StaleCart`; callers
/// must not learn whether another shopper's cart exists.
pub async fn load_cart_items<C>(
    conn: &C,
    shopper_id: Uuid,
    cart_id: Uuid,
) -> Result<Vec<cart_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let cart = cart::Entity::find_by_id(cart_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .filter(|c| c.shopper_id == shopper_id)
        .ok_or_else(|| ServiceError::StaleCart(format!("cart {} is not available", cart_id)))?;

    let items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .order_by_asc(cart_item::Column::Id)
        .all(conn)
        .await?;

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> CreateOrderCommand {
        CreateOrderCommand {
            shopper_id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            shopper_email: "shopper@example.com".into(),
            delivery_address: "12 Market Street, Springfield".into(),
            contact_phone: "+15550100".into(),
            notes: None,
            callback_url: "https://shop.example.com/payment/callback".into(),
        }
    }

    #[test]
    fn valid_command_passes_validation() {
        assert!(command().validate().is_ok());
    }

    #[test]
    fn invalid_fields_are_reported() {
        let mut cmd = command();
        cmd.shopper_email = "nope".into();
        cmd.delivery_address = "".into();
        cmd.contact_phone = "1".into();
        cmd.callback_url = "not a url".into();

        let errors = cmd.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("shopper_email"));
        assert!(fields.contains_key("delivery_address"));
        assert!(fields.contains_key("contact_phone"));
        assert!(fields.contains_key("callback_url"));
    }
}
