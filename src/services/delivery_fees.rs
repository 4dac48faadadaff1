//! Delivery fee pricing across vendor groups.
//!
//! Each vendor group pays its vendor's configured `base + additional` fee. Orders that
//! span several vendors get a consolidation discount on the aggregate:
//! `min(cap, (vendors - 1) × rate)`. The discounted aggregate is what the shopper pays;
//! the undiscounted per-group fee is what each vendor books against its items.

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::vendor_delivery_setting;
use crate::errors::ServiceError;
use crate::services::grouping::VendorFulfillmentGroup;

/// A vendor's active delivery pricing
#[derive(Debug, Clone, PartialEq)]
pub struct VendorDeliveryFee {
    pub base_fee: Decimal,
    pub additional_fee: Decimal,
    pub zone_name: String,
}

impl VendorDeliveryFee {
    pub fn total(&self) -> Decimal {
        self.base_fee + self.additional_fee
    }
}

impl From<vendor_delivery_setting::Model> for VendorDeliveryFee {
    fn from(model: vendor_delivery_setting::Model) -> Self {
        Self {
            base_fee: model.base_fee,
            additional_fee: model.additional_fee,
            zone_name: model.zone_name,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliverySettingsLookup: Send + Sync {
    /// Active delivery configuration for `vendor_id`, if the vendor has one
    async fn delivery_fee(&self, vendor_id: Uuid)
        -> Result<Option<VendorDeliveryFee>, ServiceError>;
}

/// Reads `vendor_delivery_settings`, preferring the most recently updated active row.
pub struct DbDeliverySettingsLookup {
    db: Arc<DatabaseConnection>,
}

impl DbDeliverySettingsLookup {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeliverySettingsLookup for DbDeliverySettingsLookup {
    async fn delivery_fee(
        &self,
        vendor_id: Uuid,
    ) -> Result<Option<VendorDeliveryFee>, ServiceError> {
        let setting = vendor_delivery_setting::Entity::find()
            .filter(vendor_delivery_setting::Column::VendorId.eq(vendor_id))
            .filter(vendor_delivery_setting::Column::IsActive.eq(true))
            .order_by_desc(vendor_delivery_setting::Column::UpdatedAt)
            .one(&*self.db)
            .await?;

        Ok(setting.map(VendorDeliveryFee::from))
    }
}

/// Behaviour when a vendor has no active delivery configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFeePolicy {
    /// Charge nothing for that vendor's delivery
    #[default]
    Waive,
    /// Refuse the order
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeePolicy {
    pub missing_fee_policy: MissingFeePolicy,
    pub discount_rate_per_extra_vendor: Decimal,
    pub discount_cap: Decimal,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            missing_fee_policy: MissingFeePolicy::Waive,
            discount_rate_per_extra_vendor: dec!(0.10),
            discount_cap: dec!(0.30),
        }
    }
}

impl FeePolicy {
    /// Fraction taken off the aggregate fee for an order spanning `vendor_count` vendors
    pub fn consolidation_discount(&self, vendor_count: usize) -> Decimal {
        if vendor_count <= 1 {
            return Decimal::ZERO;
        }
        let extra_vendors = Decimal::from(vendor_count as u64 - 1);
        (extra_vendors * self.discount_rate_per_extra_vendor).min(self.discount_cap)
    }

    /// Aggregate fee the shopper pays
    pub fn discounted_total(&self, group_fees: &[Decimal]) -> Decimal {
        let sum: Decimal = group_fees.iter().copied().sum();
        if group_fees.len() <= 1 {
            return sum;
        }
        let discount = self.consolidation_discount(group_fees.len());
        (sum * (Decimal::ONE - discount))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// A vendor group with its delivery charge attached
#[derive(Debug, Clone, PartialEq)]
pub struct PricedGroup {
    pub group: VendorFulfillmentGroup,
    /// Undiscounted fee for this vendor
    pub delivery_fee: Decimal,
    pub zone_name: Option<String>,
    /// One entry per item in `group.items`; sums to `delivery_fee`
    pub item_fee_shares: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricedOrder {
    pub groups: Vec<PricedGroup>,
    /// Σ item subtotals
    pub items_total: Decimal,
    /// Σ group fees before the consolidation discount
    pub fee_before_discount: Decimal,
    pub discount_rate: Decimal,
    /// What the shopper is charged for delivery
    pub order_delivery_fee_total: Decimal,
    /// Vendors priced at zero because they had no configuration
    pub waived_vendors: Vec<Uuid>,
}

impl PricedOrder {
    pub fn grand_total(&self) -> Decimal {
        self.items_total + self.order_delivery_fee_total
    }
}

/// Splits `fee` across `count` items. Each share is truncated to cents and the last
/// item absorbs the remainder, so shares are never negative and always sum to `fee`.
pub fn split_fee(fee: Decimal, count: usize) -> Vec<Decimal> {
    if count == 0 {
        return Vec::new();
    }
    let share = (fee / Decimal::from(count as u64))
        .round_dp_with_strategy(2, RoundingStrategy::ToZero);
    let mut shares = vec![share; count];
    let assigned = share * Decimal::from(count as u64 - 1);
    shares[count - 1] = fee - assigned;
    shares
}

/// Prices vendor groups against already-fetched fee configuration.
///
/// `fees` must hold an entry for every vendor in `groups`; a vendor absent from the map
/// means the cart changed after the fees were fetched and yields `StaleCart`.
pub fn price_groups(
    groups: Vec<VendorFulfillmentGroup>,
    fees: &HashMap<Uuid, Option<VendorDeliveryFee>>,
    policy: &FeePolicy,
) -> Result<PricedOrder, ServiceError> {
    let mut priced = Vec::with_capacity(groups.len());
    let mut waived_vendors = Vec::new();

    for group in groups {
        let configured = fees.get(&group.vendor_id).ok_or_else(|| {
            ServiceError::StaleCart(format!(
                "vendor {} appeared in cart after pricing",
                group.vendor_id
            ))
        })?;

        let (delivery_fee, zone_name) = match configured {
            Some(fee) => (fee.total(), Some(fee.zone_name.clone())),
            None => match policy.missing_fee_policy {
                MissingFeePolicy::Waive => {
                    waived_vendors.push(group.vendor_id);
                    (Decimal::ZERO, None)
                }
                MissingFeePolicy::Reject => {
                    return Err(ServiceError::MissingDeliveryConfig(group.vendor_id))
                }
            },
        };

        let item_fee_shares = split_fee(delivery_fee, group.items.len());
        priced.push(PricedGroup {
            group,
            delivery_fee,
            zone_name,
            item_fee_shares,
        });
    }

    let group_fees: Vec<Decimal> = priced.iter().map(|g| g.delivery_fee).collect();
    let items_total = priced.iter().map(|g| g.group.subtotal()).sum();

    Ok(PricedOrder {
        fee_before_discount: group_fees.iter().copied().sum(),
        discount_rate: policy.consolidation_discount(priced.len()),
        order_delivery_fee_total: policy.discounted_total(&group_fees),
        items_total,
        groups: priced,
        waived_vendors,
    })
}

/// Fetches the fee configuration of each vendor once.
pub async fn lookup_fees(
    lookup: &dyn DeliverySettingsLookup,
    vendor_ids: impl IntoIterator<Item = Uuid>,
) -> Result<HashMap<Uuid, Option<VendorDeliveryFee>>, ServiceError> {
    let mut fees = HashMap::new();
    for vendor_id in vendor_ids {
        if fees.contains_key(&vendor_id) {
            continue;
        }
        let fee = lookup.delivery_fee(vendor_id).await?;
        fees.insert(vendor_id, fee);
    }
    Ok(fees)
}
