use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::entities::cart_item;
use crate::errors::ServiceError;

/// The slice of a cart that one vendor fulfills.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorFulfillmentGroup {
    pub vendor_id: Uuid,
    pub vendor_name: String,
    pub items: Vec<cart_item::Model>,
}

impl VendorFulfillmentGroup {
    /// Sum of `quantity × unit_price` over the group's items
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(line_subtotal).sum()
    }
}

pub fn line_subtotal(item: &cart_item::Model) -> Decimal {
    item.unit_price * Decimal::from(item.quantity)
}

/// Partitions cart items by owning vendor.
///
/// Groups come out in order of each vendor's first appearance and keep their items in
/// cart order. Every item lands in exactly one group.
pub fn group_by_vendor(
    items: Vec<cart_item::Model>,
) -> Result<Vec<VendorFulfillmentGroup>, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::EmptyCart);
    }

    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut groups: Vec<VendorFulfillmentGroup> = Vec::new();

    for item in items {
        match index.get(&item.vendor_id) {
            Some(&position) => groups[position].items.push(item),
            None => {
                index.insert(item.vendor_id, groups.len());
                groups.push(VendorFulfillmentGroup {
                    vendor_id: item.vendor_id,
                    vendor_name: item.vendor_name.clone(),
                    items: vec![item],
                });
            }
        }
    }

    Ok(groups)
}
