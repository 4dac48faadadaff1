use sea_orm::entity::prelude::*;
use sea_orm::Iterable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Lifecycle of one vendor's portion of an order.
///
/// The main chain runs `pending → processing → confirmed → shipped → in_transit →
/// out_for_delivery → delivered`. `cancelled`, `returned` and `refunded` are side
/// branches reachable from any non-terminal state. Once terminal, an item never moves
/// again.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FulfillmentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "out_for_delivery")]
    OutForDelivery,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "returned")]
    Returned,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl FulfillmentStatus {
    /// Position on the main delivery chain; side branches have none.
    fn chain_position(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Processing => Some(1),
            Self::Confirmed => Some(2),
            Self::Shipped => Some(3),
            Self::InTransit => Some(4),
            Self::OutForDelivery => Some(5),
            Self::Delivered => Some(6),
            Self::Cancelled | Self::Returned | Self::Refunded => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::Cancelled | Self::Returned | Self::Refunded
        )
    }

    /// Whether `self -> next` is a legal move.
    ///
    /// Forward moves along the main chain may skip intermediate states; side branches
    /// are open from any non-terminal state. Staying put or moving backwards is never
    /// allowed.
    pub fn can_transition_to(self, next: FulfillmentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.chain_position(), next.chain_position()) {
            (_, None) => true,
            (Some(current), Some(target)) => target > current,
            (None, Some(_)) => false,
        }
    }

    /// Validates a transition, returning the target state on success.
    pub fn transition_to(self, next: FulfillmentStatus) -> Result<FulfillmentStatus, ServiceError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ServiceError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// States reachable in one step from `self`.
    pub fn next_states(self) -> Vec<FulfillmentStatus> {
        FulfillmentStatus::iter()
            .filter(|candidate| self.can_transition_to(*candidate))
            .collect()
    }
}
