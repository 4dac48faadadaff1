// Domain enums shared by entities, services and the HTTP layer
pub mod fulfillment_status;
pub mod payment_status;

pub use fulfillment_status::FulfillmentStatus;
pub use payment_status::PaymentStatus;
