// Order pipeline
pub mod checkout;
pub mod delivery_fees;
pub mod grouping;

// Post-commit collaborators
pub mod notifications;
pub mod payments;

// Vendor fulfillment and shopper tracking
pub mod fulfillment;

pub use checkout::{CreateOrderCommand, CreateOrderResult, OrderCheckoutService, VendorBreakdown};
pub use delivery_fees::{
    DbDeliverySettingsLookup, DeliverySettingsLookup, FeePolicy, MissingFeePolicy,
    VendorDeliveryFee,
};
pub use fulfillment::{
    FulfillmentService, OrderItemStatusUpdated, OrderTrackingView, UpdateOrderItemStatusCommand,
};
pub use notifications::{EventNotifier, OrderNotifier};
pub use payments::{HttpPaymentGateway, PaymentGateway, PaymentService};
