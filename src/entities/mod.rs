pub mod cart;
pub mod cart_item;
pub mod delivery_tracking_event;
pub mod order;
pub mod order_item;
pub mod vendor_delivery_setting;
