//! Integration tests for turning a multi-vendor cart into an order.
//!
//! Covers pricing across vendors, atomicity of the checkout transaction, concurrent
//! checkouts of one cart and the payment hand-off after commit.

mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{json_decimal, response_json, GatewayMode, TestApp};
use marketplace_orders::{
    entities::{cart_item, delivery_tracking_event, order, order_item},
    errors::ServiceError,
    events::Event,
    models::{FulfillmentStatus, PaymentStatus},
    services::{CreateOrderCommand, FeePolicy, MissingFeePolicy},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde_json::json;
use uuid::Uuid;

fn command(shopper_id: Uuid, cart_id: Uuid) -> CreateOrderCommand {
    CreateOrderCommand {
        shopper_id,
        cart_id,
        shopper_email: "ada@example.com".to_string(),
        delivery_address: "12 Market Street, Springfield".to_string(),
        contact_phone: "+15550100".to_string(),
        notes: Some("Leave at the door".to_string()),
        callback_url: "https://shop.example.com/payment/callback".to_string(),
    }
}

fn money(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Vendor A sells items at 10 and 20 with a base fee of 5, vendor B one item at 15 with
/// a base fee of 8.
async fn seed_two_vendor_cart(app: &TestApp, shopper_id: Uuid) -> (Uuid, Uuid, Uuid) {
    let vendor_a = Uuid::new_v4();
    let vendor_b = Uuid::new_v4();
    app.seed_delivery_setting(vendor_a, dec!(5), dec!(0), true).await;
    app.seed_delivery_setting(vendor_b, dec!(8), dec!(0), true).await;

    let cart_id = app.seed_cart(shopper_id).await;
    app.add_cart_item(cart_id, vendor_a, "Acme", "Mug", dec!(10), 1).await;
    app.add_cart_item(cart_id, vendor_b, "Bolt", "Cable", dec!(15), 1).await;
    app.add_cart_item(cart_id, vendor_a, "Acme", "Teapot", dec!(20), 1).await;
    (cart_id, vendor_a, vendor_b)
}

#[tokio::test]
async fn two_vendor_checkout_applies_consolidation_discount() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let (cart_id, vendor_a, vendor_b) = seed_two_vendor_cart(&app, shopper_id).await;

    let result = app
        .state
        .services
        .checkout
        .create_order(command(shopper_id, cart_id))
        .await
        .expect("checkout succeeds");

    assert_eq!(money(result.total_amount), dec!(45.00));
    assert_eq!(money(result.delivery_fee), dec!(11.70));
    assert_eq!(money(result.grand_total), dec!(56.70));
    assert!(result.payment_error.is_none());
    assert!(result.payment_authorization_url.is_some());

    assert_eq!(result.vendor_breakdown.len(), 2);
    let a = &result.vendor_breakdown[0];
    assert_eq!(a.vendor_id, vendor_a);
    assert_eq!(a.item_count, 2);
    assert_eq!(money(a.subtotal), dec!(30));
    assert_eq!(money(a.delivery_fee), dec!(5));
    let b = &result.vendor_breakdown[1];
    assert_eq!(b.vendor_id, vendor_b);
    assert_eq!(money(b.delivery_fee), dec!(8));

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(result.order_id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.status == FulfillmentStatus::Pending));
    assert!(items.iter().all(|i| i.actual_delivery_date.is_none()));

    let subtotal_sum: Decimal = items.iter().map(|i| i.subtotal).sum();
    assert_eq!(money(subtotal_sum), dec!(45));
    let vendor_a_shares: Decimal = items
        .iter()
        .filter(|i| i.vendor_id == vendor_a)
        .map(|i| i.item_fee_share)
        .sum();
    assert_eq!(money(vendor_a_shares), dec!(5));

    // Cart is consumed by the same transaction.
    let remaining = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .count(&*app.db)
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    // Every item starts its history with a pending event.
    for item in &items {
        let history = delivery_tracking_event::Entity::find()
            .filter(delivery_tracking_event::Column::OrderItemId.eq(item.id))
            .all(&*app.db)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sequence, 1);
        assert_eq!(history[0].status, FulfillmentStatus::Pending);
    }

    let stored = order::Entity::find_by_id(result.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .expect("order stored");
    assert_eq!(stored.payment_status, PaymentStatus::Initialized);
    assert_eq!(stored.payment_reference, result.payment_reference);
    assert_eq!(stored.shopper_id, shopper_id);
}

#[tokio::test]
async fn notifications_reach_shopper_and_each_vendor_once() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let (cart_id, vendor_a, vendor_b) = seed_two_vendor_cart(&app, shopper_id).await;

    let result = app
        .state
        .services
        .checkout
        .create_order(command(shopper_id, cart_id))
        .await
        .unwrap();
    app.settle_events().await;

    let events = app.recorded_events();
    let created = events
        .iter()
        .filter(|e| matches!(e, Event::OrderCreated { order_id, vendor_count: 2, .. } if *order_id == result.order_id))
        .count();
    assert_eq!(created, 1);

    let mut notified: Vec<Uuid> = events
        .iter()
        .filter_map(|e| match e {
            Event::VendorOrderReceived { vendor_id, .. } => Some(*vendor_id),
            _ => None,
        })
        .collect();
    notified.sort();
    let mut expected = vec![vendor_a, vendor_b];
    expected.sort();
    assert_eq!(notified, expected);

    assert!(events
        .iter()
        .any(|e| matches!(e, Event::PaymentInitialized { .. })));
}

#[tokio::test]
async fn empty_cart_writes_nothing() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let cart_id = app.seed_cart(shopper_id).await;

    let err = app
        .state
        .services
        .checkout
        .create_order(command(shopper_id, cart_id))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::EmptyCart);
    assert_eq!(order::Entity::find().count(&*app.db).await.unwrap(), 0);
    assert_eq!(order_item::Entity::find().count(&*app.db).await.unwrap(), 0);
    assert_eq!(app.gateway.charge_count(), 0);
}

#[tokio::test]
async fn another_shoppers_cart_is_not_available() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let (cart_id, _, _) = seed_two_vendor_cart(&app, owner).await;

    let err = app
        .state
        .services
        .checkout
        .create_order(command(Uuid::new_v4(), cart_id))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::StaleCart(_));
    let remaining = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .count(&*app.db)
        .await
        .unwrap();
    assert_eq!(remaining, 3);
}

#[tokio::test]
async fn invalid_command_is_rejected_before_any_write() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let (cart_id, _, _) = seed_two_vendor_cart(&app, shopper_id).await;

    let mut cmd = command(shopper_id, cart_id);
    cmd.shopper_email = "not-an-email".to_string();

    let err = app
        .state
        .services
        .checkout
        .create_order(cmd)
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(order::Entity::find().count(&*app.db).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_checkouts_of_one_cart_produce_one_order() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let (cart_id, _, _) = seed_two_vendor_cart(&app, shopper_id).await;

    let checkout = app.state.services.checkout.clone();
    let (first, second) = tokio::join!(
        checkout.create_order(command(shopper_id, cart_id)),
        checkout.create_order(command(shopper_id, cart_id)),
    );

    let (successes, failures): (Vec<_>, Vec<_>) =
        [first, second].into_iter().partition(|r| r.is_ok());
    assert_eq!(successes.len(), 1);
    assert_eq!(failures.len(), 1);
    for failure in failures {
        assert_matches!(
            failure,
            Err(ServiceError::StaleCart(_)) | Err(ServiceError::EmptyCart)
        );
    }

    assert_eq!(order::Entity::find().count(&*app.db).await.unwrap(), 1);
    assert_eq!(order_item::Entity::find().count(&*app.db).await.unwrap(), 3);
}

#[tokio::test]
async fn gateway_outage_leaves_a_pending_order() {
    let app = TestApp::new().await;
    app.gateway.set_mode(GatewayMode::Down);
    let shopper_id = Uuid::new_v4();
    let (cart_id, _, _) = seed_two_vendor_cart(&app, shopper_id).await;

    let result = app
        .state
        .services
        .checkout
        .create_order(command(shopper_id, cart_id))
        .await
        .expect("order is saved even when payment cannot be opened");

    assert!(result.payment_authorization_url.is_none());
    assert!(result.payment_reference.is_none());
    assert!(result.payment_error.is_some());

    let stored = order::Entity::find_by_id(result.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .expect("order persisted");
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert!(stored.payment_reference.is_none());

    app.settle_events().await;
    assert!(app.recorded_events().iter().any(|e| matches!(
        e,
        Event::PaymentInitializationFailed { order_id, .. } if *order_id == result.order_id
    )));
}

#[tokio::test]
async fn payment_is_opened_only_after_commit() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let (cart_id, _, _) = seed_two_vendor_cart(&app, shopper_id).await;

    app.state
        .services
        .checkout
        .create_order(command(shopper_id, cart_id))
        .await
        .unwrap();

    assert_eq!(
        *app.gateway.order_committed_at_charge.lock().unwrap(),
        vec![true]
    );
    let charges = app.gateway.charges.lock().unwrap();
    assert_eq!(money(charges[0].amount), dec!(56.70));
    assert_eq!(charges[0].payer_email, "ada@example.com");
    assert_eq!(charges[0].metadata.shopper_id, shopper_id);
}

#[tokio::test]
async fn unconfigured_vendor_is_waived_by_default() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let vendor = Uuid::new_v4();
    let cart_id = app.seed_cart(shopper_id).await;
    app.add_cart_item(cart_id, vendor, "Solo", "Lamp", dec!(12.50), 2).await;

    let result = app
        .state
        .services
        .checkout
        .create_order(command(shopper_id, cart_id))
        .await
        .unwrap();

    assert_eq!(money(result.delivery_fee), dec!(0));
    assert_eq!(money(result.total_amount), dec!(25));
    assert_eq!(money(result.grand_total), dec!(25));
}

#[tokio::test]
async fn reject_policy_refuses_unconfigured_vendor() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let vendor = Uuid::new_v4();
    let cart_id = app.seed_cart(shopper_id).await;
    app.add_cart_item(cart_id, vendor, "Solo", "Lamp", dec!(12.50), 2).await;

    let checkout = app.checkout_with_policy(FeePolicy {
        missing_fee_policy: MissingFeePolicy::Reject,
        ..FeePolicy::default()
    });
    let err = checkout
        .create_order(command(shopper_id, cart_id))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::MissingDeliveryConfig(id) if id == vendor);
    assert_eq!(order::Entity::find().count(&*app.db).await.unwrap(), 0);
    let remaining = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .count(&*app.db)
        .await
        .unwrap();
    assert_eq!(remaining, 1);
}

#[tokio::test]
async fn inactive_delivery_setting_counts_as_missing() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let vendor = Uuid::new_v4();
    app.seed_delivery_setting(vendor, dec!(9), dec!(1), false).await;
    let cart_id = app.seed_cart(shopper_id).await;
    app.add_cart_item(cart_id, vendor, "Solo", "Lamp", dec!(10), 1).await;

    let result = app
        .state
        .services
        .checkout
        .create_order(command(shopper_id, cart_id))
        .await
        .unwrap();

    assert_eq!(money(result.delivery_fee), dec!(0));
}

#[tokio::test]
async fn http_checkout_requires_shopper_identity() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let (cart_id, _, _) = seed_two_vendor_cart(&app, shopper_id).await;
    let body = json!({
        "cart_id": cart_id,
        "shopper_email": "ada@example.com",
        "delivery_address": "12 Market Street, Springfield",
        "contact_phone": "+15550100",
        "callback_url": "https://shop.example.com/payment/callback"
    });

    let anonymous = app
        .request(Method::POST, "/api/v1/orders", &[], Some(body.clone()))
        .await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            &[("X-Shopper-Id", shopper_id.to_string())],
            Some(body),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = response_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(money(json_decimal(&json["data"]["grand_total"])), dec!(56.70));
    assert_eq!(json["data"]["vendor_breakdown"].as_array().unwrap().len(), 2);

    let orders = order::Entity::find()
        .order_by_asc(order::Column::CreatedAt)
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn http_checkout_of_empty_cart_is_a_bad_request() {
    let app = TestApp::new().await;
    let shopper_id = Uuid::new_v4();
    let cart_id = app.seed_cart(shopper_id).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            &[("X-Shopper-Id", shopper_id.to_string())],
            Some(json!({
                "cart_id": cart_id,
                "shopper_email": "ada@example.com",
                "delivery_address": "12 Market Street, Springfield",
                "contact_phone": "+15550100",
                "callback_url": "https://shop.example.com/payment/callback"
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = response_json(response).await;
    assert!(json["message"].as_str().unwrap().to_lowercase().contains("empty"));
}
