mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, TestApp};
use larder_api::entities::{Order, OrderItem};
use rstest::rstest;
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::{json, Value};
use uuid::Uuid;

fn checkout_body(product_id: Uuid, price: i64, quantity: i32, total: i64) -> Value {
    json!({
        "items": [{
            "product_id": product_id,
            "name": "Toor Dal",
            "weight": "500g",
            "price": price,
            "quantity": quantity,
        }],
        "total_amount": total,
        "payment_method": "razorpay",
        "shipping_address": "12 MG Road, Bengaluru 560001",
    })
}

async fn order_count(app: &TestApp) -> u64 {
    Order::find().count(&*app.state.db).await.unwrap()
}

#[tokio::test]
async fn guest_checkout_creates_pending_order_with_shipping() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body(dal.id, 120, 2, 290)),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let data = &body["data"];
    assert_eq!(decimal(&data["subtotal"]), dec!(240));
    assert_eq!(decimal(&data["shipping_fee"]), dec!(50));
    assert_eq!(decimal(&data["total_amount"]), dec!(290));
    assert_eq!(data["order_status"], "pending");
    assert_eq!(data["payment_status"], "pending");

    let number = data["order_number"].as_str().unwrap();
    assert!(number.starts_with("ORD-"));

    // Guest orders are readable by number without a session
    let (status, order) = app
        .json(Method::GET, &format!("/api/v1/orders/{}", number), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(order["data"]["user_id"].is_null());
    assert_eq!(order["data"]["items"][0]["weight"], "500g");
    assert_eq!(order["data"]["items"][0]["quantity"], 2);
    assert_eq!(OrderItem::find().count(&*app.state.db).await.unwrap(), 1);
}

#[tokio::test]
async fn free_shipping_applies_at_threshold() {
    let app = TestApp::new().await;
    let ghee = app.seed_product("Desi Ghee", &[("1L", 250, 10)]).await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{ "product_id": ghee.id, "weight": "1L", "price": 250, "quantity": 2 }],
                "total_amount": 500,
                "payment_method": "stripe",
                "shipping_address": "4 Park Street, Kolkata",
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(decimal(&body["data"]["shipping_fee"]), dec!(0));
}

#[rstest]
#[case::empty_items(json!({
    "items": [],
    "total_amount": 100,
    "payment_method": "razorpay",
    "shipping_address": "somewhere",
}))]
#[case::missing_total(json!({
    "items": [{ "product_id": Uuid::nil(), "weight": "500g", "price": 120, "quantity": 1 }],
    "payment_method": "razorpay",
    "shipping_address": "somewhere",
}))]
#[case::negative_total(json!({
    "items": [{ "product_id": Uuid::nil(), "weight": "500g", "price": 120, "quantity": 1 }],
    "total_amount": -1,
    "payment_method": "razorpay",
    "shipping_address": "somewhere",
}))]
#[case::missing_payment_method(json!({
    "items": [{ "product_id": Uuid::nil(), "weight": "500g", "price": 120, "quantity": 1 }],
    "total_amount": 170,
    "shipping_address": "somewhere",
}))]
#[case::blank_shipping_address(json!({
    "items": [{ "product_id": Uuid::nil(), "weight": "500g", "price": 120, "quantity": 1 }],
    "total_amount": 170,
    "payment_method": "razorpay",
    "shipping_address": "   ",
}))]
#[case::zero_quantity(json!({
    "items": [{ "product_id": Uuid::nil(), "weight": "500g", "price": 120, "quantity": 0 }],
    "total_amount": 50,
    "payment_method": "razorpay",
    "shipping_address": "somewhere",
}))]
#[tokio::test]
async fn invalid_checkout_is_rejected_without_writing(#[case] body: Value) {
    let app = TestApp::new().await;

    let (status, response) = app
        .json(Method::POST, "/api/v1/orders", Some(body), None)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["message"].as_str().is_some());
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn empty_cart_message_is_stable() {
    let app = TestApp::new().await;
    let (_, body) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [],
                "total_amount": 0,
                "payment_method": "cod",
                "shipping_address": "x",
            })),
            None,
        )
        .await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("cart must have at least one item"));
}

#[tokio::test]
async fn stale_price_conflicts() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 125, 50)]).await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body(dal.id, 120, 2, 290)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("500g"));
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn mismatched_total_conflicts() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body(dal.id, 120, 2, 240)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn vanished_variant_is_not_found() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("1kg", 230, 50)]).await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body(dal.id, 120, 1, 170)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn client_snapshot_is_trusted_when_repricing_is_off() {
    let app = TestApp::with_config(|cfg| cfg.checkout_reprice = false).await;
    let dal = app.seed_product("Toor Dal", &[("500g", 125, 50)]).await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body(dal.id, 120, 2, 290)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(decimal(&body["data"]["total_amount"]), dec!(290));
}

#[tokio::test]
async fn signed_in_checkout_clears_cart_and_lists_order() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("buyer@example.com").await;
    let other = app.user("other@example.com").await;

    app.state
        .services
        .cart
        .add_item(user.id, dal.id, "500g", 2)
        .await
        .unwrap();

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body(dal.id, 120, 2, 290)),
            Some(&user.token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let number = body["data"]["order_number"].as_str().unwrap().to_string();

    assert!(app.state.services.cart.lines(user.id).await.unwrap().is_empty());

    let (status, list) = app
        .json(Method::GET, "/api/v1/orders", None, Some(&user.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"]["total"], 1);
    assert_eq!(list["data"]["items"][0]["order_number"], number.as_str());

    // Someone else's order looks missing
    let (status, _) = app
        .json(
            Method::GET,
            &format!("/api/v1/orders/{}", number),
            None,
            Some(&other.token),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.json(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn overflowing_client_price_is_rejected() {
    let app = TestApp::with_config(|cfg| cfg.checkout_reprice = false).await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{
                    "product_id": dal.id,
                    "weight": "500g",
                    "price": "79228162514264337593543950335",
                    "quantity": 2,
                }],
                "total_amount": 290,
                "payment_method": "razorpay",
                "shipping_address": "12 MG Road, Bengaluru 560001",
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(checkout_body(dal.id, 120, 1000, 120_000)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(order_count(&app).await, 0);
}
