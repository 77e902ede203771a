mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn cart_requires_a_session() {
    let app = TestApp::new().await;
    let (status, _) = app.json(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn adding_twice_accumulates_and_prices_the_cart() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("cart@example.com").await;
    let item = json!({ "product_id": dal.id, "variant_label": "500g", "quantity": 1 });

    let (status, _) = app
        .json(Method::POST, "/api/v1/cart/items", Some(item.clone()), Some(&user.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = app
        .json(Method::POST, "/api/v1/cart/items", Some(item), Some(&user.token))
        .await;
    assert_eq!(status, StatusCode::OK);

    let cart = &body["data"];
    assert_eq!(cart["lines"].as_array().unwrap().len(), 1);
    assert_eq!(cart["lines"][0]["quantity"], 2);
    assert_eq!(cart["lines"][0]["name"], "Toor Dal");
    assert_eq!(decimal(&cart["subtotal"]), dec!(240));
    assert_eq!(decimal(&cart["shipping_fee"]), dec!(50));
    assert_eq!(decimal(&cart["total"]), dec!(290));
}

#[tokio::test]
async fn set_quantity_overwrites_and_zero_removes() {
    let app = TestApp::new().await;
    let rice = app.seed_product("Basmati Rice", &[("5kg", 850, 12)]).await;
    let user = app.user("set@example.com").await;

    let (_, body) = app
        .json(
            Method::PUT,
            "/api/v1/cart/items",
            Some(json!({ "product_id": rice.id, "variant_label": "5kg", "quantity": 3 })),
            Some(&user.token),
        )
        .await;
    assert_eq!(body["data"]["lines"][0]["quantity"], 3);
    // 2550 is past the free shipping threshold
    assert_eq!(decimal(&body["data"]["shipping_fee"]), dec!(0));

    let (_, body) = app
        .json(
            Method::PUT,
            "/api/v1/cart/items",
            Some(json!({ "product_id": rice.id, "variant_label": "5kg", "quantity": 0 })),
            Some(&user.token),
        )
        .await;
    assert!(body["data"]["lines"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn remove_and_clear() {
    let app = TestApp::new().await;
    let dal = app
        .seed_product("Toor Dal", &[("500g", 120, 50), ("1kg", 230, 20)])
        .await;
    let user = app.user("remove@example.com").await;

    for label in ["500g", "1kg"] {
        app.state
            .services
            .cart
            .add_item(user.id, dal.id, label, 1)
            .await
            .unwrap();
    }

    let (status, body) = app
        .json(
            Method::DELETE,
            "/api/v1/cart/items",
            Some(json!({ "product_id": dal.id, "variant_label": "500g" })),
            Some(&user.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["lines"][0]["variant_label"], "1kg");

    let (status, body) = app
        .json(Method::DELETE, "/api/v1/cart", None, Some(&user.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["item_count"], 0);
}

#[tokio::test]
async fn unknown_variant_is_not_found_and_bad_quantity_is_rejected() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("bad@example.com").await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": dal.id, "variant_label": "2kg", "quantity": 1 })),
            Some(&user.token),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": dal.id, "variant_label": "500g", "quantity": 0 })),
            Some(&user.token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn guest_cart_is_priced_without_a_session() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;

    let (status, body) = app
        .json(
            Method::PUT,
            "/api/v1/guest/browser-1/cart",
            Some(json!({
                "items": [{ "product_id": dal.id, "variant_label": "500g", "quantity": 5 }]
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["data"]["subtotal"]), dec!(600));
    assert_eq!(decimal(&body["data"]["shipping_fee"]), dec!(0));

    let response = app
        .request(Method::DELETE, "/api/v1/guest/browser-1/cart", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let (status, _) = app
        .json(Method::GET, "/api/v1/guest/bad%20device/cart", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wishlist_add_is_idempotent_and_sync_unions() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let rice = app.seed_product("Basmati Rice", &[("1kg", 180, 50)]).await;
    let user = app.user("wish@example.com").await;

    let (_, first) = app
        .json(
            Method::POST,
            "/api/v1/wishlist",
            Some(json!({ "product_id": dal.id })),
            Some(&user.token),
        )
        .await;
    assert_eq!(first["data"]["added"], true);

    let (_, again) = app
        .json(
            Method::POST,
            "/api/v1/wishlist",
            Some(json!({ "product_id": dal.id })),
            Some(&user.token),
        )
        .await;
    assert_eq!(again["data"]["added"], false);
    assert_eq!(again["data"]["product_ids"].as_array().unwrap().len(), 1);

    let (status, _) = app
        .json(
            Method::PUT,
            "/api/v1/wishlist",
            Some(json!({ "product_ids": [dal.id, rice.id] })),
            Some(&user.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let ids = app.state.services.wishlist.list(user.id).await.unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&rice.id));
}

#[tokio::test]
async fn accumulated_quantity_stops_at_the_line_limit() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("bulk@example.com").await;
    let cart = &app.state.services.cart;

    assert_eq!(cart.add_item(user.id, dal.id, "500g", 900).await.unwrap(), 900);
    assert_eq!(cart.add_item(user.id, dal.id, "500g", 200).await.unwrap(), 999);
    assert_eq!(cart.add_item(user.id, dal.id, "500g", 1).await.unwrap(), 999);

    let lines = cart.lines(user.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 999);
}
