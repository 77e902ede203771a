mod common;

use axum::http::{header, Method, StatusCode};
use common::{decimal, TestApp};
use larder_api::auth::ADMIN_LOGIN_PATH;
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn browsers_without_a_session_are_redirected_to_login() {
    let app = TestApp::new().await;

    let response = app
        .request_with_headers(
            Method::GET,
            "/api/v1/admin/orders",
            None,
            None,
            &[("accept", "text/html,application/xhtml+xml")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        ADMIN_LOGIN_PATH
    );

    let login_page = app.request(Method::GET, ADMIN_LOGIN_PATH, None, None).await;
    assert_eq!(login_page.status(), StatusCode::OK);
}

#[tokio::test]
async fn api_clients_get_401_and_shoppers_get_403() {
    let app = TestApp::new().await;
    let shopper = app.user("shopper@example.com").await;

    let (status, _) = app
        .json(Method::GET, "/api/v1/admin/orders", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .json(Method::GET, "/api/v1/admin/orders", None, Some(&shopper.token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.admin().await;
    let (status, body) = app
        .json(Method::GET, "/api/v1/admin/orders", None, Some(&admin.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn admin_manages_catalog() {
    let app = TestApp::new().await;
    let admin = app.admin().await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/admin/products",
            Some(json!({
                "name": "Moong Dal",
                "sku": "DAL-MOONG",
                "category": "pulses",
                "variants": [{ "label": "500g", "price": 110, "quantity": 30 }]
            })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["slug"], "moong-dal");

    let (status, _) = app
        .json(
            Method::PUT,
            &format!("/api/v1/admin/products/{}/variants", id),
            Some(json!({ "label": "1kg", "price": 210, "quantity": 5 })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, product) = app
        .json(Method::GET, "/api/v1/products/moong-dal", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(product["data"]["variants"].as_array().unwrap().len(), 2);
    assert_eq!(product["data"]["total_stock"], 35);

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/admin/products/{}/variants/1kg", id),
            None,
            Some(&admin.token),
        )
        .await;
    assert!(response.status().is_success());

    let (_, product) = app
        .json(Method::GET, "/api/v1/products/moong-dal", None, None)
        .await;
    assert_eq!(product["data"]["variants"].as_array().unwrap().len(), 1);
    assert_eq!(decimal(&product["data"]["variants"][0]["price"]), dec!(110));
}

#[tokio::test]
async fn order_status_changes_are_guarded() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;

    let (_, created) = app
        .json(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{ "product_id": dal.id, "weight": "500g", "price": 120, "quantity": 1 }],
                "total_amount": 170,
                "payment_method": "cod",
                "shipping_address": "1 Residency Road",
            })),
            None,
        )
        .await;
    let order_id = created["data"]["order_id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/admin/orders/{}/status", order_id);

    // Unpaid orders cannot be confirmed
    let (status, _) = app
        .json(Method::PUT, &uri, Some(json!({ "status": "confirmed" })), Some(&admin.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .json(Method::PUT, &uri, Some(json!({ "status": "cancelled" })), Some(&admin.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["order_status"], "cancelled");

    // Cancelled is final
    let (status, _) = app
        .json(Method::PUT, &uri, Some(json!({ "status": "processing" })), Some(&admin.token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn promoted_user_gains_access_with_a_fresh_token() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let staff = app.user("staff@example.com").await;

    let (status, body) = app
        .json(
            Method::PUT,
            &format!("/api/v1/admin/users/{}/role", staff.id),
            Some(json!({ "role": "admin" })),
            Some(&admin.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["role"], "admin");

    // The old token still carries the old role
    let (status, _) = app
        .json(Method::GET, "/api/v1/admin/users", None, Some(&staff.token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let refreshed = app
        .state
        .services
        .users
        .get(staff.id)
        .await
        .unwrap();
    let token = app.state.auth.generate_token(&refreshed).unwrap();
    let (status, users) = app
        .json(
            Method::GET,
            "/api/v1/admin/users",
            None,
            Some(&token.access_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users["data"]["total"], 2);
}

#[tokio::test]
async fn admin_clears_guest_sessions() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let shopper = app.user("guest-owner@example.com").await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;

    let guest = app.state.services.guests.session("kiosk-1").unwrap();
    guest.add_to_cart(dal.id, "500g", 2).await.unwrap();
    guest.add_to_wishlist(dal.id).await.unwrap();

    let response = app
        .request(
            Method::DELETE,
            "/api/v1/admin/guest-sessions",
            None,
            Some(&shopper.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(guest.cart().await.unwrap().len(), 1);

    let response = app
        .request(
            Method::DELETE,
            "/api/v1/admin/guest-sessions",
            None,
            Some(&admin.token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(guest.cart().await.unwrap().is_empty());
    assert!(guest.wishlist().await.unwrap().is_empty());
}
