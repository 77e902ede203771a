mod common;

use axum::http::{header, Method, StatusCode};
use common::{read_json, TestApp, TEST_PASSWORD};
use serde_json::json;

#[tokio::test]
async fn register_returns_token_and_session_cookie() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/auth/register",
            Some(json!({
                "name": "Asha",
                "email": "Asha@Example.com",
                "password": TEST_PASSWORD,
            })),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("session cookie")
        .to_string();
    assert!(cookie.starts_with("token="));
    assert!(cookie.contains("HttpOnly"));

    let (_, body) = read_json(response).await;
    assert_eq!(body["data"]["user"]["email"], "asha@example.com");
    assert_eq!(body["data"]["user"]["role"], "user");
    assert!(body["data"]["token"]["access_token"].as_str().is_some());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = TestApp::new().await;
    let payload = json!({
        "name": "Ravi",
        "email": "ravi@example.com",
        "password": TEST_PASSWORD,
    });

    let (first, _) = app
        .json(Method::POST, "/api/v1/auth/register", Some(payload.clone()), None)
        .await;
    assert_eq!(first, StatusCode::CREATED);

    let (second, body) = app
        .json(Method::POST, "/api/v1/auth/register", Some(payload), None)
        .await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert!(body["message"].as_str().unwrap().contains("ravi@example.com"));
}

#[tokio::test]
async fn weak_password_is_rejected() {
    let app = TestApp::new().await;
    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/auth/register",
            Some(json!({
                "name": "Ravi",
                "email": "ravi@example.com",
                "password": "short",
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let app = TestApp::new().await;
    app.user("meera@example.com").await;

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "meera@example.com", "password": "Wr0ngPassword" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({ "email": "meera@example.com", "password": TEST_PASSWORD })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["reconciliation"].is_null());
}

#[tokio::test]
async fn me_accepts_bearer_and_cookie_tokens() {
    let app = TestApp::new().await;
    let user = app.user("kiran@example.com").await;

    let (status, body) = app
        .json(Method::GET, "/api/v1/auth/me", None, Some(&user.token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], user.id.to_string());

    let cookie = format!("token={}", user.token);
    let response = app
        .request_with_headers(
            Method::GET,
            "/api/v1/auth/me",
            None,
            None,
            &[("cookie", cookie.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = app.json(Method::GET, "/api/v1/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .json(Method::GET, "/api/v1/auth/me", None, Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_with_device_id_merges_guest_cart() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("neha@example.com").await;

    let (status, _) = app
        .json(
            Method::PUT,
            "/api/v1/guest/device-neha/cart",
            Some(json!({
                "items": [{ "product_id": dal.id, "variant_label": "500g", "quantity": 2 }]
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/auth/login",
            Some(json!({
                "email": user.email,
                "password": TEST_PASSWORD,
                "device_id": "device-neha",
            })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reconciliation"]["cart_merged"], 1);
    assert_eq!(body["data"]["reconciliation"]["guest_cleared"], true);

    let (_, cart) = app
        .json(Method::GET, "/api/v1/cart", None, Some(&user.token))
        .await;
    assert_eq!(cart["data"]["lines"][0]["quantity"], 2);

    let (_, guest) = app
        .json(Method::GET, "/api/v1/guest/device-neha/cart", None, None)
        .await;
    assert_eq!(guest["data"]["lines"].as_array().unwrap().len(), 0);
}
