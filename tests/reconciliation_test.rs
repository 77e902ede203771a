mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use assert_matches::assert_matches;
use larder_api::{
    config::CartMergePolicy,
    errors::ServiceError,
    services::commerce::{CartLine, ReconciliationReport, ReconciliationService},
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

async fn put_guest_line(app: &TestApp, device: &str, product_id: Uuid, label: &str, qty: i32) {
    let session = app.state.services.guests.session(device).unwrap();
    session
        .replace_cart(vec![CartLine {
            product_id,
            variant_label: label.to_string(),
            quantity: qty,
        }])
        .await
        .unwrap();
}

#[tokio::test]
async fn additive_policy_sums_guest_and_server_quantities() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("additive@example.com").await;

    app.state
        .services
        .cart
        .add_item(user.id, dal.id, "500g", 1)
        .await
        .unwrap();
    put_guest_line(&app, "dev-additive", dal.id, "500g", 2).await;

    let report = app
        .state
        .services
        .reconciliation
        .reconcile(user.id, "dev-additive")
        .await
        .unwrap();
    assert_eq!(report.cart_merged, 1);
    assert!(report.guest_cleared);

    let lines = app.state.services.cart.lines(user.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].quantity, 3);
}

#[tokio::test]
async fn overwrite_policy_takes_guest_quantity() {
    let app = TestApp::with_config(|cfg| cfg.cart_merge_policy = CartMergePolicy::Overwrite).await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("overwrite@example.com").await;

    app.state
        .services
        .cart
        .add_item(user.id, dal.id, "500g", 5)
        .await
        .unwrap();
    put_guest_line(&app, "dev-overwrite", dal.id, "500g", 2).await;

    app.state
        .services
        .reconciliation
        .reconcile(user.id, "dev-overwrite")
        .await
        .unwrap();

    let lines = app.state.services.cart.lines(user.id).await.unwrap();
    assert_eq!(lines[0].quantity, 2);
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("twice@example.com").await;

    put_guest_line(&app, "dev-twice", dal.id, "500g", 2).await;
    app.state
        .services
        .guests
        .session("dev-twice")
        .unwrap()
        .add_to_wishlist(dal.id)
        .await
        .unwrap();

    let reconciliation = &app.state.services.reconciliation;
    let first = reconciliation.reconcile(user.id, "dev-twice").await.unwrap();
    assert_eq!(first.cart_merged, 1);
    assert_eq!(first.wishlist_added, 1);

    let second = reconciliation.reconcile(user.id, "dev-twice").await.unwrap();
    assert_eq!(
        second,
        ReconciliationReport {
            guest_cleared: true,
            ..Default::default()
        }
    );

    let lines = app.state.services.cart.lines(user.id).await.unwrap();
    assert_eq!(lines[0].quantity, 2);
    let wishlist = app.state.services.wishlist.list(user.id).await.unwrap();
    assert_eq!(wishlist, vec![dal.id]);
}

#[tokio::test]
async fn unmergeable_lines_keep_guest_state_for_retry() {
    let app = TestApp::new().await;
    let user = app.user("stale@example.com").await;

    // Product no longer in the catalog
    put_guest_line(&app, "dev-stale", Uuid::new_v4(), "1kg", 1).await;

    let report = app
        .state
        .services
        .reconciliation
        .reconcile(user.id, "dev-stale")
        .await
        .unwrap();
    assert_eq!(report.cart_merged, 0);
    assert_eq!(report.cart_failed, 1);
    assert!(!report.guest_cleared);

    let guest = app
        .state
        .services
        .guests
        .session("dev-stale")
        .unwrap()
        .cart()
        .await
        .unwrap();
    assert_eq!(guest.len(), 1);
    assert!(app.state.services.cart.lines(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn one_bad_line_does_not_block_the_rest() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("mixed@example.com").await;

    app.state
        .services
        .guests
        .session("dev-mixed")
        .unwrap()
        .replace_cart(vec![
            CartLine {
                product_id: dal.id,
                variant_label: "500g".into(),
                quantity: 1,
            },
            CartLine {
                product_id: dal.id,
                variant_label: "25kg".into(),
                quantity: 1,
            },
        ])
        .await
        .unwrap();

    let report = app
        .state
        .services
        .reconciliation
        .reconcile(user.id, "dev-mixed")
        .await
        .unwrap();
    assert_eq!(report.cart_merged, 1);
    assert_eq!(report.cart_failed, 1);
    assert!(report.guest_cleared);
}

#[tokio::test]
async fn sync_endpoint_returns_report_and_priced_cart() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("sync@example.com").await;
    put_guest_line(&app, "dev-sync", dal.id, "500g", 2).await;

    let (status, body) = app
        .json(
            Method::POST,
            "/api/v1/cart/sync",
            Some(json!({ "device_id": "dev-sync" })),
            Some(&user.token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["report"]["cart_merged"], 1);
    assert_eq!(body["data"]["cart"]["item_count"], 2);

    let (status, _) = app
        .json(
            Method::POST,
            "/api/v1/cart/sync",
            Some(json!({ "device_id": "dev-sync" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unreachable_server_store_leaves_guest_state_intact() {
    let app = TestApp::new().await;
    let dal = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let user = app.user("offline@example.com").await;
    put_guest_line(&app, "dev-offline", dal.id, "500g", 3).await;
    let guest = app.state.services.guests.session("dev-offline").unwrap();
    guest.add_to_wishlist(dal.id).await.unwrap();

    let offline = ReconciliationService::new(
        Arc::new(DatabaseConnection::Disconnected),
        app.state.event_sender.clone(),
        app.state.services.guests.clone(),
        app.state.services.cart.clone(),
        app.state.services.wishlist.clone(),
        CartMergePolicy::Additive,
    );
    assert_matches!(
        offline.reconcile(user.id, "dev-offline").await,
        Err(ServiceError::ServiceUnavailable(_))
    );

    let cart = guest.cart().await.unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].quantity, 3);
    assert_eq!(guest.wishlist().await.unwrap(), vec![dal.id]);
    assert!(app.state.services.cart.lines(user.id).await.unwrap().is_empty());

    // The same guest state merges once the store is back
    let report = app
        .state
        .services
        .reconciliation
        .reconcile(user.id, "dev-offline")
        .await
        .unwrap();
    assert_eq!(report.cart_merged, 1);
    assert_eq!(report.wishlist_added, 1);
}

#[tokio::test]
async fn wishlists_merge_as_a_union() {
    let app = TestApp::new().await;
    let a = app.seed_product("Toor Dal", &[("500g", 120, 50)]).await;
    let b = app.seed_product("Basmati Rice", &[("1kg", 180, 50)]).await;
    let c = app.seed_product("Rock Salt", &[("1kg", 40, 50)]).await;
    let user = app.user("union@example.com").await;

    let wishlist = &app.state.services.wishlist;
    wishlist.add(user.id, a.id).await.unwrap();
    wishlist.add(user.id, b.id).await.unwrap();
    let guest = app.state.services.guests.session("dev-union").unwrap();
    guest.replace_wishlist(vec![b.id, c.id]).await.unwrap();

    let report = app
        .state
        .services
        .reconciliation
        .reconcile(user.id, "dev-union")
        .await
        .unwrap();
    assert_eq!(report.wishlist_added, 1);
    assert_eq!(report.wishlist_already_present, 1);
    assert_eq!(report.wishlist_failed, 0);
    assert!(report.guest_cleared);
    assert!(guest.wishlist().await.unwrap().is_empty());

    let mut merged = wishlist.list(user.id).await.unwrap();
    merged.sort();
    let mut expected = vec![a.id, b.id, c.id];
    expected.sort();
    assert_eq!(merged, expected);
}
