#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    response::{Html, Json},
    routing::{delete, get, post, put},
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{AuthConfig, AuthRouterExt, AuthService};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Builds the auth service and every domain service from configuration.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<events::EventSender>,
    ) -> Result<Self, errors::ServiceError> {
        let auth = Arc::new(AuthService::new(AuthConfig::from_app_config(&config)));
        let services =
            handlers::AppServices::new(db.clone(), event_sender.clone(), auth.clone(), &config)?;
        Ok(Self {
            db,
            config,
            event_sender,
            services,
            auth,
        })
    }
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(!response.success);
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Everything under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    use handlers::{account, admin, cart, guest, orders, payments, products, wishlist};

    let auth = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/me", get(handlers::auth::me));

    // One parameter name per segment; the reviews handlers parse it as a product id
    let catalog = Router::new()
        .route("/products", get(products::list_products))
        .route("/products/:slug", get(products::get_product))
        .route(
            "/products/:slug/reviews",
            get(products::list_reviews).post(products::post_review),
        );

    let cart = Router::new()
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route(
            "/cart/items",
            post(cart::add_item)
                .put(cart::set_item)
                .delete(cart::remove_item),
        )
        .route("/cart/sync", post(cart::sync_cart))
        .with_auth();

    let wishlist = Router::new()
        .route(
            "/wishlist",
            get(wishlist::get_wishlist)
                .post(wishlist::add_to_wishlist)
                .put(wishlist::sync_wishlist)
                .delete(wishlist::remove_from_wishlist),
        )
        .with_auth();

    let guest = Router::new()
        .route(
            "/guest/:device_id/cart",
            get(guest::get_cart)
                .put(guest::put_cart)
                .delete(guest::delete_cart),
        )
        .route(
            "/guest/:device_id/wishlist",
            get(guest::get_wishlist)
                .put(guest::put_wishlist)
                .delete(guest::delete_wishlist),
        );

    // Checkout and lookup accept guests; the listing requires a user
    let orders = Router::new()
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/:order_number", get(orders::get_order));

    let payments = Router::new()
        .route("/payments/:provider/session", post(payments::create_session))
        .route("/payments/:provider/verify", post(payments::verify))
        .route("/payments/:provider/webhook", post(payments::webhook));

    let account = Router::new()
        .route(
            "/account/addresses",
            get(account::list_addresses).post(account::add_address),
        )
        .route("/account/addresses/:id", delete(account::delete_address))
        .route(
            "/account/addresses/:id/default",
            put(account::set_default_address),
        )
        .with_auth();

    let admin = Router::new()
        .route("/admin/products", post(admin::create_product))
        .route(
            "/admin/products/:id",
            put(admin::update_product).delete(admin::delete_product),
        )
        .route("/admin/products/:id/variants", put(admin::upsert_variant))
        .route(
            "/admin/products/:id/variants/:label",
            delete(admin::delete_variant),
        )
        .route("/admin/orders", get(admin::list_orders))
        .route("/admin/orders/:id/status", put(admin::update_order_status))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:id/role", put(admin::set_user_role))
        .route("/admin/guest-sessions", delete(admin::clear_guest_sessions))
        .with_admin();

    Router::new()
        .merge(auth)
        .merge(catalog)
        .merge(cart)
        .merge(wishlist)
        .merge(guest)
        .merge(orders)
        .merge(payments)
        .merge(account)
        .merge(admin)
}

/// Full application router. Request-id, tracing, CORS and compression layers are
/// added by the binary.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health_check))
        .route(auth::ADMIN_LOGIN_PATH, get(admin_login_page))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(Extension(state.auth.clone()))
        .with_state(state)
}

async fn banner() -> Json<Value> {
    Json(json!({
        "name": "larder-api",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/swagger-ui",
    }))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "database ping failed");
            "unhealthy"
        }
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
            "payment_providers": state.services.payments.configured_providers(),
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

async fn admin_login_page() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>Larder back office</title></head>
  <body>
    <h1>Back office sign-in</h1>
    <p>Sign in with an admin account through <code>POST /api/v1/auth/login</code>;
    the session cookie it sets unlocks <code>/api/v1/admin</code>.</p>
  </body>
</html>"#,
    )
}
