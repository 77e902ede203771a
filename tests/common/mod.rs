#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use larder_api::{
    config::AppConfig,
    db,
    entities::user::UserRole,
    events::{self, EventSender},
    services::commerce::product_catalog_service::{CreateProductInput, ProductView, VariantInput},
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "t3st_s1gning_key_for_unit_tests_only_Zq8Wm4Xr7Ty2Uo9Ip5As1Df6Gh3Jk0Lz";
pub const TEST_PASSWORD: &str = "Sup3rSecret!";

/// Application state and router over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

/// A signed-in account and its bearer token
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Same as [`TestApp::new`] with a hook to adjust configuration first.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = TempDir::new().expect("temp dir for test database");
        let db_path = db_dir.path().join("larder_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 4;
        cfg.db_min_connections = 1;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let state = AppState::build(Arc::new(pool), cfg, Arc::new(EventSender::new(event_tx)))
            .expect("application state for tests");

        let router = larder_api::app_router(state.clone()).layer(axum::middleware::from_fn(
            larder_api::middleware_helpers::request_id::request_id_middleware,
        ));

        Self {
            router,
            state,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Send a request with an optional JSON body and bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Raw body, for signed provider callbacks.
    pub async fn post_raw(&self, uri: &str, body: &str, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Request and decode the JSON body in one go.
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        read_json(response).await
    }

    /// Creates an account directly through the service layer and issues its token.
    pub async fn user_with_role(&self, email: &str, role: UserRole) -> TestUser {
        let user = self
            .state
            .services
            .users
            .create_user("Test Shopper", email, TEST_PASSWORD, role)
            .await
            .expect("create test user");
        let token = self
            .state
            .auth
            .generate_token(&user)
            .expect("issue test token");
        TestUser {
            id: user.id,
            email: user.email,
            token: token.access_token,
        }
    }

    pub async fn user(&self, email: &str) -> TestUser {
        self.user_with_role(email, UserRole::User).await
    }

    pub async fn admin(&self) -> TestUser {
        self.user_with_role("admin@larder.test", UserRole::Admin)
            .await
    }

    /// Inserts a product with `(label, price, quantity)` variants.
    pub async fn seed_product(&self, name: &str, variants: &[(&str, i64, i32)]) -> ProductView {
        let sku = format!("SKU-{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                sku,
                slug: None,
                description: Some(format!("{} for integration tests", name)),
                category: "pulses".to_string(),
                brand: None,
                tags: vec!["test".to_string()],
                image_url: None,
                is_featured: false,
                variants: variants
                    .iter()
                    .map(|(label, price, quantity)| VariantInput {
                        label: label.to_string(),
                        price: Decimal::from(*price),
                        quantity: *quantity,
                    })
                    .collect(),
            })
            .await
            .expect("seed product for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("response body is json")
    };
    (status, value)
}

/// Decimals serialize as strings; accept numbers too.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("expected a decimal, got {}", other),
    }
}
