use crate::{
    auth::AuthUser,
    errors::ApiError,
    handlers::common::{map_service_error, success_response, validate_input},
    services::commerce::{PricedCart, ReconciliationReport},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CartItemRequest {
    pub product_id: Uuid,
    /// Variant label, e.g. "500g"
    #[validate(length(min = 1, max = 50))]
    pub variant_label: String,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CartItemKey {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub variant_label: String,
}

#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct CartSyncRequest {
    #[validate(length(min = 1, max = 128))]
    pub device_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartSyncResponse {
    pub report: ReconciliationReport,
    pub cart: PricedCart,
}

/// Server cart priced against the live catalog
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Priced cart", body = PricedCart),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .priced_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// Adds to whatever quantity is already in the cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = CartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = PricedCart),
        (status = 404, description = "Unknown product or variant", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CartItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let cart = &state.services.cart;
    cart.add_item(
        user.user_id,
        payload.product_id,
        payload.variant_label.trim(),
        payload.quantity,
    )
    .await
    .map_err(map_service_error)?;
    let priced = cart
        .priced_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(priced))
}

/// Sets a line's quantity; below 1 removes the line
#[utoipa::path(
    put,
    path = "/api/v1/cart/items",
    request_body = CartItemRequest,
    responses((status = 200, description = "Updated cart", body = PricedCart)),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn set_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CartItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let cart = &state.services.cart;
    cart.set_quantity(
        user.user_id,
        payload.product_id,
        payload.variant_label.trim(),
        payload.quantity,
    )
    .await
    .map_err(map_service_error)?;
    let priced = cart
        .priced_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(priced))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items",
    request_body = CartItemKey,
    responses((status = 200, description = "Updated cart", body = PricedCart)),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CartItemKey>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let cart = &state.services.cart;
    cart.remove_item(user.user_id, payload.product_id, payload.variant_label.trim())
        .await
        .map_err(map_service_error)?;
    let priced = cart
        .priced_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(priced))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses((status = 200, description = "Cart emptied", body = PricedCart)),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = &state.services.cart;
    cart.clear(user.user_id).await.map_err(map_service_error)?;
    let priced = cart
        .priced_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(priced))
}

/// Folds a guest device's cart and wishlist into the signed-in account
#[utoipa::path(
    post,
    path = "/api/v1/cart/sync",
    request_body = CartSyncRequest,
    responses(
        (status = 200, description = "Merge report and resulting cart", body = CartSyncResponse),
        (status = 503, description = "Cart storage unavailable; guest state kept", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "cart"
)]
pub async fn sync_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CartSyncRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let report = state
        .services
        .reconciliation
        .reconcile(user.user_id, &payload.device_id)
        .await
        .map_err(map_service_error)?;
    let cart = state
        .services
        .cart
        .priced_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(CartSyncResponse { report, cart }))
}
