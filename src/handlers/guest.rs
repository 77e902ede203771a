//! Cart and wishlist for shoppers who have not signed in, keyed by a client-chosen device id.

use crate::{
    errors::ApiError,
    handlers::common::{map_service_error, no_content_response, success_response},
    services::commerce::{CartLine, PricedCart},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct GuestCartRequest {
    pub items: Vec<CartLine>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct GuestWishlist {
    pub product_ids: Vec<Uuid>,
}

#[utoipa::path(
    get,
    path = "/api/v1/guest/{device_id}/cart",
    params(("device_id" = String, Path, description = "Client device id")),
    responses(
        (status = 200, description = "Guest cart priced against the catalog", body = PricedCart),
        (status = 400, description = "Malformed device id", body = crate::errors::ErrorResponse)
    ),
    tag = "guest"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .guests
        .session(&device_id)
        .map_err(map_service_error)?;
    let lines = session.cart().await.map_err(map_service_error)?;
    let priced = state
        .services
        .cart
        .price_lines(&lines)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(priced))
}

/// Replaces the whole guest cart
#[utoipa::path(
    put,
    path = "/api/v1/guest/{device_id}/cart",
    params(("device_id" = String, Path, description = "Client device id")),
    request_body = GuestCartRequest,
    responses((status = 200, description = "Stored cart", body = PricedCart)),
    tag = "guest"
)]
pub async fn put_cart(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(payload): Json<GuestCartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .guests
        .session(&device_id)
        .map_err(map_service_error)?;
    session
        .replace_cart(payload.items)
        .await
        .map_err(map_service_error)?;
    let lines = session.cart().await.map_err(map_service_error)?;
    let priced = state
        .services
        .cart
        .price_lines(&lines)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(priced))
}

#[utoipa::path(
    delete,
    path = "/api/v1/guest/{device_id}/cart",
    params(("device_id" = String, Path, description = "Client device id")),
    responses((status = 204, description = "Guest cart cleared")),
    tag = "guest"
)]
pub async fn delete_cart(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .guests
        .session(&device_id)
        .map_err(map_service_error)?;
    session.clear_cart().await.map_err(map_service_error)?;
    Ok(no_content_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/guest/{device_id}/wishlist",
    params(("device_id" = String, Path, description = "Client device id")),
    responses((status = 200, description = "Guest wishlist", body = GuestWishlist)),
    tag = "guest"
)]
pub async fn get_wishlist(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .guests
        .session(&device_id)
        .map_err(map_service_error)?;
    let product_ids = session.wishlist().await.map_err(map_service_error)?;
    Ok(success_response(GuestWishlist { product_ids }))
}

/// Replaces the whole guest wishlist; duplicates collapse
#[utoipa::path(
    put,
    path = "/api/v1/guest/{device_id}/wishlist",
    params(("device_id" = String, Path, description = "Client device id")),
    request_body = GuestWishlist,
    responses((status = 200, description = "Stored wishlist", body = GuestWishlist)),
    tag = "guest"
)]
pub async fn put_wishlist(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(payload): Json<GuestWishlist>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .guests
        .session(&device_id)
        .map_err(map_service_error)?;
    session
        .replace_wishlist(payload.product_ids)
        .await
        .map_err(map_service_error)?;
    let product_ids = session.wishlist().await.map_err(map_service_error)?;
    Ok(success_response(GuestWishlist { product_ids }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/guest/{device_id}/wishlist",
    params(("device_id" = String, Path, description = "Client device id")),
    responses((status = 204, description = "Guest wishlist cleared")),
    tag = "guest"
)]
pub async fn delete_wishlist(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .guests
        .session(&device_id)
        .map_err(map_service_error)?;
    session.clear_wishlist().await.map_err(map_service_error)?;
    Ok(no_content_response())
}
