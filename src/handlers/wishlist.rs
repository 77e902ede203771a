use crate::{
    auth::AuthUser,
    errors::ApiError,
    handlers::common::{map_service_error, success_response},
    services::commerce::wishlist_service::{WishlistAdd, WishlistSyncResult},
    AppState,
};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct WishlistItemRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct WishlistSyncRequest {
    pub product_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WishlistResponse {
    pub product_ids: Vec<Uuid>,
    /// Set on add: false when the product was already listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<bool>,
}

#[utoipa::path(
    get,
    path = "/api/v1/wishlist",
    responses((status = 200, description = "Wishlisted product ids", body = WishlistResponse)),
    security(("bearer_auth" = [])),
    tag = "wishlist"
)]
pub async fn get_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let product_ids = state
        .services
        .wishlist
        .list(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(WishlistResponse {
        product_ids,
        added: None,
    }))
}

/// Idempotent add
#[utoipa::path(
    post,
    path = "/api/v1/wishlist",
    request_body = WishlistItemRequest,
    responses(
        (status = 200, description = "Wishlist after the add", body = WishlistResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "wishlist"
)]
pub async fn add_to_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<WishlistItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let wishlist = &state.services.wishlist;
    let outcome = wishlist
        .add(user.user_id, payload.product_id)
        .await
        .map_err(map_service_error)?;
    let product_ids = wishlist.list(user.user_id).await.map_err(map_service_error)?;
    Ok(success_response(WishlistResponse {
        product_ids,
        added: Some(outcome == WishlistAdd::Added),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/v1/wishlist",
    request_body = WishlistItemRequest,
    responses((status = 200, description = "Wishlist after the removal", body = WishlistResponse)),
    security(("bearer_auth" = [])),
    tag = "wishlist"
)]
pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<WishlistItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let wishlist = &state.services.wishlist;
    wishlist
        .remove(user.user_id, payload.product_id)
        .await
        .map_err(map_service_error)?;
    let product_ids = wishlist.list(user.user_id).await.map_err(map_service_error)?;
    Ok(success_response(WishlistResponse {
        product_ids,
        added: None,
    }))
}

/// Union of the stored wishlist and the submitted ids
#[utoipa::path(
    put,
    path = "/api/v1/wishlist",
    request_body = WishlistSyncRequest,
    responses((status = 200, description = "Merged wishlist", body = WishlistSyncResult)),
    security(("bearer_auth" = [])),
    tag = "wishlist"
)]
pub async fn sync_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<WishlistSyncRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .services
        .wishlist
        .sync(user.user_id, &payload.product_ids)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(result))
}
