//! Back office. Every route here sits behind the admin guard.

use crate::{
    auth::AuthUser,
    entities::{order::OrderStatus, user::UserRole},
    errors::ApiError,
    handlers::common::{
        created_response, map_service_error, no_content_response, success_response,
    },
    services::{
        commerce::{
            product_catalog_service::{
                CreateProductInput, ProductView, UpdateProductInput, VariantInput,
            },
            GuestStore,
        },
        orders::{OrderListQuery, OrderPage, OrderView},
        users::{UserListQuery, UserPage, UserView},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct OrderStatusUpdate {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct RoleUpdate {
    pub role: UserRole,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/products",
    request_body = CreateProductInput,
    responses(
        (status = 201, description = "Product created", body = ProductView),
        (status = 409, description = "Slug or SKU taken", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_product(
    State(state): State<AppState>,
    admin: AuthUser,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .create_product(payload)
        .await
        .map_err(map_service_error)?;
    info!(admin = %admin.user_id, product_id = %product.id, "product created");
    Ok(created_response(product))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProductInput,
    responses((status = 200, description = "Product updated", body = ProductView)),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .update_product(product_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(product))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses((status = 204, description = "Product deleted")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .catalog
        .delete_product(product_id)
        .await
        .map_err(map_service_error)?;
    info!(admin = %admin.user_id, %product_id, "product deleted");
    Ok(no_content_response())
}

/// Creates the variant or replaces its price and stock
#[utoipa::path(
    put,
    path = "/api/v1/admin/products/{id}/variants",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = VariantInput,
    responses((status = 200, description = "Product with updated variants", body = ProductView)),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn upsert_variant(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<VariantInput>,
) -> Result<impl IntoResponse, ApiError> {
    let catalog = &state.services.catalog;
    catalog
        .upsert_variant(product_id, payload)
        .await
        .map_err(map_service_error)?;
    let product = catalog
        .get_product_view(product_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(product))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/products/{id}/variants/{label}",
    params(
        ("id" = Uuid, Path, description = "Product id"),
        ("label" = String, Path, description = "Variant label")
    ),
    responses((status = 204, description = "Variant removed")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_variant(
    State(state): State<AppState>,
    Path((product_id, label)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .catalog
        .delete_variant(product_id, &label)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    params(OrderListQuery),
    responses((status = 200, description = "All orders, optionally by status", body = OrderPage)),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .orders
        .admin_list(query)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(page))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = OrderStatusUpdate,
    responses(
        (status = 200, description = "Order after the change", body = OrderView),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 409, description = "Changed concurrently", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<OrderStatusUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(order_id, payload.status)
        .await
        .map_err(map_service_error)?;
    info!(admin = %admin.user_id, %order_id, status = %payload.status, "order status set");
    Ok(success_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/users",
    params(UserListQuery),
    responses((status = 200, description = "Accounts", body = UserPage)),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .users
        .list_users(query)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(page))
}

/// Applies from the user's next sign-in
#[utoipa::path(
    put,
    path = "/api/v1/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = RoleUpdate,
    responses((status = 200, description = "Account with the new role", body = UserView)),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn set_user_role(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<RoleUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .services
        .users
        .set_role(user_id, payload.role)
        .await
        .map_err(map_service_error)?;
    info!(admin = %admin.user_id, %user_id, role = %payload.role, "role changed");
    Ok(success_response(user))
}

/// Drops every anonymous device's cart and wishlist
#[utoipa::path(
    delete,
    path = "/api/v1/admin/guest-sessions",
    responses((status = 204, description = "Guest state cleared")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn clear_guest_sessions(
    State(state): State<AppState>,
    admin: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .guests
        .store()
        .clear()
        .await
        .map_err(map_service_error)?;
    info!(admin = %admin.user_id, "guest sessions cleared");
    Ok(no_content_response())
}
