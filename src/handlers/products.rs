use crate::{
    auth::AuthUser,
    errors::ApiError,
    handlers::common::{created_response, map_service_error, success_response},
    services::{
        commerce::product_catalog_service::{ProductPage, ProductQuery, ProductView},
        reviews::{ReviewInput, ReviewView},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};
use uuid::Uuid;

/// Storefront product listing
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductQuery),
    responses((status = 200, description = "Products with stock status", body = ProductPage)),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .catalog
        .list_products(query)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{slug}",
    params(("slug" = String, Path, description = "Product slug")),
    responses(
        (status = 200, description = "Product with variants", body = ProductView),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .get_by_slug(&slug)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(product))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/reviews",
    params(("id" = Uuid, Path, description = "Product id")),
    responses((status = 200, description = "Reviews, newest first", body = [ReviewView])),
    tag = "products"
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let reviews = state
        .services
        .reviews
        .list_for_product(product_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(reviews))
}

#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/reviews",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = ReviewInput,
    responses(
        (status = 201, description = "Review posted", body = ReviewView),
        (status = 400, description = "Rating out of range", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already reviewed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub async fn post_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<ReviewInput>,
) -> Result<impl IntoResponse, ApiError> {
    let review = state
        .services
        .reviews
        .post(user.user_id, product_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(review))
}
