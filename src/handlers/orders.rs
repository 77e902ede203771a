use crate::{
    auth::{AuthUser, Identity},
    errors::ApiError,
    handlers::common::{created_response, map_service_error, success_response},
    services::{
        commerce::checkout_service::{CheckoutRequest, CheckoutResult},
        orders::{OrderListQuery, OrderPage, OrderView},
    },
    AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
};

/// Checkout. Signed-in callers get the order on their account and their server
/// cart cleared; anonymous callers place a guest order.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created, awaiting payment", body = CheckoutResult),
        (status = 400, description = "Incomplete checkout", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product or variant no longer sold", body = crate::errors::ErrorResponse),
        (status = 409, description = "Prices changed since the cart was built", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .services
        .checkout
        .create_order(identity.user_id(), payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(result))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "The caller's orders, newest first", body = OrderPage),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .orders
        .list_for_user(user.user_id, query)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(page))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_number}",
    params(("order_number" = String, Path, description = "Order number, e.g. ORD-20240101-AB12CD34")),
    responses(
        (status = 200, description = "Order with items", body = OrderView),
        (status = 404, description = "Not found or not yours", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_for(&identity, &order_number)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}
