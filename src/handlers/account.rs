use crate::{
    auth::AuthUser,
    errors::ApiError,
    handlers::common::{created_response, map_service_error, no_content_response, success_response},
    services::users::{AddressInput, AddressView},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/account/addresses",
    responses((status = 200, description = "Saved addresses, default first", body = [AddressView])),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn list_addresses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let addresses = state
        .services
        .users
        .list_addresses(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(addresses))
}

#[utoipa::path(
    post,
    path = "/api/v1/account/addresses",
    request_body = AddressInput,
    responses(
        (status = 201, description = "Address saved", body = AddressView),
        (status = 400, description = "Invalid address", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn add_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddressInput>,
) -> Result<impl IntoResponse, ApiError> {
    let address = state
        .services
        .users
        .add_address(user.user_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(address))
}

#[utoipa::path(
    put,
    path = "/api/v1/account/addresses/{id}/default",
    params(("id" = Uuid, Path, description = "Address id")),
    responses(
        (status = 200, description = "New default address", body = AddressView),
        (status = 404, description = "Not one of the caller's addresses", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn set_default_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(address_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let address = state
        .services
        .users
        .set_default_address(user.user_id, address_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(address))
}

#[utoipa::path(
    delete,
    path = "/api/v1/account/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    responses((status = 204, description = "Address removed")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn delete_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(address_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .users
        .delete_address(user.user_id, address_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}
