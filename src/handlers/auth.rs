use crate::{
    auth::{token_cookie, AuthUser, IssuedToken},
    errors::ApiError,
    handlers::common::{created_response, map_service_error, success_response},
    services::{
        commerce::ReconciliationReport,
        users::{LoginInput, RegisterInput, UserView},
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, State},
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub user: UserView,
    pub token: IssuedToken,
    /// Present when a guest device was folded into the account
    pub reconciliation: Option<ReconciliationReport>,
}

/// Create an account and sign it in
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterInput,
    responses(
        (status = 201, description = "Account created", body = crate::services::users::AuthResponse),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email already registered", body = crate::errors::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterInput>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = state
        .services
        .users
        .register(payload)
        .await
        .map_err(map_service_error)?;
    let cookie = token_cookie(&auth.token, state.config.is_production());
    Ok(([(header::SET_COOKIE, cookie)], created_response(auth)))
}

/// Sign in. Also sets the `token` cookie and, given a `device_id`, merges that
/// device's guest cart and wishlist.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginInput,
    responses(
        (status = 200, description = "Signed in", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginInput>,
) -> Result<impl IntoResponse, ApiError> {
    let device_id = payload.device_id.clone();
    let auth = state
        .services
        .users
        .login(payload)
        .await
        .map_err(map_service_error)?;

    let mut reconciliation = None;
    if let Some(device_id) = device_id.filter(|d| !d.is_empty()) {
        match state
            .services
            .reconciliation
            .reconcile(auth.user.id, &device_id)
            .await
        {
            Ok(report) => reconciliation = Some(report),
            // Sign-in still succeeds; the client can retry via /cart/sync
            Err(e) => warn!(user_id = %auth.user.id, error = %e, "guest merge at login failed"),
        }
    }
    info!(user_id = %auth.user.id, "user signed in");

    let cookie = token_cookie(&auth.token, state.config.is_production());
    Ok((
        [(header::SET_COOKIE, cookie)],
        success_response(LoginResponse {
            user: auth.user,
            token: auth.token,
            reconciliation,
        }),
    ))
}

/// Current account
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserView),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<UserView>>, ApiError> {
    let account = state
        .services
        .users
        .get(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(Json(ApiResponse::success(account.into())))
}
