use crate::{
    auth::Identity,
    errors::ApiError,
    handlers::common::{created_response, map_service_error, success_response},
    services::payments::{CallbackAck, CallbackKind, CreateSessionRequest, PaymentSession},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use bytes::Bytes;

/// Opens a hosted payment session for an unpaid order
#[utoipa::path(
    post,
    path = "/api/v1/payments/{provider}/session",
    params(("provider" = String, Path, description = "razorpay, phonepe or stripe")),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = PaymentSession),
        (status = 404, description = "Unknown provider or order", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider unreachable", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn create_session(
    State(state): State<AppState>,
    identity: Identity,
    Path(provider): Path<String>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .payments
        .create_session(&provider, &identity, payload.order_number.trim())
        .await
        .map_err(map_service_error)?;
    Ok(created_response(session))
}

/// Storefront relays the provider's signed result after redirect
#[utoipa::path(
    post,
    path = "/api/v1/payments/{provider}/verify",
    params(("provider" = String, Path, description = "razorpay, phonepe or stripe")),
    request_body(content = String, description = "Provider payload, verbatim"),
    responses(
        (status = 200, description = "Outcome applied or already recorded", body = CallbackAck),
        (status = 401, description = "Signature missing or invalid", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn verify(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle(&state, &provider, CallbackKind::ClientVerify, &headers, &body).await
}

/// Server-to-server notification from the provider
#[utoipa::path(
    post,
    path = "/api/v1/payments/{provider}/webhook",
    params(("provider" = String, Path, description = "razorpay, phonepe or stripe")),
    request_body(content = String, description = "Raw provider event"),
    responses(
        (status = 200, description = "Event accepted", body = CallbackAck),
        (status = 401, description = "Signature missing or invalid", body = crate::errors::ErrorResponse)
    ),
    tag = "payments"
)]
pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    handle(&state, &provider, CallbackKind::Webhook, &headers, &body).await
}

async fn handle(
    state: &AppState,
    provider: &str,
    kind: CallbackKind,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<axum::response::Response, ApiError> {
    let payments = &state.services.payments;
    let gateway = payments.gateway(provider).map_err(map_service_error)?;
    let signature = gateway
        .signature_header(kind)
        .and_then(|name| headers.get(name))
        .and_then(|value| value.to_str().ok());
    let ack = payments
        .handle_callback(provider, kind, body, signature)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(ack))
}
