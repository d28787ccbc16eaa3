use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::{PlaceOrderRequest, SessionResponse};
use crate::services::orders::OrderResponse;
use crate::ApiResponse;
use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfirmSessionRequest {
    pub session_id: String,
}

/// Create a hosted payment session for an online-paid order.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/sessions",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Session created", body = crate::ApiResponse<crate::services::checkout::SessionResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn create_payment_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SessionResponse>>), ServiceError> {
    let customer_id = user.customer_id().map_err(|_| {
        ServiceError::AuthError("Token subject is not a valid customer id".to_string())
    })?;

    let session = state
        .services
        .checkout
        .create_payment_session(customer_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

/// Confirm a payment session after the gateway redirect. Idempotent: the
/// same session id always resolves to the same order.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/confirm",
    request_body = ConfirmSessionRequest,
    responses(
        (status = 200, description = "Order materialized", body = crate::ApiResponse<crate::services::orders::OrderResponse>),
        (status = 402, description = "Payment incomplete", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(request): Json<ConfirmSessionRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .checkout
        .confirm_payment(&request.session_id)
        .await?;

    Ok(Json(ApiResponse::success(order)))
}

/// Create a setup-mode session collecting a card hold for a first-time
/// customer.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/preauth/sessions",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Session created", body = crate::ApiResponse<crate::services::checkout::SessionResponse>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn create_preauth_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SessionResponse>>), ServiceError> {
    let customer_id = user.customer_id().map_err(|_| {
        ServiceError::AuthError("Token subject is not a valid customer id".to_string())
    })?;

    let session = state
        .services
        .checkout
        .create_preauth_session(customer_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

/// Confirm a setup-mode session: the hold must have succeeded. Idempotent by
/// setup-intent id.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/preauth/confirm",
    request_body = ConfirmSessionRequest,
    responses(
        (status = 200, description = "Order materialized with authorized hold", body = crate::ApiResponse<crate::services::orders::OrderResponse>),
        (status = 402, description = "Hold incomplete", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn confirm_preauth(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(request): Json<ConfirmSessionRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .checkout
        .confirm_preauth(&request.session_id)
        .await?;

    Ok(Json(ApiResponse::success(order)))
}

/// Checkout routes
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_payment_session))
        .route("/confirm", post(confirm_payment))
        .route("/preauth/sessions", post(create_preauth_session))
        .route("/preauth/confirm", post(confirm_preauth))
}
