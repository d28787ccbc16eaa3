use crate::auth::require_shared_secret;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::notifications::email::EmailMessage;
use crate::services::orders::model_to_response;
use crate::ApiResponse;
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;
use uuid::Uuid;

// Internal server-to-server notification surface, shared-secret gated.

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendEmailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendSmsRequest {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PrintOrderRequest {
    pub order_id: Uuid,
}

fn guard(headers: &HeaderMap, state: &AppState) -> Result<(), ServiceError> {
    require_shared_secret(headers, &state.config.cron_secret)
        .map_err(|_| ServiceError::Unauthorized("Invalid internal credentials".to_string()))
}

/// Send an email through the shop's provider.
#[utoipa::path(
    post,
    path = "/api/v1/internal/notifications/email",
    request_body = SendEmailRequest,
    responses((status = 200, description = "Email dispatched", body = crate::ApiResponse<serde_json::Value>)),
    security(("bearer_auth" = [])),
    tag = "Internal"
)]
pub async fn send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendEmailRequest>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    guard(&headers, &state)?;

    let message = EmailMessage {
        to: request.to,
        subject: request.subject,
        body: request.body,
    };
    state.services.notifications.send_email(&message).await?;

    Ok(Json(ApiResponse::success(json!({ "success": true }))))
}

/// Send an SMS through the shop's provider.
#[utoipa::path(
    post,
    path = "/api/v1/internal/notifications/sms",
    request_body = SendSmsRequest,
    responses((status = 200, description = "SMS dispatched", body = crate::ApiResponse<serde_json::Value>)),
    security(("bearer_auth" = [])),
    tag = "Internal"
)]
pub async fn send_sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendSmsRequest>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    guard(&headers, &state)?;

    state
        .services
        .notifications
        .send_sms(&request.to, &request.body)
        .await?;

    Ok(Json(ApiResponse::success(json!({ "success": true }))))
}

/// Re-run the receipt print protocol for an order (e.g. after replacing the
/// paper roll).
#[utoipa::path(
    post,
    path = "/api/v1/internal/notifications/print",
    request_body = PrintOrderRequest,
    responses((status = 200, description = "Print outcome", body = crate::ApiResponse<serde_json::Value>)),
    security(("bearer_auth" = [])),
    tag = "Internal"
)]
pub async fn print_receipts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PrintOrderRequest>,
) -> Result<Json<ApiResponse<Value>>, ServiceError> {
    guard(&headers, &state)?;

    let order = state
        .services
        .orders
        .get_order_model(request.order_id)
        .await?;
    let order = model_to_response(order);

    let outcome = state
        .services
        .notifications
        .print_service()
        .print_order_receipts(&order)
        .await?;

    Ok(Json(ApiResponse::success(json!({
        "success": true,
        "printed": outcome.printed,
        "requested": outcome.requested,
        "severity": outcome.severity.to_string(),
    }))))
}

/// Internal notification routes
pub fn notification_routes() -> Router<AppState> {
    Router::new()
        .route("/email", post(send_email))
        .route("/sms", post(send_sms))
        .route("/print", post(print_receipts))
}
