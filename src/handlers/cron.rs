use crate::auth::require_shared_secret;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::notifications::reminders::SweepSummary;
use crate::services::payments::ExpirySweepSummary;
use crate::ApiResponse;
use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::Utc;

/// Dispatch due pickup reminders. Invoked by an external scheduler;
/// idempotent per reminder row.
#[utoipa::path(
    post,
    path = "/api/v1/cron/reminders/dispatch",
    responses(
        (status = 200, description = "Sweep summary", body = crate::ApiResponse<crate::services::notifications::reminders::SweepSummary>),
        (status = 401, description = "Bad or missing bearer secret")
    ),
    security(("bearer_auth" = [])),
    tag = "Cron"
)]
pub async fn dispatch_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<SweepSummary>>, ServiceError> {
    require_shared_secret(&headers, &state.config.cron_secret)
        .map_err(|_| ServiceError::Unauthorized("Invalid cron credentials".to_string()))?;

    let summary = state.services.reminders.dispatch_due(Utc::now()).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// Release authorized holds whose expiry has passed.
#[utoipa::path(
    post,
    path = "/api/v1/cron/preauth/release-expired",
    responses(
        (status = 200, description = "Sweep summary", body = crate::ApiResponse<crate::services::payments::ExpirySweepSummary>),
        (status = 401, description = "Bad or missing bearer secret")
    ),
    security(("bearer_auth" = [])),
    tag = "Cron"
)]
pub async fn release_expired_preauths(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<ExpirySweepSummary>>, ServiceError> {
    require_shared_secret(&headers, &state.config.cron_secret)
        .map_err(|_| ServiceError::Unauthorized("Invalid cron credentials".to_string()))?;

    let summary = state.services.payments.release_expired(Utc::now()).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// Cron routes
pub fn cron_routes() -> Router<AppState> {
    Router::new()
        .route("/reminders/dispatch", post(dispatch_reminders))
        .route("/preauth/release-expired", post(release_expired_preauths))
}
