use super::common::PaginationParams;
use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::notifications::RecentErrorEntry;
use crate::services::orders::{OrderListResponse, OrderResponse, UpdateOrderStatusRequest};
use crate::services::payments::PreAuthResponse;
use crate::services::special_codes::SpecialCodeResponse;
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn require_admin(user: &AuthenticatedUser) -> Result<(), ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "Admin access required".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CaptureRequest {
    /// Amount to capture; defaults to the full held amount.
    #[serde(default)]
    pub capture_amount: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerateCodeRequest {
    /// Days until the code expires.
    pub expires_in_days: i64,
}

/// List every order, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/admin/orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders", body = crate::ApiResponse<crate::services::orders::OrderListResponse>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_all_orders(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    require_admin(&user)?;

    let orders = state
        .services
        .orders
        .list_orders(None, params.page, params.per_page)
        .await?;

    Ok(Json(ApiResponse::success(orders)))
}

/// Move an order through its lifecycle.
#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{order_id}/status",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order updated", body = crate::ApiResponse<crate::services::orders::OrderResponse>),
        (status = 400, description = "Invalid transition", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    require_admin(&user)?;

    let order = state
        .services
        .orders
        .update_order_status(order_id, request)
        .await?;

    Ok(Json(ApiResponse::success(order)))
}

/// Capture an authorized hold, fully or partially (no-show fee).
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{order_id}/preauth/capture",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Hold captured", body = crate::ApiResponse<crate::services::payments::PreAuthResponse>),
        (status = 400, description = "Hold not in authorized state", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn capture_preauth(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(request): Json<CaptureRequest>,
) -> Result<Json<ApiResponse<PreAuthResponse>>, ServiceError> {
    require_admin(&user)?;

    let response = state
        .services
        .payments
        .capture(order_id, request.capture_amount)
        .await?;

    Ok(Json(ApiResponse::success(response)))
}

/// Release an authorized hold (customer settled by other means).
#[utoipa::path(
    post,
    path = "/api/v1/admin/orders/{order_id}/preauth/release",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Hold released", body = crate::ApiResponse<crate::services::payments::PreAuthResponse>),
        (status = 400, description = "Hold not in authorized state", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn release_preauth(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<PreAuthResponse>>, ServiceError> {
    require_admin(&user)?;

    let response = state.services.payments.release(order_id).await?;

    Ok(Json(ApiResponse::success(response)))
}

/// Generate a one-time special code.
#[utoipa::path(
    post,
    path = "/api/v1/admin/special-codes",
    request_body = GenerateCodeRequest,
    responses(
        (status = 201, description = "Code generated", body = crate::ApiResponse<crate::services::special_codes::SpecialCodeResponse>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn generate_special_code(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<GenerateCodeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SpecialCodeResponse>>), ServiceError> {
    require_admin(&user)?;

    let code = state
        .services
        .special_codes
        .generate(request.expires_in_days)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(code))))
}

/// List special codes, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/admin/special-codes",
    params(PaginationParams),
    responses(
        (status = 200, description = "Codes", body = crate::ApiResponse<Vec<crate::services::special_codes::SpecialCodeResponse>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn list_special_codes(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<Vec<SpecialCodeResponse>>>, ServiceError> {
    require_admin(&user)?;

    let (codes, _total) = state
        .services
        .special_codes
        .list(params.page, params.per_page)
        .await?;

    Ok(Json(ApiResponse::success(codes)))
}

/// Recent notification failures: the in-memory ring first, the durable table
/// when the ring is empty (e.g. right after a restart).
#[utoipa::path(
    get,
    path = "/api/v1/admin/notification-errors",
    responses(
        (status = 200, description = "Recent notification failures", body = crate::ApiResponse<Vec<crate::services::notifications::RecentErrorEntry>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn recent_notification_errors(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<Vec<RecentErrorEntry>>>, ServiceError> {
    require_admin(&user)?;

    let mut errors = state.services.notifications.recent_errors().snapshot();
    if errors.is_empty() {
        errors = state.services.notifications.persisted_errors(50).await?;
    }

    Ok(Json(ApiResponse::success(errors)))
}

/// Admin routes
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_all_orders))
        .route("/orders/:order_id/status", put(update_order_status))
        .route("/orders/:order_id/preauth/capture", post(capture_preauth))
        .route("/orders/:order_id/preauth/release", post(release_preauth))
        .route(
            "/special-codes",
            post(generate_special_code).get(list_special_codes),
        )
        .route("/notification-errors", get(recent_notification_errors))
}
