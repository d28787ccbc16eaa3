use super::common::PaginationParams;
use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::{IntakeOutcome, PlaceOrderRequest};
use crate::services::orders::{OrderListResponse, OrderResponse};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

/// Place an on-site order (or learn that a pre-authorization is required).
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order created", body = crate::ApiResponse<crate::services::checkout::IntakeOutcome>),
        (status = 200, description = "Pre-authorization required before the order can be created", body = crate::ApiResponse<crate::services::checkout::IntakeOutcome>),
        (status = 400, description = "Bad request", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<IntakeOutcome>>), ServiceError> {
    let customer_id = user.customer_id().map_err(|_| {
        ServiceError::AuthError("Token subject is not a valid customer id".to_string())
    })?;

    let outcome = state
        .services
        .checkout
        .place_onsite_order(customer_id, request)
        .await?;

    let status = match &outcome {
        IntakeOutcome::OrderCreated { .. } => StatusCode::CREATED,
        IntakeOutcome::PreAuthRequired { .. } => StatusCode::OK,
    };

    Ok((status, Json(ApiResponse::success(outcome))))
}

/// Get an order by ID. Customers only see their own orders.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = crate::ApiResponse<crate::services::orders::OrderResponse>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

    if !user.is_admin() && user.customer_id().ok() != Some(order.customer_id) {
        return Err(ServiceError::Forbidden(
            "Order belongs to another customer".to_string(),
        ));
    }

    Ok(Json(ApiResponse::success(order)))
}

/// List the caller's orders, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders", body = crate::ApiResponse<crate::services::orders::OrderListResponse>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let customer_id = user.customer_id().map_err(|_| {
        ServiceError::AuthError("Token subject is not a valid customer id".to_string())
    })?;

    let orders = state
        .services
        .orders
        .list_orders(Some(customer_id), params.page, params.per_page)
        .await?;

    Ok(Json(ApiResponse::success(orders)))
}

/// Order routes
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(place_order).get(list_orders))
        .route("/:order_id", get(get_order))
}
