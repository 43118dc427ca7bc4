use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::common::{PaginatedResponse, PaginationParams};
use crate::entities::OrderModel;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::orders::OrderWithItems;
use crate::ApiResponse;

#[derive(Debug, Deserialize)]
struct OrderListQuery {
    customer_id: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrderStatusRequest {
    #[validate(length(min = 1, message = "status cannot be empty"))]
    pub status: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AssignTechnicianRequest {
    #[validate(length(min = 1, message = "technician_id cannot be empty"))]
    pub technician_id: String,
}

/// List a customer's orders, newest first.
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
    Query(pagination): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderModel>>>, ServiceError> {
    let customer_id = query
        .customer_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ServiceError::InvalidInput("customer_id query parameter is required".to_string())
        })?;

    let (orders, total) = state
        .services
        .orders
        .list_orders(
            customer_id,
            query.status,
            pagination.page,
            pagination.per_page,
        )
        .await?;

    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders,
        pagination.page,
        pagination.per_page,
        total,
    ))))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state.services.orders.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state.services.orders.cancel_order(order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    request.validate()?;

    let order = state
        .services
        .orders
        .update_order_status(order_id, &request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn assign_technician(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<AssignTechnicianRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    request.validate()?;

    let order = state
        .services
        .orders
        .assign_technician(order_id, &request.technician_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/status", put(update_order_status))
        .route("/orders/:id/assign", post(assign_technician))
}
