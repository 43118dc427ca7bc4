use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::orders::UpdateOrderStatusRequest;
use crate::entities::OrderModel;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::orders::TechnicianStats;
use crate::ApiResponse;

#[derive(Debug, Deserialize)]
struct TaskListQuery {
    status: Option<String>,
}

/// List the orders assigned to a technician, optionally filtered by
/// fulfillment status.
async fn list_tasks(
    State(state): State<AppState>,
    Path(technician_id): Path<String>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<ApiResponse<Vec<OrderModel>>>, ServiceError> {
    let tasks = state
        .services
        .orders
        .technician_tasks(&technician_id, query.status)
        .await?;
    Ok(Json(ApiResponse::success(tasks)))
}

/// Update the status of an order, rejecting orders assigned to someone
/// else.
async fn update_task_status(
    State(state): State<AppState>,
    Path((technician_id, order_id)): Path<(String, Uuid)>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    request.validate()?;

    let order = state
        .services
        .orders
        .update_task_status(&technician_id, order_id, &request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn stats(
    State(state): State<AppState>,
    Path(technician_id): Path<String>,
) -> Result<Json<ApiResponse<TechnicianStats>>, ServiceError> {
    let stats = state.services.orders.technician_stats(&technician_id).await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub fn technician_routes() -> Router<AppState> {
    Router::new()
        .route("/technicians/:id/tasks", get(list_tasks))
        .route("/technicians/:id/tasks/:order_id/status", put(update_task_status))
        .route("/technicians/:id/stats", get(stats))
}
