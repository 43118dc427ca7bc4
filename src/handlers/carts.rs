use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::carts::{AddCartItemInput, CartWithItems};
use crate::ApiResponse;

async fn get_cart(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state.services.carts.get_cart(&customer_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

async fn add_item(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
    Json(input): Json<AddCartItemInput>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state.services.carts.add_item(&customer_id, input).await?;
    Ok(Json(ApiResponse::success(cart)))
}

async fn remove_item(
    State(state): State<AppState>,
    Path((customer_id, service_name)): Path<(String, String)>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_item(&customer_id, &service_name)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

async fn clear_cart(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
) -> Result<StatusCode, ServiceError> {
    state.services.carts.clear_cart(&customer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/carts/:customer_id", get(get_cart))
        .route("/carts/:customer_id", delete(clear_cart))
        .route("/carts/:customer_id/items", post(add_item))
        .route(
            "/carts/:customer_id/items/:service_name",
            delete(remove_item),
        )
}
