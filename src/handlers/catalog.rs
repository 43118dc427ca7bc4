use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::entities::{ServiceCategoryModel, ServiceOfferingModel};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::ApiResponse;

#[derive(Debug, Deserialize)]
struct ServicesQuery {
    category: Option<String>,
}

async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ServiceCategoryModel>>>, ServiceError> {
    let categories = state.services.catalog.list_categories().await?;
    Ok(Json(ApiResponse::success(categories)))
}

async fn list_services(
    State(state): State<AppState>,
    Query(query): Query<ServicesQuery>,
) -> Result<Json<ApiResponse<Vec<ServiceOfferingModel>>>, ServiceError> {
    let services = state.services.catalog.list_services(query.category).await?;
    Ok(Json(ApiResponse::success(services)))
}

async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ServiceOfferingModel>>, ServiceError> {
    let service = state.services.catalog.get_service(&name).await?;
    Ok(Json(ApiResponse::success(service)))
}

pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories))
        .route("/services", get(list_services))
        .route("/services/:name", get(get_service))
}
