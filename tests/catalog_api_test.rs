mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn test_list_categories_alphabetically() {
    let app = TestApp::new().await;
    app.seed_category("Wiring").await;
    app.seed_category("Lighting").await;

    let response = app.request(Method::GET, "/categories", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let categories = body["data"].as_array().unwrap();
    assert_eq!(categories.len(), 2);
    assert_eq!(categories[0]["name"], json!("Lighting"));
    assert_eq!(categories[1]["name"], json!("Wiring"));
}

#[tokio::test]
async fn test_list_services_optionally_filtered_by_category() {
    let app = TestApp::new().await;
    app.seed_service("Wiring Repair", "Wiring", dec!(150.00))
        .await;
    app.seed_service("Socket Replacement", "Wiring", dec!(75.00))
        .await;
    app.seed_service("Ceiling Fan Installation", "Lighting", dec!(499.00))
        .await;

    let response = app.request(Method::GET, "/services", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let response = app
        .request(Method::GET, "/services?category=Wiring", None)
        .await;
    let body = response_json(response).await;
    let services = body["data"].as_array().unwrap();
    assert_eq!(services.len(), 2);
    assert!(services
        .iter()
        .all(|service| service["category_name"] == json!("Wiring")));
}

#[tokio::test]
async fn test_get_service_by_name() {
    let app = TestApp::new().await;
    app.seed_service("Wiring Repair", "Wiring", dec!(150.00))
        .await;

    let response = app
        .request(Method::GET, "/services/Wiring%20Repair", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["name"], json!("Wiring Repair"));
    assert_eq!(body["data"]["category_name"], json!("Wiring"));
    assert_eq!(body["data"]["duration_minutes"], json!(60));

    let response = app.request(Method::GET, "/services/Unknown", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = response_json(response).await;
    assert_eq!(body["error"], json!("Not Found"));
}
