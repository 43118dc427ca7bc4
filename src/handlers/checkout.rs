use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::CheckoutRequest;

/// Response body for a successfully created checkout session.
///
/// The storefront follows `url` to the gateway's hosted payment page.
#[derive(Debug, Serialize)]
struct CheckoutSessionResponse {
    success: bool,
    id: String,
    url: String,
}

/// Error body for the checkout-session endpoint. This endpoint predates
/// the standard error envelope and keeps its own contract because the
/// storefront keys off the `success` flag.
#[derive(Debug, Serialize)]
struct CheckoutErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PaymentResultQuery {
    session_id: Option<String>,
}

/// Create a hosted checkout session for the submitted cart.
async fn create_checkout_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CheckoutRequest>,
) -> Response {
    let origin = request_origin(
        state.config.public_base_url.as_deref(),
        &headers,
        state.config.port,
    );

    match state.services.checkout.begin_checkout(input, &origin).await {
        Ok(session) => (
            StatusCode::OK,
            Json(CheckoutSessionResponse {
                success: true,
                id: session.id,
                url: session.url,
            }),
        )
            .into_response(),
        Err(err) => checkout_error_response(err),
    }
}

fn checkout_error_response(err: ServiceError) -> Response {
    let status = err.status_code();
    let body = match err {
        ServiceError::MissingCheckoutFields(fields) => CheckoutErrorBody {
            success: false,
            error: "Missing required fields".to_string(),
            details: Some(fields),
        },
        other => CheckoutErrorBody {
            success: false,
            error: other.response_message(),
            details: None,
        },
    };
    (status, Json(body)).into_response()
}

/// Landing endpoint for the gateway's post-payment redirect.
///
/// The browser arrives here regardless of how the payment went, so this
/// never surfaces an error body. Every path ends in a 303 redirect back
/// into the storefront, with failures encoded as a stable `error` code.
async fn payment_result(
    State(state): State<AppState>,
    Query(query): Query<PaymentResultQuery>,
) -> Redirect {
    match state
        .services
        .reconciliation
        .finalize_checkout(query.session_id.as_deref())
        .await
    {
        Ok(outcome) => {
            let order_id = outcome.order().id;
            Redirect::to(&format!("/checkout/complete?order={}", order_id))
        }
        Err(err) => {
            let code = err.redirect_code();
            warn!(error = %err, code, "Payment reconciliation failed");
            Redirect::to(&format!("/checkout?error={}", code))
        }
    }
}

/// Derives the externally visible origin used to build the gateway's
/// success and cancel URLs. A configured public base URL wins over the
/// forwarded headers.
fn request_origin(public_base_url: Option<&str>, headers: &HeaderMap, port: u16) -> String {
    if let Some(base) = public_base_url {
        return base.trim_end_matches('/').to_string();
    }

    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    let fallback_host = format!("localhost:{}", port);
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(&fallback_host);

    format!("{}://{}", proto, host)
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout-session", post(create_checkout_session))
        .route("/payment-result", get(payment_result))
}
