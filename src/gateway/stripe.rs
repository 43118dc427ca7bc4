use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{instrument, warn};

use super::{CheckoutGateway, CreateSessionRequest, GatewayError, GatewaySession};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stripe implementation of [`CheckoutGateway`].
///
/// Talks form-encoded HTTP to `/v1/checkout/sessions` with bearer auth.
/// The base URL is injectable so tests can point the client at a local
/// mock server.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(
        secret_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    pub fn from_config(config: &crate::config::AppConfig) -> Result<Self, GatewayError> {
        Self::new(&config.stripe_secret_key, &config.stripe_base_url)
    }

    /// Flattens the session request into Stripe's bracketed form pairs.
    fn session_params(request: &CreateSessionRequest) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = Vec::new();

        for (i, item) in request.line_items.iter().enumerate() {
            params.push((
                format!("line_items[{i}][price_data][currency]"),
                request.currency.clone(),
            ));
            params.push((
                format!("line_items[{i}][price_data][product_data][name]"),
                item.name.clone(),
            ));
            params.push((
                format!("line_items[{i}][price_data][unit_amount]"),
                item.unit_amount.to_string(),
            ));
            params.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
        }

        params.push(("payment_method_types[0]".to_string(), "card".to_string()));
        params.push(("mode".to_string(), "payment".to_string()));
        params.push(("success_url".to_string(), request.success_url.clone()));
        params.push(("cancel_url".to_string(), request.cancel_url.clone()));
        params.push(("expires_at".to_string(), request.expires_at.to_string()));

        for (key, value) in &request.metadata {
            params.push((format!("metadata[{key}]"), value.clone()));
        }

        params
    }

    async fn decode_session(response: reqwest::Response) -> Result<GatewaySession, GatewayError> {
        if response.status().is_success() {
            response
                .json::<SessionPayload>()
                .await
                .map(GatewaySession::from)
                .map_err(|e| GatewayError::Decode(e.to_string()))
        } else {
            Err(Self::decode_error(response).await)
        }
    }

    async fn decode_error(response: reqwest::Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => {
                let code = envelope
                    .error
                    .code
                    .unwrap_or_else(|| "unknown".to_string());
                let message = envelope
                    .error
                    .message
                    .unwrap_or_else(|| status.to_string());
                warn!(status = %status, code = %code, "Stripe API call failed");

                // Stripe signals unknown sessions both ways
                if status == reqwest::StatusCode::NOT_FOUND || code == "resource_missing" {
                    GatewayError::NotFound(message)
                } else {
                    GatewayError::Api {
                        status: status.as_u16(),
                        code,
                        message,
                    }
                }
            }
            Err(_) => {
                warn!(status = %status, "Stripe API call failed with unparseable body");
                if status == reqwest::StatusCode::NOT_FOUND {
                    GatewayError::NotFound(format!("HTTP {status}"))
                } else {
                    GatewayError::Api {
                        status: status.as_u16(),
                        code: "unknown".to_string(),
                        message: body.chars().take(200).collect(),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CheckoutGateway for StripeGateway {
    #[instrument(skip(self, request), fields(items = request.line_items.len()))]
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, GatewayError> {
        let params = Self::session_params(&request);

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Self::decode_session(response).await
    }

    #[instrument(skip(self))]
    async fn retrieve_session(
        &self,
        session_id: &str,
        expand: &[&str],
    ) -> Result<GatewaySession, GatewayError> {
        let query: Vec<(&str, &str)> = expand.iter().map(|name| ("expand[]", *name)).collect();

        let response = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.base_url, session_id
            ))
            .bearer_auth(&self.secret_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Self::decode_session(response).await
    }
}

/// Subset of Stripe's checkout session object this service consumes.
#[derive(Debug, Deserialize)]
struct SessionPayload {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    payment_intent: Option<PaymentIntentField>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

/// `payment_intent` arrives as a bare id unless expanded.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PaymentIntentField {
    Id(String),
    Expanded { id: String },
}

impl From<SessionPayload> for GatewaySession {
    fn from(payload: SessionPayload) -> Self {
        GatewaySession {
            id: payload.id,
            url: payload.url,
            payment_status: payload
                .payment_status
                .unwrap_or_else(|| "unknown".to_string()),
            amount_total: payload.amount_total,
            payment_intent_id: payload.payment_intent.map(|p| match p {
                PaymentIntentField::Id(id) => id,
                PaymentIntentField::Expanded { id } => id,
            }),
            metadata: payload.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    #[allow(dead_code)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LineItem;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_request() -> CreateSessionRequest {
        let mut metadata = BTreeMap::new();
        metadata.insert("user".to_string(), "u1".to_string());
        metadata.insert("data".to_string(), r#"{"product":{}}"#.to_string());
        CreateSessionRequest {
            line_items: vec![LineItem {
                name: "Wiring Repair".to_string(),
                unit_amount: 15000,
                quantity: 2,
            }],
            currency: "inr".to_string(),
            success_url: "http://localhost/payment-result?session_id={CHECKOUT_SESSION_ID}"
                .to_string(),
            cancel_url: "http://localhost/checkout".to_string(),
            expires_at: 1_700_000_000,
            metadata,
        }
    }

    // ==================== Wire Format Tests ====================

    #[test]
    fn session_params_flatten_line_items_and_metadata() {
        let params = StripeGateway::session_params(&sample_request());

        let find = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(find("line_items[0][price_data][currency]"), Some("inr"));
        assert_eq!(
            find("line_items[0][price_data][product_data][name]"),
            Some("Wiring Repair")
        );
        assert_eq!(find("line_items[0][price_data][unit_amount]"), Some("15000"));
        assert_eq!(find("line_items[0][quantity]"), Some("2"));
        assert_eq!(find("payment_method_types[0]"), Some("card"));
        assert_eq!(find("mode"), Some("payment"));
        assert_eq!(find("expires_at"), Some("1700000000"));
        assert_eq!(find("metadata[user]"), Some("u1"));
        assert_eq!(find("metadata[data]"), Some(r#"{"product":{}}"#));
    }

    #[test]
    fn session_payload_with_expanded_payment_intent() {
        let payload: SessionPayload = serde_json::from_value(json!({
            "id": "cs_test_a1",
            "payment_status": "paid",
            "amount_total": 30000,
            "payment_intent": {"id": "pi_123", "status": "succeeded"},
            "metadata": {"user": "u1", "data": "{}"}
        }))
        .unwrap();

        let session = GatewaySession::from(payload);
        assert_eq!(session.id, "cs_test_a1");
        assert_eq!(session.payment_status, "paid");
        assert_eq!(session.amount_total, Some(30000));
        assert_eq!(session.payment_intent_id.as_deref(), Some("pi_123"));
        assert_eq!(session.metadata.get("user").map(String::as_str), Some("u1"));
    }

    #[test]
    fn session_payload_with_unexpanded_payment_intent() {
        let payload: SessionPayload = serde_json::from_value(json!({
            "id": "cs_test_a2",
            "payment_status": "unpaid",
            "payment_intent": "pi_456"
        }))
        .unwrap();

        let session = GatewaySession::from(payload);
        assert_eq!(session.payment_intent_id.as_deref(), Some("pi_456"));
        assert!(session.metadata.is_empty());
    }

    #[test]
    fn error_envelope_parses_stripe_shape() {
        let envelope: ErrorEnvelope = serde_json::from_value(json!({
            "error": {
                "type": "invalid_request_error",
                "code": "resource_missing",
                "message": "No such checkout.session: 'cs_x'"
            }
        }))
        .unwrap();

        assert_eq!(envelope.error.code.as_deref(), Some("resource_missing"));
    }

    // ==================== Mock Server Tests ====================

    #[tokio::test]
    async fn create_session_posts_form_pairs_and_decodes_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_created",
                "url": "https://checkout.example/pay/cs_test_created",
                "payment_status": "unpaid",
                "metadata": {"user": "u1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test_123", server.uri()).unwrap();
        let session = gateway.create_session(sample_request()).await.unwrap();

        assert_eq!(session.id, "cs_test_created");
        assert_eq!(
            session.url.as_deref(),
            Some("https://checkout.example/pay/cs_test_created")
        );

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        // Brackets are percent-encoded on the wire
        assert!(body.contains("mode=payment"));
        assert!(body.contains("payment_method_types%5B0%5D=card"));
        assert!(body.contains("line_items%5B0%5D%5Bquantity%5D=2"));
        assert!(body.contains("metadata%5Buser%5D=u1"));
    }

    #[tokio::test]
    async fn retrieve_session_expands_requested_objects() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_test_r1"))
            .and(query_param("expand[]", "line_items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_r1",
                "payment_status": "paid",
                "amount_total": 30000,
                "payment_intent": {"id": "pi_789"},
                "metadata": {"user": "u1", "data": "{\"product\":{}}"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test_123", server.uri()).unwrap();
        let session = gateway
            .retrieve_session("cs_test_r1", &["line_items", "payment_intent"])
            .await
            .unwrap();

        assert_eq!(session.payment_status, "paid");
        assert_eq!(session.payment_intent_id.as_deref(), Some("pi_789"));
    }

    #[tokio::test]
    async fn missing_session_maps_to_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "type": "invalid_request_error",
                    "code": "resource_missing",
                    "message": "No such checkout.session: 'cs_gone'"
                }
            })))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test_123", server.uri()).unwrap();
        let err = gateway
            .retrieve_session("cs_gone", &[])
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn resource_missing_code_is_not_found_even_without_404() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_weird"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "type": "invalid_request_error",
                    "code": "resource_missing",
                    "message": "No such checkout.session: 'cs_weird'"
                }
            })))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test_123", server.uri()).unwrap();
        let err = gateway.retrieve_session("cs_weird", &[]).await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn api_errors_keep_status_and_code() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "type": "invalid_request_error",
                    "code": "parameter_invalid_integer",
                    "message": "Invalid integer: -1"
                }
            })))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test_123", server.uri()).unwrap();
        let err = gateway.create_session(sample_request()).await.unwrap_err();

        match err {
            GatewayError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "parameter_invalid_integer");
                assert_eq!(message, "Invalid integer: -1");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_error_body_still_classifies() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_html"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test_123", server.uri()).unwrap();
        let err = gateway.retrieve_session("cs_html", &[]).await.unwrap_err();

        match err {
            GatewayError::Api { status, code, .. } => {
                assert_eq!(status, 502);
                assert_eq!(code, "unknown");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
}
