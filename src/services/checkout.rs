use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CheckoutGateway, CreateSessionRequest, LineItem},
};
use chrono::{Duration, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Turns an untrusted client cart payload plus contact details into a hosted
/// checkout session on the payment gateway.
///
/// Nothing is persisted locally during initiation. The whole cart travels to
/// the gateway inside the session metadata (raw, unparsed) and comes back to
/// us during reconciliation, which is the first time an order row exists.
#[derive(Clone)]
pub struct CheckoutService {
    config: Arc<AppConfig>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn CheckoutGateway>,
}

impl CheckoutService {
    pub fn new(
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn CheckoutGateway>,
    ) -> Self {
        Self {
            config,
            event_sender,
            gateway,
        }
    }

    /// Creates a gateway checkout session for the submitted cart.
    ///
    /// `origin` is the externally visible scheme+host the gateway should
    /// redirect back to. Validation happens strictly before the gateway
    /// call: required fields, then payload shape, then line-item coercion.
    #[instrument(skip(self, input), fields(customer = input.user.as_deref().unwrap_or("")))]
    pub async fn begin_checkout(
        &self,
        input: CheckoutRequest,
        origin: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let mut missing = Vec::new();
        for (key, value) in [
            ("data", &input.data),
            ("user", &input.user),
            ("email", &input.email),
        ] {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                missing.push(key.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(ServiceError::MissingCheckoutFields(missing));
        }

        // Checked non-empty above
        let data = input.data.clone().unwrap_or_default();
        let user = input.user.clone().unwrap_or_default();

        let payload = parse_cart_payload(&data)?;

        let line_items: Vec<LineItem> = payload
            .products
            .iter()
            .map(|product| LineItem {
                name: product.name.clone(),
                unit_amount: product.unit_amount,
                quantity: product.quantity,
            })
            .collect();

        let expires_at =
            (Utc::now() + Duration::minutes(self.config.checkout_session_ttl_minutes)).timestamp();
        let success_url = format!(
            "{}/payment-result?session_id={{CHECKOUT_SESSION_ID}}",
            origin
        );
        let cancel_url = format!("{}/checkout", origin);

        // Gateway metadata is string-only: absent optional fields travel as
        // empty strings, never null.
        let mut metadata = BTreeMap::new();
        metadata.insert("user".to_string(), user.clone());
        metadata.insert("data".to_string(), data);
        for (key, value) in [
            ("fname", &input.fname),
            ("lname", &input.lname),
            ("email", &input.email),
            ("address", &input.address),
            ("city", &input.city),
            ("state", &input.state),
            ("zipcode", &input.zipcode),
            ("notes", &input.notes),
        ] {
            metadata.insert(key.to_string(), value.clone().unwrap_or_default());
        }

        let request = CreateSessionRequest {
            line_items,
            currency: self.config.checkout_currency.clone(),
            success_url,
            cancel_url,
            expires_at,
            metadata,
        };

        let session = self.gateway.create_session(request).await?;

        let url = session.url.clone().ok_or_else(|| {
            ServiceError::ExternalServiceError(
                "Checkout session is missing a redirect URL".to_string(),
            )
        })?;

        if let Err(e) = self
            .event_sender
            .send(Event::CheckoutStarted {
                customer_id: user,
                session_id: session.id.clone(),
            })
            .await
        {
            warn!(error = %e, session_id = %session.id, "Failed to send checkout started event");
        }

        info!("Created checkout session {}", session.id);
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }
}

/// Checkout initiation request body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutRequest {
    pub data: Option<String>,
    pub user: Option<String>,
    pub fname: Option<String>,
    pub lname: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zipcode: Option<String>,
    pub notes: Option<String>,
}

/// Created session handed back to the client for redirection
#[derive(Debug, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// One product entry coerced out of the cart payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CartProduct {
    pub name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    /// Minor currency units, round(price * 100)
    pub unit_amount: i64,
}

/// Parsed client cart: `{"product":{"<name>":[<qty>,<price>],...},
/// "subtotal":...,"total":...}` with subtotal/total optional.
#[derive(Debug, Clone)]
pub(crate) struct CartPayload {
    pub products: Vec<CartProduct>,
    pub subtotal: Option<Decimal>,
    pub total: Option<Decimal>,
}

/// Parses and validates the raw cart string clients submit at checkout and
/// that reconciliation later reads back out of session metadata.
pub(crate) fn parse_cart_payload(raw: &str) -> Result<CartPayload, ServiceError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| {
        ServiceError::MalformedCartPayload("Invalid data format - could not parse JSON".to_string())
    })?;

    let product_map = value
        .get("product")
        .and_then(|v| v.as_object())
        .filter(|map| !map.is_empty())
        .ok_or_else(|| {
            ServiceError::MalformedCartPayload("No products found in cart data".to_string())
        })?;

    let mut products = Vec::with_capacity(product_map.len());
    for (name, entry) in product_map {
        let quantity_raw = entry.get(0).cloned().unwrap_or(Value::Null);
        let price_raw = entry.get(1).cloned().unwrap_or(Value::Null);

        let quantity = coerce_quantity(&quantity_raw)
            .filter(|q| *q > 0)
            .ok_or_else(|| {
                ServiceError::InvalidLineItem(format!(
                    "Invalid quantity for product: {} (got: {})",
                    name, quantity_raw
                ))
            })?;

        let unit_price = coerce_amount(&price_raw).ok_or_else(|| {
            ServiceError::InvalidLineItem(format!(
                "Invalid price for product: {} (got: {})",
                name, price_raw
            ))
        })?;

        let unit_amount = (unit_price * Decimal::from(100))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .filter(|cents| *cents > 0)
            .ok_or_else(|| {
                ServiceError::InvalidLineItem(format!(
                    "Invalid price for product: {} (got: {})",
                    name, price_raw
                ))
            })?;

        products.push(CartProduct {
            name: name.clone(),
            quantity,
            unit_price,
            unit_amount,
        });
    }

    Ok(CartPayload {
        products,
        subtotal: value.get("subtotal").and_then(coerce_amount),
        total: value.get("total").and_then(coerce_amount),
    })
}

/// Positive integers only; accepts integer-valued JSON numbers and strings
/// that parse as one.
fn coerce_quantity(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Money from a JSON number or numeric string.
fn coerce_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_f64_retain(n.as_f64()?),
        Value::String(s) => s.trim().parse::<Decimal>().ok(),
        _ => None,
    }
}
