//! Payment gateway abstraction for hosted checkout.
//!
//! The service never renders a payment page itself; it creates a session
//! with an external gateway, redirects the customer there, and later
//! retrieves the session to verify the payment outcome. [`CheckoutGateway`]
//! is the seam between that flow and the wire protocol; [`StripeGateway`]
//! is the production implementation.

pub mod stripe;

pub use stripe::StripeGateway;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Prefix every legitimate checkout session id carries.
pub const SESSION_ID_PREFIX: &str = "cs_";

/// Errors surfaced by gateway operations, classified by how callers
/// should react to them.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway does not know the referenced resource. Never retried.
    #[error("gateway resource not found: {0}")]
    NotFound(String),

    /// The gateway rejected the request with a structured error.
    #[error("gateway API error (status {status}, code {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced an HTTP response.
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered 2xx with a body we could not interpret.
    #[error("gateway response could not be decoded: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// One line item on a checkout session, priced in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: i64,
}

/// Everything the gateway needs to open a hosted checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub line_items: Vec<LineItem>,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Unix timestamp (seconds) after which the session expires
    pub expires_at: i64,
    /// String-only key/value pairs echoed back verbatim on retrieval
    pub metadata: BTreeMap<String, String>,
}

/// Gateway view of a checkout session, shared between creation and
/// retrieval responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySession {
    pub id: String,
    /// Hosted payment page URL; present on freshly created sessions
    pub url: Option<String>,
    /// Verbatim gateway payment status, e.g. "paid" or "unpaid"
    pub payment_status: String,
    /// Total charged, in minor currency units
    pub amount_total: Option<i64>,
    pub payment_intent_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Opens a hosted checkout session and returns its id and payment URL.
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, GatewayError>;

    /// Fetches a session by id, expanding the named sub-objects.
    async fn retrieve_session(
        &self,
        session_id: &str,
        expand: &[&str],
    ) -> Result<GatewaySession, GatewayError>;
}
