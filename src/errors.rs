use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::request_id::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Standard JSON error body returned by every endpoint except the two
/// checkout routes, which have their own response contracts.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Missing required fields: {0:?}")]
    MissingCheckoutFields(Vec<String>),

    #[error("{0}")]
    MalformedCartPayload(String),

    #[error("{0}")]
    InvalidLineItem(String),

    #[error("No checkout session id provided")]
    MissingSessionId,

    #[error("Invalid checkout session id: {0}")]
    MalformedSessionId(String),

    #[error("Checkout session not found: {0}")]
    SessionNotFound(String),

    #[error("Session retrieval failed after {attempts} attempts")]
    SessionRetrievalFailed { attempts: u32 },

    #[error("Payment not completed (status: {0})")]
    PaymentIncomplete(String),

    #[error("Session metadata missing required key: {0}")]
    MissingSessionMetadata(String),

    #[error("Cart data could not be reconstructed: {0}")]
    CartDataCorrupted(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<crate::gateway::GatewayError> for ServiceError {
    fn from(err: crate::gateway::GatewayError) -> Self {
        if err.is_not_found() {
            ServiceError::NotFound(err.to_string())
        } else {
            ServiceError::ExternalServiceError(err.to_string())
        }
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) | Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidInput(_)
            | Self::InvalidOperation(_)
            | Self::MissingCheckoutFields(_)
            | Self::MalformedCartPayload(_)
            | Self::InvalidLineItem(_)
            | Self::MissingSessionId
            | Self::MalformedSessionId(_) => StatusCode::BAD_REQUEST,
            Self::PaymentIncomplete(_) => StatusCode::PAYMENT_REQUIRED,
            Self::MissingSessionMetadata(_) | Self::CartDataCorrupted(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ExternalServiceError(_) | Self::SessionRetrievalFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Conflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::InternalError(_) | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::Other(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }

    /// Maps this error to the stable code carried on the payment-result
    /// redirect. Errors outside the reconciliation taxonomy collapse to
    /// `processing_failed`.
    pub fn redirect_code(&self) -> &'static str {
        match self {
            Self::MissingSessionId => "no_session",
            Self::MalformedSessionId(_) => "invalid_session",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionRetrievalFailed { .. } => "session_retrieval_failed",
            Self::PaymentIncomplete(_) => "payment_not_completed",
            Self::MissingSessionMetadata(_) => "missing_metadata",
            Self::CartDataCorrupted(_) => "data_parsing_failed",
            _ => "processing_failed",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = self.response_message();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: error_message,
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
