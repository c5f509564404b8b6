//! Error handling for the gateway
//!
//! A single error taxonomy is shared by the adapters, the router, and the
//! HTTP surface. Every variant knows its HTTP status, its OpenAI-style
//! `type` string, and whether the router may retry it.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or invalid bearer token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Model not allowed for the key, or scope mismatch
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Unknown model or resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream 429 or internal quota hit
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    /// Schema or parameter violation
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Prompt exceeds the model context window
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    /// Provider safety systems rejected the request
    #[error("Content policy violation: {0}")]
    ContentPolicyViolation(String),

    /// Deadline exceeded (client-side or upstream 504)
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Transport-level failure reaching the provider
    #[error("Connection error: {0}")]
    Connection(String),

    /// Upstream 503 or provider reports overloaded
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Other upstream API error
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Key/user/team/org spend reached its budget
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// No adapter or deployment can serve the model
    #[error("Model not supported: {0}")]
    ModelNotSupported(String),

    /// Router exhausted all candidates without a single dispatch
    #[error("Routing error: {0}")]
    Router(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key decryption / crypto errors
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Internal server errors
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn model_not_supported(model: impl Into<String>) -> Self {
        Self::ModelNotSupported(format!("Model '{}' is not supported", model.into()))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto(message.into())
    }

    /// Whether the router's retry loop may attempt another deployment
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. }
                | Self::Timeout(_)
                | Self::Connection(_)
                | Self::ServiceUnavailable(_)
                | Self::Api { .. }
        )
    }

    /// Retry-After seconds for rate-limited responses
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// OpenAI-compatible `error.type` string
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_error",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::RateLimit { .. } => "rate_limit_error",
            Self::BadRequest(_) => "invalid_request_error",
            Self::ContextLengthExceeded(_) => "context_length_exceeded",
            Self::ContentPolicyViolation(_) => "content_policy_violation",
            Self::Timeout(_) => "timeout_error",
            Self::Connection(_) => "connection_error",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Api { .. } => "api_error",
            Self::BudgetExceeded(_) => "budget_exceeded",
            Self::ModelNotSupported(_) => "model_not_supported",
            Self::Router(_) => "router_error",
            Self::Config(_) => "configuration_error",
            Self::Database(_) => "database_error",
            Self::Serialization(_) => "parsing_error",
            Self::Crypto(_) => "crypto_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status code surfaced to the client
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimit { .. } | Self::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_)
            | Self::ContextLengthExceeded(_)
            | Self::ContentPolicyViolation(_)
            | Self::ModelNotSupported(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Connection(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) | Self::Router(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Api { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Config(_)
            | Self::Database(_)
            | Self::Serialization(_)
            | Self::Crypto(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Map an upstream HTTP status plus response body to the gateway taxonomy.
///
/// Providers that need finer distinctions (e.g. Anthropic `overloaded`)
/// inspect the body first and fall back to this.
pub fn map_http_status(status: u16, message: &str, body: Option<&serde_json::Value>) -> GatewayError {
    // Provider error bodies can refine 400s into specific kinds
    if let Some(error_obj) = body.and_then(|b| b.get("error")) {
        let error_type = error_obj
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        let error_code = error_obj
            .get("code")
            .and_then(|c| c.as_str())
            .unwrap_or_default();

        if error_type.contains("context_length") || error_code.contains("context_length") {
            return GatewayError::ContextLengthExceeded(message.to_string());
        }
        if error_type.contains("content_policy") || error_code.contains("content_policy") {
            return GatewayError::ContentPolicyViolation(message.to_string());
        }
    }

    match status {
        400 => GatewayError::BadRequest(message.to_string()),
        401 => GatewayError::Authentication(message.to_string()),
        403 => GatewayError::PermissionDenied(message.to_string()),
        404 => GatewayError::NotFound(message.to_string()),
        429 => GatewayError::rate_limit(message, None),
        503 => GatewayError::ServiceUnavailable(message.to_string()),
        504 => GatewayError::Timeout(message.to_string()),
        500 | 502 => GatewayError::api(status, message),
        _ => GatewayError::api(status, message),
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// OpenAI-compatible error response body
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Inner error object
#[derive(Debug, serde::Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        self.to_http_status()
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.to_http_status();
        let body = ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                error_type: self.error_type().to_string(),
                code: status.as_u16().to_string(),
                param: None,
            },
        };

        let mut builder = HttpResponse::build(status);
        if let Some(seconds) = self.retry_after() {
            builder.insert_header(("Retry-After", seconds.to_string()));
        }
        builder.json(body)
    }
}
