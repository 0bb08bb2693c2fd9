#[cfg(feature = "server")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
#[cfg(feature = "server")]
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolkitError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported TLD: {0}")]
    UnsupportedTld(String),

    #[error("Network timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] tokio::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Response too large")]
    ResponseTooLarge,

    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("{service} returned HTTP {status}")]
    Upstream { service: String, status: u16 },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("AI classifier unavailable: {0}")]
    AiUnavailable(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ToolkitError {
    /// Short label used for error metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolkitError::InvalidDomain(_) => "invalid_domain",
            ToolkitError::InvalidInput(_) => "invalid_input",
            ToolkitError::UnsupportedTld(_) => "unsupported_tld",
            ToolkitError::Timeout => "timeout",
            ToolkitError::IoError(_) => "io_error",
            ToolkitError::HttpError(_) => "http_error",
            ToolkitError::ResponseTooLarge => "response_too_large",
            ToolkitError::ConfigError(_) => "config_error",
            ToolkitError::CacheError(_) => "cache_error",
            ToolkitError::Upstream { .. } => "upstream",
            ToolkitError::RateLimited(_) => "rate_limited",
            ToolkitError::AiUnavailable(_) => "ai_unavailable",
            ToolkitError::Tls(_) => "tls",
            ToolkitError::Internal(_) => "other",
        }
    }
}

impl From<tokio::time::error::Elapsed> for ToolkitError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ToolkitError::Timeout
    }
}

#[cfg(feature = "server")]
impl IntoResponse for ToolkitError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ToolkitError::InvalidDomain(_) | ToolkitError::InvalidInput(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ToolkitError::UnsupportedTld(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ToolkitError::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            ToolkitError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ToolkitError::Upstream { .. } | ToolkitError::AiUnavailable(_) | ToolkitError::HttpError(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
