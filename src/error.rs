//! Error types for the content gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error types that can occur inside the gateway and the streaming proxy
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Upstream returned 4xx error: {status} - {message}")]
    UpstreamClientError { status: u16, message: String },

    #[error("Upstream returned 5xx error: {status} - {message}")]
    UpstreamServerError { status: u16, message: String },

    #[error("Network timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Malformed upstream payload: {0}")]
    MalformedPayload(String),

    #[error("Missing parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Video source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid byte range: {0}")]
    InvalidRange(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_connect() {
            GatewayError::Connection(err.to_string())
        } else if err.is_decode() {
            GatewayError::MalformedPayload(err.to_string())
        } else if let Some(status) = err.status() {
            GatewayError::from_http_status(status.as_u16(), err.to_string())
        } else {
            GatewayError::HttpError(err.to_string())
        }
    }
}

impl GatewayError {
    /// Determine if this error is transient and worth another attempt
    ///
    /// Connection resets, DNS failures, timeouts and 5xx responses are retried.
    /// 4xx responses and payloads that do not match the expected envelope are
    /// permanent for the lifetime of the request.
    pub fn should_retry(&self) -> bool {
        match self {
            GatewayError::UpstreamServerError { .. } => true,
            GatewayError::Timeout(_) => true,
            GatewayError::Connection(_) => true,
            GatewayError::HttpError(_) => true,

            GatewayError::UpstreamClientError { .. } => false,
            GatewayError::MalformedPayload(_) => false,
            GatewayError::ConfigError(_) => false,
            GatewayError::MissingParameter(_) => false,
            GatewayError::UnknownEndpoint(_) => false,
            GatewayError::InvalidUrl(_) => false,
            GatewayError::SourceNotFound(_) => false,
            GatewayError::InvalidRange(_) => false,
            GatewayError::ParseError(_) => false,
            GatewayError::IoError(_) => false,
            GatewayError::InternalError(_) => false,
        }
    }

    /// Convert error to HTTP status code
    ///
    /// Upstream 4xx codes pass through, other upstream failures become 502,
    /// timeouts 504, and a missing video source 404.
    pub fn to_http_status(&self) -> u16 {
        match self {
            GatewayError::UpstreamClientError { status, .. } => *status,
            GatewayError::UpstreamServerError { .. } => 502,
            GatewayError::Connection(_) => 502,
            GatewayError::HttpError(_) => 502,
            GatewayError::MalformedPayload(_) => 502,
            GatewayError::Timeout(_) => 504,

            GatewayError::SourceNotFound(_) => 404,

            GatewayError::InvalidUrl(_) => 400,
            GatewayError::ParseError(_) => 400,
            GatewayError::MissingParameter(_) => 400,
            GatewayError::UnknownEndpoint(_) => 400,

            GatewayError::InvalidRange(_) => 416,

            GatewayError::ConfigError(_) => 500,
            GatewayError::IoError(_) => 500,
            GatewayError::InternalError(_) => 500,
        }
    }

    /// Create an UpstreamClientError from a status code and message
    pub fn upstream_client_error(status: u16, message: impl Into<String>) -> Self {
        GatewayError::UpstreamClientError {
            status,
            message: message.into(),
        }
    }

    /// Create an UpstreamServerError from a status code and message
    pub fn upstream_server_error(status: u16, message: impl Into<String>) -> Self {
        GatewayError::UpstreamServerError {
            status,
            message: message.into(),
        }
    }

    /// Create an error from an HTTP status code
    ///
    /// Automatically categorizes as 4xx or 5xx error
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            GatewayError::upstream_client_error(status, message)
        } else if (500..600).contains(&status) {
            GatewayError::upstream_server_error(status, message)
        } else {
            GatewayError::HttpError(format!("HTTP {}: {}", status, message))
        }
    }
}
