use thiserror::Error;

pub mod auth;
pub mod clob;
pub mod gamma;
pub mod realtime;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("market not found: {0}")]
    MarketNotFound(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("HMAC error: {0}")]
    Hmac(String),

    #[error("EIP-712 error: {0}")]
    Eip712(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Stable code string for structured logs and operator events.
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Http(_) | ClientError::HttpStatus { .. } => "TRANSPORT",
            ClientError::RateLimited(_) => "RATE_LIMITED",
            ClientError::WebSocket(_) => "TRANSPORT",
            ClientError::SerdeJson(_) => "INVALID_RESPONSE",
            ClientError::MarketNotFound(_) => "MARKET_NOT_FOUND",
            ClientError::InvalidResponse(_) => "INVALID_RESPONSE",
            ClientError::Hmac(_) | ClientError::Eip712(_) | ClientError::Config(_) => "CONFIG",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn retryable(&self) -> bool {
        match self {
            ClientError::Http(_) | ClientError::WebSocket(_) | ClientError::RateLimited(_) => true,
            ClientError::HttpStatus { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
