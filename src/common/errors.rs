//! Error types for the application

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias using our TraderError
pub type Result<T> = std::result::Result<T, TraderError>;

/// Main error type for trading operations
#[derive(Error, Debug)]
pub enum TraderError {
    /// Connection-level failures (reset, refused, 5xx gateway answers)
    #[error("Network error: {0}")]
    Network(String),

    /// An attempt exceeded its time budget
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded: {message}, retry after {retry_after_seconds:?} seconds")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Filesystem errors (state file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The exchange refused the request parameters
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The account cannot fund the request
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Exchange business error that maps onto no other variant
    #[error("Exchange error {code}: {message}")]
    Exchange { code: i64, message: String },

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// A transient failure survived every retry
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<TraderError>,
    },

    /// Order status could not be observed; flagged for the next reconcile pass
    #[error("Unknown state for order {order_id}: {reason}")]
    UnknownOrderState { order_id: String, reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Sizing would push free balance under the reserve floor
    #[error("Reserve breach: order needs {required}, free {available}, reserve {reserve}")]
    ReserveBreach {
        required: Decimal,
        available: Decimal,
        reserve: Decimal,
    },

    /// Risk manager refused the intent
    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    /// State store failures
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Channel send errors
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TraderError {
    /// Whether the retry wrapper may attempt the operation again.
    ///
    /// Network, timeout and rate-limit failures are transient. Authentication,
    /// parameter and balance problems are fatal and surface immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            TraderError::Network(_) | TraderError::Timeout(_) | TraderError::RateLimit { .. } => {
                true
            }
            TraderError::HttpRequest(err) => {
                if err.is_timeout() || err.is_connect() {
                    return true;
                }
                err.status()
                    .map(|status| status.is_server_error() || status.as_u16() == 429)
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Short machine-friendly name used in log fields and notifications
    pub fn kind(&self) -> &'static str {
        match self {
            TraderError::Network(_) => "network",
            TraderError::Timeout(_) => "timeout",
            TraderError::RateLimit { .. } => "rate_limit",
            TraderError::HttpRequest(_) => "http",
            TraderError::JsonParse(_) => "json",
            TraderError::Io(_) => "io",
            TraderError::Authentication(_) => "authentication",
            TraderError::InvalidParameter(_) => "invalid_parameter",
            TraderError::InsufficientBalance(_) => "insufficient_balance",
            TraderError::Exchange { .. } => "exchange",
            TraderError::InvalidResponse(_) => "invalid_response",
            TraderError::RetriesExhausted { .. } => "retries_exhausted",
            TraderError::UnknownOrderState { .. } => "unknown_order_state",
            TraderError::ConfigInvalid(_) => "config_invalid",
            TraderError::ReserveBreach { .. } => "reserve_breach",
            TraderError::RiskLimitExceeded(_) => "risk_limit",
            TraderError::Persistence(_) => "persistence",
            TraderError::ChannelSend(_) => "channel_send",
            TraderError::Internal(_) => "internal",
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for TraderError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        TraderError::ChannelSend(err.to_string())
    }
}
