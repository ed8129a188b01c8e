use thiserror::Error;

/// Errors raised by the exchange, signal and persistence adapters
#[derive(Error, Debug)]
pub enum BotError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Exchange rejected request ({status}): {message}")]
    Exchange { status: u16, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Market not found: {0}")]
    MarketNotFound(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),
}

impl BotError {
    /// True for failures worth retrying on the next tick (network, timeouts, 5xx)
    pub fn is_transient(&self) -> bool {
        match self {
            BotError::Http(_) | BotError::WebSocket(_) | BotError::Timeout(_) => true,
            BotError::Exchange { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
