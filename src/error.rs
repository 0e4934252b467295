//! Error types for collaborator calls
//!
//! Network and RPC failures are classified so the loops can tell a transient
//! outage (retry next cycle) from a hard rejection. Order rejections from the
//! exchange are parsed from its error text.

use thiserror::Error;

/// Failure talking to the data API, the CLOB or the chain RPC
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("RPC error: {0}")]
    Rpc(String),
}

impl FetchError {
    /// Classify a reqwest failure
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            FetchError::Connect(err.to_string())
        }
    }

    /// Whether the next cycle can reasonably expect a different outcome
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Decode(_) | FetchError::Rpc(_) => false,
        }
    }
}

/// Order rejected by the exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("order could not be fully matched")]
    NoMatch,
    #[error("rate limited")]
    RateLimited,
    #[error("market closed")]
    MarketClosed,
    #[error("order rejected: {0}")]
    Rejected(String),
}

impl OrderError {
    /// Parse the exchange's error message into a structured rejection
    pub fn from_message(message: &str) -> Self {
        let msg_lower = message.to_lowercase();

        if msg_lower.contains("rate limit") || msg_lower.contains("too many requests") {
            return OrderError::RateLimited;
        }

        if msg_lower.contains("insufficient") || msg_lower.contains("not enough balance") {
            return OrderError::InsufficientBalance;
        }

        if msg_lower.contains("fully filled") || msg_lower.contains("killed") || msg_lower.contains("no match") {
            return OrderError::NoMatch;
        }

        if msg_lower.contains("closed") || msg_lower.contains("not accepting") {
            return OrderError::MarketClosed;
        }

        OrderError::Rejected(message.to_string())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::RateLimited)
    }
}
