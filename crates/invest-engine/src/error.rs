//! Error Types for the Invest Engine

use thiserror::Error;

use crate::model::EnrichedStock;

pub type Result<T> = std::result::Result<T, InvestError>;

#[derive(Error, Debug)]
pub enum InvestError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stock {0} is not traded")]
    StockNotActive(String),

    /// Market data is unavailable; carries what the ledger knows
    #[error("Actual market data for {} is unavailable", .0.ticker)]
    ActualStockInfoUnavailable(Box<EnrichedStock>),

    #[error("Insufficient remainings of {ticker}: {missing} shares not covered by lots")]
    InsufficientRemainings { ticker: String, missing: i64 },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Price source error: {0}")]
    PriceSource(String),

    #[error("Unexpected market data payload: {0}")]
    Decode(String),

    #[error("Ledger store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InvestError {
    /// Check if the failure is transient and the call may be repeated
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::PriceSource(_)
                | Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
        )
    }

    /// Whether the error is a missing entity rather than a failure
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Convert to a message suitable for a chat reply
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(what) => format!("{what} was not found."),
            Self::StockNotActive(ticker) => format!("{ticker} is not traded at the moment."),
            Self::ActualStockInfoUnavailable(stock) => {
                format!("Current market data for {} is unavailable.", stock.ticker)
            }
            Self::InsufficientRemainings { ticker, .. } => {
                format!("You do not hold enough {ticker} to sell that many shares.")
            }
            Self::Validation(msg) => msg.clone(),
            Self::PriceSource(_) | Self::Network(_) | Self::Decode(_) => {
                "The exchange is not responding. Please try again later.".into()
            }
            _ => "An unexpected error occurred.".into(),
        }
    }
}

/// Cache failures never reach callers; the engine falls back to the source of truth
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache miss")]
    Miss,

    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheError {
    pub const fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<InvestError> for chat_core::ChatError {
    fn from(err: InvestError) -> Self {
        Self::ToolExecution(err.user_message())
    }
}
