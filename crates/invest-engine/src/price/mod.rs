//! Market Data
//!
//! Abstractions and implementations for stock price providers.

mod fixed;
mod moex;

pub use fixed::FixedPriceSource;
pub use moex::MoexClient;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::StockInfo;

/// Price provider trait (Strategy pattern)
///
/// `stock_info` reports an unknown ticker as `InvestError::NotFound`, which
/// callers distinguish from transient failures.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current market data for one ticker
    async fn stock_info(&self, ticker: &str) -> Result<StockInfo>;

    /// Market data for several tickers, keyed by ticker; unknown tickers are omitted
    async fn stocks_info(&self, tickers: &[String]) -> Result<HashMap<String, StockInfo>>;

    /// Market data for every security on the board
    async fn all_stocks_info(&self) -> Result<Vec<StockInfo>>;

    /// Provider name
    fn name(&self) -> &str;
}
