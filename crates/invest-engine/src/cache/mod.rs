//! Portfolio Cache
//!
//! Expendable copies of prices, summaries, pages and average prices, keyed
//! by portfolio, ticker or page. Every entry expires after the configured
//! TTL. A miss is never an error for callers; they go to the source of truth.

mod memory;

pub use memory::MemoryCache;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::CacheError;
use crate::model::{EnrichedStock, PortfolioId, PortfolioSummary, StockInfo};

pub type CacheResult<T> = std::result::Result<T, CacheError>;

#[async_trait]
pub trait PortfolioCache: Send + Sync {
    async fn stock_info(&self, ticker: &str) -> CacheResult<StockInfo>;

    /// All requested tickers, or `Miss` if any one is absent
    async fn stocks_info(&self, tickers: &[String]) -> CacheResult<HashMap<String, StockInfo>>;

    async fn set_stocks(&self, stocks: &[StockInfo]) -> CacheResult<()>;

    async fn portfolio_stock(&self, portfolio_id: PortfolioId, ticker: &str)
    -> CacheResult<EnrichedStock>;

    async fn set_portfolio_stock(&self, stock: &EnrichedStock) -> CacheResult<()>;

    async fn portfolio_page(&self, portfolio_id: PortfolioId, page: i64)
    -> CacheResult<Vec<EnrichedStock>>;

    async fn set_portfolio_page(
        &self,
        portfolio_id: PortfolioId,
        page: i64,
        stocks: &[EnrichedStock],
    ) -> CacheResult<()>;

    async fn summary(&self, portfolio_id: PortfolioId) -> CacheResult<PortfolioSummary>;

    async fn set_summary(&self, summary: &PortfolioSummary) -> CacheResult<()>;

    async fn avg_price(&self, portfolio_id: PortfolioId, ticker: &str) -> CacheResult<Decimal>;

    /// All requested tickers, or `Miss` if any one is absent
    async fn avg_prices(
        &self,
        portfolio_id: PortfolioId,
        tickers: &[String],
    ) -> CacheResult<HashMap<String, Decimal>>;

    async fn set_avg_prices(
        &self,
        portfolio_id: PortfolioId,
        prices: &HashMap<String, Decimal>,
    ) -> CacheResult<()>;

    /// Drop every entry that belongs to the portfolio
    async fn flush_portfolio(&self, portfolio_id: PortfolioId) -> CacheResult<()>;

    async fn flush_summary(&self, portfolio_id: PortfolioId) -> CacheResult<()>;

    async fn flush_pages(&self, portfolio_id: PortfolioId) -> CacheResult<()>;
}
