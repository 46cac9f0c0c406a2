//! Engine
//!
//! Stateless components over the three leaf services:
//!
//! - [`Valuation`] - summaries, weights, growth and enriched holdings
//! - [`CostLedger`] - FIFO lots, trades and average purchase prices
//! - [`Allocator`] - whole-lot purchase plans for a cash injection
//!
//! Each component holds an [`EngineContext`]; the numeric core of each is a
//! set of pure functions that the tests drive directly.

pub mod allocator;
pub mod fifo;
pub mod valuation;

pub use allocator::{Allocator, plan_purchase};
pub use fifo::{CostLedger, FifoConsumption, consume_oldest};
pub use valuation::{Valuation, enrich, summarize};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::cache::{CacheResult, PortfolioCache};
use crate::config::InvestConfig;
use crate::error::{InvestError, Result};
use crate::ledger::LedgerStore;
use crate::model::StockInfo;
use crate::price::PriceSource;

/// Shared handles every component works with
#[derive(Clone)]
pub struct EngineContext {
    pub prices: Arc<dyn PriceSource>,
    pub ledger: Arc<dyn LedgerStore>,
    pub cache: Arc<dyn PortfolioCache>,
    pub config: Arc<InvestConfig>,
}

impl EngineContext {
    pub fn new(
        prices: Arc<dyn PriceSource>,
        ledger: Arc<dyn LedgerStore>,
        cache: Arc<dyn PortfolioCache>,
        config: InvestConfig,
    ) -> Self {
        Self {
            prices,
            ledger,
            cache,
            config: Arc::new(config),
        }
    }

    /// Market data for one ticker, cache first.
    ///
    /// An unknown ticker is `InvestError::NotFound`.
    pub async fn stock_info(&self, ticker: &str) -> Result<StockInfo> {
        match self.cache.stock_info(ticker).await {
            Ok(info) => return Ok(info),
            Err(e) => log_cache_fallback("stock_info", &e),
        }

        let info = self.prices.stock_info(ticker).await.inspect_err(|e| {
            if e.is_not_found() {
                tracing::warn!(ticker, "stock not found at price source");
            } else {
                tracing::error!(ticker, error = %e, "can't get stock info from price source");
            }
        })?;

        let cache = Arc::clone(&self.cache);
        let fetched = info.clone();
        spawn_cache_write("stock_info", async move {
            cache.set_stocks(std::slice::from_ref(&fetched)).await
        });

        Ok(info)
    }

    /// Market data for several tickers, cache first; unknown tickers are absent
    pub async fn stocks_info(&self, tickers: &[String]) -> Result<HashMap<String, StockInfo>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }

        match self.cache.stocks_info(tickers).await {
            Ok(map) => return Ok(map),
            Err(e) => log_cache_fallback("stocks_info", &e),
        }

        let map = self.prices.stocks_info(tickers).await.inspect_err(|e| {
            tracing::error!(error = %e, "can't get stocks info from price source");
        })?;

        let cache = Arc::clone(&self.cache);
        let fetched: Vec<StockInfo> = map.values().cloned().collect();
        spawn_cache_write("stocks_info", async move { cache.set_stocks(&fetched).await });

        Ok(map)
    }

    /// Market data for a ticker that must exist, be traded and carry a price
    pub async fn tradable_stock(&self, ticker: &str) -> Result<StockInfo> {
        self.active_stock(ticker, false).await
    }

    /// Like [`Self::tradable_stock`], but a zero market price is accepted when
    /// the caller supplies its own price.
    pub async fn active_stock(&self, ticker: &str, custom_price: bool) -> Result<StockInfo> {
        let info = self.stock_info(ticker).await?;
        if !info.active || (!custom_price && info.price <= Decimal::ZERO) {
            tracing::warn!(
                ticker,
                active = info.active,
                price = %info.price,
                "stock is not tradable"
            );
            return Err(InvestError::StockNotActive(info.ticker));
        }
        Ok(info)
    }
}

/// Populate the cache in the background; failures are logged and dropped
pub(crate) fn spawn_cache_write<F>(what: &'static str, write: F)
where
    F: Future<Output = CacheResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = write.await {
            tracing::warn!(what, error = %e, "cache write failed");
        }
    });
}

pub(crate) fn log_cache_fallback(what: &'static str, err: &crate::error::CacheError) {
    if err.is_miss() {
        tracing::debug!(what, "cache miss");
    } else {
        tracing::warn!(what, error = %err, "cache read failed, using source of truth");
    }
}

pub(crate) fn log_flush_failure(portfolio_id: i64, err: &crate::error::CacheError) {
    tracing::warn!(portfolio_id, error = %err, "can't flush portfolio cache");
}
