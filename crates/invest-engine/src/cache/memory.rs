//! In-memory TTL cache
//!
//! Values are stored serialized, the same way a networked cache would hold
//! them, so what comes back is always an independent copy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Serialize, de::DeserializeOwned};

use super::{CacheResult, PortfolioCache};
use crate::error::CacheError;
use crate::model::{EnrichedStock, PortfolioId, PortfolioSummary, StockInfo};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheKey {
    Stock(String),
    PortfolioStock(PortfolioId, String),
    PortfolioPage(PortfolioId, i64),
    Summary(PortfolioId),
    AvgPrice(PortfolioId, String),
}

impl CacheKey {
    const fn portfolio_id(&self) -> Option<PortfolioId> {
        match self {
            Self::Stock(_) => None,
            Self::PortfolioStock(id, _)
            | Self::PortfolioPage(id, _)
            | Self::Summary(id)
            | Self::AvgPrice(id, _) => Some(*id),
        }
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

/// Thread-safe cache with a single expiration for all entries
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all expired entries
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| now < entry.expires_at);
    }

    fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<T> {
        let Some(entry) = self.entries.get(key) else {
            return Err(CacheError::Miss);
        };

        if Utc::now() >= entry.expires_at {
            // Release the shard lock before removing
            drop(entry);
            self.entries.remove(key);
            return Err(CacheError::Miss);
        }

        Ok(serde_json::from_value(entry.value.clone())?)
    }

    fn put<T: Serialize + ?Sized>(&self, key: CacheKey, value: &T) -> CacheResult<()> {
        let entry = CacheEntry {
            value: serde_json::to_value(value)?,
            expires_at: Utc::now() + self.ttl,
        };
        self.entries.insert(key, entry);
        Ok(())
    }
}

#[async_trait]
impl PortfolioCache for MemoryCache {
    async fn stock_info(&self, ticker: &str) -> CacheResult<StockInfo> {
        self.get(&CacheKey::Stock(ticker.to_string()))
    }

    async fn stocks_info(&self, tickers: &[String]) -> CacheResult<HashMap<String, StockInfo>> {
        tickers
            .iter()
            .map(|t| Ok((t.clone(), self.get(&CacheKey::Stock(t.clone()))?)))
            .collect()
    }

    async fn set_stocks(&self, stocks: &[StockInfo]) -> CacheResult<()> {
        for stock in stocks {
            self.put(CacheKey::Stock(stock.ticker.clone()), stock)?;
        }
        Ok(())
    }

    async fn portfolio_stock(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> CacheResult<EnrichedStock> {
        self.get(&CacheKey::PortfolioStock(portfolio_id, ticker.to_string()))
    }

    async fn set_portfolio_stock(&self, stock: &EnrichedStock) -> CacheResult<()> {
        self.put(
            CacheKey::PortfolioStock(stock.portfolio_id, stock.ticker.clone()),
            stock,
        )
    }

    async fn portfolio_page(
        &self,
        portfolio_id: PortfolioId,
        page: i64,
    ) -> CacheResult<Vec<EnrichedStock>> {
        self.get(&CacheKey::PortfolioPage(portfolio_id, page))
    }

    async fn set_portfolio_page(
        &self,
        portfolio_id: PortfolioId,
        page: i64,
        stocks: &[EnrichedStock],
    ) -> CacheResult<()> {
        self.put(CacheKey::PortfolioPage(portfolio_id, page), stocks)
    }

    async fn summary(&self, portfolio_id: PortfolioId) -> CacheResult<PortfolioSummary> {
        self.get(&CacheKey::Summary(portfolio_id))
    }

    async fn set_summary(&self, summary: &PortfolioSummary) -> CacheResult<()> {
        self.put(CacheKey::Summary(summary.portfolio_id), summary)
    }

    async fn avg_price(&self, portfolio_id: PortfolioId, ticker: &str) -> CacheResult<Decimal> {
        self.get(&CacheKey::AvgPrice(portfolio_id, ticker.to_string()))
    }

    async fn avg_prices(
        &self,
        portfolio_id: PortfolioId,
        tickers: &[String],
    ) -> CacheResult<HashMap<String, Decimal>> {
        tickers
            .iter()
            .map(|t| {
                let price = self.get(&CacheKey::AvgPrice(portfolio_id, t.clone()))?;
                Ok((t.clone(), price))
            })
            .collect()
    }

    async fn set_avg_prices(
        &self,
        portfolio_id: PortfolioId,
        prices: &HashMap<String, Decimal>,
    ) -> CacheResult<()> {
        for (ticker, price) in prices {
            self.put(CacheKey::AvgPrice(portfolio_id, ticker.clone()), price)?;
        }
        Ok(())
    }

    async fn flush_portfolio(&self, portfolio_id: PortfolioId) -> CacheResult<()> {
        self.entries
            .retain(|key, _| key.portfolio_id() != Some(portfolio_id));
        Ok(())
    }

    async fn flush_summary(&self, portfolio_id: PortfolioId) -> CacheResult<()> {
        self.entries.remove(&CacheKey::Summary(portfolio_id));
        Ok(())
    }

    async fn flush_pages(&self, portfolio_id: PortfolioId) -> CacheResult<()> {
        self.entries
            .retain(|key, _| !matches!(key, CacheKey::PortfolioPage(id, _) if *id == portfolio_id));
        Ok(())
    }
}
