//! Background Jobs
//!
//! Periodic market-price refresh. The job only replaces price entries in
//! the cache and never touches the ledger.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::engine::EngineContext;
use crate::error::{InvestError, Result};

/// Fetch every listed security and store it in the price cache.
///
/// Returns the number of securities cached.
pub async fn refresh_market_cache(ctx: &EngineContext) -> Result<usize> {
    let stocks = ctx.prices.all_stocks_info().await?;

    ctx.cache
        .set_stocks(&stocks)
        .await
        .map_err(|e| InvestError::Store(format!("can't store market data in cache: {e}")))?;

    tracing::debug!(source = ctx.prices.name(), stocks = stocks.len(), "market cache refreshed");
    Ok(stocks.len())
}

/// Refresh the market cache now and then every `period`.
///
/// Failures are logged and the schedule is kept. Abort the handle to stop.
pub fn spawn_market_refresh(ctx: EngineContext, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match refresh_market_cache(&ctx).await {
                Ok(count) => tracing::info!(stocks = count, "market prices refreshed"),
                Err(e) => tracing::error!(error = %e, "market price refresh failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cache::{MemoryCache, PortfolioCache};
    use crate::config::InvestConfig;
    use crate::ledger::MemoryLedger;
    use crate::price::FixedPriceSource;

    fn context(prices: Arc<FixedPriceSource>) -> (EngineContext, Arc<MemoryCache>) {
        let config = InvestConfig::default();
        let cache = Arc::new(MemoryCache::new(config.cache_ttl_chrono()));
        let ctx = EngineContext::new(prices, Arc::new(MemoryLedger::new()), cache.clone(), config);
        (ctx, cache)
    }

    #[tokio::test]
    async fn test_refresh_fills_price_cache() {
        let (ctx, cache) = context(Arc::new(FixedPriceSource::new()));

        let count = refresh_market_cache(&ctx).await.unwrap();
        assert_eq!(count, 7);
        assert_eq!(cache.stock_info("LKOH").await.unwrap().lot_size, 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_cache_untouched() {
        let prices = Arc::new(FixedPriceSource::new());
        let (ctx, cache) = context(prices.clone());
        prices.set_offline(true);

        assert!(refresh_market_cache(&ctx).await.unwrap_err().is_retryable());
        assert!(cache.is_empty());
    }
}
