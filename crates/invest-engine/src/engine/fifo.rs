//! FIFO Cost Ledger
//!
//! Every buy opens a purchase lot. Sells consume lots oldest-first: a lot
//! that is fully covered is deleted, the first one that is not is reduced in
//! place. Selling more than the lots hold fails the whole trade.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;

use super::{EngineContext, log_cache_fallback, log_flush_failure, spawn_cache_write};
use crate::error::{InvestError, Result};
use crate::model::{NewLot, PortfolioId, PurchaseLot, StockInfo, StockOperation};

/// Lot changes produced by a sell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FifoConsumption {
    /// Lots consumed entirely
    pub deleted: Vec<i64>,

    /// Lot consumed partially: `(row_id, remaining quantity)`
    pub reduced: Option<(i64, i64)>,
}

impl FifoConsumption {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.reduced.is_none()
    }
}

/// Walk `lots` oldest-first and consume `sell_quantity` shares
pub fn consume_oldest(
    ticker: &str,
    lots: &[PurchaseLot],
    sell_quantity: i64,
) -> Result<FifoConsumption> {
    let mut ordered: Vec<&PurchaseLot> = lots.iter().collect();
    ordered.sort_by_key(|lot| lot.row_id);

    let mut remaining = sell_quantity;
    let mut consumption = FifoConsumption::default();

    for lot in ordered {
        if remaining <= 0 {
            break;
        }
        if remaining >= lot.quantity {
            consumption.deleted.push(lot.row_id);
            remaining -= lot.quantity;
        } else {
            consumption.reduced = Some((lot.row_id, lot.quantity - remaining));
            remaining = 0;
        }
    }

    if remaining > 0 {
        return Err(InvestError::InsufficientRemainings {
            ticker: ticker.to_string(),
            missing: remaining,
        });
    }

    Ok(consumption)
}

/// Trades, lots and average purchase prices
#[derive(Clone)]
pub struct CostLedger {
    ctx: EngineContext,
}

impl CostLedger {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Record a buy (`quantity > 0`) or sell (`quantity < 0`) at `price`.
    ///
    /// The quantity change, the history entry and the lot changes commit
    /// together or not at all.
    pub async fn record_trade(
        &self,
        portfolio_id: PortfolioId,
        info: &StockInfo,
        quantity: i64,
        price: Decimal,
    ) -> Result<()> {
        if quantity == 0 {
            return Err(InvestError::Validation("quantity must not be zero".into()));
        }

        let ticker = info.ticker.as_str();
        let operation = StockOperation::new(portfolio_id, info, quantity, price);

        let mut tx = self.ctx.ledger.begin().await?;
        tx.adjust_quantity(portfolio_id, ticker, quantity).await?;
        tx.insert_operations(std::slice::from_ref(&operation)).await?;

        if quantity < 0 {
            let lots = tx.lots_for_update(portfolio_id, ticker).await?;
            let consumption = consume_oldest(ticker, &lots, -quantity).inspect_err(|e| {
                tracing::error!(portfolio_id, ticker, error = %e, "sell exceeds purchase lots");
            })?;

            if !consumption.deleted.is_empty() {
                tx.delete_lots(&consumption.deleted).await?;
            }
            if let Some((row_id, remaining)) = consumption.reduced {
                tx.decrease_lot(row_id, remaining).await?;
            }
        } else {
            tx.insert_lots(&[NewLot {
                portfolio_id,
                ticker: ticker.to_string(),
                quantity,
                price,
            }])
            .await?;
        }

        tx.commit().await?;

        tracing::info!(portfolio_id, ticker, quantity, %price, "trade recorded");

        self.refresh_after_trade(portfolio_id, &[ticker.to_string()])
            .await;
        Ok(())
    }

    /// Flush the portfolio cache, then store fresh average prices.
    ///
    /// Runs after a commit; failures are logged because the ledger already
    /// holds the truth.
    pub(crate) async fn refresh_after_trade(&self, portfolio_id: PortfolioId, tickers: &[String]) {
        if let Err(e) = self.ctx.cache.flush_portfolio(portfolio_id).await {
            log_flush_failure(portfolio_id, &e);
        }

        match self
            .ctx
            .ledger
            .average_purchase_prices(portfolio_id, tickers)
            .await
        {
            Ok(prices) => {
                if let Err(e) = self.ctx.cache.set_avg_prices(portfolio_id, &prices).await {
                    tracing::warn!(portfolio_id, error = %e, "can't cache average prices");
                }
            }
            Err(e) => {
                tracing::warn!(portfolio_id, error = %e, "can't compute average prices");
            }
        }
    }

    /// Average buy price of one ticker, cache first
    pub async fn avg_price(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<Decimal> {
        match self.ctx.cache.avg_price(portfolio_id, ticker).await {
            Ok(price) => return Ok(price),
            Err(e) => log_cache_fallback("avg_price", &e),
        }

        let price = self
            .ctx
            .ledger
            .average_purchase_price(portfolio_id, ticker)
            .await?;

        let cache = Arc::clone(&self.ctx.cache);
        let cached = HashMap::from([(ticker.to_string(), price)]);
        spawn_cache_write("avg_price", async move {
            cache.set_avg_prices(portfolio_id, &cached).await
        });

        Ok(price)
    }

    /// Average buy prices of several tickers, cache first
    pub async fn avg_prices(
        &self,
        portfolio_id: PortfolioId,
        tickers: &[String],
    ) -> Result<HashMap<String, Decimal>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }

        match self.ctx.cache.avg_prices(portfolio_id, tickers).await {
            Ok(prices) => return Ok(prices),
            Err(e) => log_cache_fallback("avg_prices", &e),
        }

        let prices = self
            .ctx
            .ledger
            .average_purchase_prices(portfolio_id, tickers)
            .await?;

        let cache = Arc::clone(&self.ctx.cache);
        let cached = prices.clone();
        spawn_cache_write("avg_prices", async move {
            cache.set_avg_prices(portfolio_id, &cached).await
        });

        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn lot(row_id: i64, quantity: i64) -> PurchaseLot {
        PurchaseLot {
            row_id,
            portfolio_id: 1,
            ticker: "SBER".into(),
            quantity,
            price: dec!(250),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_partial_sell_reduces_oldest_lot() {
        let lots = [lot(1, 10), lot(2, 5)];
        let consumption = consume_oldest("SBER", &lots, 4).unwrap();

        assert!(consumption.deleted.is_empty());
        assert_eq!(consumption.reduced, Some((1, 6)));
    }

    #[test]
    fn test_sell_spanning_lots() {
        let lots = [lot(1, 10), lot(2, 5), lot(3, 7)];
        let consumption = consume_oldest("SBER", &lots, 12).unwrap();

        assert_eq!(consumption.deleted, vec![1]);
        assert_eq!(consumption.reduced, Some((2, 3)));
    }

    #[test]
    fn test_exact_sell_deletes_without_reduce() {
        let lots = [lot(2, 5), lot(1, 10)];
        let consumption = consume_oldest("SBER", &lots, 15).unwrap();

        assert_eq!(consumption.deleted, vec![1, 2]);
        assert!(consumption.reduced.is_none());
    }

    #[test]
    fn test_oversell_reports_missing_shares() {
        let lots = [lot(1, 10)];
        let err = consume_oldest("SBER", &lots, 13).unwrap_err();

        assert!(matches!(
            err,
            InvestError::InsufficientRemainings { ref ticker, missing: 3 } if ticker == "SBER"
        ));
        assert!(consume_oldest("SBER", &[], 1).is_err());
    }

    #[test]
    fn test_zero_sell_is_empty() {
        assert!(consume_oldest("SBER", &[lot(1, 10)], 0).unwrap().is_empty());
    }
}
