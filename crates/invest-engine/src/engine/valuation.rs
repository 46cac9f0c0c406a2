//! Valuation Engine
//!
//! Computes the portfolio summary and joins holdings with market data and
//! cost basis.
//!
//! ```text
//! holding value     = price × quantity
//! actual weight     = value / balance_inside_index × 100
//! index offset      = Σ |actual weight − target weight|   (indexed holdings only)
//! growth sum        = (price − avg price) × quantity
//! growth % (group)  = growth sum / (balance − growth sum) × 100
//! growth % (single) = (price − avg price) / avg price × 100
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::fifo::CostLedger;
use super::{EngineContext, log_cache_fallback, spawn_cache_write};
use crate::error::{InvestError, Result};
use crate::model::{
    EnrichedStock, Holding, Portfolio, PortfolioId, PortfolioPage, PortfolioSummary, StockInfo,
    total_pages,
};

const HUNDRED: Decimal = dec!(100);

/// Unrealized gain of a position; zero unless both prices are known
pub fn growth_sum(avg_price: Decimal, price: Decimal, quantity: i64) -> Decimal {
    if avg_price.is_zero() || price.is_zero() {
        return Decimal::ZERO;
    }
    (price - avg_price) * Decimal::from(quantity)
}

/// Price change against the average purchase price, in percent
pub fn growth_percent(avg_price: Decimal, price: Decimal) -> Decimal {
    if avg_price.is_zero() || price.is_zero() {
        return Decimal::ZERO;
    }
    (price - avg_price) / avg_price * HUNDRED
}

/// Gain relative to the invested amount of a group of holdings
fn group_growth_percent(growth: Decimal, balance: Decimal) -> Decimal {
    let invested = balance - growth;
    if invested > Decimal::ZERO {
        growth / invested * HUNDRED
    } else {
        Decimal::ZERO
    }
}

fn weight_of(value: Decimal, balance: Decimal) -> Decimal {
    if balance.is_zero() {
        Decimal::ZERO
    } else {
        value / balance * HUNDRED
    }
}

/// Aggregate holdings into a summary.
///
/// A ticker absent from `prices` contributes zero and is reported in
/// `missing_tickers`.
pub fn summarize(
    portfolio_id: PortfolioId,
    portfolio_name: &str,
    holdings: &[Holding],
    prices: &HashMap<String, StockInfo>,
    avg_prices: &HashMap<String, Decimal>,
) -> PortfolioSummary {
    let mut summary = PortfolioSummary {
        portfolio_id,
        portfolio_name: portfolio_name.to_string(),
        stocks_count: holdings.len(),
        ..PortfolioSummary::default()
    };

    let price_of = |ticker: &str| prices.get(ticker).map_or(Decimal::ZERO, |s| s.price);

    for holding in holdings {
        if !prices.contains_key(&holding.ticker) {
            tracing::warn!(
                portfolio_id,
                ticker = %holding.ticker,
                "no market data for holding, valued at zero"
            );
            summary.missing_tickers.push(holding.ticker.clone());
        }

        let price = price_of(&holding.ticker);
        let value = price * Decimal::from(holding.quantity);
        let avg = avg_prices.get(&holding.ticker).copied().unwrap_or_default();
        let growth = growth_sum(avg, price, holding.quantity);

        if holding.is_index_tracked() {
            summary.balance_inside_index += value;
            summary.total_weight += holding.target_weight;
            summary.growth_sum_inside_index += growth;
        } else {
            summary.balance_outside_index += value;
            summary.stocks_outside_index_count += 1;
            summary.growth_sum_outside_index += growth;
        }
    }

    summary.growth_percent_inside_index =
        group_growth_percent(summary.growth_sum_inside_index, summary.balance_inside_index);
    summary.growth_percent_outside_index =
        group_growth_percent(summary.growth_sum_outside_index, summary.balance_outside_index);

    if summary.balance_inside_index > Decimal::ZERO {
        summary.index_offset = holdings
            .iter()
            .filter(|h| h.is_index_tracked())
            .map(|h| {
                let value = price_of(&h.ticker) * Decimal::from(h.quantity);
                (weight_of(value, summary.balance_inside_index) - h.target_weight).abs()
            })
            .sum();
    }

    summary
}

/// Join one holding with its market data and average price
pub fn enrich_one(
    holding: &Holding,
    info: Option<&StockInfo>,
    avg_price: Decimal,
    balance: Decimal,
) -> EnrichedStock {
    let mut stock = EnrichedStock::from_holding(holding);
    stock.avg_price = avg_price;

    if let Some(info) = info {
        stock.short_name.clone_from(&info.short_name);
        stock.lot_size = info.lot_size;
        stock.currency.clone_from(&info.currency);
        stock.price = info.price;
    }

    stock.total_price = stock.price * Decimal::from(stock.quantity);
    stock.actual_weight = weight_of(stock.total_price, balance);
    stock.growth_sum = growth_sum(avg_price, stock.price, stock.quantity);
    stock.growth_percent = growth_percent(avg_price, stock.price);
    stock
}

/// Join holdings with market data; weights are relative to `balance`
pub fn enrich(
    holdings: &[Holding],
    prices: &HashMap<String, StockInfo>,
    avg_prices: &HashMap<String, Decimal>,
    balance: Decimal,
) -> Vec<EnrichedStock> {
    holdings
        .iter()
        .map(|h| {
            let info = prices.get(&h.ticker);
            if info.is_none() {
                tracing::warn!(ticker = %h.ticker, "no market data for holding");
            }
            let avg = avg_prices.get(&h.ticker).copied().unwrap_or_default();
            enrich_one(h, info, avg, balance)
        })
        .collect()
}

/// Target weights scaled so the positive ones sum to 100
pub fn rebalanced_weights(holdings: &[Holding]) -> Vec<(String, Decimal)> {
    let total: Decimal = holdings
        .iter()
        .filter(|h| h.is_index_tracked())
        .map(|h| h.target_weight)
        .sum();

    if total.is_zero() {
        return Vec::new();
    }

    holdings
        .iter()
        .filter(|h| h.is_index_tracked())
        .map(|h| (h.ticker.clone(), (h.target_weight / total * HUNDRED).normalize()))
        .collect()
}

/// Cache-backed valuation of portfolios
#[derive(Clone)]
pub struct Valuation {
    ctx: EngineContext,
    costs: CostLedger,
}

impl Valuation {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            costs: CostLedger::new(ctx.clone()),
            ctx,
        }
    }

    /// Portfolio summary, cache first
    pub async fn summary(&self, portfolio_id: PortfolioId) -> Result<PortfolioSummary> {
        match self.ctx.cache.summary(portfolio_id).await {
            Ok(summary) => return Ok(summary),
            Err(e) => log_cache_fallback("summary", &e),
        }

        let portfolio = self.ctx.ledger.portfolio(portfolio_id).await?;
        let holdings = self.ctx.ledger.holdings(portfolio_id).await?;
        let tickers = tickers_of(&holdings);
        let prices = self.ctx.stocks_info(&tickers).await?;

        let summary = self.compute_summary(&portfolio, &holdings, &prices).await?;

        if summary.is_partial() {
            tracing::debug!(
                portfolio_id,
                missing = ?summary.missing_tickers,
                "partial summary not cached"
            );
            return Ok(summary);
        }

        let cache = Arc::clone(&self.ctx.cache);
        let cached = summary.clone();
        spawn_cache_write("summary", async move { cache.set_summary(&cached).await });

        Ok(summary)
    }

    /// Summary from already loaded holdings and prices, bypassing the summary cache
    pub async fn compute_summary(
        &self,
        portfolio: &Portfolio,
        holdings: &[Holding],
        prices: &HashMap<String, StockInfo>,
    ) -> Result<PortfolioSummary> {
        let avg_prices = self
            .costs
            .avg_prices(portfolio.id, &tickers_of(holdings))
            .await?;

        Ok(summarize(
            portfolio.id,
            &portfolio.name,
            holdings,
            prices,
            &avg_prices,
        ))
    }

    /// Enrich holdings; prices are fetched when not supplied
    pub async fn enrich_holdings(
        &self,
        portfolio_id: PortfolioId,
        holdings: &[Holding],
        balance: Decimal,
        prices: Option<&HashMap<String, StockInfo>>,
    ) -> Result<Vec<EnrichedStock>> {
        if holdings.is_empty() {
            return Ok(Vec::new());
        }

        let tickers = tickers_of(holdings);
        let fetched;
        let prices = match prices {
            Some(prices) => prices,
            None => {
                fetched = self.ctx.stocks_info(&tickers).await?;
                &fetched
            }
        };
        let avg_prices = self.costs.avg_prices(portfolio_id, &tickers).await?;

        Ok(enrich(holdings, prices, &avg_prices, balance))
    }

    /// One enriched holding, cache first.
    ///
    /// When the price source does not know the ticker the ledger's view is
    /// returned inside `InvestError::ActualStockInfoUnavailable`.
    pub async fn portfolio_stock(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> Result<EnrichedStock> {
        match self.ctx.cache.portfolio_stock(portfolio_id, ticker).await {
            Ok(stock) => return Ok(stock),
            Err(e) => log_cache_fallback("portfolio_stock", &e),
        }

        let summary = self.summary(portfolio_id).await?;
        let holding = self.ctx.ledger.holding(portfolio_id, ticker).await?;

        let info = match self.ctx.stock_info(ticker).await {
            Ok(info) => info,
            Err(InvestError::NotFound(_)) => {
                return Err(InvestError::ActualStockInfoUnavailable(Box::new(
                    EnrichedStock::from_holding(&holding),
                )));
            }
            Err(e) => return Err(e),
        };

        let avg_price = self.costs.avg_price(portfolio_id, ticker).await?;
        let stock = enrich_one(&holding, Some(&info), avg_price, summary.balance_inside_index);

        let cache = Arc::clone(&self.ctx.cache);
        let cached = stock.clone();
        spawn_cache_write("portfolio_stock", async move {
            cache.set_portfolio_stock(&cached).await
        });

        Ok(stock)
    }

    /// Summary plus one page of holdings ordered by ticker
    pub async fn page(&self, portfolio_id: PortfolioId, page: i64) -> Result<PortfolioPage> {
        if page < 1 {
            return Err(InvestError::Validation(format!("page {page} does not exist")));
        }

        let summary = self.summary(portfolio_id).await?;
        let per_page = self.ctx.config.stocks_per_page;
        let Some(offset) = page.checked_sub(1).and_then(|p| p.checked_mul(per_page)) else {
            return Ok(PortfolioPage {
                total_pages: total_pages(summary.stocks_count, per_page),
                current_page: page,
                summary,
                stocks: Vec::new(),
            });
        };

        let stocks = match self.ctx.cache.portfolio_page(portfolio_id, page).await {
            Ok(stocks) => stocks,
            Err(e) => {
                log_cache_fallback("portfolio_page", &e);
                let holdings = self
                    .ctx
                    .ledger
                    .holdings_page(portfolio_id, per_page, offset)
                    .await?;
                let stocks = self
                    .enrich_holdings(portfolio_id, &holdings, summary.balance_inside_index, None)
                    .await?;

                let cache = Arc::clone(&self.ctx.cache);
                let cached = stocks.clone();
                spawn_cache_write("portfolio_page", async move {
                    cache.set_portfolio_page(portfolio_id, page, &cached).await
                });
                stocks
            }
        };

        Ok(PortfolioPage {
            total_pages: total_pages(summary.stocks_count, per_page),
            current_page: page,
            summary,
            stocks,
        })
    }
}

pub(crate) fn tickers_of(holdings: &[Holding]) -> Vec<String> {
    holdings.iter().map(|h| h.ticker.clone()).collect()
}
