//! Invest Service
//!
//! The operations a chat adapter calls. Every mutation invalidates the
//! affected cache entries before returning.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::cache::PortfolioCache;
use crate::config::InvestConfig;
use crate::engine::valuation::rebalanced_weights;
use crate::engine::{Allocator, CostLedger, EngineContext, Valuation};
use crate::error::{InvestError, Result};
use crate::jobs;
use crate::ledger::LedgerStore;
use crate::model::{
    ChatId, EnrichedStock, Holding, Portfolio, PortfolioFullInfo, PortfolioId, PortfolioList,
    PortfolioPage, PortfolioSummary, StockInfo, StockPurchase, User,
};
use crate::price::PriceSource;

/// Facade over the valuation engine, cost ledger and allocator
#[derive(Clone)]
pub struct InvestService {
    ctx: EngineContext,
    valuation: Valuation,
    costs: CostLedger,
    allocator: Allocator,
}

impl InvestService {
    pub fn new(
        prices: Arc<dyn PriceSource>,
        ledger: Arc<dyn LedgerStore>,
        cache: Arc<dyn PortfolioCache>,
        config: InvestConfig,
    ) -> Self {
        Self::from_context(EngineContext::new(prices, ledger, cache, config))
    }

    pub fn from_context(ctx: EngineContext) -> Self {
        Self {
            valuation: Valuation::new(ctx.clone()),
            costs: CostLedger::new(ctx.clone()),
            allocator: Allocator::new(ctx.clone()),
            ctx,
        }
    }

    pub const fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn config(&self) -> &InvestConfig {
        &self.ctx.config
    }

    pub async fn register_user(&self, chat_id: ChatId) -> Result<User> {
        let user = self.ctx.ledger.register_user(chat_id).await?;
        tracing::debug!(chat_id, user_id = user.id, "user registered");
        Ok(user)
    }

    pub async fn create_portfolio(&self, chat_id: ChatId, name: &str) -> Result<Portfolio> {
        let name = name.trim();
        if name.is_empty() {
            return Err(InvestError::Validation("portfolio name must not be empty".into()));
        }

        let user = self.ctx.ledger.user(chat_id).await?;
        let portfolio = self.ctx.ledger.create_portfolio(user.id, name).await?;
        tracing::info!(chat_id, portfolio_id = portfolio.id, name, "portfolio created");
        Ok(portfolio)
    }

    pub async fn portfolio(&self, portfolio_id: PortfolioId) -> Result<Portfolio> {
        self.ctx.ledger.portfolio(portfolio_id).await
    }

    /// Portfolio owned by the chat's user; someone else's portfolio is `NotFound`
    pub async fn owned_portfolio(
        &self,
        chat_id: ChatId,
        portfolio_id: PortfolioId,
    ) -> Result<Portfolio> {
        let user = self.ctx.ledger.user(chat_id).await?;
        let portfolio = self.ctx.ledger.portfolio(portfolio_id).await?;
        if portfolio.user_id != user.id {
            tracing::warn!(chat_id, portfolio_id, "portfolio belongs to another user");
            return Err(InvestError::NotFound(format!("portfolio {portfolio_id}")));
        }
        Ok(portfolio)
    }

    /// One page of the user's portfolios, ordered by creation
    pub async fn portfolios(&self, chat_id: ChatId, page: i64) -> Result<PortfolioList> {
        if page < 1 {
            return Err(InvestError::Validation(format!("page {page} does not exist")));
        }

        let user = self.ctx.ledger.user(chat_id).await?;
        let per_page = self.ctx.config.portfolios_per_page.max(1);
        let Some(offset) = page.checked_sub(1).and_then(|p| p.checked_mul(per_page)) else {
            return Ok(PortfolioList {
                portfolios: Vec::new(),
                current_page: page,
                has_next_page: false,
            });
        };

        // one extra row tells whether another page follows
        let mut portfolios = self
            .ctx
            .ledger
            .portfolios(user.id, per_page.saturating_add(1), offset)
            .await?;
        let has_next_page = portfolios.len() > usize::try_from(per_page).unwrap_or(usize::MAX);
        if has_next_page {
            portfolios.pop();
        }

        Ok(PortfolioList {
            portfolios,
            current_page: page,
            has_next_page,
        })
    }

    pub async fn delete_portfolio(&self, portfolio_id: PortfolioId) -> Result<()> {
        self.ctx.ledger.delete_portfolio(portfolio_id).await?;
        self.flush_portfolio(portfolio_id).await;
        tracing::info!(portfolio_id, "portfolio deleted");
        Ok(())
    }

    /// Add a ticker to the portfolio; adding a present ticker changes nothing
    pub async fn add_stock(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> Result<EnrichedStock> {
        let ticker = normalize_ticker(ticker)?;
        self.ctx.ledger.portfolio(portfolio_id).await?;
        let info = self.ctx.tradable_stock(&ticker).await?;

        let inserted = self
            .ctx
            .ledger
            .insert_holding(&Holding::new(portfolio_id, info.ticker.clone()))
            .await?;
        if inserted {
            tracing::info!(portfolio_id, ticker = %info.ticker, "stock added");
        } else {
            tracing::debug!(portfolio_id, ticker = %info.ticker, "stock already in portfolio");
        }

        if let Err(e) = self.ctx.cache.flush_summary(portfolio_id).await {
            crate::engine::log_flush_failure(portfolio_id, &e);
        }
        if let Err(e) = self.ctx.cache.flush_pages(portfolio_id).await {
            crate::engine::log_flush_failure(portfolio_id, &e);
        }

        self.valuation.portfolio_stock(portfolio_id, &info.ticker).await
    }

    pub async fn change_weight(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
        weight: Decimal,
    ) -> Result<()> {
        if weight < Decimal::ZERO {
            return Err(InvestError::Validation("weight must not be negative".into()));
        }
        let ticker = normalize_ticker(ticker)?;

        self.ctx.ledger.set_weight(portfolio_id, &ticker, weight).await?;
        self.flush_portfolio(portfolio_id).await;
        tracing::info!(portfolio_id, ticker, %weight, "target weight changed");
        Ok(())
    }

    /// Delete a holding and its lots; the trade history stays
    pub async fn remove_stock(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<()> {
        let ticker = normalize_ticker(ticker)?;
        self.ctx.ledger.delete_holding(portfolio_id, &ticker).await?;
        self.flush_portfolio(portfolio_id).await;
        tracing::info!(portfolio_id, ticker, "stock removed");
        Ok(())
    }

    /// Scale positive target weights so they sum to 100
    pub async fn rebalance_weights(
        &self,
        portfolio_id: PortfolioId,
    ) -> Result<Vec<(String, Decimal)>> {
        let holdings = self.ctx.ledger.holdings(portfolio_id).await?;
        let weights = rebalanced_weights(&holdings);
        if weights.is_empty() {
            return Ok(weights);
        }

        self.ctx.ledger.set_weights(portfolio_id, &weights).await?;
        self.flush_portfolio(portfolio_id).await;
        tracing::info!(portfolio_id, stocks = weights.len(), "weights rebalanced");
        Ok(weights)
    }

    pub async fn summary(&self, portfolio_id: PortfolioId) -> Result<PortfolioSummary> {
        self.valuation.summary(portfolio_id).await
    }

    pub async fn portfolio_page(
        &self,
        portfolio_id: PortfolioId,
        page: i64,
    ) -> Result<PortfolioPage> {
        self.valuation.page(portfolio_id, page).await
    }

    pub async fn portfolio_stock(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> Result<EnrichedStock> {
        let ticker = normalize_ticker(ticker)?;
        self.valuation.portfolio_stock(portfolio_id, &ticker).await
    }

    pub async fn stock_info(&self, ticker: &str) -> Result<StockInfo> {
        let ticker = normalize_ticker(ticker)?;
        self.ctx.stock_info(&ticker).await
    }

    /// Buy `quantity` shares at `price`, or at the current price when `None`
    pub async fn buy(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
        quantity: i64,
        price: Option<Decimal>,
    ) -> Result<EnrichedStock> {
        if quantity <= 0 {
            return Err(InvestError::Validation("quantity must be positive".into()));
        }
        self.trade(portfolio_id, ticker, quantity, price).await
    }

    /// Sell `quantity` shares, consuming the oldest lots first
    pub async fn sell(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
        quantity: i64,
        price: Option<Decimal>,
    ) -> Result<EnrichedStock> {
        if quantity <= 0 {
            return Err(InvestError::Validation("quantity must be positive".into()));
        }
        self.trade(portfolio_id, ticker, -quantity, price).await
    }

    async fn trade(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
        quantity: i64,
        price: Option<Decimal>,
    ) -> Result<EnrichedStock> {
        if price.is_some_and(|p| p <= Decimal::ZERO) {
            return Err(InvestError::Validation("price must be positive".into()));
        }
        let ticker = normalize_ticker(ticker)?;

        let info = self.ctx.active_stock(&ticker, price.is_some()).await?;
        let price = price.unwrap_or(info.price);

        self.costs
            .record_trade(portfolio_id, &info, quantity, price)
            .await?;
        self.valuation.portfolio_stock(portfolio_id, &ticker).await
    }

    pub async fn calculate_purchase(
        &self,
        portfolio_id: PortfolioId,
        sum: Decimal,
    ) -> Result<Vec<StockPurchase>> {
        self.allocator.calculate(portfolio_id, sum).await
    }

    pub async fn apply_purchase(
        &self,
        portfolio_id: PortfolioId,
        plan: &[StockPurchase],
    ) -> Result<()> {
        self.allocator.apply(portfolio_id, plan).await
    }

    /// Summary, holdings and history of every portfolio of the user
    pub async fn portfolios_report(&self, chat_id: ChatId) -> Result<Vec<PortfolioFullInfo>> {
        let user = self.ctx.ledger.user(chat_id).await?;
        let portfolios = self.ctx.ledger.portfolios(user.id, i64::MAX, 0).await?;

        let mut holdings: HashMap<PortfolioId, Vec<Holding>> = HashMap::new();
        let mut tickers = BTreeSet::new();
        for portfolio in &portfolios {
            let list = self.ctx.ledger.holdings(portfolio.id).await?;
            tickers.extend(list.iter().map(|h| h.ticker.clone()));
            holdings.insert(portfolio.id, list);
        }

        let tickers: Vec<String> = tickers.into_iter().collect();
        let prices = self.ctx.stocks_info(&tickers).await?;

        let mut report = Vec::with_capacity(portfolios.len());
        for portfolio in &portfolios {
            let list = holdings.remove(&portfolio.id).unwrap_or_default();
            let summary = self
                .valuation
                .compute_summary(portfolio, &list, &prices)
                .await?;
            let stocks = self
                .valuation
                .enrich_holdings(portfolio.id, &list, summary.balance_inside_index, Some(&prices))
                .await?;
            let operations = self.ctx.ledger.operations(portfolio.id).await?;

            report.push(PortfolioFullInfo {
                summary,
                stocks,
                operations,
            });
        }

        tracing::info!(chat_id, portfolios = report.len(), "report assembled");
        Ok(report)
    }

    /// Replace cached market data with a fresh snapshot
    pub async fn refresh_market_cache(&self) -> Result<usize> {
        jobs::refresh_market_cache(&self.ctx).await
    }

    async fn flush_portfolio(&self, portfolio_id: PortfolioId) {
        if let Err(e) = self.ctx.cache.flush_portfolio(portfolio_id).await {
            crate::engine::log_flush_failure(portfolio_id, &e);
        }
    }
}

fn normalize_ticker(ticker: &str) -> Result<String> {
    let ticker = ticker.trim().to_uppercase();
    if ticker.is_empty() {
        return Err(InvestError::Validation("ticker must not be empty".into()));
    }
    Ok(ticker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::ledger::MemoryLedger;
    use crate::price::FixedPriceSource;
    use rust_decimal_macros::dec;

    fn service() -> InvestService {
        let config = InvestConfig::default();
        InvestService::new(
            Arc::new(FixedPriceSource::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCache::new(config.cache_ttl_chrono())),
            config,
        )
    }

    #[tokio::test]
    async fn test_create_portfolio_requires_user() {
        let svc = service();
        assert!(svc.create_portfolio(7, "Main").await.unwrap_err().is_not_found());

        svc.register_user(7).await.unwrap();
        let portfolio = svc.create_portfolio(7, "  Main ").await.unwrap();
        assert_eq!(portfolio.name, "Main");
        assert!(matches!(
            svc.create_portfolio(7, " ").await,
            Err(InvestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_owned_portfolio_hides_other_users() {
        let svc = service();
        svc.register_user(1).await.unwrap();
        svc.register_user(2).await.unwrap();
        let mine = svc.create_portfolio(1, "Mine").await.unwrap();

        assert_eq!(svc.owned_portfolio(1, mine.id).await.unwrap().name, "Mine");
        assert!(svc.owned_portfolio(2, mine.id).await.unwrap_err().is_not_found());
        assert!(svc.owned_portfolio(3, mine.id).await.unwrap_err().is_not_found());
        assert!(svc.owned_portfolio(1, mine.id + 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_add_stock_is_idempotent_and_uppercases() {
        let svc = service();
        svc.register_user(1).await.unwrap();
        let p = svc.create_portfolio(1, "Main").await.unwrap();

        let stock = svc.add_stock(p.id, "sber").await.unwrap();
        assert_eq!(stock.ticker, "SBER");
        assert_eq!(stock.lot_size, 10);

        svc.add_stock(p.id, "SBER").await.unwrap();
        assert_eq!(svc.summary(p.id).await.unwrap().stocks_count, 1);

        assert!(svc.add_stock(p.id, "NOPE").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_trade_validation() {
        let svc = service();
        svc.register_user(1).await.unwrap();
        let p = svc.create_portfolio(1, "Main").await.unwrap();
        svc.add_stock(p.id, "SBER").await.unwrap();

        for result in [
            svc.buy(p.id, "SBER", 0, None).await,
            svc.sell(p.id, "SBER", -3, None).await,
            svc.buy(p.id, "SBER", 1, Some(dec!(0))).await,
        ] {
            assert!(matches!(result, Err(InvestError::Validation(_))));
        }
        assert!(matches!(
            svc.change_weight(p.id, "SBER", dec!(-1)).await,
            Err(InvestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_buy_uses_current_price_by_default() {
        let svc = service();
        svc.register_user(1).await.unwrap();
        let p = svc.create_portfolio(1, "Main").await.unwrap();
        svc.add_stock(p.id, "GAZP").await.unwrap();

        let stock = svc.buy(p.id, "gazp", 20, None).await.unwrap();
        assert_eq!(stock.quantity, 20);
        assert_eq!(stock.avg_price, dec!(162.15));
        assert!(stock.growth_sum.is_zero());

        let stock = svc.buy(p.id, "GAZP", 20, Some(dec!(142.15))).await.unwrap();
        assert_eq!(stock.quantity, 40);
        assert_eq!(stock.avg_price, dec!(152.15));
    }

    #[tokio::test]
    async fn test_inactive_stock_cannot_be_added() {
        let prices = FixedPriceSource::new();
        let mut halted = StockInfo::new("HALT", "Halted", dec!(10));
        halted.active = false;
        prices.set_stock(halted);

        let config = InvestConfig::default();
        let svc = InvestService::new(
            Arc::new(prices),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCache::new(config.cache_ttl_chrono())),
            config,
        );
        svc.register_user(1).await.unwrap();
        let p = svc.create_portfolio(1, "Main").await.unwrap();

        assert!(matches!(
            svc.add_stock(p.id, "HALT").await,
            Err(InvestError::StockNotActive(t)) if t == "HALT"
        ));
    }
}
