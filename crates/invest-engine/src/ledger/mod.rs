//! Ledger Store
//!
//! Durable portfolio state: users, portfolios, holdings, FIFO purchase lots
//! and the trade history. Reads go straight to the store; every mutation
//! that touches more than one table runs inside a `LedgerTransaction`.

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{InvestError, Result};
use crate::model::{
    ChatId, Holding, NewLot, Portfolio, PortfolioId, PurchaseLot, StockOperation, User,
};

/// Read access and single-row writes
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Register a chat user; returns the existing user when already known
    async fn register_user(&self, chat_id: ChatId) -> Result<User>;

    async fn user(&self, chat_id: ChatId) -> Result<User>;

    async fn create_portfolio(&self, user_id: i64, name: &str) -> Result<Portfolio>;

    async fn portfolio(&self, portfolio_id: PortfolioId) -> Result<Portfolio>;

    /// Portfolios of a user ordered by id
    async fn portfolios(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Portfolio>>;

    /// Delete a portfolio with its holdings, lots and history
    async fn delete_portfolio(&self, portfolio_id: PortfolioId) -> Result<()>;

    /// Insert a holding; returns `false` when the ticker is already present
    async fn insert_holding(&self, holding: &Holding) -> Result<bool>;

    async fn holding(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<Holding>;

    /// All holdings ordered by ticker
    async fn holdings(&self, portfolio_id: PortfolioId) -> Result<Vec<Holding>>;

    /// One page of holdings ordered by ticker
    async fn holdings_page(
        &self,
        portfolio_id: PortfolioId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Holding>>;

    /// Holdings with a positive target weight, ordered by ticker
    async fn index_holdings(&self, portfolio_id: PortfolioId) -> Result<Vec<Holding>>;

    async fn set_weight(&self, portfolio_id: PortfolioId, ticker: &str, weight: Decimal)
    -> Result<()>;

    /// Replace several weights at once
    async fn set_weights(&self, portfolio_id: PortfolioId, weights: &[(String, Decimal)])
    -> Result<()>;

    /// Delete a holding together with its remaining lots; history is kept
    async fn delete_holding(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<()>;

    /// Trade history in insertion order
    async fn operations(&self, portfolio_id: PortfolioId) -> Result<Vec<StockOperation>>;

    /// Remaining lots oldest-first
    async fn lots(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<Vec<PurchaseLot>>;

    /// Weighted average price of all buys; zero when nothing was bought
    async fn average_purchase_price(&self, portfolio_id: PortfolioId, ticker: &str)
    -> Result<Decimal>;

    /// Weighted average buy price per ticker; tickers without buys map to zero
    async fn average_purchase_prices(
        &self,
        portfolio_id: PortfolioId,
        tickers: &[String],
    ) -> Result<HashMap<String, Decimal>>;

    /// Start a unit of work
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;
}

/// Unit of work over holdings, lots and history.
///
/// Changes become visible on `commit`; dropping the handle discards them.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Add `delta` (negative for sells) to a holding's quantity
    async fn adjust_quantity(
        &mut self,
        portfolio_id: PortfolioId,
        ticker: &str,
        delta: i64,
    ) -> Result<()>;

    async fn adjust_quantities(
        &mut self,
        portfolio_id: PortfolioId,
        deltas: &[(String, i64)],
    ) -> Result<()> {
        for (ticker, delta) in deltas {
            self.adjust_quantity(portfolio_id, ticker, *delta).await?;
        }
        Ok(())
    }

    async fn insert_operations(&mut self, operations: &[StockOperation]) -> Result<()>;

    /// Remaining lots oldest-first, as seen by this transaction
    async fn lots_for_update(
        &mut self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> Result<Vec<PurchaseLot>>;

    /// Set a lot's remaining quantity
    async fn decrease_lot(&mut self, row_id: i64, remaining: i64) -> Result<()>;

    async fn delete_lots(&mut self, row_ids: &[i64]) -> Result<()>;

    async fn insert_lots(&mut self, lots: &[NewLot]) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

pub(crate) fn holding_not_found(portfolio_id: PortfolioId, ticker: &str) -> InvestError {
    InvestError::NotFound(format!("{ticker} in portfolio {portfolio_id}"))
}

/// `Σ(q × price) / Σq` over buy operations
pub fn average_buy_price<'a>(operations: impl IntoIterator<Item = &'a StockOperation>) -> Decimal {
    let (cost, quantity) = operations
        .into_iter()
        .filter(|op| op.is_buy())
        .fold((Decimal::ZERO, Decimal::ZERO), |(cost, qty), op| {
            let q = Decimal::from(op.quantity);
            (cost + q * op.price, qty + q)
        });

    if quantity.is_zero() {
        Decimal::ZERO
    } else {
        cost / quantity
    }
}
