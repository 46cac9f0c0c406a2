//! Postgres ledger store
//!
//! A `PgTransaction` wraps a `sqlx::Transaction`: lots read through it stay
//! locked `FOR UPDATE` until it commits, and dropping it rolls back. Tickers
//! are ordered with the "C" collation so pages match the in-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use super::{LedgerStore, LedgerTransaction, holding_not_found};
use crate::error::{InvestError, Result};
use crate::model::{
    ChatId, Holding, NewLot, Portfolio, PortfolioId, PurchaseLot, StockOperation, User,
};

/// Ledger backed by a Postgres connection pool
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url`
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InvestError::Store(format!("migration failed: {e}")))?;
        tracing::info!("ledger schema is up to date");
        Ok(())
    }

    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Averages keyed by ticker, zero for tickers without buys
fn fill_averages(
    tickers: &[String],
    rows: Vec<(String, Option<Decimal>)>,
) -> HashMap<String, Decimal> {
    let found: HashMap<String, Decimal> = rows
        .into_iter()
        .filter_map(|(ticker, avg)| avg.map(|avg| (ticker, avg)))
        .collect();
    tickers
        .iter()
        .map(|t| (t.clone(), found.get(t).copied().unwrap_or_default()))
        .collect()
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn register_user(&self, chat_id: ChatId) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (chat_id) VALUES ($1)
             ON CONFLICT (chat_id) DO UPDATE SET chat_id = EXCLUDED.chat_id
             RETURNING id, chat_id, created_at",
        )
        .bind(chat_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn user(&self, chat_id: ChatId) -> Result<User> {
        sqlx::query_as::<_, User>("SELECT id, chat_id, created_at FROM users WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| InvestError::NotFound(format!("user {chat_id}")))
    }

    async fn create_portfolio(&self, user_id: i64, name: &str) -> Result<Portfolio> {
        sqlx::query_as::<_, Portfolio>(
            "INSERT INTO portfolios (user_id, name)
             SELECT id, $2 FROM users WHERE id = $1
             RETURNING id, user_id, name, created_at",
        )
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| InvestError::NotFound(format!("user id {user_id}")))
    }

    async fn portfolio(&self, portfolio_id: PortfolioId) -> Result<Portfolio> {
        sqlx::query_as::<_, Portfolio>(
            "SELECT id, user_id, name, created_at FROM portfolios WHERE id = $1",
        )
        .bind(portfolio_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| InvestError::NotFound(format!("portfolio {portfolio_id}")))
    }

    async fn portfolios(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Portfolio>> {
        let portfolios = sqlx::query_as::<_, Portfolio>(
            "SELECT id, user_id, name, created_at FROM portfolios
             WHERE user_id = $1
             ORDER BY id
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(portfolios)
    }

    async fn delete_portfolio(&self, portfolio_id: PortfolioId) -> Result<()> {
        // holdings, lots and history go with it through ON DELETE CASCADE
        let deleted = sqlx::query("DELETE FROM portfolios WHERE id = $1")
            .bind(portfolio_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(InvestError::NotFound(format!("portfolio {portfolio_id}")));
        }
        Ok(())
    }

    async fn insert_holding(&self, holding: &Holding) -> Result<bool> {
        self.portfolio(holding.portfolio_id).await?;

        let inserted = sqlx::query(
            "INSERT INTO holdings (portfolio_id, ticker, target_weight, quantity)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (portfolio_id, ticker) DO NOTHING",
        )
        .bind(holding.portfolio_id)
        .bind(&holding.ticker)
        .bind(holding.target_weight)
        .bind(holding.quantity)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn holding(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<Holding> {
        sqlx::query_as::<_, Holding>(
            "SELECT portfolio_id, ticker, target_weight, quantity FROM holdings
             WHERE portfolio_id = $1 AND ticker = $2",
        )
        .bind(portfolio_id)
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| holding_not_found(portfolio_id, ticker))
    }

    async fn holdings(&self, portfolio_id: PortfolioId) -> Result<Vec<Holding>> {
        let holdings = sqlx::query_as::<_, Holding>(
            r#"SELECT portfolio_id, ticker, target_weight, quantity FROM holdings
               WHERE portfolio_id = $1
               ORDER BY ticker COLLATE "C""#,
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(holdings)
    }

    async fn holdings_page(
        &self,
        portfolio_id: PortfolioId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Holding>> {
        let holdings = sqlx::query_as::<_, Holding>(
            r#"SELECT portfolio_id, ticker, target_weight, quantity FROM holdings
               WHERE portfolio_id = $1
               ORDER BY ticker COLLATE "C"
               LIMIT $2 OFFSET $3"#,
        )
        .bind(portfolio_id)
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(holdings)
    }

    async fn index_holdings(&self, portfolio_id: PortfolioId) -> Result<Vec<Holding>> {
        let holdings = sqlx::query_as::<_, Holding>(
            r#"SELECT portfolio_id, ticker, target_weight, quantity FROM holdings
               WHERE portfolio_id = $1 AND target_weight > 0
               ORDER BY ticker COLLATE "C""#,
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(holdings)
    }

    async fn set_weight(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
        weight: Decimal,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE holdings SET target_weight = $3 WHERE portfolio_id = $1 AND ticker = $2",
        )
        .bind(portfolio_id)
        .bind(ticker)
        .bind(weight)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(holding_not_found(portfolio_id, ticker));
        }
        Ok(())
    }

    async fn set_weights(
        &self,
        portfolio_id: PortfolioId,
        weights: &[(String, Decimal)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (ticker, weight) in weights {
            let updated = sqlx::query(
                "UPDATE holdings SET target_weight = $3 WHERE portfolio_id = $1 AND ticker = $2",
            )
            .bind(portfolio_id)
            .bind(ticker)
            .bind(weight)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(holding_not_found(portfolio_id, ticker));
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_holding(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM holdings WHERE portfolio_id = $1 AND ticker = $2")
            .bind(portfolio_id)
            .bind(ticker)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(holding_not_found(portfolio_id, ticker));
        }

        sqlx::query("DELETE FROM purchase_lots WHERE portfolio_id = $1 AND ticker = $2")
            .bind(portfolio_id)
            .bind(ticker)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn operations(&self, portfolio_id: PortfolioId) -> Result<Vec<StockOperation>> {
        let operations = sqlx::query_as::<_, StockOperation>(
            "SELECT portfolio_id, ticker, short_name, quantity, price, total_price, currency,
                    created_at
             FROM stock_operations
             WHERE portfolio_id = $1
             ORDER BY id",
        )
        .bind(portfolio_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(operations)
    }

    async fn lots(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<Vec<PurchaseLot>> {
        let lots = sqlx::query_as::<_, PurchaseLot>(
            "SELECT row_id, portfolio_id, ticker, quantity, price, created_at, updated_at
             FROM purchase_lots
             WHERE portfolio_id = $1 AND ticker = $2
             ORDER BY row_id",
        )
        .bind(portfolio_id)
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;
        Ok(lots)
    }

    async fn average_purchase_price(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> Result<Decimal> {
        let avg = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(quantity * price) / NULLIF(SUM(quantity), 0), 0)
             FROM stock_operations
             WHERE portfolio_id = $1 AND ticker = $2 AND quantity > 0",
        )
        .bind(portfolio_id)
        .bind(ticker)
        .fetch_one(&self.pool)
        .await?;
        Ok(avg)
    }

    async fn average_purchase_prices(
        &self,
        portfolio_id: PortfolioId,
        tickers: &[String],
    ) -> Result<HashMap<String, Decimal>> {
        if tickers.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, (String, Option<Decimal>)>(
            "SELECT ticker, SUM(quantity * price) / NULLIF(SUM(quantity), 0)
             FROM stock_operations
             WHERE portfolio_id = $1 AND ticker = ANY($2) AND quantity > 0
             GROUP BY ticker",
        )
        .bind(portfolio_id)
        .bind(tickers)
        .fetch_all(&self.pool)
        .await?;
        Ok(fill_averages(tickers, rows))
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// Unit of work over one database transaction
struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgTransaction {
    async fn adjust_quantity(
        &mut self,
        portfolio_id: PortfolioId,
        ticker: &str,
        delta: i64,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE holdings SET quantity = quantity + $3 WHERE portfolio_id = $1 AND ticker = $2",
        )
        .bind(portfolio_id)
        .bind(ticker)
        .bind(delta)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(holding_not_found(portfolio_id, ticker));
        }
        Ok(())
    }

    async fn insert_operations(&mut self, operations: &[StockOperation]) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO stock_operations
                 (portfolio_id, ticker, short_name, quantity, price, total_price, currency,
                  created_at)
             SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::bigint[],
                                  $5::numeric[], $6::numeric[], $7::text[], $8::timestamptz[])",
        )
        .bind(operations.iter().map(|o| o.portfolio_id).collect::<Vec<_>>())
        .bind(operations.iter().map(|o| o.ticker.clone()).collect::<Vec<_>>())
        .bind(operations.iter().map(|o| o.short_name.clone()).collect::<Vec<_>>())
        .bind(operations.iter().map(|o| o.quantity).collect::<Vec<_>>())
        .bind(operations.iter().map(|o| o.price).collect::<Vec<_>>())
        .bind(operations.iter().map(|o| o.total_price).collect::<Vec<_>>())
        .bind(operations.iter().map(|o| o.currency.clone()).collect::<Vec<_>>())
        .bind(operations.iter().map(|o| o.created_at).collect::<Vec<_>>())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lots_for_update(
        &mut self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> Result<Vec<PurchaseLot>> {
        let lots = sqlx::query_as::<_, PurchaseLot>(
            "SELECT row_id, portfolio_id, ticker, quantity, price, created_at, updated_at
             FROM purchase_lots
             WHERE portfolio_id = $1 AND ticker = $2
             ORDER BY row_id
             FOR UPDATE",
        )
        .bind(portfolio_id)
        .bind(ticker)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(lots)
    }

    async fn decrease_lot(&mut self, row_id: i64, remaining: i64) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE purchase_lots SET quantity = $2, updated_at = now() WHERE row_id = $1",
        )
        .bind(row_id)
        .bind(remaining)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(InvestError::Store(format!("lot {row_id} does not exist")));
        }
        Ok(())
    }

    async fn delete_lots(&mut self, row_ids: &[i64]) -> Result<()> {
        if row_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM purchase_lots WHERE row_id = ANY($1)")
            .bind(row_ids)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_lots(&mut self, lots: &[NewLot]) -> Result<()> {
        if lots.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO purchase_lots (portfolio_id, ticker, quantity, price)
             SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::bigint[], $4::numeric[])",
        )
        .bind(lots.iter().map(|l| l.portfolio_id).collect::<Vec<_>>())
        .bind(lots.iter().map(|l| l.ticker.clone()).collect::<Vec<_>>())
        .bind(lots.iter().map(|l| l.quantity).collect::<Vec<_>>())
        .bind(lots.iter().map(|l| l.price).collect::<Vec<_>>())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}
