//! In-memory ledger store (for development/testing)
//!
//! Readers take a shared lock on the committed state. A transaction holds
//! the single writer permit, works on a private copy of the state and swaps
//! it in on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LedgerStore, LedgerTransaction, average_buy_price, holding_not_found};
use crate::error::{InvestError, Result};
use crate::model::{
    ChatId, Holding, NewLot, Portfolio, PortfolioId, PurchaseLot, StockOperation, User,
};

type HoldingKey = (PortfolioId, String);

#[derive(Clone, Debug, Default)]
struct LedgerState {
    users: HashMap<ChatId, User>,
    portfolios: BTreeMap<PortfolioId, Portfolio>,
    holdings: BTreeMap<HoldingKey, Holding>,
    lots: BTreeMap<i64, PurchaseLot>,
    operations: Vec<StockOperation>,
    next_user_id: i64,
    next_portfolio_id: PortfolioId,
    next_lot_id: i64,
}

impl LedgerState {
    fn holdings_of(&self, portfolio_id: PortfolioId) -> impl Iterator<Item = &Holding> {
        self.holdings
            .range((portfolio_id, String::new())..(portfolio_id + 1, String::new()))
            .map(|(_, h)| h)
    }

    fn lots_of(&self, portfolio_id: PortfolioId, ticker: &str) -> Vec<PurchaseLot> {
        self.lots
            .values()
            .filter(|l| l.portfolio_id == portfolio_id && l.ticker == ticker)
            .cloned()
            .collect()
    }

    fn holding_mut(&mut self, portfolio_id: PortfolioId, ticker: &str) -> Result<&mut Holding> {
        self.holdings
            .get_mut(&(portfolio_id, ticker.to_string()))
            .ok_or_else(|| holding_not_found(portfolio_id, ticker))
    }
}

fn page<T>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(0);
    items.skip(offset).take(limit).collect()
}

/// Ledger kept entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<RwLock<LedgerState>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a write outside of an explicit transaction, serialized with transactions
    async fn write<T>(&self, f: impl FnOnce(&mut LedgerState) -> Result<T>) -> Result<T> {
        let _permit = self.writer.lock().await;
        let mut state = self.state.write();
        f(&mut state)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn register_user(&self, chat_id: ChatId) -> Result<User> {
        self.write(|state| {
            if let Some(user) = state.users.get(&chat_id) {
                return Ok(user.clone());
            }
            state.next_user_id += 1;
            let user = User {
                id: state.next_user_id,
                chat_id,
                created_at: Utc::now(),
            };
            state.users.insert(chat_id, user.clone());
            Ok(user)
        })
        .await
    }

    async fn user(&self, chat_id: ChatId) -> Result<User> {
        self.state
            .read()
            .users
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| InvestError::NotFound(format!("user {chat_id}")))
    }

    async fn create_portfolio(&self, user_id: i64, name: &str) -> Result<Portfolio> {
        self.write(|state| {
            if !state.users.values().any(|u| u.id == user_id) {
                return Err(InvestError::NotFound(format!("user id {user_id}")));
            }
            state.next_portfolio_id += 1;
            let portfolio = Portfolio {
                id: state.next_portfolio_id,
                user_id,
                name: name.to_string(),
                created_at: Utc::now(),
            };
            state.portfolios.insert(portfolio.id, portfolio.clone());
            Ok(portfolio)
        })
        .await
    }

    async fn portfolio(&self, portfolio_id: PortfolioId) -> Result<Portfolio> {
        self.state
            .read()
            .portfolios
            .get(&portfolio_id)
            .cloned()
            .ok_or_else(|| InvestError::NotFound(format!("portfolio {portfolio_id}")))
    }

    async fn portfolios(&self, user_id: i64, limit: i64, offset: i64) -> Result<Vec<Portfolio>> {
        let state = self.state.read();
        Ok(page(
            state
                .portfolios
                .values()
                .filter(|p| p.user_id == user_id)
                .cloned(),
            limit,
            offset,
        ))
    }

    async fn delete_portfolio(&self, portfolio_id: PortfolioId) -> Result<()> {
        self.write(|state| {
            if state.portfolios.remove(&portfolio_id).is_none() {
                return Err(InvestError::NotFound(format!("portfolio {portfolio_id}")));
            }
            state.holdings.retain(|(pid, _), _| *pid != portfolio_id);
            state.lots.retain(|_, l| l.portfolio_id != portfolio_id);
            state.operations.retain(|o| o.portfolio_id != portfolio_id);
            Ok(())
        })
        .await
    }

    async fn insert_holding(&self, holding: &Holding) -> Result<bool> {
        self.write(|state| {
            if !state.portfolios.contains_key(&holding.portfolio_id) {
                return Err(InvestError::NotFound(format!(
                    "portfolio {}",
                    holding.portfolio_id
                )));
            }
            let key = (holding.portfolio_id, holding.ticker.clone());
            if state.holdings.contains_key(&key) {
                return Ok(false);
            }
            state.holdings.insert(key, holding.clone());
            Ok(true)
        })
        .await
    }

    async fn holding(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<Holding> {
        self.state
            .read()
            .holdings
            .get(&(portfolio_id, ticker.to_string()))
            .cloned()
            .ok_or_else(|| holding_not_found(portfolio_id, ticker))
    }

    async fn holdings(&self, portfolio_id: PortfolioId) -> Result<Vec<Holding>> {
        Ok(self.state.read().holdings_of(portfolio_id).cloned().collect())
    }

    async fn holdings_page(
        &self,
        portfolio_id: PortfolioId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Holding>> {
        let state = self.state.read();
        Ok(page(state.holdings_of(portfolio_id).cloned(), limit, offset))
    }

    async fn index_holdings(&self, portfolio_id: PortfolioId) -> Result<Vec<Holding>> {
        Ok(self
            .state
            .read()
            .holdings_of(portfolio_id)
            .filter(|h| h.is_index_tracked())
            .cloned()
            .collect())
    }

    async fn set_weight(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
        weight: Decimal,
    ) -> Result<()> {
        self.write(|state| {
            state.holding_mut(portfolio_id, ticker)?.target_weight = weight;
            Ok(())
        })
        .await
    }

    async fn set_weights(
        &self,
        portfolio_id: PortfolioId,
        weights: &[(String, Decimal)],
    ) -> Result<()> {
        self.write(|state| {
            if let Some((ticker, _)) = weights
                .iter()
                .find(|(t, _)| !state.holdings.contains_key(&(portfolio_id, t.clone())))
            {
                return Err(holding_not_found(portfolio_id, ticker));
            }
            for (ticker, weight) in weights {
                state.holding_mut(portfolio_id, ticker)?.target_weight = *weight;
            }
            Ok(())
        })
        .await
    }

    async fn delete_holding(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<()> {
        self.write(|state| {
            if state
                .holdings
                .remove(&(portfolio_id, ticker.to_string()))
                .is_none()
            {
                return Err(holding_not_found(portfolio_id, ticker));
            }
            state
                .lots
                .retain(|_, l| !(l.portfolio_id == portfolio_id && l.ticker == ticker));
            Ok(())
        })
        .await
    }

    async fn operations(&self, portfolio_id: PortfolioId) -> Result<Vec<StockOperation>> {
        Ok(self
            .state
            .read()
            .operations
            .iter()
            .filter(|o| o.portfolio_id == portfolio_id)
            .cloned()
            .collect())
    }

    async fn lots(&self, portfolio_id: PortfolioId, ticker: &str) -> Result<Vec<PurchaseLot>> {
        Ok(self.state.read().lots_of(portfolio_id, ticker))
    }

    async fn average_purchase_price(
        &self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> Result<Decimal> {
        let state = self.state.read();
        Ok(average_buy_price(
            state
                .operations
                .iter()
                .filter(|o| o.portfolio_id == portfolio_id && o.ticker == ticker),
        ))
    }

    async fn average_purchase_prices(
        &self,
        portfolio_id: PortfolioId,
        tickers: &[String],
    ) -> Result<HashMap<String, Decimal>> {
        let state = self.state.read();
        Ok(tickers
            .iter()
            .map(|ticker| {
                let avg = average_buy_price(
                    state
                        .operations
                        .iter()
                        .filter(|o| o.portfolio_id == portfolio_id && &o.ticker == ticker),
                );
                (ticker.clone(), avg)
            })
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let permit = Arc::clone(&self.writer).lock_owned().await;
        let staged = self.state.read().clone();
        Ok(Box::new(MemoryTransaction {
            committed: Arc::clone(&self.state),
            staged,
            _permit: permit,
        }))
    }
}

/// Transaction over a private copy of the ledger state
struct MemoryTransaction {
    committed: Arc<RwLock<LedgerState>>,
    staged: LedgerState,
    _permit: OwnedMutexGuard<()>,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn adjust_quantity(
        &mut self,
        portfolio_id: PortfolioId,
        ticker: &str,
        delta: i64,
    ) -> Result<()> {
        self.staged.holding_mut(portfolio_id, ticker)?.quantity += delta;
        Ok(())
    }

    async fn insert_operations(&mut self, operations: &[StockOperation]) -> Result<()> {
        self.staged.operations.extend_from_slice(operations);
        Ok(())
    }

    async fn lots_for_update(
        &mut self,
        portfolio_id: PortfolioId,
        ticker: &str,
    ) -> Result<Vec<PurchaseLot>> {
        Ok(self.staged.lots_of(portfolio_id, ticker))
    }

    async fn decrease_lot(&mut self, row_id: i64, remaining: i64) -> Result<()> {
        let lot = self
            .staged
            .lots
            .get_mut(&row_id)
            .ok_or_else(|| InvestError::Store(format!("lot {row_id} does not exist")))?;
        lot.quantity = remaining;
        lot.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_lots(&mut self, row_ids: &[i64]) -> Result<()> {
        for row_id in row_ids {
            self.staged.lots.remove(row_id);
        }
        Ok(())
    }

    async fn insert_lots(&mut self, lots: &[NewLot]) -> Result<()> {
        let now = Utc::now();
        for lot in lots {
            self.staged.next_lot_id += 1;
            let row_id = self.staged.next_lot_id;
            self.staged.lots.insert(
                row_id,
                PurchaseLot {
                    row_id,
                    portfolio_id: lot.portfolio_id,
                    ticker: lot.ticker.clone(),
                    quantity: lot.quantity,
                    price: lot.price,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            committed, staged, ..
        } = *self;
        *committed.write() = staged;
        Ok(())
    }
}
