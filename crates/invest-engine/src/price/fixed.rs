//! Fixed Price Source
//!
//! For testing and demo purposes. Serves a static table of MOEX blue chips
//! that can be edited at runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal_macros::dec;

use super::PriceSource;
use crate::error::{InvestError, Result};
use crate::model::StockInfo;

/// Price source backed by an in-memory table
pub struct FixedPriceSource {
    stocks: RwLock<HashMap<String, StockInfo>>,
    offline: AtomicBool,
}

impl Default for FixedPriceSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedPriceSource {
    /// Empty table
    pub fn empty() -> Self {
        Self {
            stocks: RwLock::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Table seeded with a handful of liquid TQBR shares
    pub fn new() -> Self {
        Self::empty()
            .with_stock(StockInfo::new("SBER", "Сбербанк", dec!(285.40)).with_lot_size(10))
            .with_stock(StockInfo::new("GAZP", "ГАЗПРОМ ао", dec!(162.15)).with_lot_size(10))
            .with_stock(StockInfo::new("LKOH", "ЛУКОЙЛ", dec!(7120.5)))
            .with_stock(StockInfo::new("GMKN", "ГМКНорНик", dec!(128.36)).with_lot_size(10))
            .with_stock(StockInfo::new("YDEX", "Яндекс", dec!(4105)))
            .with_stock(StockInfo::new("MTSS", "МТС-ао", dec!(228.9)).with_lot_size(10))
            .with_stock(StockInfo::new("VTBR", "ВТБ ао", dec!(98.42)).with_lot_size(1))
    }

    pub fn with_stock(self, stock: StockInfo) -> Self {
        self.set_stock(stock);
        self
    }

    /// Insert or replace a security
    pub fn set_stock(&self, stock: StockInfo) {
        self.stocks.write().insert(stock.ticker.clone(), stock);
    }

    /// Change the price of a known security; unknown tickers are ignored
    pub fn set_price(&self, ticker: &str, price: rust_decimal::Decimal) {
        if let Some(stock) = self.stocks.write().get_mut(&ticker.to_uppercase()) {
            stock.price = price;
        }
    }

    /// Simulate an unreachable provider
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(InvestError::PriceSource("fixed source is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn stock_info(&self, ticker: &str) -> Result<StockInfo> {
        self.ensure_online()?;
        self.stocks
            .read()
            .get(&ticker.to_uppercase())
            .cloned()
            .ok_or_else(|| InvestError::NotFound(format!("ticker {ticker}")))
    }

    async fn stocks_info(&self, tickers: &[String]) -> Result<HashMap<String, StockInfo>> {
        self.ensure_online()?;
        let stocks = self.stocks.read();
        Ok(tickers
            .iter()
            .filter_map(|t| stocks.get(t).map(|s| (t.clone(), s.clone())))
            .collect())
    }

    async fn all_stocks_info(&self) -> Result<Vec<StockInfo>> {
        self.ensure_online()?;
        let mut all: Vec<_> = self.stocks.read().values().cloned().collect();
        all.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(all)
    }

    fn name(&self) -> &str {
        "FixedPrices"
    }
}
