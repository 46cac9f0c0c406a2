//! Domain Models
//!
//! Core data types for stock portfolio management.
//! Uses `rust_decimal` for all monetary values - never use f64 for money!

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub use chat_core::ChatId;

/// Portfolio identifier assigned by the ledger store
pub type PortfolioId = i64;

/// Market data for a single listed security
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockInfo {
    /// Exchange ticker (e.g., "SBER", "GAZP")
    pub ticker: String,

    /// Short display name
    pub short_name: String,

    /// Shares per tradable lot
    pub lot_size: i64,

    /// Quote currency code
    pub currency: String,

    /// Whether the security is currently traded
    pub active: bool,

    /// Last price per share; zero when the exchange has no last trade
    pub price: Decimal,
}

impl StockInfo {
    pub fn new(ticker: impl Into<String>, short_name: impl Into<String>, price: Decimal) -> Self {
        Self {
            ticker: ticker.into().to_uppercase(),
            short_name: short_name.into(),
            lot_size: 1,
            currency: "RUB".into(),
            active: true,
            price,
        }
    }

    pub const fn with_lot_size(mut self, lot_size: i64) -> Self {
        self.lot_size = lot_size;
        self
    }

    /// Price of one whole lot
    pub fn lot_price(&self) -> Decimal {
        self.price * Decimal::from(self.lot_size)
    }
}

/// Registered chat user
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub chat_id: ChatId,
    pub created_at: DateTime<Utc>,
}

/// Named collection of holdings owned by a user
#[derive(Clone, Debug, Serialize, Deserialize, FromRow)]
pub struct Portfolio {
    pub id: PortfolioId,
    pub user_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A ticker tracked inside a portfolio
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Holding {
    pub portfolio_id: PortfolioId,

    /// Exchange ticker
    pub ticker: String,

    /// Target share of the index in percent; zero keeps the holding outside the index
    pub target_weight: Decimal,

    /// Shares held, never negative
    pub quantity: i64,
}

impl Holding {
    pub fn new(portfolio_id: PortfolioId, ticker: impl Into<String>) -> Self {
        Self {
            portfolio_id,
            ticker: ticker.into(),
            target_weight: Decimal::ZERO,
            quantity: 0,
        }
    }

    /// Whether the holding takes part in rebalancing
    pub fn is_index_tracked(&self) -> bool {
        self.target_weight > Decimal::ZERO
    }
}

/// Remaining part of one purchase, consumed oldest-first on sells
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PurchaseLot {
    /// Creation-ordered identifier
    pub row_id: i64,
    pub portfolio_id: PortfolioId,
    pub ticker: String,

    /// Shares still held from this purchase
    pub quantity: i64,

    /// Price paid per share
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lot to be inserted; the store assigns the row id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLot {
    pub portfolio_id: PortfolioId,
    pub ticker: String,
    pub quantity: i64,
    pub price: Decimal,
}

/// Entry of the append-only trade history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StockOperation {
    pub portfolio_id: PortfolioId,
    pub ticker: String,
    pub short_name: String,

    /// Signed share count, negative for sells
    pub quantity: i64,

    /// Price per share
    pub price: Decimal,

    /// `price * quantity`, signed like the quantity
    pub total_price: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl StockOperation {
    pub fn new(portfolio_id: PortfolioId, info: &StockInfo, quantity: i64, price: Decimal) -> Self {
        Self {
            portfolio_id,
            ticker: info.ticker.clone(),
            short_name: info.short_name.clone(),
            quantity,
            price,
            total_price: price * Decimal::from(quantity),
            currency: info.currency.clone(),
            created_at: Utc::now(),
        }
    }

    pub const fn is_buy(&self) -> bool {
        self.quantity > 0
    }
}

/// Aggregated valuation of a portfolio
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub portfolio_id: PortfolioId,
    pub portfolio_name: String,

    /// Market value of index-tracked holdings
    pub balance_inside_index: Decimal,

    /// Market value of holdings with zero target weight
    pub balance_outside_index: Decimal,

    /// Sum of positive target weights
    pub total_weight: Decimal,
    pub stocks_count: usize,
    pub stocks_outside_index_count: usize,

    /// Sum of absolute deviations between actual and target weights, in percent points
    pub index_offset: Decimal,
    pub growth_sum_inside_index: Decimal,
    pub growth_percent_inside_index: Decimal,
    pub growth_sum_outside_index: Decimal,
    pub growth_percent_outside_index: Decimal,

    /// Tickers that had no price and were valued at zero
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_tickers: Vec<String>,
}

impl PortfolioSummary {
    pub fn total_balance(&self) -> Decimal {
        self.balance_inside_index + self.balance_outside_index
    }

    /// Whether some holdings were valued without a price
    pub fn is_partial(&self) -> bool {
        !self.missing_tickers.is_empty()
    }
}

/// Holding joined with market data and cost basis
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedStock {
    pub portfolio_id: PortfolioId,
    pub ticker: String,
    pub short_name: String,
    pub lot_size: i64,
    pub currency: String,
    pub target_weight: Decimal,
    pub actual_weight: Decimal,
    pub quantity: i64,
    pub price: Decimal,
    pub total_price: Decimal,
    pub avg_price: Decimal,
    pub growth_sum: Decimal,
    pub growth_percent: Decimal,
}

impl EnrichedStock {
    /// Holding known only to the ledger, without market data
    pub fn from_holding(holding: &Holding) -> Self {
        Self {
            portfolio_id: holding.portfolio_id,
            ticker: holding.ticker.clone(),
            target_weight: holding.target_weight,
            quantity: holding.quantity,
            ..Self::default()
        }
    }

    /// Price of one whole lot
    pub fn lot_price(&self) -> Decimal {
        self.price * Decimal::from(self.lot_size)
    }
}

/// One line of a purchase plan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPurchase {
    pub ticker: String,
    pub short_name: String,
    pub lot_size: i64,

    /// Lots to buy; may carry a fractional part before rounding
    pub lots: Decimal,

    /// Share price when the plan was computed
    pub price: Decimal,
    pub currency: String,
}

impl StockPurchase {
    /// Lots that will actually be bought
    pub fn whole_lots(&self) -> i64 {
        self.lots
            .round_dp_with_strategy(0, RoundingStrategy::ToZero)
            .to_i64()
            .unwrap_or(0)
    }

    /// Shares that will actually be bought
    pub fn quantity(&self) -> i64 {
        self.whole_lots() * self.lot_size
    }

    /// Cash spent on this line
    pub fn cost(&self) -> Decimal {
        self.price * Decimal::from(self.quantity())
    }
}

/// Total cost of a purchase plan
pub fn plan_cost(plan: &[StockPurchase]) -> Decimal {
    plan.iter().map(StockPurchase::cost).sum()
}

/// Summary plus one page of holdings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioPage {
    pub summary: PortfolioSummary,
    pub stocks: Vec<EnrichedStock>,
    pub current_page: i64,
    pub total_pages: i64,
}

/// One page of a user's portfolios
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioList {
    pub portfolios: Vec<Portfolio>,
    pub current_page: i64,
    pub has_next_page: bool,
}

/// Everything known about a portfolio, used for reports
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PortfolioFullInfo {
    pub summary: PortfolioSummary,
    pub stocks: Vec<EnrichedStock>,
    pub operations: Vec<StockOperation>,
}

/// Whole pages needed for `count` items
pub const fn total_pages(count: usize, per_page: i64) -> i64 {
    if per_page <= 0 {
        return 0;
    }
    let count = count as i64;
    (count + per_page - 1) / per_page
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_whole_lots_truncate() {
        let purchase = StockPurchase {
            ticker: "SBER".into(),
            short_name: "Sberbank".into(),
            lot_size: 10,
            lots: dec!(3.7),
            price: dec!(250),
            currency: "RUB".into(),
        };

        assert_eq!(purchase.whole_lots(), 3);
        assert_eq!(purchase.quantity(), 30);
        assert_eq!(purchase.cost(), dec!(7500));
        assert_eq!(plan_cost(&[purchase.clone(), purchase]), dec!(15000));
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(5, 0), 0);
    }

    #[test]
    fn test_operation_total_is_signed() {
        let info = StockInfo::new("gazp", "Gazprom", dec!(160.5));
        let sell = StockOperation::new(1, &info, -4, info.price);

        assert_eq!(sell.ticker, "GAZP");
        assert_eq!(sell.total_price, dec!(-642.0));
        assert!(!sell.is_buy());
    }
}
