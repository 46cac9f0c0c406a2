//! # invest-engine
//!
//! Portfolio valuation, FIFO cost tracking and whole-lot purchase allocation
//! for index-following stock portfolios.
//!
//! ## Philosophy
//!
//! - **Target weights** - every holding inside the index has a target share
//! - **Buy towards the target** - new cash goes where the portfolio lags
//! - **Whole lots only** - exchanges trade in lots, so plans do too
//! - **FIFO lots** - sells consume the oldest purchases first
//!
//! ## Example: 10 000 RUB into a 60/40 index
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  balance inside index: 0       sum: 10 000                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  LKOH  target 60%  need 6 000  lot 7 120.5  →  0 lots       │
//! │  SBER  target 40%  need 4 000  lot 2 854.0  →  1 lot        │
//! │                                                             │
//! │  second pass: SBER 1.40 lots rounds down, stays at 1        │
//! │  spent 2 854.0, left 7 146.0                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Layout
//!
//! ```text
//!            svckit tools ──► InvestService
//!                                  │
//!          ┌───────────────────────┼───────────────────────┐
//!      Valuation              CostLedger               Allocator
//!          └───────────┬───────────┴───────────┬───────────┘
//!                 PriceSource   LedgerStore   PortfolioCache
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod model;
pub mod price;
pub mod service;
pub mod svckit;

pub use config::{DatabaseConfig, InvestConfig, MoexConfig, PurchaseOrdering};
pub use error::{CacheError, InvestError, Result};
pub use model::{
    EnrichedStock, Holding, Portfolio, PortfolioFullInfo, PortfolioPage, PortfolioSummary,
    PurchaseLot, StockInfo, StockOperation, StockPurchase,
};
pub use service::InvestService;

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{
        PortfolioManagerTool, PortfolioViewTool, PriceLookupTool, PurchasePlannerTool,
        ReportTool, StockOpsTool, invest_tools,
    };
}
