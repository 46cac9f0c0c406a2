//! Purchase Allocator
//!
//! Splits a cash injection across index-tracked holdings in whole lots.
//!
//! Holdings are visited in [`PurchaseOrdering`] order. Each gets
//! `(balance_inside_index + sum) × target% − current value`, clamped to the
//! cash still unspent, and buys as many whole lots as that covers. A second
//! pass rounds a line up by one lot when its fractional part is at least a
//! half and the leftover cash pays for it.

use std::cmp::Ordering;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use super::fifo::CostLedger;
use super::EngineContext;
use super::valuation::Valuation;
use crate::config::PurchaseOrdering;
use crate::error::{InvestError, Result};
use crate::model::{EnrichedStock, NewLot, PortfolioId, StockOperation, StockPurchase, plan_cost};

fn by_ordering(ordering: PurchaseOrdering) -> impl Fn(&EnrichedStock, &EnrichedStock) -> Ordering {
    move |a, b| match ordering {
        PurchaseOrdering::LotPriceDesc => b.lot_price().cmp(&a.lot_price()),
        PurchaseOrdering::UnderweightDesc => {
            (b.target_weight - b.actual_weight).cmp(&(a.target_weight - a.actual_weight))
        }
    }
}

/// Compute a purchase plan; spends at most `sum`
pub fn plan_purchase(
    stocks: &[EnrichedStock],
    balance_inside_index: Decimal,
    sum: Decimal,
    ordering: PurchaseOrdering,
) -> Vec<StockPurchase> {
    let mut ordered: Vec<&EnrichedStock> = stocks.iter().collect();
    let compare = by_ordering(ordering);
    ordered.sort_by(|a, b| compare(*a, *b));

    let target_balance = balance_inside_index + sum;
    let mut remainder = sum;
    let mut plan: Vec<(StockPurchase, Decimal)> = Vec::new();

    for stock in ordered {
        let lot_price = stock.lot_price();
        let mut need = target_balance * stock.target_weight / dec!(100) - stock.total_price;
        if need <= Decimal::ZERO || lot_price <= Decimal::ZERO {
            continue;
        }
        if need > remainder {
            need = remainder;
        }

        let lots = need / lot_price;
        let whole = lots.trunc();
        if whole.is_zero() {
            continue;
        }
        remainder -= whole * lot_price;

        plan.push((
            StockPurchase {
                ticker: stock.ticker.clone(),
                short_name: stock.short_name.clone(),
                lot_size: stock.lot_size,
                lots,
                price: stock.price,
                currency: stock.currency.clone(),
            },
            lot_price,
        ));
    }

    for (purchase, lot_price) in &mut plan {
        let rounded = purchase
            .lots
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        if rounded > purchase.lots && remainder >= *lot_price {
            purchase.lots = rounded;
            remainder -= *lot_price;
        }
    }

    plan.into_iter().map(|(purchase, _)| purchase).collect()
}

/// Plans and executes purchases for a portfolio
#[derive(Clone)]
pub struct Allocator {
    ctx: EngineContext,
    valuation: Valuation,
    costs: CostLedger,
}

impl Allocator {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            valuation: Valuation::new(ctx.clone()),
            costs: CostLedger::new(ctx.clone()),
            ctx,
        }
    }

    /// Plan how to spend `sum` on the portfolio's index holdings
    pub async fn calculate(
        &self,
        portfolio_id: PortfolioId,
        sum: Decimal,
    ) -> Result<Vec<StockPurchase>> {
        if sum <= Decimal::ZERO {
            return Err(InvestError::Validation(
                "purchase sum must be positive".into(),
            ));
        }

        let holdings = self.ctx.ledger.index_holdings(portfolio_id).await?;
        if holdings.is_empty() {
            tracing::info!(portfolio_id, "no index holdings, nothing to plan");
            return Ok(Vec::new());
        }

        let summary = self.valuation.summary(portfolio_id).await?;
        let stocks = self
            .valuation
            .enrich_holdings(portfolio_id, &holdings, summary.balance_inside_index, None)
            .await?;

        let plan = plan_purchase(
            &stocks,
            summary.balance_inside_index,
            sum,
            self.ctx.config.purchase_ordering,
        );

        tracing::info!(
            portfolio_id,
            %sum,
            lines = plan.len(),
            cost = %plan_cost(&plan),
            "purchase plan calculated"
        );

        Ok(plan)
    }

    /// Record the whole lots of a plan as buys in one transaction
    pub async fn apply(&self, portfolio_id: PortfolioId, plan: &[StockPurchase]) -> Result<()> {
        let lines: Vec<&StockPurchase> = plan.iter().filter(|p| p.quantity() > 0).collect();
        if lines.is_empty() {
            tracing::info!(portfolio_id, "purchase plan has no whole lots, nothing applied");
            return Ok(());
        }

        let mut deltas = Vec::with_capacity(lines.len());
        let mut operations = Vec::with_capacity(lines.len());
        let mut lots = Vec::with_capacity(lines.len());

        for line in &lines {
            let quantity = line.quantity();
            let currency = if line.currency.is_empty() {
                self.ctx.config.default_currency.clone()
            } else {
                line.currency.clone()
            };

            deltas.push((line.ticker.clone(), quantity));
            operations.push(StockOperation {
                portfolio_id,
                ticker: line.ticker.clone(),
                short_name: line.short_name.clone(),
                quantity,
                price: line.price,
                total_price: line.price * Decimal::from(quantity),
                currency,
                created_at: chrono::Utc::now(),
            });
            lots.push(NewLot {
                portfolio_id,
                ticker: line.ticker.clone(),
                quantity,
                price: line.price,
            });
        }

        let mut tx = self.ctx.ledger.begin().await?;
        tx.adjust_quantities(portfolio_id, &deltas).await?;
        tx.insert_operations(&operations).await?;
        tx.insert_lots(&lots).await?;
        tx.commit().await?;

        tracing::info!(
            portfolio_id,
            lines = lines.len(),
            cost = %plan_cost(plan),
            "purchase plan applied"
        );

        let tickers: Vec<String> = deltas.into_iter().map(|(ticker, _)| ticker).collect();
        self.costs.refresh_after_trade(portfolio_id, &tickers).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock(ticker: &str, lot_price: Decimal, weight: Decimal, total: Decimal) -> EnrichedStock {
        EnrichedStock {
            portfolio_id: 1,
            ticker: ticker.into(),
            short_name: ticker.into(),
            lot_size: 1,
            currency: "RUB".into(),
            target_weight: weight,
            price: lot_price,
            total_price: total,
            ..EnrichedStock::default()
        }
    }

    #[test]
    fn test_second_pass_rounds_up_when_cash_allows() {
        let stocks = [
            stock("B", dec!(300), dec!(50), Decimal::ZERO),
            stock("A", dec!(600), dec!(50), Decimal::ZERO),
        ];

        let plan = plan_purchase(
            &stocks,
            Decimal::ZERO,
            dec!(2200),
            PurchaseOrdering::LotPriceDesc,
        );

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].ticker, "A");
        assert_eq!(plan[0].lots, dec!(2));
        assert_eq!(plan[1].ticker, "B");
        assert_eq!(plan[1].whole_lots(), 3);
        assert_eq!(plan_cost(&plan), dec!(2100));
    }

    #[test]
    fn test_need_is_clamped_to_remaining_cash() {
        let stocks = [
            stock("A", dec!(500), dec!(50), dec!(1000)),
            stock("B", dec!(100), dec!(50), Decimal::ZERO),
        ];

        let plan = plan_purchase(&stocks, dec!(1000), dec!(200), PurchaseOrdering::LotPriceDesc);

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].ticker, "B");
        assert_eq!(plan[0].lots, dec!(2));
    }

    #[test]
    fn test_lots_that_do_not_fit_are_skipped() {
        let stocks = [
            stock("EXPENSIVE", dec!(5000), dec!(50), Decimal::ZERO),
            stock("FREE", Decimal::ZERO, dec!(50), Decimal::ZERO),
        ];

        let plan = plan_purchase(
            &stocks,
            Decimal::ZERO,
            dec!(1000),
            PurchaseOrdering::LotPriceDesc,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_never_exceeds_sum() {
        let stocks = [
            stock("SBER", dec!(2854), dec!(40), dec!(5708)),
            stock("GAZP", dec!(1621.5), dec!(35), Decimal::ZERO),
            stock("LKOH", dec!(7120.5), dec!(25), Decimal::ZERO),
        ];

        for sum in [dec!(1000), dec!(10000), dec!(33333.33), dec!(100000)] {
            let plan = plan_purchase(&stocks, dec!(5708), sum, PurchaseOrdering::LotPriceDesc);
            assert!(plan_cost(&plan) <= sum, "overspent {sum}");
            assert!(plan.iter().all(|p| p.whole_lots() > 0));
        }
    }

    #[test]
    fn test_underweight_ordering_visits_largest_gap_first() {
        let mut behind = stock("BEHIND", dec!(100), dec!(50), Decimal::ZERO);
        behind.actual_weight = dec!(10);
        let mut ahead = stock("AHEAD", dec!(1000), dec!(50), dec!(100));
        ahead.actual_weight = dec!(90);

        let plan = plan_purchase(
            &[ahead, behind],
            dec!(100),
            dec!(150),
            PurchaseOrdering::UnderweightDesc,
        );

        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].ticker, "BEHIND");
    }
}
