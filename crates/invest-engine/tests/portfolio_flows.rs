//! End-to-end flows over the in-memory price source, ledger and cache.

use std::sync::Arc;

use chat_core::{MemorySessionStore, SessionStore, ToolCall};
use invest_engine::cache::{MemoryCache, PortfolioCache};
use invest_engine::ledger::{LedgerStore, MemoryLedger};
use invest_engine::model::{PortfolioId, plan_cost};
use invest_engine::price::FixedPriceSource;
use invest_engine::svckit::{PENDING_PURCHASE, PendingPurchase, invest_tools};
use invest_engine::{Holding, InvestConfig, InvestError, InvestService, StockInfo, StockPurchase};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

const CHAT: i64 = 1001;
const INTRUDER: i64 = 2002;

struct Fixture {
    service: Arc<InvestService>,
    prices: Arc<FixedPriceSource>,
    ledger: Arc<MemoryLedger>,
    cache: Arc<MemoryCache>,
}

impl Fixture {
    fn new() -> Self {
        let prices = Arc::new(
            FixedPriceSource::new()
                .with_stock(StockInfo::new("AAA", "Alpha", dec!(100)))
                .with_stock(StockInfo::new("BBB", "Beta", dec!(50)))
                .with_stock(StockInfo::new("CCC", "Gamma", dec!(20))),
        );
        let ledger = Arc::new(MemoryLedger::new());
        let config = InvestConfig::default();
        let cache = Arc::new(MemoryCache::new(config.cache_ttl_chrono()));
        let service = Arc::new(InvestService::new(
            prices.clone(),
            ledger.clone(),
            cache.clone(),
            config,
        ));

        Self {
            service,
            prices,
            ledger,
            cache,
        }
    }

    /// Registered user with one portfolio holding `stocks` at the given weights
    async fn portfolio(&self, stocks: &[(&str, Decimal)]) -> PortfolioId {
        self.service.register_user(CHAT).await.unwrap();
        let portfolio = self.service.create_portfolio(CHAT, "Index").await.unwrap();
        for (ticker, weight) in stocks {
            self.service.add_stock(portfolio.id, ticker).await.unwrap();
            self.service
                .change_weight(portfolio.id, ticker, *weight)
                .await
                .unwrap();
        }
        portfolio.id
    }

    async fn lots_total(&self, portfolio_id: PortfolioId, ticker: &str) -> i64 {
        self.ledger
            .lots(portfolio_id, ticker)
            .await
            .unwrap()
            .iter()
            .map(|l| l.quantity)
            .sum()
    }

    async fn quantity(&self, portfolio_id: PortfolioId, ticker: &str) -> i64 {
        self.ledger.holding(portfolio_id, ticker).await.unwrap().quantity
    }
}

/// Let fire-and-forget cache writes run
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_lots_always_match_quantity() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("SBER", dec!(100))]).await;

    let steps = [
        (10, dec!(280)),
        (5, dec!(290)),
        (-7, dec!(300)),
        (3, dec!(270)),
        (-11, dec!(310)),
    ];

    for (quantity, price) in steps {
        if quantity > 0 {
            fx.service.buy(pid, "SBER", quantity, Some(price)).await.unwrap();
        } else {
            fx.service.sell(pid, "SBER", -quantity, Some(price)).await.unwrap();
        }
        assert_eq!(
            fx.lots_total(pid, "SBER").await,
            fx.quantity(pid, "SBER").await
        );
    }

    assert_eq!(fx.quantity(pid, "SBER").await, 0);
    assert!(fx.ledger.lots(pid, "SBER").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sell_consumes_oldest_lots_first() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("SBER", dec!(100))]).await;

    fx.service.buy(pid, "SBER", 10, Some(dec!(100))).await.unwrap();
    fx.service.buy(pid, "SBER", 5, Some(dec!(120))).await.unwrap();
    fx.service.sell(pid, "SBER", 12, None).await.unwrap();

    let lots = fx.ledger.lots(pid, "SBER").await.unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].quantity, 3);
    assert_eq!(lots[0].price, dec!(120));

    let history = fx.ledger.operations(pid).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].quantity, -12);
    assert_eq!(history[2].price, dec!(285.40));
}

#[tokio::test]
async fn test_average_cost_follows_purchase_prices() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("GAZP", dec!(100))]).await;

    let first = fx.service.buy(pid, "GAZP", 10, Some(dec!(100))).await.unwrap();
    assert_eq!(first.avg_price, dec!(100));

    let higher = fx.service.buy(pid, "GAZP", 10, Some(dec!(120))).await.unwrap();
    assert!(higher.avg_price > first.avg_price);
    assert_eq!(higher.avg_price, dec!(110));

    let lower = fx.service.buy(pid, "GAZP", 20, Some(dec!(80))).await.unwrap();
    assert!(lower.avg_price < higher.avg_price);
    assert_eq!(lower.avg_price, dec!(95));

    // sells do not move the buy average
    let after_sell = fx.service.sell(pid, "GAZP", 15, Some(dec!(200))).await.unwrap();
    assert_eq!(after_sell.avg_price, dec!(95));
}

#[tokio::test]
async fn test_summary_balances_add_up() {
    let fx = Fixture::new();
    let pid = fx
        .portfolio(&[("AAA", dec!(50)), ("BBB", dec!(50)), ("CCC", Decimal::ZERO)])
        .await;

    fx.service.buy(pid, "AAA", 3, None).await.unwrap();
    fx.service.buy(pid, "BBB", 7, None).await.unwrap();
    fx.service.buy(pid, "CCC", 11, None).await.unwrap();

    let summary = fx.service.summary(pid).await.unwrap();
    let expected = dec!(100) * dec!(3) + dec!(50) * dec!(7) + dec!(20) * dec!(11);

    assert_eq!(summary.total_balance(), expected);
    assert_eq!(summary.balance_outside_index, dec!(220));
    assert_eq!(summary.stocks_count, 3);
    assert_eq!(summary.stocks_outside_index_count, 1);
    assert_eq!(summary.total_weight, dec!(100));
}

#[tokio::test]
async fn test_index_offset_is_zero_at_target() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("AAA", dec!(60)), ("BBB", dec!(40))]).await;

    fx.service.buy(pid, "AAA", 6, None).await.unwrap();
    fx.service.buy(pid, "BBB", 8, None).await.unwrap();

    let summary = fx.service.summary(pid).await.unwrap();
    assert_eq!(summary.balance_inside_index, dec!(1000));
    assert!(summary.index_offset.is_zero());
}

#[tokio::test]
async fn test_plan_for_empty_sixty_forty_index() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("AAA", dec!(60)), ("BBB", dec!(40))]).await;

    let plan = fx.service.calculate_purchase(pid, dec!(1000)).await.unwrap();

    assert_eq!(plan.len(), 2);
    assert_eq!((plan[0].ticker.as_str(), plan[0].quantity()), ("AAA", 6));
    assert_eq!((plan[1].ticker.as_str(), plan[1].quantity()), ("BBB", 8));
    assert!(plan_cost(&plan) <= dec!(1000));

    fx.service.apply_purchase(pid, &plan).await.unwrap();
    assert_eq!(fx.quantity(pid, "AAA").await, 6);
    assert_eq!(fx.quantity(pid, "BBB").await, 8);
    assert_eq!(fx.lots_total(pid, "BBB").await, 8);

    let summary = fx.service.summary(pid).await.unwrap();
    assert!(summary.index_offset.is_zero());
}

#[tokio::test]
async fn test_plan_never_overspends() {
    let fx = Fixture::new();
    let pid = fx
        .portfolio(&[("SBER", dec!(40)), ("LKOH", dec!(35)), ("GMKN", dec!(25))])
        .await;
    fx.service.buy(pid, "SBER", 20, None).await.unwrap();

    for sum in [dec!(500), dec!(7000), dec!(12345.67), dec!(250000)] {
        let plan = fx.service.calculate_purchase(pid, sum).await.unwrap();
        assert!(plan_cost(&plan) <= sum, "plan for {sum} costs {}", plan_cost(&plan));
    }
}

#[tokio::test]
async fn test_plan_is_empty_above_target() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("AAA", dec!(30)), ("BBB", dec!(20))]).await;
    fx.service.buy(pid, "AAA", 6, None).await.unwrap();
    fx.service.buy(pid, "BBB", 8, None).await.unwrap();

    let plan = fx.service.calculate_purchase(pid, dec!(100)).await.unwrap();
    assert!(plan.is_empty());

    let outside_only = fx.portfolio(&[("CCC", Decimal::ZERO)]).await;
    assert!(
        fx.service
            .calculate_purchase(outside_only, dec!(1000))
            .await
            .unwrap()
            .is_empty()
    );
    assert!(matches!(
        fx.service.calculate_purchase(pid, Decimal::ZERO).await,
        Err(InvestError::Validation(_))
    ));
}

#[tokio::test]
async fn test_oversell_rolls_back() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("SBER", dec!(100))]).await;
    fx.service.buy(pid, "SBER", 5, Some(dec!(250))).await.unwrap();
    let lots_before = fx.ledger.lots(pid, "SBER").await.unwrap();

    let err = fx.service.sell(pid, "SBER", 6, None).await.unwrap_err();
    assert!(matches!(
        err,
        InvestError::InsufficientRemainings { missing: 1, .. }
    ));

    assert_eq!(fx.quantity(pid, "SBER").await, 5);
    assert_eq!(fx.ledger.lots(pid, "SBER").await.unwrap(), lots_before);
    assert_eq!(fx.ledger.operations(pid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cached_views_match_computed_views() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("AAA", dec!(70)), ("BBB", dec!(30))]).await;
    fx.service.buy(pid, "AAA", 4, Some(dec!(90))).await.unwrap();
    fx.service.buy(pid, "BBB", 9, Some(dec!(55))).await.unwrap();
    fx.cache.flush_portfolio(pid).await.unwrap();

    let computed = fx.service.portfolio_page(pid, 1).await.unwrap();
    settle().await;
    assert!(fx.cache.summary(pid).await.is_ok());
    assert!(fx.cache.portfolio_page(pid, 1).await.is_ok());

    let cached = fx.service.portfolio_page(pid, 1).await.unwrap();
    assert_eq!(cached.summary, computed.summary);
    assert_eq!(cached.stocks, computed.stocks);

    // a price move is invisible until the cache expires or is flushed
    fx.prices.set_price("AAA", dec!(150));
    let stale = fx.service.summary(pid).await.unwrap();
    assert_eq!(stale, computed.summary);
}

#[tokio::test]
async fn test_mutation_flushes_only_its_portfolio() {
    let fx = Fixture::new();
    let first = fx.portfolio(&[("AAA", dec!(100))]).await;
    let second = fx.portfolio(&[("BBB", dec!(100))]).await;

    fx.service.summary(first).await.unwrap();
    fx.service.summary(second).await.unwrap();
    settle().await;

    fx.service.change_weight(first, "AAA", dec!(80)).await.unwrap();

    assert!(fx.cache.summary(first).await.unwrap_err().is_miss());
    assert!(fx.cache.summary(second).await.is_ok());
    assert_eq!(fx.service.summary(first).await.unwrap().total_weight, dec!(80));
}

#[tokio::test]
async fn test_stock_without_market_data() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("CCC", dec!(100))]).await;
    fx.service.buy(pid, "CCC", 10, None).await.unwrap();

    let delisted = Arc::new(FixedPriceSource::empty());
    let config = InvestConfig::default();
    let blind = InvestService::new(
        delisted,
        fx.ledger.clone(),
        Arc::new(MemoryCache::new(config.cache_ttl_chrono())),
        config,
    );

    match blind.portfolio_stock(pid, "CCC").await {
        Err(InvestError::ActualStockInfoUnavailable(stock)) => {
            assert_eq!(stock.ticker, "CCC");
            assert_eq!(stock.quantity, 10);
            assert!(stock.price.is_zero());
        }
        other => panic!("expected unavailable market data, got {other:?}"),
    }

    let summary = blind.summary(pid).await.unwrap();
    assert!(summary.is_partial());
    assert!(summary.total_balance().is_zero());
}

#[tokio::test]
async fn test_partial_summary_is_not_cached() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("CCC", dec!(100))]).await;
    fx.service.buy(pid, "CCC", 10, None).await.unwrap();

    let config = InvestConfig::default();
    let cache = Arc::new(MemoryCache::new(config.cache_ttl_chrono()));
    let blind = InvestService::new(
        Arc::new(FixedPriceSource::empty()),
        fx.ledger.clone(),
        cache.clone(),
        config,
    );

    assert!(blind.summary(pid).await.unwrap().is_partial());
    settle().await;
    assert!(cache.summary(pid).await.unwrap_err().is_miss());
}

#[tokio::test]
async fn test_stock_without_price_is_not_tradable() {
    let fx = Fixture::new();
    fx.prices.set_stock(StockInfo::new("NOPX", "No price", Decimal::ZERO));
    let pid = fx.portfolio(&[]).await;

    assert!(matches!(
        fx.service.add_stock(pid, "NOPX").await,
        Err(InvestError::StockNotActive(t)) if t == "NOPX"
    ));

    // held from before the quote disappeared
    fx.ledger.insert_holding(&Holding::new(pid, "NOPX")).await.unwrap();
    assert!(matches!(
        fx.service.buy(pid, "NOPX", 10, None).await,
        Err(InvestError::StockNotActive(_))
    ));
    assert_eq!(fx.quantity(pid, "NOPX").await, 0);
    assert!(fx.ledger.operations(pid).await.unwrap().is_empty());

    let priced = fx.service.buy(pid, "NOPX", 10, Some(dec!(5))).await.unwrap();
    assert_eq!(priced.quantity, 10);
    assert_eq!(priced.avg_price, dec!(5));
}

#[tokio::test]
async fn test_failed_plan_line_discards_the_whole_plan() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("AAA", dec!(60))]).await;
    fx.service.buy(pid, "AAA", 2, None).await.unwrap();
    let lots_before = fx.ledger.lots(pid, "AAA").await.unwrap();

    let line = |ticker: &str, price: Decimal| StockPurchase {
        ticker: ticker.into(),
        short_name: ticker.into(),
        lot_size: 1,
        lots: dec!(3),
        price,
        currency: "RUB".into(),
    };
    // CCC was never added to the portfolio
    let plan = [line("AAA", dec!(100)), line("CCC", dec!(20))];

    let err = fx.service.apply_purchase(pid, &plan).await.unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(fx.quantity(pid, "AAA").await, 2);
    assert_eq!(fx.ledger.lots(pid, "AAA").await.unwrap(), lots_before);
    assert_eq!(fx.ledger.operations(pid).await.unwrap().len(), 1);
    assert!(fx.ledger.holding(pid, "CCC").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_rebalance_scales_weights_to_hundred() {
    let fx = Fixture::new();
    let pid = fx
        .portfolio(&[("AAA", dec!(30)), ("BBB", dec!(20)), ("CCC", Decimal::ZERO)])
        .await;

    let weights = fx.service.rebalance_weights(pid).await.unwrap();
    assert_eq!(weights.len(), 2);

    let holdings = fx.ledger.holdings(pid).await.unwrap();
    let weight_of = |t: &str| {
        holdings
            .iter()
            .find(|h| h.ticker == t)
            .map(|h| h.target_weight)
            .unwrap()
    };
    assert_eq!(weight_of("AAA"), dec!(60));
    assert_eq!(weight_of("BBB"), dec!(40));
    assert!(weight_of("CCC").is_zero());
    assert_eq!(fx.service.summary(pid).await.unwrap().total_weight, dec!(100));
}

#[tokio::test]
async fn test_portfolio_paging() {
    let fx = Fixture::new();
    fx.service.register_user(CHAT).await.unwrap();

    for i in 0..5 {
        fx.service.create_portfolio(CHAT, &format!("P{i}")).await.unwrap();
    }
    let only = fx.service.portfolios(CHAT, 1).await.unwrap();
    assert_eq!(only.portfolios.len(), 5);
    assert!(!only.has_next_page);

    fx.service.create_portfolio(CHAT, "P5").await.unwrap();
    let first = fx.service.portfolios(CHAT, 1).await.unwrap();
    let second = fx.service.portfolios(CHAT, 2).await.unwrap();
    assert!(first.has_next_page);
    assert_eq!(second.portfolios.len(), 1);
    assert_eq!(second.portfolios[0].name, "P5");
    assert!(!second.has_next_page);
}

#[tokio::test]
async fn test_far_pages_are_empty() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[("AAA", dec!(100))]).await;

    let list = fx.service.portfolios(CHAT, i64::MAX).await.unwrap();
    assert!(list.portfolios.is_empty());
    assert!(!list.has_next_page);

    let page = fx.service.portfolio_page(pid, i64::MAX).await.unwrap();
    assert!(page.stocks.is_empty());
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.summary.stocks_count, 1);
}

#[tokio::test]
async fn test_stock_page_count() {
    let fx = Fixture::new();
    let pid = fx.portfolio(&[]).await;
    for ticker in ["AAA", "BBB", "CCC", "SBER", "GAZP", "LKOH", "GMKN", "YDEX", "MTSS", "VTBR"] {
        fx.service.add_stock(pid, ticker).await.unwrap();
    }

    let page = fx.service.portfolio_page(pid, 1).await.unwrap();
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.stocks.len(), 10);
    assert_eq!(page.stocks[0].ticker, "AAA");

    fx.service.remove_stock(pid, "VTBR").await.unwrap();
    let summary = fx.service.summary(pid).await.unwrap();
    assert_eq!(summary.stocks_count, 9);
}

#[tokio::test]
async fn test_report_covers_every_portfolio() {
    let fx = Fixture::new();
    let first = fx.portfolio(&[("AAA", dec!(100))]).await;
    let second = fx.portfolio(&[("AAA", dec!(50)), ("BBB", dec!(50))]).await;
    fx.service.buy(first, "AAA", 2, None).await.unwrap();
    fx.service.buy(second, "BBB", 4, None).await.unwrap();

    let report = fx.service.portfolios_report(CHAT).await.unwrap();
    assert_eq!(report.len(), 2);
    assert_eq!(report[0].summary.balance_inside_index, dec!(200));
    assert_eq!(report[1].stocks.len(), 2);
    assert_eq!(report[1].operations.len(), 1);
    assert_eq!(report[1].summary.portfolio_id, second);
}

#[tokio::test]
async fn test_chat_calculate_then_apply() {
    let fx = Fixture::new();
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
    let registry = invest_tools(fx.service.clone(), sessions.clone());

    let call = |tool: &str, args: serde_json::Value| {
        let mut call = ToolCall::new(tool, CHAT);
        if let serde_json::Value::Object(map) = args {
            call.arguments = map.into_iter().collect();
        }
        call
    };

    for (tool, args) in [
        ("portfolio_manager", json!({"action": "register"})),
        ("portfolio_manager", json!({"action": "create", "name": "Index"})),
        ("stock_ops", json!({"action": "add", "ticker": "aaa"})),
        ("stock_ops", json!({"action": "add", "ticker": "bbb"})),
        ("stock_ops", json!({"action": "weight", "ticker": "AAA", "weight": 60})),
        ("stock_ops", json!({"action": "weight", "ticker": "BBB", "weight": "40"})),
    ] {
        let result = registry.execute(&call(tool, args)).await.unwrap();
        assert!(result.success, "{tool}: {}", result.output);
    }

    let planned = registry
        .execute(&call("purchase_planner", json!({"action": "calculate", "sum": "1000"})))
        .await
        .unwrap();
    assert!(planned.success, "{}", planned.output);

    let session = sessions.load(CHAT).unwrap().unwrap();
    let pending: PendingPurchase = session.require(PENDING_PURCHASE).unwrap();
    assert_eq!(pending.plan.len(), 2);

    let applied = registry
        .execute(&call("purchase_planner", json!({"action": "apply"})))
        .await
        .unwrap();
    assert!(applied.success, "{}", applied.output);
    assert_eq!(fx.quantity(pending.portfolio_id, "AAA").await, 6);
    assert_eq!(fx.quantity(pending.portfolio_id, "BBB").await, 8);

    let session = sessions.load(CHAT).unwrap().unwrap();
    assert!(session.get::<PendingPurchase>(PENDING_PURCHASE).unwrap().is_none());

    let again = registry
        .execute(&call("purchase_planner", json!({"action": "apply"})))
        .await
        .unwrap();
    assert!(!again.success);
}

#[tokio::test]
async fn test_chat_reports_engine_errors_as_failures() {
    let fx = Fixture::new();
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
    let registry = invest_tools(fx.service.clone(), sessions);
    let pid = fx.portfolio(&[("SBER", dec!(100))]).await;

    let oversell = ToolCall::new("stock_ops", CHAT)
        .with_arg("action", json!("sell"))
        .with_arg("ticker", json!("SBER"))
        .with_arg("portfolio_id", json!(pid))
        .with_arg("quantity", json!(3));
    let result = registry.execute(&oversell).await.unwrap();
    assert!(!result.success);

    let missing_ticker = ToolCall::new("stock_ops", CHAT).with_arg("action", json!("add"));
    assert!(registry.execute(&missing_ticker).await.is_err());

    let lookup = ToolCall::new("price_lookup", CHAT).with_arg("tickers", json!("sber, nope"));
    let result = registry.execute(&lookup).await.unwrap();
    assert!(result.success);
    assert!(result.output.contains("SBER"));
    assert!(result.output.contains("NOPE"));
}

#[tokio::test]
async fn test_chat_cannot_touch_another_users_portfolio() {
    let fx = Fixture::new();
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
    let registry = invest_tools(fx.service.clone(), sessions.clone());
    let pid = fx.portfolio(&[("AAA", dec!(100))]).await;

    fx.service.register_user(INTRUDER).await.unwrap();

    let delete = ToolCall::new("portfolio_manager", INTRUDER)
        .with_arg("action", json!("delete"))
        .with_arg("portfolio_id", json!(pid));
    let result = registry.execute(&delete).await.unwrap();
    assert!(!result.success);

    let buy = ToolCall::new("stock_ops", INTRUDER)
        .with_arg("action", json!("buy"))
        .with_arg("ticker", json!("AAA"))
        .with_arg("portfolio_id", json!(pid))
        .with_arg("quantity", json!(1));
    assert!(!registry.execute(&buy).await.unwrap().success);

    assert!(fx.service.portfolio(pid).await.is_ok());
    assert_eq!(fx.quantity(pid, "AAA").await, 0);
    assert!(sessions.load(INTRUDER).unwrap().is_none());

    // the owner still can
    let own = ToolCall::new("portfolio_manager", CHAT)
        .with_arg("action", json!("delete"))
        .with_arg("portfolio_id", json!(pid));
    assert!(registry.execute(&own).await.unwrap().success);
    assert!(fx.service.portfolio(pid).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_chat_page_view_footer() {
    let fx = Fixture::new();
    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
    let registry = invest_tools(fx.service.clone(), sessions);
    let pid = fx.portfolio(&[("AAA", dec!(100))]).await;

    let view = |page: i64| {
        ToolCall::new("portfolio_view", CHAT)
            .with_arg("action", json!("page"))
            .with_arg("portfolio_id", json!(pid))
            .with_arg("page", json!(page))
    };

    let first = registry.execute(&view(1)).await.unwrap();
    assert!(first.success, "{}", first.output);
    assert!(first.output.contains("AAA"));
    assert!(first.output.ends_with("Page 1 of 1"));

    let far = registry.execute(&view(i64::MAX)).await.unwrap();
    assert!(far.success, "{}", far.output);
    assert!(far.output.ends_with(&format!("Page {} of 1", i64::MAX)));
}
