//! Service Kit - Chat Tools
//!
//! Tools that implement `chat_core::Tool` on top of [`InvestService`].
//! Engine failures become failed `ToolResult`s carrying a user message;
//! malformed arguments are `ChatError::ToolValidation`.

mod portfolio_manager;
mod portfolio_view;
mod price_lookup;
mod purchase_planner;
mod report;
mod stock_ops;

pub use portfolio_manager::PortfolioManagerTool;
pub use portfolio_view::PortfolioViewTool;
pub use price_lookup::PriceLookupTool;
pub use purchase_planner::{PENDING_PURCHASE, PendingPurchase, PurchasePlannerTool};
pub use report::ReportTool;
pub use stock_ops::StockOpsTool;

use std::fmt::Write as _;
use std::str::FromStr;
use std::sync::Arc;

use chat_core::{ChatError, ChatId, SessionStore, ToolCall, ToolRegistry, ToolResult};
use rust_decimal::Decimal;

use crate::error::InvestError;
use crate::model::{EnrichedStock, PortfolioId, PortfolioSummary};
use crate::service::InvestService;

/// Session key of the portfolio the chat is working with
pub const CURRENT_PORTFOLIO: &str = "current_portfolio";

/// Registry holding every invest tool
pub fn invest_tools(service: Arc<InvestService>, sessions: Arc<dyn SessionStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(PortfolioManagerTool::new(service.clone(), sessions.clone()));
    registry.register(PortfolioViewTool::new(service.clone(), sessions.clone()));
    registry.register(StockOpsTool::new(service.clone(), sessions.clone()));
    registry.register(PurchasePlannerTool::new(service.clone(), sessions));
    registry.register(PriceLookupTool::new(service.clone()));
    registry.register(ReportTool::new(service));
    registry
}

/// Turn an engine error into a failed tool result
pub(crate) fn failure(tool: &str, err: &InvestError) -> ToolResult {
    if err.is_retryable() {
        tracing::warn!(tool, error = %err, "tool call failed");
    } else {
        tracing::debug!(tool, error = %err, "tool call rejected");
    }
    ToolResult::failure(tool, err.user_message())
}

/// Portfolio from the arguments, or the one remembered for the chat.
///
/// The inner error is an engine failure (an unknown portfolio or one owned by
/// another user) for the caller to report as a failed result. Only a portfolio
/// the chat owns is remembered.
pub(crate) async fn resolve_portfolio(
    service: &InvestService,
    call: &ToolCall,
    sessions: &dyn SessionStore,
) -> chat_core::Result<crate::error::Result<PortfolioId>> {
    let explicit = call.i64_arg("portfolio_id");
    let portfolio_id = match explicit {
        Some(id) => id,
        None => sessions
            .load(call.chat_id)?
            .and_then(|s| s.get::<PortfolioId>(CURRENT_PORTFOLIO).ok().flatten())
            .ok_or_else(|| ChatError::ToolValidation("'portfolio_id' is required".into()))?,
    };

    if let Err(e) = service.owned_portfolio(call.chat_id, portfolio_id).await {
        return Ok(Err(e));
    }

    if explicit.is_some() {
        remember_portfolio(sessions, call.chat_id, portfolio_id)?;
    }
    Ok(Ok(portfolio_id))
}

pub(crate) fn remember_portfolio(
    sessions: &dyn SessionStore,
    chat_id: ChatId,
    portfolio_id: PortfolioId,
) -> chat_core::Result<()> {
    let mut session = sessions.load_or_new(chat_id)?;
    session.put(CURRENT_PORTFOLIO, &portfolio_id)?;
    sessions.save(&session)
}

/// Decimal argument given as a JSON number or as text
pub(crate) fn decimal_arg(call: &ToolCall, key: &str) -> chat_core::Result<Option<Decimal>> {
    call.number_text(key)
        .map(|text| {
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|_| ChatError::ToolValidation(format!("'{key}' is not a number: {text}")))
        })
        .transpose()
}

pub(crate) fn required_decimal(call: &ToolCall, key: &str) -> chat_core::Result<Decimal> {
    decimal_arg(call, key)?.ok_or_else(|| ChatError::ToolValidation(format!("'{key}' is required")))
}

pub(crate) fn required_i64(call: &ToolCall, key: &str) -> chat_core::Result<i64> {
    call.i64_arg(key)
        .ok_or_else(|| ChatError::ToolValidation(format!("'{key}' must be a whole number")))
}

fn signed(value: Decimal) -> String {
    if value >= Decimal::ZERO {
        format!("+{value:.2}")
    } else {
        format!("{value:.2}")
    }
}

pub(crate) fn format_summary(summary: &PortfolioSummary) -> String {
    let mut out = format!("Portfolio: {}\n", summary.portfolio_name);
    out.push_str(&"═".repeat(50));
    out.push('\n');

    let _ = writeln!(
        out,
        "Index:   {:.2} ({} / {:.1}%)  weight {:.1}%  offset {:.2}",
        summary.balance_inside_index,
        signed(summary.growth_sum_inside_index),
        summary.growth_percent_inside_index,
        summary.total_weight,
        summary.index_offset,
    );
    let _ = writeln!(
        out,
        "Outside: {:.2} ({} / {:.1}%)  {} stocks",
        summary.balance_outside_index,
        signed(summary.growth_sum_outside_index),
        summary.growth_percent_outside_index,
        summary.stocks_outside_index_count,
    );
    let _ = writeln!(
        out,
        "Total:   {:.2} in {} stocks",
        summary.total_balance(),
        summary.stocks_count
    );

    if summary.is_partial() {
        let _ = writeln!(
            out,
            "No market data for {}; valued at zero.",
            summary.missing_tickers.join(", ")
        );
    }
    out
}

pub(crate) fn format_stock(stock: &EnrichedStock) -> String {
    format!(
        "{:<6} {:>6} sh @ {:.2} = {:.2}  weight {:.1}% / target {:.1}%  avg {:.2} ({})",
        stock.ticker,
        stock.quantity,
        stock.price,
        stock.total_price,
        stock.actual_weight,
        stock.target_weight,
        stock.avg_price,
        signed(stock.growth_sum),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::MemorySessionStore;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decimal_arg_accepts_comma_and_numbers() {
        let call = ToolCall::new("t", 1)
            .with_arg("a", json!("1000,5"))
            .with_arg("b", json!(250.25))
            .with_arg("c", json!("lots"));

        assert_eq!(decimal_arg(&call, "a").unwrap(), Some(dec!(1000.5)));
        assert_eq!(decimal_arg(&call, "b").unwrap(), Some(dec!(250.25)));
        assert!(decimal_arg(&call, "c").is_err());
        assert_eq!(decimal_arg(&call, "missing").unwrap(), None);
    }

    fn service() -> InvestService {
        use crate::cache::MemoryCache;
        use crate::ledger::MemoryLedger;
        use crate::price::FixedPriceSource;

        let config = crate::InvestConfig::default();
        InvestService::new(
            Arc::new(FixedPriceSource::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCache::new(config.cache_ttl_chrono())),
            config,
        )
    }

    #[tokio::test]
    async fn test_portfolio_is_remembered_per_chat() {
        let svc = service();
        svc.register_user(5).await.unwrap();
        svc.register_user(6).await.unwrap();
        let id = svc.create_portfolio(5, "Main").await.unwrap().id;
        let sessions = MemorySessionStore::default();

        let explicit = ToolCall::new("t", 5).with_arg("portfolio_id", json!(id));
        assert_eq!(resolve_portfolio(&svc, &explicit, &sessions).await.unwrap().unwrap(), id);

        let implicit = ToolCall::new("t", 5);
        assert_eq!(resolve_portfolio(&svc, &implicit, &sessions).await.unwrap().unwrap(), id);

        let other_chat = ToolCall::new("t", 6);
        assert!(matches!(
            resolve_portfolio(&svc, &other_chat, &sessions).await,
            Err(ChatError::ToolValidation(_))
        ));
    }

    #[tokio::test]
    async fn test_foreign_portfolio_is_rejected_and_not_remembered() {
        let svc = service();
        svc.register_user(5).await.unwrap();
        svc.register_user(6).await.unwrap();
        let id = svc.create_portfolio(5, "Main").await.unwrap().id;
        let sessions = MemorySessionStore::default();

        let foreign = ToolCall::new("t", 6).with_arg("portfolio_id", json!(id));
        let err = resolve_portfolio(&svc, &foreign, &sessions)
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(sessions.load(6).unwrap().is_none());
    }
}
