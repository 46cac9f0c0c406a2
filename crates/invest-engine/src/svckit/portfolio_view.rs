//! Portfolio View Tool
//!
//! Shows a portfolio page or a single holding.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{
    ChatError, ParameterSchema, Result as CoreResult, SessionStore, Tool, ToolCall, ToolResult,
    ToolSchema,
};

use super::{failure, format_stock, format_summary, resolve_portfolio};
use crate::error::InvestError;
use crate::service::InvestService;

const NAME: &str = "portfolio_view";

/// Tool for browsing a portfolio
pub struct PortfolioViewTool {
    service: Arc<InvestService>,
    sessions: Arc<dyn SessionStore>,
}

impl PortfolioViewTool {
    pub fn new(service: Arc<InvestService>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { service, sessions }
    }
}

#[async_trait]
impl Tool for PortfolioViewTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "View a portfolio: balances inside and outside the index, growth, \
                          index offset and a page of holdings, or one holding in detail."
                .into(),
            parameters: vec![
                ParameterSchema::required("action", "string", "What to show")
                    .with_enum(&["page", "stock"]),
                ParameterSchema::optional(
                    "portfolio_id",
                    "integer",
                    "Portfolio to show; defaults to the current one",
                ),
                ParameterSchema::optional("page", "integer", "Page number, starting at 1"),
                ParameterSchema::optional("ticker", "string", "Ticker (for stock)"),
            ],
            category: Some("portfolio".into()),
            has_side_effects: false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let portfolio_id =
            match resolve_portfolio(&self.service, call, self.sessions.as_ref()).await? {
                Ok(id) => id,
                Err(e) => return Ok(failure(NAME, &e)),
            };

        match call.required_str("action")? {
            "page" => {
                let page = call.i64_arg("page").unwrap_or(1);
                match self.service.portfolio_page(portfolio_id, page).await {
                    Ok(view) => {
                        let mut output = format_summary(&view.summary);
                        for stock in &view.stocks {
                            let _ = writeln!(output, "{}", format_stock(stock));
                        }
                        let _ = write!(
                            output,
                            "Page {} of {}",
                            view.current_page,
                            view.total_pages.max(1)
                        );
                        Ok(ToolResult::success(NAME, output)
                            .with_data(serde_json::to_value(view)?))
                    }
                    Err(e) => Ok(failure(NAME, &e)),
                }
            }
            "stock" => {
                let ticker = call.required_str("ticker")?;
                match self.service.portfolio_stock(portfolio_id, ticker).await {
                    Ok(stock) => Ok(ToolResult::success(NAME, format_stock(&stock))
                        .with_data(serde_json::to_value(stock)?)),
                    Err(InvestError::ActualStockInfoUnavailable(stock)) => Ok(ToolResult::success(
                        NAME,
                        format!(
                            "{}: {} shares, target {:.1}%. Current market data is unavailable.",
                            stock.ticker, stock.quantity, stock.target_weight
                        ),
                    )
                    .with_data(serde_json::to_value(*stock)?)),
                    Err(e) => Ok(failure(NAME, &e)),
                }
            }
            other => Err(ChatError::ToolValidation(format!("unknown action '{other}'"))),
        }
    }
}
