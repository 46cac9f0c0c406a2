//! Stock Operations Tool
//!
//! Adds and removes tickers, changes target weights and records trades.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{
    ChatError, ParameterSchema, Result as CoreResult, SessionStore, Tool, ToolCall, ToolResult,
    ToolSchema,
};

use super::{
    decimal_arg, failure, format_stock, required_decimal, required_i64, resolve_portfolio,
};
use crate::model::{EnrichedStock, PortfolioId};
use crate::service::InvestService;

const NAME: &str = "stock_ops";

/// Tool for changing the holdings of a portfolio
pub struct StockOpsTool {
    service: Arc<InvestService>,
    sessions: Arc<dyn SessionStore>,
}

impl StockOpsTool {
    pub fn new(service: Arc<InvestService>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { service, sessions }
    }

    async fn trade(
        &self,
        call: &ToolCall,
        portfolio_id: PortfolioId,
        ticker: &str,
        buy: bool,
    ) -> CoreResult<ToolResult> {
        let quantity = required_i64(call, "quantity")?;
        let price = decimal_arg(call, "price")?;

        let result = if buy {
            self.service.buy(portfolio_id, ticker, quantity, price).await
        } else {
            self.service.sell(portfolio_id, ticker, quantity, price).await
        };

        match result {
            Ok(stock) => {
                let verb = if buy { "Bought" } else { "Sold" };
                stock_reply(format!("{verb} {quantity} {}.", stock.ticker), stock)
            }
            Err(e) => Ok(failure(NAME, &e)),
        }
    }
}

fn stock_reply(headline: String, stock: EnrichedStock) -> CoreResult<ToolResult> {
    let output = format!("{headline}\n{}", format_stock(&stock));
    Ok(ToolResult::success(NAME, output).with_data(serde_json::to_value(stock)?))
}

#[async_trait]
impl Tool for StockOpsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "Add or remove a ticker, set its target weight in percent (0 keeps \
                          it outside the index), or record a buy or sell. Trades use the \
                          current price unless a price is given."
                .into(),
            parameters: vec![
                ParameterSchema::required("action", "string", "Operation")
                    .with_enum(&["add", "remove", "weight", "buy", "sell"]),
                ParameterSchema::required("ticker", "string", "Exchange ticker, e.g. SBER"),
                ParameterSchema::optional(
                    "portfolio_id",
                    "integer",
                    "Portfolio to change; defaults to the current one",
                ),
                ParameterSchema::optional("weight", "number", "Target weight in percent"),
                ParameterSchema::optional("quantity", "integer", "Shares to buy or sell"),
                ParameterSchema::optional("price", "number", "Custom price per share"),
            ],
            category: Some("trading".into()),
            has_side_effects: true,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let portfolio_id =
            match resolve_portfolio(&self.service, call, self.sessions.as_ref()).await? {
                Ok(id) => id,
                Err(e) => return Ok(failure(NAME, &e)),
            };
        let ticker = call.required_str("ticker")?;

        match call.required_str("action")? {
            "add" => match self.service.add_stock(portfolio_id, ticker).await {
                Ok(stock) => stock_reply(format!("{} added.", stock.ticker), stock),
                Err(e) => Ok(failure(NAME, &e)),
            },
            "remove" => match self.service.remove_stock(portfolio_id, ticker).await {
                Ok(()) => Ok(ToolResult::success(
                    NAME,
                    format!("{} removed from the portfolio.", ticker.to_uppercase()),
                )),
                Err(e) => Ok(failure(NAME, &e)),
            },
            "weight" => {
                let weight = required_decimal(call, "weight")?;
                match self.service.change_weight(portfolio_id, ticker, weight).await {
                    Ok(()) => Ok(ToolResult::success(
                        NAME,
                        format!("Target weight of {} set to {weight}%.", ticker.to_uppercase()),
                    )),
                    Err(e) => Ok(failure(NAME, &e)),
                }
            }
            "buy" => self.trade(call, portfolio_id, ticker, true).await,
            "sell" => self.trade(call, portfolio_id, ticker, false).await,
            other => Err(ChatError::ToolValidation(format!("unknown action '{other}'"))),
        }
    }
}
