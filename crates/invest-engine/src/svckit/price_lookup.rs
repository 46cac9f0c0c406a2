//! Price Lookup Tool
//!
//! Current market data for one or more tickers.

use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{ParameterSchema, Result as CoreResult, Tool, ToolCall, ToolResult, ToolSchema};

use crate::service::InvestService;

const NAME: &str = "price_lookup";

/// Tool for looking up stock prices
pub struct PriceLookupTool {
    service: Arc<InvestService>,
}

impl PriceLookupTool {
    pub fn new(service: Arc<InvestService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for PriceLookupTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "Get the last price, lot size and trading status of stocks.".into(),
            parameters: vec![ParameterSchema::required(
                "tickers",
                "string",
                "Comma-separated tickers (e.g., 'SBER,GAZP')",
            )],
            category: Some("market_data".into()),
            has_side_effects: false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let tickers: Vec<&str> = call
            .required_str("tickers")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut lines = Vec::new();
        let mut found = Vec::new();
        let mut errors = Vec::new();

        for ticker in tickers {
            match self.service.stock_info(ticker).await {
                Ok(info) => {
                    lines.push(format!(
                        "{} ({}): {:.2} {}, lot {}{}",
                        info.ticker,
                        info.short_name,
                        info.price,
                        info.currency,
                        info.lot_size,
                        if info.active { "" } else { ", not traded" }
                    ));
                    found.push(info);
                }
                Err(e) => errors.push(format!("{}: {}", ticker.to_uppercase(), e.user_message())),
            }
        }

        if found.is_empty() {
            return Ok(ToolResult::failure(
                NAME,
                format!("No prices found. {}", errors.join("; ")),
            ));
        }

        let mut output = lines.join("\n");
        if !errors.is_empty() {
            output.push_str("\n\nNot found: ");
            output.push_str(&errors.join("; "));
        }

        Ok(ToolResult::success(NAME, output).with_data(serde_json::to_value(found)?))
    }
}
