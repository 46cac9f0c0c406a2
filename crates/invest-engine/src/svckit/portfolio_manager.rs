//! Portfolio Manager Tool
//!
//! Registers the chat user and manages their portfolios.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{
    ChatError, ParameterSchema, Result as CoreResult, SessionStore, Tool, ToolCall, ToolResult,
    ToolSchema,
};

use super::{CURRENT_PORTFOLIO, failure, remember_portfolio, resolve_portfolio};
use crate::service::InvestService;

const NAME: &str = "portfolio_manager";

/// Tool for user registration and portfolio lifecycle
pub struct PortfolioManagerTool {
    service: Arc<InvestService>,
    sessions: Arc<dyn SessionStore>,
}

impl PortfolioManagerTool {
    pub fn new(service: Arc<InvestService>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { service, sessions }
    }
}

#[async_trait]
impl Tool for PortfolioManagerTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "Register the chat user, create, list and delete portfolios, and \
                          rebalance target weights so they sum to 100%."
                .into(),
            parameters: vec![
                ParameterSchema::required("action", "string", "Action to perform")
                    .with_enum(&["register", "create", "list", "delete", "rebalance"]),
                ParameterSchema::optional("name", "string", "Portfolio name (for create)"),
                ParameterSchema::optional(
                    "portfolio_id",
                    "integer",
                    "Portfolio to act on; defaults to the current one",
                ),
                ParameterSchema::optional("page", "integer", "Page of the portfolio list"),
            ],
            category: Some("portfolio".into()),
            has_side_effects: true,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        match call.required_str("action")? {
            "register" => self.register(call).await,
            "create" => self.create(call).await,
            "list" => self.list(call).await,
            "delete" => self.delete(call).await,
            "rebalance" => self.rebalance(call).await,
            other => Err(ChatError::ToolValidation(format!("unknown action '{other}'"))),
        }
    }
}

impl PortfolioManagerTool {
    async fn register(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        match self.service.register_user(call.chat_id).await {
            Ok(user) => Ok(ToolResult::success(
                NAME,
                "You are registered. Create a portfolio to start.",
            )
            .with_data(serde_json::to_value(user)?)),
            Err(e) => Ok(failure(NAME, &e)),
        }
    }

    async fn create(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let name = call.required_str("name")?;

        let portfolio = match self.service.create_portfolio(call.chat_id, name).await {
            Ok(p) => p,
            Err(e) => return Ok(failure(NAME, &e)),
        };
        remember_portfolio(self.sessions.as_ref(), call.chat_id, portfolio.id)?;

        Ok(ToolResult::success(
            NAME,
            format!("Portfolio '{}' created (id {}).", portfolio.name, portfolio.id),
        )
        .with_data(serde_json::to_value(portfolio)?))
    }

    async fn list(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let page = call.i64_arg("page").unwrap_or(1);

        let list = match self.service.portfolios(call.chat_id, page).await {
            Ok(list) => list,
            Err(e) => return Ok(failure(NAME, &e)),
        };

        if list.portfolios.is_empty() {
            return Ok(ToolResult::success(NAME, "You have no portfolios yet.")
                .with_data(serde_json::to_value(list)?));
        }

        let mut output = format!("Portfolios (page {}):\n", list.current_page);
        for p in &list.portfolios {
            let _ = writeln!(output, "  [{}] {}", p.id, p.name);
        }
        if list.has_next_page {
            output.push_str("More on the next page.\n");
        }

        Ok(ToolResult::success(NAME, output).with_data(serde_json::to_value(list)?))
    }

    async fn delete(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let portfolio_id =
            match resolve_portfolio(&self.service, call, self.sessions.as_ref()).await? {
                Ok(id) => id,
                Err(e) => return Ok(failure(NAME, &e)),
            };

        if let Err(e) = self.service.delete_portfolio(portfolio_id).await {
            return Ok(failure(NAME, &e));
        }

        if let Some(mut session) = self.sessions.load(call.chat_id)? {
            if session.get::<i64>(CURRENT_PORTFOLIO)? == Some(portfolio_id) {
                session.take::<i64>(CURRENT_PORTFOLIO)?;
                self.sessions.save(&session)?;
            }
        }

        Ok(ToolResult::success(NAME, format!("Portfolio {portfolio_id} deleted.")))
    }

    async fn rebalance(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let portfolio_id =
            match resolve_portfolio(&self.service, call, self.sessions.as_ref()).await? {
                Ok(id) => id,
                Err(e) => return Ok(failure(NAME, &e)),
            };

        let weights = match self.service.rebalance_weights(portfolio_id).await {
            Ok(w) => w,
            Err(e) => return Ok(failure(NAME, &e)),
        };

        if weights.is_empty() {
            return Ok(ToolResult::success(
                NAME,
                "No stock has a target weight; nothing to rebalance.",
            ));
        }

        let mut output = String::from("New target weights:\n");
        for (ticker, weight) in &weights {
            let _ = writeln!(output, "  {ticker:<6} {weight:.2}%");
        }

        let data: serde_json::Map<String, serde_json::Value> = weights
            .iter()
            .map(|(t, w)| (t.clone(), serde_json::Value::String(w.to_string())))
            .collect();
        Ok(ToolResult::success(NAME, output).with_data(serde_json::Value::Object(data)))
    }
}
