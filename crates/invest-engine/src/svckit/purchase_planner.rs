//! Purchase Planner Tool
//!
//! Two-step flow: `calculate` proposes how to spend a sum and keeps the plan
//! in the chat session, `apply` records the kept plan as purchases.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{
    ChatError, ParameterSchema, Result as CoreResult, SessionStore, Tool, ToolCall, ToolResult,
    ToolSchema,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{failure, required_decimal, resolve_portfolio};
use crate::model::{PortfolioId, StockPurchase, plan_cost};
use crate::service::InvestService;

const NAME: &str = "purchase_planner";

/// Session key of the plan waiting for confirmation
pub const PENDING_PURCHASE: &str = "pending_purchase";

/// Plan kept between `calculate` and `apply`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingPurchase {
    pub portfolio_id: PortfolioId,
    pub sum: Decimal,
    pub plan: Vec<StockPurchase>,
}

/// Tool for index-tracking purchase plans
pub struct PurchasePlannerTool {
    service: Arc<InvestService>,
    sessions: Arc<dyn SessionStore>,
}

impl PurchasePlannerTool {
    pub fn new(service: Arc<InvestService>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { service, sessions }
    }

    async fn calculate(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let portfolio_id =
            match resolve_portfolio(&self.service, call, self.sessions.as_ref()).await? {
                Ok(id) => id,
                Err(e) => return Ok(failure(NAME, &e)),
            };
        let sum = required_decimal(call, "sum")?;

        let plan = match self.service.calculate_purchase(portfolio_id, sum).await {
            Ok(plan) => plan,
            Err(e) => return Ok(failure(NAME, &e)),
        };

        let mut session = self.sessions.load_or_new(call.chat_id)?;
        if plan.iter().all(|p| p.whole_lots() == 0) {
            session.take::<PendingPurchase>(PENDING_PURCHASE)?;
            self.sessions.save(&session)?;
            return Ok(ToolResult::success(
                NAME,
                format!("{sum:.2} is not enough to buy a single lot towards the targets."),
            ));
        }

        let mut output = format!("Purchase plan for {sum:.2}:\n");
        for line in plan.iter().filter(|p| p.whole_lots() > 0) {
            let _ = writeln!(
                output,
                "  {:<6} {} lots × {} @ {:.2} = {:.2} {}",
                line.ticker,
                line.whole_lots(),
                line.lot_size,
                line.price,
                line.cost(),
                line.currency
            );
        }
        let cost = plan_cost(&plan);
        let _ = writeln!(output, "Total {cost:.2}, left {:.2}.", sum - cost);
        output.push_str("Use 'apply' to record these purchases.");

        let pending = PendingPurchase {
            portfolio_id,
            sum,
            plan,
        };
        session.put(PENDING_PURCHASE, &pending)?;
        self.sessions.save(&session)?;

        Ok(ToolResult::success(NAME, output).with_data(serde_json::to_value(&pending)?))
    }

    async fn apply(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let pending = self
            .sessions
            .take_value(call.chat_id, PENDING_PURCHASE)?
            .map(serde_json::from_value::<PendingPurchase>)
            .transpose()?;
        let Some(pending) = pending else {
            return Ok(ToolResult::failure(
                NAME,
                "There is no calculated purchase to apply. Run 'calculate' first.",
            ));
        };

        match self
            .service
            .apply_purchase(pending.portfolio_id, &pending.plan)
            .await
        {
            Ok(()) => Ok(ToolResult::success(
                NAME,
                format!(
                    "Purchases recorded for {:.2}.",
                    plan_cost(&pending.plan)
                ),
            )),
            Err(e) => Ok(failure(NAME, &e)),
        }
    }
}

#[async_trait]
impl Tool for PurchasePlannerTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "Plan how to spend a sum on index stocks in whole lots so the \
                          portfolio moves towards its target weights, then apply the plan."
                .into(),
            parameters: vec![
                ParameterSchema::required("action", "string", "Step of the flow")
                    .with_enum(&["calculate", "apply"]),
                ParameterSchema::optional("sum", "number", "Cash to invest (for calculate)"),
                ParameterSchema::optional(
                    "portfolio_id",
                    "integer",
                    "Portfolio to plan for; defaults to the current one",
                ),
            ],
            category: Some("planning".into()),
            has_side_effects: true,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        match call.required_str("action")? {
            "calculate" => self.calculate(call).await,
            "apply" => self.apply(call).await,
            other => Err(ChatError::ToolValidation(format!("unknown action '{other}'"))),
        }
    }
}
