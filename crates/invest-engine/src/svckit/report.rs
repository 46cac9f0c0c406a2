//! Report Tool
//!
//! Everything known about the user's portfolios as one structured payload.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chat_core::{Result as CoreResult, Tool, ToolCall, ToolResult, ToolSchema};

use super::{failure, format_summary};
use crate::service::InvestService;

const NAME: &str = "report";

pub struct ReportTool {
    service: Arc<InvestService>,
}

impl ReportTool {
    pub fn new(service: Arc<InvestService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for ReportTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NAME.into(),
            description: "Summaries, holdings and full operation history of all portfolios."
                .into(),
            parameters: vec![],
            category: Some("reporting".into()),
            has_side_effects: false,
        }
    }

    async fn execute(&self, call: &ToolCall) -> CoreResult<ToolResult> {
        let report = match self.service.portfolios_report(call.chat_id).await {
            Ok(report) => report,
            Err(e) => return Ok(failure(NAME, &e)),
        };

        if report.is_empty() {
            return Ok(ToolResult::success(NAME, "You have no portfolios yet."));
        }

        let mut output = String::new();
        for info in &report {
            output.push_str(&format_summary(&info.summary));
            let _ = writeln!(output, "Operations: {}\n", info.operations.len());
        }

        Ok(ToolResult::success(NAME, output.trim_end()).with_data(serde_json::to_value(report)?))
    }
}
