//! Application State

use std::sync::Arc;

use chat_core::ToolRegistry;
use invest_engine::InvestService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Portfolio operations behind the tools
    pub service: Arc<InvestService>,

    /// Tool registry with all invest tools
    pub tools: Arc<ToolRegistry>,
}
