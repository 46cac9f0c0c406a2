//! HTTP Handlers

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use chat_core::{ChatError, ChatId, ToolCall, ToolResult, ToolSchema};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub price_source: String,
    pub tools: usize,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub chat_id: ChatId,
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: &ChatError) -> ApiError {
    let (status, code) = match err {
        ChatError::ToolNotFound(_) => (StatusCode::NOT_FOUND, "TOOL_NOT_FOUND"),
        ChatError::ToolValidation(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENTS"),
        ChatError::Session(_) => (StatusCode::CONFLICT, "SESSION_EXPIRED"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "TOOL_ERROR"),
    };
    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            code: code.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        price_source: state.service.context().prices.name().to_string(),
        tools: state.tools.len(),
    })
}

/// Schemas of every registered tool
pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSchema>> {
    Json(state.tools.schemas())
}

/// Run one tool call on behalf of a chat
pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<ToolCallRequest>,
) -> Result<Json<ToolResult>, ApiError> {
    let span = tracing::info_span!(
        "tool_call",
        request_id = %uuid::Uuid::new_v4(),
        tool = %name,
        chat_id = payload.chat_id,
    );

    let call = ToolCall {
        name,
        chat_id: payload.chat_id,
        arguments: payload.arguments,
        id: payload.id,
    };

    async move {
        match state.tools.execute(&call).await {
            Ok(result) => {
                tracing::debug!(success = result.success, "tool finished");
                Ok(Json(result))
            }
            Err(e) => {
                tracing::warn!(error = %e, "tool call rejected");
                Err(api_error(&e))
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use chat_core::{MemorySessionStore, SessionStore};
    use http_body_util::BodyExt;
    use invest_engine::{
        InvestConfig, InvestService, cache::MemoryCache, ledger::MemoryLedger,
        price::FixedPriceSource, tools::invest_tools,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn app() -> axum::Router {
        let config = InvestConfig::default();
        let service = Arc::new(InvestService::new(
            Arc::new(FixedPriceSource::new()),
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCache::new(config.cache_ttl_chrono())),
            config,
        ));
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::default());
        let tools = invest_tools(service.clone(), sessions);

        crate::router(AppState {
            service,
            tools: Arc::new(tools),
        })
    }

    async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post(tool: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/api/tools/{tool}"))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(app(), get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["price_source"], "FixedPrices");
        assert_eq!(body["tools"], 6);
    }

    #[tokio::test]
    async fn test_list_tools_sorted() {
        let (status, body) = send(app(), get("/api/tools")).await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            [
                "portfolio_manager",
                "portfolio_view",
                "price_lookup",
                "purchase_planner",
                "report",
                "stock_ops"
            ]
        );
    }

    #[tokio::test]
    async fn test_call_tool() {
        let app = app();

        let (status, body) = send(
            app.clone(),
            post(
                "portfolio_manager",
                &json!({"chat_id": 7, "arguments": {"action": "register"}, "id": "r1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["id"], "r1");

        let (status, body) = send(
            app,
            post(
                "portfolio_manager",
                &json!({"chat_id": 7, "arguments": {"action": "create", "name": "Index"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_engine_failure_is_a_tool_result() {
        // creating a portfolio before registering fails inside the engine
        let (status, body) = send(
            app(),
            post(
                "portfolio_manager",
                &json!({"chat_id": 8, "arguments": {"action": "create", "name": "Index"}}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (status, body) = send(app(), post("nope", &json!({"chat_id": 1}))).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "TOOL_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let (status, body) = send(
            app(),
            post("stock_ops", &json!({"chat_id": 1, "arguments": {"action": "add"}})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENTS");
    }
}
