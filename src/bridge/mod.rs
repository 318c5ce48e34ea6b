//! Management HTTP surface and the protocol bridge endpoint.
//!
//! Every management endpoint answers with a `{success, ...}` envelope;
//! failures become `{success: false, error}`. Toggle endpoints trigger
//! a rebuild themselves, so the live server always reflects the latest
//! persisted state once the response is out.

pub mod rpc;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::coordinator::{DispatchError, RebuildCoordinator};
use crate::core::Config;
use crate::events::EventLog;
use crate::registry::Registry;
use crate::store::EventQuery;

pub use rpc::{BridgeTransport, JsonRpcRequest, JsonRpcResponse};

/// Application state shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RebuildCoordinator>,
    pub registry: Arc<Registry>,
    pub events: Arc<EventLog>,
    pub config: Arc<Config>,
}

/// Build the HTTP router for the bridge and its management surface.
pub fn router(state: AppState) -> Router {
    let enable_cors = state.config.http.enable_cors;
    let mut app = Router::new()
        .route("/bridge", post(bridge_handler))
        .route("/addons", get(list_addons))
        .route("/addons/{name}/toggle", put(toggle_addon))
        .route("/elements", get(list_elements))
        .route("/elements/{id}/toggle", put(toggle_element))
        .route("/logs", get(get_logs))
        .route("/status", get(get_status))
        .route("/test-tool", post(test_tool))
        .route("/refresh", post(refresh))
        .route("/health", get(health_check))
        .with_state(state);

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }
    app
}

type ApiResponse = (StatusCode, Json<Value>);

fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

fn fail(status: StatusCode, message: impl ToString) -> ApiResponse {
    (
        status,
        Json(json!({"success": false, "error": message.to_string()})),
    )
}

/// One protocol request/response cycle against the live server.
///
/// A fresh transport binds the instance that is live right now; a swap
/// mid-request does not affect this cycle.
async fn bridge_handler(
    State(state): State<AppState>,
    Json(request): Json<JsonRpcRequest>,
) -> (StatusCode, Json<JsonRpcResponse>) {
    let transport = BridgeTransport::connect(
        state.coordinator.live().await,
        state.config.server.name.clone(),
        state.config.server.version.clone(),
    );
    let response = transport.handle(request).await;
    (StatusCode::OK, Json(response))
}

async fn list_addons(State(state): State<AppState>) -> ApiResponse {
    match state.registry.list_addons().await {
        Ok(addons) => ok(json!({"success": true, "addons": addons})),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn toggle_addon(State(state): State<AppState>, Path(name): Path<String>) -> ApiResponse {
    let affected = match state.registry.toggle_addon(&name).await {
        Ok(affected) => affected,
        Err(e) => return fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    info!(addon = %name, affected, "Addon toggled");
    if let Err(e) = state.coordinator.rebuild().await {
        error!(error = %e, "Rebuild after addon toggle failed");
        return fail(StatusCode::INTERNAL_SERVER_ERROR, e);
    }
    ok(json!({
        "success": true,
        "affected": affected,
        "message": "MCP registrations updated"
    }))
}

async fn list_elements(State(state): State<AppState>) -> ApiResponse {
    match state.registry.list_elements().await {
        Ok(elements) => ok(json!({"success": true, "elements": elements})),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn toggle_element(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResponse {
    let affected = match state.registry.toggle_element(id).await {
        Ok(affected) => affected,
        Err(e) => return fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    info!(element_id = id, affected, "Element toggled");
    if let Err(e) = state.coordinator.rebuild().await {
        error!(error = %e, "Rebuild after element toggle failed");
        return fail(StatusCode::INTERNAL_SERVER_ERROR, e);
    }
    ok(json!({
        "success": true,
        "affected": affected,
        "message": "MCP registrations updated"
    }))
}

/// Query parameters for the logs endpoint.
#[derive(Debug, Deserialize)]
struct LogsParams {
    limit: Option<usize>,
    event_type: Option<String>,
    addon_name: Option<String>,
}

async fn get_logs(State(state): State<AppState>, Query(params): Query<LogsParams>) -> ApiResponse {
    let query = EventQuery {
        limit: params.limit.unwrap_or(50),
        event_type: params.event_type,
        addon_name: params.addon_name,
    };
    match state.events.query(&query).await {
        Ok(logs) => ok(json!({"success": true, "logs": logs})),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn get_status(State(state): State<AppState>) -> ApiResponse {
    match state.events.stats(state.config.stats.window_hours).await {
        Ok(stats) => ok(json!({
            "success": true,
            "server": state.config.server.name,
            "addons": state.coordinator.addon_names(),
            "stats": stats
        })),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Body of a direct tool invocation request.
#[derive(Debug, Deserialize)]
struct TestToolRequest {
    tool_name: String,
    #[serde(default)]
    arguments: Value,
}

/// Invoke a tool directly, bypassing the transport.
async fn test_tool(
    State(state): State<AppState>,
    Json(request): Json<TestToolRequest>,
) -> ApiResponse {
    match state
        .coordinator
        .invoke_tool_direct(&request.tool_name, request.arguments)
        .await
    {
        Ok(Some(result)) => ok(json!({"success": true, "result": result})),
        Ok(None) => fail(StatusCode::NOT_FOUND, "Tool not found or disabled"),
        Err(DispatchError::Invocation(e)) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Force an unconditional rebuild of the live server.
async fn refresh(State(state): State<AppState>) -> ApiResponse {
    match state.coordinator.rebuild().await {
        Ok(()) => ok(json!({
            "success": true,
            "message": "MCP registrations refreshed successfully"
        })),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn health_check() -> ApiResponse {
    ok(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
