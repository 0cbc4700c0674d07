// ---------------------------------------------------------------------------
// handlers/mcp.rs -- MCP status, catalog, metrics, health, pool, execute, reload
// ---------------------------------------------------------------------------

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::mcp::pool::ReconfigureSummary;
use crate::mcp::{MetricsSnapshot, PoolStats};
use crate::models::{
    ExecuteToolRequest, ExecuteToolResponse, HealthCheckResponse, McpStatusResponse,
    ServerStatusView, ToolStatsResponse, ToolsResponse,
};
use crate::state::AppState;

use super::{ApiError, ApiErrorWithDetails, StructuredApiError};

// ---------------------------------------------------------------------------
// Read-only views
// ---------------------------------------------------------------------------

/// GET /api/mcp/status -- startup state plus one row per pooled server.
#[utoipa::path(get, path = "/api/mcp/status", tag = "mcp",
    responses((status = 200, description = "Startup state and per-server status", body = McpStatusResponse))
)]
pub async fn mcp_status(State(state): State<AppState>) -> Json<McpStatusResponse> {
    let servers = state
        .manager
        .servers()
        .await
        .into_iter()
        .map(ServerStatusView::from)
        .collect();
    Json(McpStatusResponse {
        startup: state.manager.startup_status(),
        servers,
    })
}

/// GET /api/mcp/tools -- combined catalog of every ready server.
#[utoipa::path(get, path = "/api/mcp/tools", tag = "mcp",
    responses(
        (status = 200, description = "Namespaced tool catalog", body = ToolsResponse),
        (status = 422, description = "Two tools resolve to the same id", body = StructuredApiError)
    )
)]
pub async fn mcp_tools(State(state): State<AppState>) -> Result<Json<ToolsResponse>, ApiError> {
    let tools = state.manager.combined_tools().await?;
    Ok(Json(ToolsResponse {
        count: tools.len(),
        tools,
    }))
}

#[utoipa::path(get, path = "/api/mcp/metrics", tag = "mcp",
    responses((status = 200, description = "Execution metrics summary", body = MetricsSnapshot))
)]
pub async fn mcp_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.manager.metrics())
}

#[utoipa::path(get, path = "/api/mcp/metrics/tools", tag = "mcp",
    responses((status = 200, description = "Per-tool execution counters", body = ToolStatsResponse))
)]
pub async fn mcp_tool_stats(State(state): State<AppState>) -> Json<ToolStatsResponse> {
    Json(ToolStatsResponse {
        tools: state.manager.tool_stats(),
    })
}

/// GET /api/mcp/health -- probe every server now and report.
#[utoipa::path(get, path = "/api/mcp/health", tag = "mcp",
    responses((status = 200, description = "On-demand probe report", body = HealthCheckResponse))
)]
pub async fn mcp_health(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    let servers = state.manager.check_health().await;
    Json(HealthCheckResponse {
        checked_at: chrono::Utc::now(),
        healthy: servers.iter().filter(|r| r.healthy).count(),
        total: servers.len(),
        servers,
    })
}

#[utoipa::path(get, path = "/api/mcp/pool", tag = "mcp",
    responses((status = 200, description = "Server counts by status", body = PoolStats))
)]
pub async fn mcp_pool(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.manager.pool_stats().await)
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// POST /api/mcp/execute -- route one call to the owning server.
#[utoipa::path(post, path = "/api/mcp/execute", tag = "mcp",
    request_body = ExecuteToolRequest,
    responses(
        (status = 200, description = "Tool result", body = ExecuteToolResponse),
        (status = 400, description = "Missing toolId", body = StructuredApiError),
        (status = 502, description = "Server reported failure", body = StructuredApiError),
        (status = 503, description = "Owning server not ready", body = StructuredApiError),
        (status = 504, description = "Call timed out", body = StructuredApiError)
    )
)]
pub async fn execute_tool(
    State(state): State<AppState>,
    Json(req): Json<ExecuteToolRequest>,
) -> Result<Json<ExecuteToolResponse>, ApiErrorWithDetails> {
    let tool_id = req
        .tool_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("toolId is required".into()))?;
    let arguments = req.arguments.unwrap_or_else(|| json!({}));

    let started = Instant::now();
    match state.manager.execute(&tool_id, arguments).await {
        Ok(result) => Ok(Json(ExecuteToolResponse {
            tool_id,
            result,
            duration_ms: started.elapsed().as_millis() as u64,
        })),
        Err(e) => {
            let kind = e.kind();
            Err(ApiError::from(e).with_details(json!({ "toolId": tool_id, "kind": kind })))
        }
    }
}

/// POST /api/mcp/reload -- re-read the server file and apply the diff.
#[utoipa::path(post, path = "/api/mcp/reload", tag = "mcp",
    responses(
        (status = 200, description = "Applied changes", body = ReconfigureSummary),
        (status = 422, description = "Invalid configuration; running servers untouched", body = StructuredApiError)
    )
)]
pub async fn reload_servers(
    State(state): State<AppState>,
) -> Result<Json<ReconfigureSummary>, ApiError> {
    let summary = state.manager.reload().await?;
    Ok(Json(summary))
}
