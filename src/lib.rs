pub mod auth;
pub mod config;
pub mod handlers;
pub mod logs;
pub mod mcp;
pub mod models;
pub mod state;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use utoipa::OpenApi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MCP Hub API",
        description = "Connection, health and tool routing for Model Context Protocol servers"
    ),
    paths(
        handlers::health,
        handlers::readiness,
        handlers::mcp_status,
        handlers::mcp_tools,
        handlers::mcp_metrics,
        handlers::mcp_tool_stats,
        handlers::mcp_health,
        handlers::mcp_pool,
        handlers::execute_tool,
        handlers::reload_servers,
        logs::backend_logs,
        logs::clear_backend_logs,
    ),
    components(schemas(handlers::StructuredApiError, mcp::ToolDescriptor)),
    tags(
        (name = "health", description = "Liveness and readiness"),
        (name = "mcp", description = "MCP servers, tools and metrics"),
        (name = "logs", description = "In-memory backend logs")
    )
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        // MCP
        .route("/api/mcp/status", get(handlers::mcp_status))
        .route("/api/mcp/tools", get(handlers::mcp_tools))
        .route("/api/mcp/metrics", get(handlers::mcp_metrics))
        .route("/api/mcp/metrics/tools", get(handlers::mcp_tool_stats))
        .route("/api/mcp/health", get(handlers::mcp_health))
        .route("/api/mcp/pool", get(handlers::mcp_pool))
        .route("/api/mcp/execute", post(handlers::execute_tool))
        .route("/api/mcp/reload", post(handlers::reload_servers))
        // Logs
        .route(
            "/api/logs/backend",
            get(logs::backend_logs).delete(logs::clear_backend_logs),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        // Health
        .route("/api/health", get(handlers::health))
        .route("/api/health/ready", get(handlers::readiness))
        .route("/api/openapi.json", get(openapi_json))
        .merge(protected)
        .with_state(state)
}
