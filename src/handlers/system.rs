// ---------------------------------------------------------------------------
// handlers/system.rs -- Health and readiness
// ---------------------------------------------------------------------------

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::mcp::StartupState;
use crate::models::{HealthResponse, ReadinessResponse};
use crate::state::AppState;

#[utoipa::path(get, path = "/api/health", tag = "health",
    responses((status = 200, description = "Service health with MCP pool summary", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let startup = state.manager.startup_status();
    let status = match startup.state {
        StartupState::Ready => "ok",
        StartupState::Failed => "failed",
        StartupState::NotStarted | StartupState::Starting => "starting",
    };
    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        app: "MCP Hub".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        servers: state.manager.pool_stats().await,
        startup,
    })
}

/// GET /api/health/ready -- 200 once startup finished, 503 before that.
/// A failed startup is reported as not ready along with its error.
#[utoipa::path(get, path = "/api/health/ready", tag = "health",
    responses(
        (status = 200, description = "Service ready", body = ReadinessResponse),
        (status = 503, description = "Still starting, or startup failed", body = ReadinessResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> axum::response::Response {
    let startup = state.manager.startup_status();
    let ready = startup.state == StartupState::Ready;
    let body = ReadinessResponse {
        ready,
        startup: startup.state,
        error: startup.error,
        uptime_seconds: state.start_time.elapsed().as_secs(),
    };

    if ready {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}
