use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::mcp::{
    HealthReport, ManagedServerEntry, PoolStats, ServerStatus, StartupState, StartupStatus,
    ToolCallResult, ToolDescriptor, ToolInfo, ToolStats,
};

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, `starting` or `failed`.
    pub status: String,
    pub version: String,
    pub app: String,
    pub uptime_seconds: u64,
    pub startup: StartupStatus,
    pub servers: PoolStats,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub startup: StartupState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub uptime_seconds: u64,
}

// ---------------------------------------------------------------------------
// MCP status / catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusView {
    pub key: String,
    pub label: String,
    pub transport: String,
    pub status: ServerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tools: Vec<ToolInfo>,
    pub version: Option<String>,
    pub protocol_version: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl From<ManagedServerEntry> for ServerStatusView {
    fn from(e: ManagedServerEntry) -> Self {
        Self {
            key: e.key,
            label: e.label,
            transport: e.transport,
            status: e.status,
            error: e.last_error,
            tools: e.tools,
            version: e.version,
            protocol_version: e.protocol_version,
            last_checked: e.last_checked,
            consecutive_failures: e.consecutive_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct McpStatusResponse {
    pub startup: StartupStatus,
    pub servers: Vec<ServerStatusView>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ToolsResponse {
    pub tools: Vec<ToolDescriptor>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ToolStatsResponse {
    pub tools: Vec<ToolStats>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub checked_at: DateTime<Utc>,
    pub healthy: usize,
    pub total: usize,
    pub servers: Vec<HealthReport>,
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolRequest {
    /// Fully-qualified tool id, `{serverKey}_{toolName}`.
    #[serde(default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolResponse {
    pub tool_id: String,
    pub result: ToolCallResult,
    pub duration_ms: u64,
}
