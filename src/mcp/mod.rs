//! MCP (Model Context Protocol) connection and tool manager.
//!
//! - **registry**: validated server definitions (stdio or HTTP)
//! - **pool**: one managed entry per server, owning its live connection
//! - **health**: periodic ping probes driving status transitions
//! - **catalog**: merged, server-namespaced tool catalog (`{server}_{tool}`)
//! - **router**: dispatches a namespaced tool call and records its outcome
//! - **metrics**: execution history and aggregates
//! - **manager**: wires the above together with an observable startup
//!
//! Transports speak JSON-RPC 2.0, protocol revision 2024-11-05.

pub mod catalog;
pub mod connection;
pub mod error;
pub mod health;
pub mod http;
pub mod jsonrpc;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod router;
pub mod stdio;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use catalog::ToolDescriptor;
pub use connection::{Connector, DefaultConnector, McpConnection, ToolCallResult, ToolInfo};
pub use error::{ErrorKind, McpError, McpResult};
pub use health::HealthReport;
pub use manager::{ManagerSettings, McpManager, StartupState, StartupStatus};
pub use metrics::{MetricsSnapshot, ToolExecutionRecord, ToolStats};
pub use pool::{ManagedServerEntry, PoolStats, ServerStatus};
pub use registry::{ServerConfig, ServerSource};
