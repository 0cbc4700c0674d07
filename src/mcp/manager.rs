//! `McpManager`: explicitly constructed owner of the registry, pool, health
//! monitor, router and metrics. Handlers reach it through `AppState`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::catalog::{self, ToolDescriptor};
use super::connection::{Connector, ToolCallResult};
use super::error::{McpError, McpResult};
use super::health::{HealthMonitor, HealthReport, HealthSettings};
use super::metrics::{MetricsCollector, MetricsSettings, MetricsSnapshot, ToolStats};
use super::pool::{ConnectionPool, ManagedServerEntry, PoolSettings, PoolStats, ReconfigureSummary};
use super::registry::{ServerConfig, ServerRegistry, ServerSource};
use super::router::{RouterSettings, ToolRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum StartupState {
    NotStarted,
    Starting,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartupStatus {
    pub state: StartupState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl StartupStatus {
    fn new(state: StartupState, error: Option<String>) -> Self {
        Self {
            state,
            error,
            changed_at: Utc::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, StartupState::Ready | StartupState::Failed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerSettings {
    pub pool: PoolSettings,
    pub health: HealthSettings,
    pub router: RouterSettings,
    pub metrics: MetricsSettings,
}

pub struct McpManager {
    pool: Arc<ConnectionPool>,
    metrics: Arc<MetricsCollector>,
    router: ToolRouter,
    health: Arc<HealthMonitor>,
    registry: RwLock<ServerRegistry>,
    source: Mutex<Option<ServerSource>>,
    started: AtomicBool,
    startup: watch::Sender<StartupStatus>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    reconfiguring: tokio::sync::Mutex<()>,
}

impl McpManager {
    pub fn new(settings: ManagerSettings, connector: Arc<dyn Connector>) -> Arc<Self> {
        let pool = Arc::new(ConnectionPool::new(connector, settings.pool));
        let metrics = Arc::new(MetricsCollector::new(settings.metrics));
        let router = ToolRouter::new(pool.clone(), metrics.clone(), settings.router);
        let health = Arc::new(HealthMonitor::new(pool.clone(), settings.health));
        let (startup, _) = watch::channel(StartupStatus::new(StartupState::NotStarted, None));

        Arc::new(Self {
            pool,
            metrics,
            router,
            health,
            registry: RwLock::new(ServerRegistry::default()),
            source: Mutex::new(None),
            started: AtomicBool::new(false),
            startup,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            reconfiguring: tokio::sync::Mutex::new(()),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Kick off startup in the background. Returns `false` (and does nothing)
    /// when startup was already requested.
    pub fn start(self: &Arc<Self>, source: ServerSource) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("MCP: startup already requested, ignoring");
            return false;
        }

        *self.source.lock().unwrap_or_else(|p| p.into_inner()) = Some(source.clone());
        self.startup
            .send_replace(StartupStatus::new(StartupState::Starting, None));

        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.run_startup(source).await });
        self.track(handle);
        true
    }

    async fn run_startup(self: Arc<Self>, source: ServerSource) {
        let registry = match ServerRegistry::load(&source).await {
            Ok(registry) => registry,
            Err(e) => {
                tracing::error!("MCP: startup failed: {}", e);
                self.startup
                    .send_replace(StartupStatus::new(StartupState::Failed, Some(e.to_string())));
                return;
            }
        };
        if self.cancel.is_cancelled() {
            return;
        }

        let configs = registry.configs();
        *self.registry.write().unwrap_or_else(|p| p.into_inner()) = registry;
        tracing::info!("MCP: starting {} server(s)", configs.len());

        join_all(self.pool.start(&configs).await).await;

        let stats = self.pool.stats().await;
        tracing::info!(
            "MCP: startup complete -- {}/{} server(s) ready",
            stats.ready,
            stats.total
        );
        self.startup
            .send_replace(StartupStatus::new(StartupState::Ready, None));

        if !self.cancel.is_cancelled() {
            let handle = self.health.clone().spawn(self.cancel.child_token());
            self.track(handle);
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
    }

    pub fn startup_status(&self) -> StartupStatus {
        self.startup.borrow().clone()
    }

    /// Resolves once startup has finished, successfully or not.
    pub async fn wait_ready(&self) -> StartupStatus {
        let mut rx = self.startup.subscribe();
        match rx.wait_for(StartupStatus::is_finished).await {
            Ok(status) => status.clone(),
            Err(_) => self.startup_status(),
        }
    }

    /// Replace the server set with `configs`. Invalid input leaves every
    /// running entry untouched.
    pub async fn reconfigure(&self, configs: Vec<ServerConfig>) -> McpResult<ReconfigureSummary> {
        let registry = ServerRegistry::from_configs(configs)?;
        Ok(self.apply(registry).await)
    }

    /// Re-read the source given to `start` and reconfigure from it.
    pub async fn reload(&self) -> McpResult<ReconfigureSummary> {
        let source = self
            .source
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or_else(|| McpError::Config("manager has not been started".into()))?;
        let registry = ServerRegistry::load(&source).await?;
        Ok(self.apply(registry).await)
    }

    async fn apply(&self, registry: ServerRegistry) -> ReconfigureSummary {
        let _serial = self.reconfiguring.lock().await;
        let summary = self.pool.reconfigure(&registry.configs()).await;
        *self.registry.write().unwrap_or_else(|p| p.into_inner()) = registry;
        summary
    }

    /// Stop the health monitor and background tasks, then tear down every
    /// pooled connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        join_all(tasks).await;
        self.pool.shutdown().await;
        tracing::info!("MCP: manager shut down");
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn registry(&self) -> ServerRegistry {
        self.registry
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub async fn servers(&self) -> Vec<ManagedServerEntry> {
        self.pool.get_all().await
    }

    pub async fn combined_tools(&self) -> McpResult<Vec<ToolDescriptor>> {
        catalog::combined_tools(&self.pool.get_all().await)
    }

    pub async fn execute(&self, full_id: &str, arguments: Value) -> McpResult<ToolCallResult> {
        self.router.execute(full_id, arguments).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.get_stats()
    }

    pub fn tool_stats(&self) -> Vec<ToolStats> {
        self.metrics.tool_stats()
    }

    pub async fn pool_stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    pub async fn check_health(&self) -> Vec<HealthReport> {
        self.health.check_now().await
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::pool::ServerStatus;
    use crate::mcp::testing::FakeConnector;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    fn settings() -> ManagerSettings {
        ManagerSettings {
            pool: PoolSettings {
                connect_timeout: Duration::from_millis(500),
                remove_grace: Duration::from_millis(100),
            },
            health: HealthSettings {
                interval: Duration::from_secs(60),
                jitter: Duration::ZERO,
                probe_timeout: Duration::from_millis(200),
                failure_threshold: 3,
            },
            ..Default::default()
        }
    }

    fn inline(keys: &[&str]) -> ServerSource {
        ServerSource::Inline(
            keys.iter()
                .map(|k| ServerConfig::stdio(k, "fake", &[]))
                .collect(),
        )
    }

    #[tokio::test]
    async fn double_start_creates_no_duplicates() {
        let connector = FakeConnector::new();
        let fs = connector.add("fs", &["read"]);
        let manager = McpManager::new(settings(), connector.clone());

        assert_eq!(manager.startup_status().state, StartupState::NotStarted);
        assert!(manager.start(inline(&["fs"])));
        assert!(!manager.start(inline(&["fs"])));
        assert_eq!(manager.wait_ready().await.state, StartupState::Ready);

        assert_eq!(manager.servers().await.len(), 1);
        assert_eq!(fs.connects(), 1);
        assert_eq!(manager.registry().len(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn catalog_excludes_servers_in_error() {
        let connector = FakeConnector::new();
        connector.add("fs", &["read"]);
        connector.add("search", &["query"]);
        let git = connector.add("git", &["log"]);
        git.refuse_connections(true);

        let manager = McpManager::new(settings(), connector.clone());
        manager.start(inline(&["fs", "search", "git"]));
        manager.wait_ready().await;

        let ids: Vec<String> = manager
            .combined_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.full_id)
            .collect();
        assert_eq!(ids, vec!["fs_read".to_string(), "search_query".to_string()]);

        let stats = manager.pool_stats().await;
        assert_eq!((stats.ready, stats.error), (2, 1));

        let result = manager.execute("fs_read", json!({"path": "a"})).await.unwrap();
        assert!(!result.is_error);
        let metrics = manager.metrics();
        assert_eq!(metrics.total_executions, 1);
        assert!(metrics.recent_executions[0].success);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unreadable_source_fails_startup() {
        let manager = McpManager::new(settings(), FakeConnector::new());
        manager.start(ServerSource::File("/definitely/missing.json".into()));

        let status = manager.wait_ready().await;
        assert_eq!(status.state, StartupState::Failed);
        assert!(status.error.unwrap().contains("cannot read"));
        assert!(manager.combined_tools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reload_applies_file_changes() {
        let connector = FakeConnector::new();
        connector.add("fs", &["read"]);
        let git = connector.add("git", &["log"]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"servers": [
                {{"key": "fs", "transport": "stdio", "command": "fake"}},
                {{"key": "git", "transport": "stdio", "command": "fake"}}
            ]}}"#
        )
        .unwrap();

        let manager = McpManager::new(settings(), connector.clone());
        manager.start(ServerSource::File(file.path().to_path_buf()));
        manager.wait_ready().await;
        assert_eq!(manager.servers().await.len(), 2);

        std::fs::write(
            file.path(),
            r#"{"servers": [{"key": "fs", "transport": "stdio", "command": "fake"}]}"#,
        )
        .unwrap();
        let summary = manager.reload().await.unwrap();
        assert_eq!(summary.removed, vec!["git".to_string()]);
        assert_eq!(summary.unchanged, vec!["fs".to_string()]);
        assert_eq!(git.closes(), 1);

        std::fs::write(file.path(), "{ not json").unwrap();
        assert!(matches!(manager.reload().await, Err(McpError::Config(_))));
        assert_eq!(manager.servers().await.len(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_reconfigure_leaves_entries_untouched() {
        let connector = FakeConnector::new();
        connector.add("fs", &["read"]);
        let manager = McpManager::new(settings(), connector.clone());
        manager.start(inline(&["fs"]));
        manager.wait_ready().await;

        let dupes = vec![
            ServerConfig::stdio("fs", "fake", &[]),
            ServerConfig::stdio("fs", "fake", &[]),
        ];
        assert!(manager.reconfigure(dupes).await.is_err());
        let entry = manager.pool().get("fs").await.unwrap();
        assert_eq!(entry.status, ServerStatus::Ready);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let connector = FakeConnector::new();
        let fs = connector.add("fs", &["read"]);
        let manager = McpManager::new(settings(), connector.clone());
        manager.start(inline(&["fs"]));
        manager.wait_ready().await;

        tokio::time::timeout(Duration::from_secs(2), manager.shutdown())
            .await
            .expect("shutdown completes");
        assert!(manager.servers().await.is_empty());
        assert_eq!(fs.closes(), 1);
    }

    #[tokio::test]
    async fn reload_before_start_is_config_error() {
        let manager = McpManager::new(settings(), FakeConnector::new());
        assert!(matches!(manager.reload().await, Err(McpError::Config(_))));
    }
}
