//! Connection pool: one managed entry per configured server.
//!
//! The map lock is only held to look up, insert or delete slots. Each slot
//! has its own mutex guarding status and the connection handle; critical
//! sections never span I/O. Every transition bumps the slot's generation so
//! results computed against an older generation can be detected and dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use super::connection::{Connector, Established, McpConnection, ServerInfo, ToolInfo};
use super::error::{McpError, McpResult};
use super::registry::ServerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Starting,
    Ready,
    Degraded,
    Error,
    Stopping,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Starting => "starting",
            ServerStatus::Ready => "ready",
            ServerStatus::Degraded => "degraded",
            ServerStatus::Error => "error",
            ServerStatus::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Bound on transport setup, handshake and the initial `tools/list`.
    pub connect_timeout: Duration,
    /// How long `remove` waits for in-flight calls before force-closing.
    pub remove_grace: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            remove_grace: Duration::from_secs(5),
        }
    }
}

/// Read-only copy of a pool entry, safe to hand to any caller.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServerEntry {
    pub key: String,
    pub label: String,
    pub transport: String,
    pub status: ServerStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub tools: Vec<ToolInfo>,
    pub server_name: Option<String>,
    pub version: Option<String>,
    pub protocol_version: Option<String>,
    pub generation: u64,
    pub consecutive_failures: u32,
    pub connected: bool,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total: usize,
    pub starting: usize,
    pub ready: usize,
    pub degraded: usize,
    pub error: usize,
    pub stopping: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconfigureSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub restarted: Vec<String>,
    pub unchanged: Vec<String>,
}

struct EntryState {
    config: Arc<ServerConfig>,
    status: ServerStatus,
    last_checked: Option<DateTime<Utc>>,
    last_error: Option<String>,
    connection: Option<Arc<dyn McpConnection>>,
    tools: Vec<ToolInfo>,
    info: ServerInfo,
    generation: u64,
    consecutive_failures: u32,
}

impl EntryState {
    fn transition(&mut self, status: ServerStatus) {
        self.status = status;
        self.generation += 1;
    }
}

struct EntrySlot {
    state: Mutex<EntryState>,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl EntrySlot {
    fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            state: Mutex::new(EntryState {
                config,
                status: ServerStatus::Starting,
                last_checked: None,
                last_error: None,
                connection: None,
                tools: Vec::new(),
                info: ServerInfo::default(),
                generation: 0,
                consecutive_failures: 0,
            }),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn snapshot(&self) -> ManagedServerEntry {
        let s = self.lock();
        ManagedServerEntry {
            key: s.config.key.clone(),
            label: s.config.label.clone(),
            transport: s.config.transport.name().to_string(),
            status: s.status,
            last_checked: s.last_checked,
            last_error: s.last_error.clone(),
            tools: s.tools.clone(),
            server_name: s.info.name.clone(),
            version: s.info.version.clone(),
            protocol_version: s.info.protocol_version.clone(),
            generation: s.generation,
            consecutive_failures: s.consecutive_failures,
            connected: s.connection.as_ref().is_some_and(|c| c.is_alive()),
            in_flight: self.in_flight.load(Ordering::Acquire),
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Exclusive-use token for one call on a ready connection.
///
/// Holding it counts as an in-flight call; `remove` waits for these to drop.
pub struct ConnectionGuard {
    key: String,
    generation: u64,
    connection: Arc<dyn McpConnection>,
    tools: Vec<ToolInfo>,
    call_timeout: Option<Duration>,
    slot: Arc<EntrySlot>,
}

impl ConnectionGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> &Arc<dyn McpConnection> {
        &self.connection
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Per-server override of the call timeout, if configured.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.slot.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slot.drained.notify_waiters();
        }
    }
}

/// State captured before a health probe runs.
pub struct ProbeTicket {
    pub key: String,
    pub label: String,
    pub generation: u64,
    pub status: ServerStatus,
    pub connection: Option<Arc<dyn McpConnection>>,
    pub config: Arc<ServerConfig>,
}

/// Result of the I/O part of a probe, applied by `ConnectionPool::apply_probe`.
pub enum ProbeOutcome {
    /// Ping succeeded on a ready entry.
    Alive,
    /// Ping succeeded on a non-ready entry; tools were re-listed.
    Recovered { tools: Vec<ToolInfo> },
    /// A fresh connection replaced a missing or dead one.
    Reconnected {
        established: Established,
        tools: Vec<ToolInfo>,
    },
    Failed(McpError),
}

pub struct ConnectionPool {
    entries: RwLock<BTreeMap<String, Arc<EntrySlot>>>,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, settings: PoolSettings) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            connector,
            settings,
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    async fn slot(&self, key: &str) -> Option<Arc<EntrySlot>> {
        self.entries.read().await.get(key).cloned()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Create `starting` entries for configs not yet pooled and connect them
    /// in the background. Keys already present are left alone.
    pub async fn start(self: &Arc<Self>, configs: &[Arc<ServerConfig>]) -> Vec<JoinHandle<()>> {
        let mut created = Vec::new();
        {
            let mut entries = self.entries.write().await;
            for cfg in configs {
                if entries.contains_key(&cfg.key) {
                    continue;
                }
                let slot = Arc::new(EntrySlot::new(cfg.clone()));
                entries.insert(cfg.key.clone(), slot.clone());
                created.push(slot);
            }
        }

        created
            .into_iter()
            .map(|slot| {
                let pool = self.clone();
                tokio::spawn(async move { pool.establish(slot).await })
            })
            .collect()
    }

    async fn establish(&self, slot: Arc<EntrySlot>) {
        let (config, generation) = {
            let s = slot.lock();
            (s.config.clone(), s.generation)
        };
        tracing::info!(server = %config.key, "MCP: connecting via {}", config.transport.name());
        let result = self.open(&config).await;

        let discarded = {
            let mut s = slot.lock();
            if s.generation != generation {
                result.ok().map(|(established, _)| established.connection)
            } else {
                s.last_checked = Some(Utc::now());
                match result {
                    Ok((established, tools)) => {
                        tracing::info!(
                            server = %config.key,
                            "MCP: connected to '{}' ({} tools)",
                            config.label,
                            tools.len()
                        );
                        s.connection = Some(established.connection);
                        s.info = established.info;
                        s.tools = tools;
                        s.last_error = None;
                        s.consecutive_failures = 0;
                        s.transition(ServerStatus::Ready);
                    }
                    Err(e) => {
                        tracing::warn!(server = %config.key, "MCP: failed to connect to '{}': {}", config.label, e);
                        s.last_error = Some(e.to_string());
                        s.transition(ServerStatus::Error);
                    }
                }
                None
            }
        };

        if let Some(conn) = discarded {
            conn.close().await;
        }
    }

    /// Connect, handshake and list tools, all bounded by the connect timeout.
    pub async fn open(&self, config: &ServerConfig) -> McpResult<(Established, Vec<ToolInfo>)> {
        let timeout = self.settings.connect_timeout;
        let established =
            match tokio::time::timeout(timeout, self.connector.connect(config, timeout)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(McpError::timeout(format!("connecting to '{}'", config.key), timeout));
                }
            };

        if !config.capabilities.tools {
            return Ok((established, Vec::new()));
        }

        match tokio::time::timeout(timeout, established.connection.list_tools()).await {
            Ok(Ok(tools)) => Ok((established, tools)),
            Ok(Err(e)) => {
                established.connection.close().await;
                Err(e)
            }
            Err(_) => {
                established.connection.close().await;
                Err(McpError::timeout(format!("tools/list on '{}'", config.key), timeout))
            }
        }
    }

    /// Mark `stopping`, drain in-flight calls within the grace period, close
    /// the connection, then delete the entry.
    pub async fn remove(&self, key: &str) -> bool {
        let Some(slot) = self.slot(key).await else {
            return false;
        };

        let connection = {
            let mut s = slot.lock();
            if s.status == ServerStatus::Stopping {
                return false;
            }
            s.transition(ServerStatus::Stopping);
            s.connection.take()
        };

        let grace = self.settings.remove_grace;
        if tokio::time::timeout(grace, slot.wait_idle()).await.is_err() {
            tracing::warn!(
                server = %key,
                "MCP: {} call(s) still in flight after {}ms, force-closing",
                slot.in_flight.load(Ordering::Acquire),
                grace.as_millis()
            );
        }
        if let Some(conn) = connection {
            conn.close().await;
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            entries.remove(key);
        }
        tracing::info!(server = %key, "MCP: removed server");
        true
    }

    /// Diff against the current entries: unchanged servers are untouched,
    /// removed ones torn down, new ones started, changed ones restarted.
    pub async fn reconfigure(self: &Arc<Self>, configs: &[Arc<ServerConfig>]) -> ReconfigureSummary {
        let current: BTreeMap<String, Arc<ServerConfig>> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(k, slot)| (k.clone(), slot.lock().config.clone()))
                .collect()
        };
        let desired: BTreeMap<&str, &Arc<ServerConfig>> =
            configs.iter().map(|c| (c.key.as_str(), c)).collect();

        let mut summary = ReconfigureSummary::default();
        let mut to_start = Vec::new();

        for (key, cfg) in &current {
            match desired.get(key.as_str()) {
                None => summary.removed.push(key.clone()),
                Some(next) if ***next != **cfg => {
                    summary.restarted.push(key.clone());
                    to_start.push((*next).clone());
                }
                Some(_) => summary.unchanged.push(key.clone()),
            }
        }
        for (key, cfg) in &desired {
            if !current.contains_key(*key) {
                summary.added.push(key.to_string());
                to_start.push((*cfg).clone());
            }
        }

        join_all(
            summary
                .removed
                .iter()
                .chain(summary.restarted.iter())
                .map(|key| self.remove(key)),
        )
        .await;
        self.start(&to_start).await;

        tracing::info!(
            "MCP: reconfigured -- added={:?} removed={:?} restarted={:?} unchanged={}",
            summary.added,
            summary.removed,
            summary.restarted,
            summary.unchanged.len()
        );
        summary
    }

    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        join_all(keys.iter().map(|key| self.remove(key))).await;
        tracing::info!("MCP: pool shut down ({} server(s))", keys.len());
    }

    // ── Read access ─────────────────────────────────────────────────────

    /// Snapshot copies of every entry, ordered by key.
    pub async fn get_all(&self) -> Vec<ManagedServerEntry> {
        let slots: Vec<Arc<EntrySlot>> = self.entries.read().await.values().cloned().collect();
        slots.iter().map(|slot| slot.snapshot()).collect()
    }

    pub async fn get(&self, key: &str) -> Option<ManagedServerEntry> {
        self.slot(key).await.map(|slot| slot.snapshot())
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        for entry in self.get_all().await {
            stats.total += 1;
            match entry.status {
                ServerStatus::Starting => stats.starting += 1,
                ServerStatus::Ready => stats.ready += 1,
                ServerStatus::Degraded => stats.degraded += 1,
                ServerStatus::Error => stats.error += 1,
                ServerStatus::Stopping => stats.stopping += 1,
            }
        }
        stats
    }

    /// Hand out a usable connection, or fail immediately.
    pub async fn acquire(&self, key: &str) -> McpResult<ConnectionGuard> {
        let slot = self
            .slot(key)
            .await
            .ok_or_else(|| McpError::ServerNotFound(key.to_string()))?;

        let (connection, generation, tools, call_timeout) = {
            let mut s = slot.lock();
            let live = match (&s.status, &s.connection) {
                (ServerStatus::Ready, Some(conn)) if conn.is_alive() => Some(conn.clone()),
                _ => None,
            };
            let Some(connection) = live else {
                if s.status == ServerStatus::Ready {
                    // Handle died between probes.
                    s.last_error = Some("connection lost".to_string());
                    s.transition(ServerStatus::Degraded);
                }
                return Err(McpError::ServerNotReady {
                    key: key.to_string(),
                    status: s.status,
                });
            };
            slot.in_flight.fetch_add(1, Ordering::AcqRel);
            (
                connection,
                s.generation,
                s.tools.clone(),
                s.config.timeout_secs.map(Duration::from_secs),
            )
        };

        Ok(ConnectionGuard {
            key: key.to_string(),
            generation,
            connection,
            tools,
            call_timeout,
            slot,
        })
    }

    // ── Health transitions ──────────────────────────────────────────────

    pub async fn probe_ticket(&self, key: &str) -> Option<ProbeTicket> {
        let slot = self.slot(key).await?;
        let s = slot.lock();
        Some(ProbeTicket {
            key: key.to_string(),
            label: s.config.label.clone(),
            generation: s.generation,
            status: s.status,
            connection: s.connection.clone(),
            config: s.config.clone(),
        })
    }

    /// Apply a probe result. Returns the resulting status, or `None` when the
    /// result was stale (the entry moved on while the probe was running).
    pub async fn apply_probe(
        &self,
        key: &str,
        generation: u64,
        outcome: ProbeOutcome,
        failure_threshold: u32,
    ) -> Option<ServerStatus> {
        let mut to_close: Vec<Arc<dyn McpConnection>> = Vec::new();
        let slot = self.slot(key).await;

        let applied = match slot {
            None => {
                if let ProbeOutcome::Reconnected { established, .. } = outcome {
                    to_close.push(established.connection);
                }
                None
            }
            Some(slot) => {
                let mut s = slot.lock();
                if s.generation != generation || s.status == ServerStatus::Stopping {
                    tracing::debug!(server = %key, "MCP: discarding stale probe result");
                    if let ProbeOutcome::Reconnected { established, .. } = outcome {
                        to_close.push(established.connection);
                    }
                    None
                } else {
                    s.last_checked = Some(Utc::now());
                    match outcome {
                        ProbeOutcome::Alive => {
                            s.consecutive_failures = 0;
                        }
                        ProbeOutcome::Recovered { tools } => {
                            tracing::info!(server = %key, "MCP: recovered ({} -> ready)", s.status);
                            s.tools = tools;
                            s.last_error = None;
                            s.consecutive_failures = 0;
                            s.transition(ServerStatus::Ready);
                        }
                        ProbeOutcome::Reconnected { established, tools } => {
                            tracing::info!(server = %key, "MCP: reconnected ({} -> ready)", s.status);
                            if let Some(old) = s.connection.replace(established.connection) {
                                to_close.push(old);
                            }
                            s.info = established.info;
                            s.tools = tools;
                            s.last_error = None;
                            s.consecutive_failures = 0;
                            s.transition(ServerStatus::Ready);
                        }
                        ProbeOutcome::Failed(err) => {
                            s.consecutive_failures += 1;
                            s.last_error = Some(err.to_string());
                            let next = if s.status == ServerStatus::Error
                                || s.consecutive_failures >= failure_threshold
                            {
                                ServerStatus::Error
                            } else {
                                ServerStatus::Degraded
                            };
                            if next == ServerStatus::Error {
                                if let Some(old) = s.connection.take() {
                                    to_close.push(old);
                                }
                            }
                            if next != s.status {
                                tracing::warn!(
                                    server = %key,
                                    "MCP: {} -> {} after {} failed probe(s): {}",
                                    s.status,
                                    next,
                                    s.consecutive_failures,
                                    err
                                );
                            }
                            s.transition(next);
                        }
                    }
                    Some(s.status)
                }
            }
        };

        for conn in to_close {
            conn.close().await;
        }
        applied
    }

    /// Close a connection that could not be re-verified and mark the entry
    /// `error` so the health monitor reconnects it.
    pub async fn invalidate(&self, key: &str, generation: u64, reason: &str) -> bool {
        let Some(slot) = self.slot(key).await else {
            return false;
        };
        let connection = {
            let mut s = slot.lock();
            if s.generation != generation || s.status == ServerStatus::Stopping {
                return false;
            }
            s.last_error = Some(reason.to_string());
            s.transition(ServerStatus::Error);
            s.connection.take()
        };
        tracing::warn!(server = %key, "MCP: connection invalidated: {}", reason);
        if let Some(conn) = connection {
            conn.close().await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::testing::FakeConnector;

    fn configs(keys: &[&str]) -> Vec<Arc<ServerConfig>> {
        keys.iter()
            .map(|k| Arc::new(ServerConfig::stdio(k, "fake", &[])))
            .collect()
    }

    fn pool(connector: &Arc<FakeConnector>) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            connector.clone(),
            PoolSettings {
                connect_timeout: Duration::from_millis(500),
                remove_grace: Duration::from_millis(200),
            },
        ))
    }

    async fn started(pool: &Arc<ConnectionPool>, cfgs: &[Arc<ServerConfig>]) {
        join_all(pool.start(cfgs).await).await;
    }

    #[tokio::test]
    async fn start_creates_one_entry_per_key() {
        let connector = FakeConnector::new();
        connector.add("fs", &["read"]);
        connector.add("git", &["log"]);
        let pool = pool(&connector);
        let cfgs = configs(&["fs", "git"]);

        started(&pool, &cfgs).await;
        started(&pool, &cfgs).await;

        let entries = pool.get_all().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.status == ServerStatus::Ready));
        assert_eq!(connector.server("fs").connects(), 1);
        assert_eq!(pool.keys().await, vec!["fs".to_string(), "git".to_string()]);
    }

    #[tokio::test]
    async fn failed_connect_sets_error_without_retry() {
        let connector = FakeConnector::new();
        let pool = pool(&connector);

        started(&pool, &configs(&["ghost"])).await;

        let entry = pool.get("ghost").await.unwrap();
        assert_eq!(entry.status, ServerStatus::Error);
        assert!(entry.last_error.is_some());
        assert!(matches!(
            pool.acquire("ghost").await,
            Err(McpError::ServerNotReady { status: ServerStatus::Error, .. })
        ));
    }

    #[tokio::test]
    async fn acquire_unknown_key_is_not_found() {
        let pool = pool(&FakeConnector::new());
        assert!(matches!(
            pool.acquire("nope").await,
            Err(McpError::ServerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn dead_handle_is_not_handed_out() {
        let connector = FakeConnector::new();
        connector.add("fs", &["read"]);
        let pool = pool(&connector);
        started(&pool, &configs(&["fs"])).await;

        connector.server("fs").kill_connections();

        assert!(matches!(
            pool.acquire("fs").await,
            Err(McpError::ServerNotReady { status: ServerStatus::Degraded, .. })
        ));
        assert_eq!(pool.get("fs").await.unwrap().status, ServerStatus::Degraded);
    }

    #[tokio::test]
    async fn remove_closes_connection_and_deletes_entry() {
        let connector = FakeConnector::new();
        let fs = connector.add("fs", &["read"]);
        let pool = pool(&connector);
        started(&pool, &configs(&["fs"])).await;

        assert!(pool.remove("fs").await);
        assert!(pool.get("fs").await.is_none());
        assert_eq!(fs.closes(), 1);
        assert!(!pool.remove("fs").await);
    }

    #[tokio::test]
    async fn remove_waits_for_in_flight_calls() {
        let connector = FakeConnector::new();
        let fs = connector.add("fs", &["read"]);
        let pool = pool(&connector);
        started(&pool, &configs(&["fs"])).await;

        let guard = pool.acquire("fs").await.unwrap();
        assert_eq!(pool.get("fs").await.unwrap().in_flight, 1);

        let remover = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.remove("fs").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.get("fs").await.unwrap().status, ServerStatus::Stopping);
        assert_eq!(fs.closes(), 0);

        drop(guard);
        assert!(remover.await.unwrap());
        assert_eq!(fs.closes(), 1);
    }

    #[tokio::test]
    async fn reconfigure_diffs_entries() {
        let connector = FakeConnector::new();
        let fs = connector.add("fs", &["read"]);
        let git = connector.add("git", &["log"]);
        connector.add("search", &["query"]);
        let pool = pool(&connector);
        started(&pool, &configs(&["fs", "git"])).await;

        let summary = pool.reconfigure(&configs(&["fs", "search"])).await;
        assert_eq!(summary.added, vec!["search".to_string()]);
        assert_eq!(summary.removed, vec!["git".to_string()]);
        assert_eq!(summary.unchanged, vec!["fs".to_string()]);
        assert!(summary.restarted.is_empty());

        assert_eq!(fs.connects(), 1);
        assert_eq!(git.closes(), 1);
        assert_eq!(pool.keys().await, vec!["fs".to_string(), "search".to_string()]);
    }

    #[tokio::test]
    async fn reconfigure_restarts_changed_config() {
        let connector = FakeConnector::new();
        let fs = connector.add("fs", &["read"]);
        let pool = pool(&connector);
        started(&pool, &configs(&["fs"])).await;

        let changed = vec![Arc::new(ServerConfig::stdio("fs", "fake", &["--ro"]))];
        let summary = pool.reconfigure(&changed).await;
        assert_eq!(summary.restarted, vec!["fs".to_string()]);
        assert_eq!(fs.closes(), 1);
        assert_eq!(pool.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn failure_threshold_drives_degraded_then_error() {
        let connector = FakeConnector::new();
        connector.add("fs", &["read"]);
        let pool = pool(&connector);
        started(&pool, &configs(&["fs"])).await;

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let ticket = pool.probe_ticket("fs").await.unwrap();
            let status = pool
                .apply_probe(
                    "fs",
                    ticket.generation,
                    ProbeOutcome::Failed(McpError::connection("fs", "boom")),
                    3,
                )
                .await;
            statuses.push(status.unwrap());
        }
        assert_eq!(
            statuses,
            vec![ServerStatus::Degraded, ServerStatus::Degraded, ServerStatus::Error]
        );
        let entry = pool.get("fs").await.unwrap();
        assert_eq!(entry.consecutive_failures, 3);
        assert!(!entry.connected);
    }

    #[tokio::test]
    async fn stale_probe_results_are_discarded() {
        let connector = FakeConnector::new();
        connector.add("fs", &["read"]);
        let pool = pool(&connector);
        started(&pool, &configs(&["fs"])).await;

        let old = pool.probe_ticket("fs").await.unwrap();
        let fresh = pool.probe_ticket("fs").await.unwrap();
        pool.apply_probe(
            "fs",
            fresh.generation,
            ProbeOutcome::Failed(McpError::connection("fs", "miss")),
            3,
        )
        .await;

        let applied = pool
            .apply_probe("fs", old.generation, ProbeOutcome::Recovered { tools: vec![] }, 3)
            .await;
        assert!(applied.is_none());
        assert_eq!(pool.get("fs").await.unwrap().status, ServerStatus::Degraded);
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let connector = FakeConnector::new();
        connector.add("fs", &["read"]);
        let pool = pool(&connector);
        started(&pool, &configs(&["fs", "ghost"])).await;

        let stats = pool.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.error, 1);
    }
}
