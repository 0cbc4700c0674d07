// MCP health monitor
//
// Periodically probes every pooled server and drives status transitions:
// - ready + ping ok           -> no-op
// - not ready + ping ok       -> ready (tools re-listed)
// - ping failure              -> degraded, then error after N consecutive misses
// - error / dead handle       -> full reconnect, then ping
//
// Probes are jittered per entry and run concurrently; `check_now` runs the
// same probe on demand. Results are applied through the pool, which drops
// any result computed against an outdated entry generation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use super::connection::McpConnection;
use super::error::McpError;
use super::pool::{ConnectionPool, ProbeOutcome, ProbeTicket, ServerStatus};

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub interval: Duration,
    /// Upper bound of the random per-entry delay within a cycle.
    pub jitter: Duration,
    pub probe_timeout: Duration,
    /// Consecutive failed probes before an entry is marked `error`.
    pub failure_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            jitter: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProbeAction {
    Ping,
    Reconnect,
    Skipped,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub key: String,
    pub label: String,
    pub action: ProbeAction,
    pub healthy: bool,
    pub previous_status: ServerStatus,
    pub status: ServerStatus,
    /// `false` when the result was stale and discarded, or the entry skipped.
    pub applied: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthMonitor {
    pool: Arc<ConnectionPool>,
    settings: HealthSettings,
}

impl HealthMonitor {
    pub fn new(pool: Arc<ConnectionPool>, settings: HealthSettings) -> Self {
        Self { pool, settings }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                "MCP health: started (interval={}s, threshold={})",
                self.settings.interval.as_secs(),
                self.settings.failure_threshold
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.interval) => {}
                }
                self.run_cycle(&cancel).await;
            }

            tracing::info!("MCP health: stopped");
        })
    }

    async fn run_cycle(&self, cancel: &CancellationToken) {
        let keys = self.pool.keys().await;
        let reports = join_all(keys.iter().map(|key| async move {
            let delay = jitter(self.settings.jitter);
            tokio::select! {
                _ = cancel.cancelled() => None,
                _ = tokio::time::sleep(delay) => Some(self.probe(key).await),
            }
        }))
        .await;

        let reports: Vec<HealthReport> = reports.into_iter().flatten().collect();
        let failing: Vec<&str> = reports
            .iter()
            .filter(|r| r.action != ProbeAction::Skipped && !r.healthy)
            .map(|r| r.key.as_str())
            .collect();

        if failing.is_empty() {
            tracing::debug!("MCP health: {} server(s) checked, all healthy", reports.len());
        } else {
            tracing::warn!(
                "MCP health: {}/{} server(s) failing: {:?}",
                failing.len(),
                reports.len(),
                failing
            );
        }
    }

    /// Probe every entry now, independent of the periodic schedule.
    pub async fn check_now(&self) -> Vec<HealthReport> {
        let keys = self.pool.keys().await;
        join_all(keys.iter().map(|key| self.probe(key))).await
    }

    pub async fn probe(&self, key: &str) -> HealthReport {
        let started = Instant::now();
        let checked_at = Utc::now();

        let Some(ticket) = self.pool.probe_ticket(key).await else {
            return HealthReport {
                key: key.to_string(),
                label: key.to_string(),
                action: ProbeAction::Skipped,
                healthy: false,
                previous_status: ServerStatus::Stopping,
                status: ServerStatus::Stopping,
                applied: false,
                latency_ms: 0,
                error: Some("server removed".to_string()),
                checked_at,
            };
        };

        if matches!(ticket.status, ServerStatus::Starting | ServerStatus::Stopping) {
            return HealthReport {
                key: ticket.key,
                label: ticket.label,
                action: ProbeAction::Skipped,
                healthy: false,
                previous_status: ticket.status,
                status: ticket.status,
                applied: false,
                latency_ms: 0,
                error: None,
                checked_at,
            };
        }

        let live = ticket
            .connection
            .clone()
            .filter(|c| c.is_alive() && ticket.status != ServerStatus::Error);

        let (action, outcome) = match live {
            Some(conn) => (ProbeAction::Ping, self.ping(&ticket, conn).await),
            None => (ProbeAction::Reconnect, self.reconnect(&ticket).await),
        };

        let error = match &outcome {
            ProbeOutcome::Failed(e) => Some(e.to_string()),
            _ => None,
        };
        let applied = self
            .pool
            .apply_probe(key, ticket.generation, outcome, self.settings.failure_threshold)
            .await;

        let status = match applied {
            Some(status) => status,
            None => self
                .pool
                .get(key)
                .await
                .map(|e| e.status)
                .unwrap_or(ServerStatus::Stopping),
        };

        HealthReport {
            key: ticket.key,
            label: ticket.label,
            action,
            healthy: error.is_none(),
            previous_status: ticket.status,
            status,
            applied: applied.is_some(),
            latency_ms: started.elapsed().as_millis() as u64,
            error,
            checked_at,
        }
    }

    async fn ping(&self, ticket: &ProbeTicket, conn: Arc<dyn McpConnection>) -> ProbeOutcome {
        let timeout = self.settings.probe_timeout;
        match tokio::time::timeout(timeout, conn.ping()).await {
            Ok(Ok(())) if ticket.status == ServerStatus::Ready => ProbeOutcome::Alive,
            Ok(Ok(())) => {
                if !ticket.config.capabilities.tools {
                    return ProbeOutcome::Recovered { tools: Vec::new() };
                }
                match tokio::time::timeout(timeout, conn.list_tools()).await {
                    Ok(Ok(tools)) => ProbeOutcome::Recovered { tools },
                    Ok(Err(e)) => ProbeOutcome::Failed(e),
                    Err(_) => ProbeOutcome::Failed(McpError::timeout(
                        format!("tools/list on '{}'", ticket.key),
                        timeout,
                    )),
                }
            }
            Ok(Err(e)) => ProbeOutcome::Failed(e),
            Err(_) => ProbeOutcome::Failed(McpError::timeout(
                format!("ping '{}'", ticket.key),
                timeout,
            )),
        }
    }

    async fn reconnect(&self, ticket: &ProbeTicket) -> ProbeOutcome {
        tracing::debug!(server = %ticket.key, "MCP health: reconnecting ({})", ticket.status);
        let (established, tools) = match self.pool.open(&ticket.config).await {
            Ok(opened) => opened,
            Err(e) => return ProbeOutcome::Failed(e),
        };

        let timeout = self.settings.probe_timeout;
        let pinged = match tokio::time::timeout(timeout, established.connection.ping()).await {
            Ok(result) => result,
            Err(_) => Err(McpError::timeout(format!("ping '{}'", ticket.key), timeout)),
        };
        match pinged {
            Ok(()) => ProbeOutcome::Reconnected { established, tools },
            Err(e) => {
                established.connection.close().await;
                ProbeOutcome::Failed(e)
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
