// Service configuration from environment variables.
//
// Every value has a default; a value that fails to parse is replaced by the
// default and reported in `warnings` (parsed before tracing is initialized).

use std::cell::RefCell;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::mcp::health::HealthSettings;
use crate::mcp::metrics::MetricsSettings;
use crate::mcp::pool::PoolSettings;
use crate::mcp::router::RouterSettings;
use crate::mcp::ManagerSettings;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub servers_file: PathBuf,
    /// `None` = dev mode, no bearer auth on protected routes.
    pub auth_secret: Option<String>,
    pub log_buffer_capacity: usize,
    pub manager: ManagerSettings,
    /// Variables that were set but could not be parsed.
    pub warnings: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            servers_file: PathBuf::from("mcp_servers.json"),
            auth_secret: None,
            log_buffer_capacity: 1000,
            manager: ManagerSettings::default(),
            warnings: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = AppConfig::default();
        let warnings = RefCell::new(Vec::new());
        let parse = Parser {
            lookup: &lookup,
            warnings: &warnings,
        };
        let secs = |name: &str, default: Duration| {
            Duration::from_secs(parse.or(name, default.as_secs()))
        };

        let probe_timeout = secs("MCP_PROBE_TIMEOUT_SECS", Duration::from_secs(5));

        let manager = ManagerSettings {
            pool: PoolSettings {
                connect_timeout: secs("MCP_CONNECT_TIMEOUT_SECS", Duration::from_secs(20)),
                remove_grace: secs("MCP_REMOVE_GRACE_SECS", Duration::from_secs(5)),
            },
            health: HealthSettings {
                interval: secs("MCP_HEALTH_INTERVAL_SECS", Duration::from_secs(30)),
                jitter: Duration::from_millis(parse.or("MCP_HEALTH_JITTER_MS", 2000)),
                probe_timeout,
                failure_threshold: parse.or("MCP_FAILURE_THRESHOLD", 3u32).max(1),
            },
            router: RouterSettings {
                call_timeout: secs("MCP_CALL_TIMEOUT_SECS", Duration::from_secs(60)),
                probe_timeout,
            },
            metrics: MetricsSettings {
                recent_window: parse.or("MCP_METRICS_RECENT", 10),
                retention: parse.or("MCP_METRICS_RETENTION", 10_000usize).max(1),
            },
        };

        Self {
            port: parse.or("PORT", defaults.port),
            servers_file: lookup("MCP_SERVERS_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.servers_file),
            auth_secret: lookup("AUTH_SECRET").filter(|s| !s.is_empty()),
            log_buffer_capacity: parse.or("LOG_BUFFER_CAPACITY", defaults.log_buffer_capacity)
                .max(1),
            manager,
            warnings: warnings.into_inner(),
        }
    }
}

struct Parser<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
    warnings: &'a RefCell<Vec<String>>,
}

impl<F: Fn(&str) -> Option<String>> Parser<'_, F> {
    fn or<T>(&self, name: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Display,
    {
        match (self.lookup)(name) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                self.warnings
                    .borrow_mut()
                    .push(format!("invalid {name}={raw:?}, using default {default}"));
                default
            }),
        }
    }
}
