// Shared fixtures for integration tests: an app wired to in-memory MCP servers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use mcphub_backend::mcp::health::HealthSettings;
use mcphub_backend::mcp::pool::PoolSettings;
use mcphub_backend::mcp::router::RouterSettings;
use mcphub_backend::mcp::testing::FakeConnector;
use mcphub_backend::mcp::{ManagerSettings, McpManager, ServerConfig, ServerSource};
use mcphub_backend::state::{AppState, LogRingBuffer};

pub fn test_settings() -> ManagerSettings {
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
        router: RouterSettings {
            call_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(200),
        },
        ..Default::default()
    }
}

pub struct TestApp {
    pub state: AppState,
    pub manager: Arc<McpManager>,
    pub connector: Arc<FakeConnector>,
}

impl TestApp {
    /// Manager constructed but not started.
    pub fn new(auth_secret: Option<&str>) -> Self {
        let connector = FakeConnector::new();
        let manager = McpManager::new(test_settings(), connector.clone());
        let state = AppState::new(
            manager.clone(),
            auth_secret.map(String::from),
            Arc::new(LogRingBuffer::new(100)),
        );
        Self {
            state,
            manager,
            connector,
        }
    }

    /// `(key, tools, reachable)` per server; waits until startup finished.
    pub async fn started(servers: &[(&str, &[&str], bool)]) -> Self {
        let app = Self::new(None);
        let configs = servers
            .iter()
            .map(|(key, tools, reachable)| {
                app.connector
                    .add(key, tools)
                    .refuse_connections(!reachable);
                ServerConfig::stdio(key, "mcp-server", &[])
            })
            .collect();
        app.manager.start(ServerSource::Inline(configs));
        app.manager.wait_ready().await;
        app
    }

    pub fn router(&self) -> axum::Router {
        mcphub_backend::create_router(self.state.clone())
    }

    pub async fn get(&self, uri: &str) -> (axum::http::StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (axum::http::StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> (axum::http::StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_json(response).await)
    }
}

/// Collect a response body into a `serde_json::Value` (`Null` when empty).
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}
