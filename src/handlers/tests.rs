// ---------------------------------------------------------------------------
// handlers/tests.rs -- Unit tests for API error mapping
// ---------------------------------------------------------------------------

use std::time::Duration;

use axum::response::IntoResponse;
use http_body_util::BodyExt;

use super::*;
use crate::mcp::ServerStatus;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn mcp_errors_map_to_status_codes() {
    let cases = [
        (McpError::Config("dup".into()), StatusCode::UNPROCESSABLE_ENTITY),
        (McpError::connection("fs", "reset"), StatusCode::BAD_GATEWAY),
        (McpError::ServerNotFound("fs".into()), StatusCode::SERVICE_UNAVAILABLE),
        (
            McpError::ServerNotReady {
                key: "fs".into(),
                status: ServerStatus::Degraded,
            },
            StatusCode::SERVICE_UNAVAILABLE,
        ),
        (
            McpError::Execution {
                server: "fs".into(),
                message: "no such file".into(),
                code: None,
            },
            StatusCode::BAD_GATEWAY,
        ),
        (
            McpError::timeout("tools/call", Duration::from_secs(1)),
            StatusCode::GATEWAY_TIMEOUT,
        ),
    ];
    for (err, status) in cases {
        assert_eq!(ApiError::from(err).status_code(), status);
    }
}

#[test]
fn upstream_detail_is_sanitized() {
    let err = ApiError::from(McpError::connection("fs", "dial tcp 10.0.0.3:9000: refused"));
    assert_eq!(err.sanitized_message(), "Upstream MCP server error");

    let err = ApiError::from(McpError::Execution {
        server: "fs".into(),
        message: "no such file".into(),
        code: None,
    });
    assert!(err.sanitized_message().contains("no such file"));
}

#[tokio::test]
async fn error_body_is_structured() {
    let response = ApiError::BadRequest("toolId is required".into())
        .with_details(json!({ "field": "toolId" }))
        .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(body["error"]["message"], "toolId is required");
    assert_eq!(body["error"]["details"]["field"], "toolId");
    assert!(body["error"]["request_id"].as_str().is_some());
}
