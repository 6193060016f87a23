use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method, StatusCode};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use super::RpcChannel;
use crate::core::error::HubError;

#[derive(Clone)]
pub struct BridgeState {
    pub channel: Arc<RpcChannel>,
}

/// tools/call can fan out to a downstream server, so its deadline has
/// to cover the hub's own outbound rpc timeout plus slack. Everything
/// else is answered from local state and keeps the short default.
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(60);

fn rpc_timeout(method: &str) -> Duration {
    match method {
        "tools/call" => TOOL_CALL_TIMEOUT,
        _ => super::DEFAULT_TIMEOUT,
    }
}

fn localhost_cors(port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
        "http://localhost:3000".to_string(),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-request-id"),
        ])
}

pub fn build_router(state: BridgeState, port: u16) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/mcp/tools", get(list_tools))
        .route("/api/mcp/tools/call", post(call_tool))
        .route("/api/mcp/resources", get(list_resources))
        .route("/api/mcp/resources/read", get(read_resource))
        .route("/api/mcp/prompts", get(list_prompts))
        .route("/api/knowledge", post(upsert_knowledge))
        .route("/api/knowledge/search", get(search_knowledge))
        .route("/api/knowledge/collections", get(list_collections))
        .layer(localhost_cors(port))
        .with_state(state)
}

pub async fn serve(state: BridgeState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("bridge listening on {}", addr);
    axum::serve(listener, build_router(state, port)).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "agenthub-bridge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_tools(
    State(state): State<BridgeState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    forward(&state, &headers, "tools/list", None).await
}

async fn call_tool(
    State(state): State<BridgeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return bad_request("name is required");
    };
    let params = json!({
        "name": name,
        "arguments": body.get("arguments").cloned().unwrap_or_else(|| json!({})),
    });
    forward(&state, &headers, "tools/call", Some(params)).await
}

async fn list_resources(
    State(state): State<BridgeState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    forward(&state, &headers, "resources/list", None).await
}

async fn read_resource(
    State(state): State<BridgeState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let Some(uri) = query.get("uri").filter(|u| !u.is_empty()) else {
        return bad_request("uri query parameter is required");
    };
    forward(&state, &headers, "resources/read", Some(json!({"uri": uri}))).await
}

async fn list_prompts(
    State(state): State<BridgeState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    forward(&state, &headers, "prompts/list", None).await
}

async fn upsert_knowledge(
    State(state): State<BridgeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let params = json!({"name": "upsert_knowledge", "arguments": body});
    forward(&state, &headers, "tools/call", Some(params)).await
}

async fn search_knowledge(
    State(state): State<BridgeState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let (Some(collection), Some(q)) = (query.get("collection"), query.get("query")) else {
        return bad_request("collection and query parameters are required");
    };
    let mut arguments = json!({"collection": collection, "query": q});
    if let Some(limit) = query.get("limit").and_then(|l| l.parse::<i64>().ok()) {
        arguments["limit"] = json!(limit);
    }
    let params = json!({"name": "query_knowledge", "arguments": arguments});
    forward(&state, &headers, "tools/call", Some(params)).await
}

async fn list_collections(
    State(state): State<BridgeState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    forward(
        &state,
        &headers,
        "resources/read",
        Some(json!({"uri": "hub://knowledge/collections"})),
    )
    .await
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "error": message})),
    )
}

/// Proxies one rpc call over the channel. The caller's X-Request-ID is
/// echoed back for log correlation; the channel's internal ids never
/// leave the bridge.
async fn forward(
    state: &BridgeState,
    headers: &HeaderMap,
    method: &str,
    params: Option<Value>,
) -> (StatusCode, Json<Value>) {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    debug!(method, request_id = request_id.as_deref().unwrap_or("-"), "proxying rpc call");

    match state
        .channel
        .request_with_timeout(method, params, rpc_timeout(method))
        .await
    {
        Ok(result) => {
            let mut body = json!({"success": true, "result": result});
            if let Some(id) = request_id {
                body["requestId"] = json!(id);
            }
            (StatusCode::OK, Json(body))
        }
        Err(e) => {
            let status = match e {
                HubError::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            let mut body = json!({"success": false, "error": e.to_string()});
            if let Some(id) = request_id {
                body["requestId"] = json!(id);
            }
            (status, Json(body))
        }
    }
}
