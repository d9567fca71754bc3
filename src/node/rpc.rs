//! JSON-RPC HTTP server exposing the node's read-only views.

use axum::{
    extract::State,
    http::HeaderValue,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use super::node::{NodeError, PropertyNode};

/// RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Value,
}

/// RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

/// RPC error.
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    fn from_result(id: Value, result: Result<Value, NodeError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(e) => Self::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
        }
    }
}

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// RPC server state.
#[derive(Clone)]
pub struct RpcState {
    pub node: Arc<PropertyNode>,
}

/// Start the RPC HTTP server.
pub async fn start_rpc_server(node: Arc<PropertyNode>, addr: SocketAddr) -> Result<(), String> {
    let cors = cors_layer(&node.config().rpc.allowed_origins);
    let state = RpcState { node };

    let app = Router::new()
        .route("/", post(handle_rpc))
        .route("/metrics", get(handle_metrics))
        .layer(cors)
        .with_state(state);

    info!("Starting RPC server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind RPC server: {}", e))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("RPC server error: {}", e))?;

    Ok(())
}

/// CORS policy for the configured origins. `*` allows any origin.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Handle RPC request.
async fn handle_rpc(State(state): State<RpcState>, body: String) -> Json<RpcResponse> {
    Json(handle_body(&state, &body))
}

/// Parse a request body and process it.
fn handle_body(state: &RpcState, body: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(body) {
        Ok(request) => process_request(state, request),
        Err(e) => RpcResponse::error(
            Value::Null,
            error_codes::PARSE_ERROR,
            format!("Parse error: {}", e),
        ),
    }
}

/// Process an RPC request.
fn process_request(state: &RpcState, request: RpcRequest) -> RpcResponse {
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(
            request.id,
            error_codes::INVALID_REQUEST,
            "Expected jsonrpc 2.0".to_string(),
        );
    }

    let node = &state.node;
    let id = request.id;
    let params = request.params;

    match request.method.as_str() {
        "deed_nodeInfo" => RpcResponse::from_result(id, node_info(node)),
        "deed_holdings" => RpcResponse::from_result(id, holdings(node)),
        "deed_getPeers" => RpcResponse::from_result(
            id,
            node.peer_list()
                .map(|peers| serde_json::to_value(peers).unwrap_or(Value::Null)),
        ),
        "deed_getChain" => RpcResponse::from_result(
            id,
            node.ledger().map(|ledger| json!(ledger.walk_chain())),
        ),
        "deed_getProperty" => match string_param(params, 0) {
            Ok(property_id) => RpcResponse::from_result(id, get_property(node, &property_id)),
            Err(e) => RpcResponse::error(id, error_codes::INVALID_PARAMS, e),
        },
        "deed_getTransaction" => match string_param(params, 0) {
            Ok(tx_id) => RpcResponse::from_result(id, get_transaction(node, &tx_id)),
            Err(e) => RpcResponse::error(id, error_codes::INVALID_PARAMS, e),
        },
        "deed_getBlock" => match string_param(params, 0) {
            Ok(hash) => RpcResponse::from_result(
                id,
                node.ledger().map(|ledger| {
                    ledger
                        .get(&hash)
                        .and_then(|block| serde_json::to_value(block).ok())
                        .unwrap_or(Value::Null)
                }),
            ),
            Err(e) => RpcResponse::error(id, error_codes::INVALID_PARAMS, e),
        },

        _ => RpcResponse::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    }
}

// === Method implementations ===

fn node_info(node: &PropertyNode) -> Result<Value, NodeError> {
    let ledger = node.ledger()?;
    let pending = node.pending()?;
    let peers = node.peer_list()?;
    let stats = node.stats();

    Ok(json!({
        "peerId": node.peer_id(),
        "address": node.local_addr().to_string(),
        "head": ledger.head(),
        "chainLength": ledger.walk_chain().len(),
        "pendingTransactions": pending.len(),
        "peerCount": peers.len(),
        "stats": stats,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn holdings(node: &PropertyNode) -> Result<Value, NodeError> {
    let peers = node.peer_list()?;
    let owned: Vec<&String> = peers
        .get(node.peer_id())
        .map(|entry| entry.owned.iter().collect())
        .unwrap_or_default();

    let held: Vec<Value> = node
        .holdings()
        .into_iter()
        .map(|(id, record)| json!({ "id": id, "record": record }))
        .collect();

    Ok(json!({ "owned": owned, "keys": held }))
}

fn get_property(node: &PropertyNode, property_id: &str) -> Result<Value, NodeError> {
    if let Some(record) = node.confirmed()?.properties.get(property_id) {
        return Ok(json!({ "status": "confirmed", "record": record }));
    }
    if let Some(record) = node.pending()?.properties.get(property_id) {
        return Ok(json!({ "status": "pending", "record": record }));
    }
    Ok(Value::Null)
}

fn get_transaction(node: &PropertyNode, tx_id: &str) -> Result<Value, NodeError> {
    if let Some(tx) = node.confirmed()?.transactions.get(tx_id) {
        return Ok(json!({ "status": "confirmed", "transaction": tx }));
    }
    if let Some(tx) = node.pending()?.transactions.get(tx_id) {
        return Ok(json!({ "status": "pending", "transaction": tx }));
    }
    Ok(Value::Null)
}

// === Helper functions ===

fn string_param(params: Option<Value>, index: usize) -> Result<String, String> {
    let arr = match params {
        Some(Value::Array(a)) => a,
        _ => return Err("Missing params".to_string()),
    };

    arr.get(index)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| format!("Missing string parameter {}", index))
}

/// Handle metrics request (Prometheus format)
async fn handle_metrics(State(state): State<RpcState>) -> String {
    let stats = state.node.stats();
    let pending = state.node.pending().map(|pool| pool.len()).unwrap_or(0);

    format!(
        "# HELP deed_blocks_minted_total Blocks minted by this node\n\
         # TYPE deed_blocks_minted_total counter\n\
         deed_blocks_minted_total {}\n\
         # HELP deed_stale_aborts_total Mint attempts aborted on a moved head\n\
         # TYPE deed_stale_aborts_total counter\n\
         deed_stale_aborts_total {}\n\
         # HELP deed_messages_dropped_total Malformed or failed messages\n\
         # TYPE deed_messages_dropped_total counter\n\
         deed_messages_dropped_total {}\n\
         # HELP deed_pending_transactions Transactions waiting for a block\n\
         # TYPE deed_pending_transactions gauge\n\
         deed_pending_transactions {}\n",
        stats.blocks_minted, stats.stale_aborts, stats.messages_dropped, pending
    )
}
