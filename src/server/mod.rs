//! MCP server exposing the download tool, the ledger resource and the
//! download prompt over JSON-RPC 2.0.
//!
//! Transports (see [`transport`]) hand raw messages to
//! [`McpServer::handle_message`] and deliver whatever response it returns.

pub mod prompts;
pub mod protocol;
pub mod resources;
pub mod tools;
pub mod transport;

use crate::downloader::Downloader;
use crate::ledger::Ledger;
use protocol::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const SERVER_NAME: &str = "video-download";

pub struct McpServer {
    downloader: Downloader,
    ledger: Arc<Ledger>,
    /// Cancellation handles of running `tools/call` requests, keyed by request id.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl McpServer {
    pub fn new(downloader: Downloader, ledger: Arc<Ledger>) -> Self {
        Self {
            downloader,
            ledger,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Handles one raw JSON-RPC message. Returns `None` for notifications.
    ///
    /// `cancel` is the transport's shutdown signal; it aborts any download
    /// started by this message.
    pub async fn handle_message(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    JsonRpcError::parse_error(err),
                ));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(err) => {
                return Some(JsonRpcResponse::failure(
                    id,
                    JsonRpcError::invalid_request(err),
                ));
            }
        };

        self.handle_request(request, cancel).await
    }

    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        cancel: &CancellationToken,
    ) -> Option<JsonRpcResponse> {
        let Some(id) = request.id().cloned() else {
            self.handle_notification(&request);
            return None;
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                id,
                JsonRpcError::invalid_request(format!(
                    "unsupported jsonrpc version {:?}",
                    request.jsonrpc
                )),
            ));
        }

        debug!(method = %request.method, %id, "handling request");
        let params = request.params.unwrap_or(Value::Null);

        let result = match request.method.as_str() {
            "initialize" => Ok(initialize(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": tools::definitions() })),
            "tools/call" => self.call_tool(&id, &params, cancel).await,
            "resources/list" => Ok(json!({ "resources": resources::definitions() })),
            "resources/read" => self.read_resource(&params),
            "prompts/list" => Ok(json!({ "prompts": prompts::definitions() })),
            "prompts/get" => get_prompt(&params),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/cancelled" => {
                let Some(request_id) = request.params.as_ref().and_then(|p| p.get("requestId"))
                else {
                    warn!("cancellation notification without requestId");
                    return;
                };
                let token = self
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&request_id.to_string())
                    .cloned();
                match token {
                    Some(token) => {
                        debug!(%request_id, "cancelling request");
                        token.cancel();
                    }
                    None => debug!(%request_id, "cancellation for unknown request"),
                }
            }
            method => debug!(method, "notification"),
        }
    }

    async fn call_tool(
        &self,
        id: &Value,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, JsonRpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("missing tool name"))?;
        if name != tools::DOWNLOAD_TOOL {
            return Err(JsonRpcError::invalid_params(format!("unknown tool: {name}")));
        }
        let arguments = object_param(params, "arguments")?;

        let key = id.to_string();
        let token = cancel.child_token();
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), token.clone());

        let result =
            tools::download_video_file(&self.downloader, &self.ledger, &arguments, &token).await;

        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);

        serde_json::to_value(result).map_err(JsonRpcError::internal)
    }

    fn read_resource(&self, params: &Value) -> Result<Value, JsonRpcError> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("missing resource uri"))?;

        let contents = resources::read(&self.ledger, uri)?;
        Ok(json!({ "contents": contents }))
    }
}

fn initialize(params: &Value) -> Value {
    let requested = params.get("protocolVersion").and_then(Value::as_str);
    let protocol_version = requested
        .filter(|version| SUPPORTED_PROTOCOL_VERSIONS.contains(version))
        .unwrap_or(PROTOCOL_VERSION);

    json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": {},
            "resources": {},
            "prompts": {}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn get_prompt(params: &Value) -> Result<Value, JsonRpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_params("missing prompt name"))?;
    let arguments = object_param(params, "arguments")?;

    let result = prompts::get(name, &arguments)?;
    serde_json::to_value(result).map_err(JsonRpcError::internal)
}

/// Optional object-valued parameter; absent or `null` is an empty map.
fn object_param(params: &Value, name: &str) -> Result<Map<String, Value>, JsonRpcError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(JsonRpcError::invalid_params(format!(
            "{name} must be an object"
        ))),
    }
}
