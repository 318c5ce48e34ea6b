//! JSON-RPC protocol dispatch for the bridge endpoint.
//!
//! Each inbound request gets a fresh, request-scoped [`BridgeTransport`]
//! bound to whichever live server instance the coordinator holds at
//! connect time. A rebuild mid-request does not affect that request;
//! only new transports observe the swap. Teardown coincides with the
//! end of the HTTP request.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, trace, warn};

use crate::coordinator::{DispatchError, LiveServer};

/// JSON-RPC request structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Method not found error.
    pub fn method_not_found(id: Option<Value>) -> Self {
        Self::error(id, -32601, "Method not found")
    }

    /// Invalid request error.
    pub fn invalid_request(id: Option<Value>) -> Self {
        Self::error(id, -32600, "Invalid Request")
    }

    /// Invalid params error.
    pub fn invalid_params(id: Option<Value>, msg: impl Into<String>) -> Self {
        Self::error(id, -32602, msg)
    }

    /// Internal error.
    pub fn internal_error(id: Option<Value>, msg: impl Into<String>) -> Self {
        Self::error(id, -32603, msg)
    }
}

/// A request-scoped transport bound to one live server instance.
pub struct BridgeTransport {
    server: Arc<LiveServer>,
    server_name: String,
    server_version: String,
}

impl BridgeTransport {
    /// Bind the instance that is live right now. Later swaps do not
    /// affect this transport.
    pub fn connect(
        server: Arc<LiveServer>,
        server_name: impl Into<String>,
        server_version: impl Into<String>,
    ) -> Self {
        trace!("Bridge transport connected");
        Self {
            server,
            server_name: server_name.into(),
            server_version: server_version.into(),
        }
    }

    /// Relay one JSON-RPC request through this transport.
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::invalid_request(request.id);
        }
        info!(method = %request.method, "Processing bridge request");

        match request.method.as_str() {
            "initialize" => self.handle_initialize(request),
            "tools/list" => {
                JsonRpcResponse::success(request.id, json!({"tools": self.server.list_tools()}))
            }
            "tools/call" => self.handle_tools_call(request).await,
            "resources/list" => JsonRpcResponse::success(
                request.id,
                json!({"resources": self.server.list_resources()}),
            ),
            "resources/read" => self.handle_resources_read(request).await,
            "prompts/list" => {
                JsonRpcResponse::success(request.id, json!({"prompts": self.server.list_prompts()}))
            }
            "prompts/get" => self.handle_prompts_get(request).await,
            method if method.starts_with("notifications/") => {
                trace!(method, "Received notification");
                JsonRpcResponse::success(request.id, Value::Null)
            }
            _ => {
                warn!(method = %request.method, "Unknown method");
                JsonRpcResponse::method_not_found(request.id)
            }
        }
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        JsonRpcResponse::success(
            request.id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": LiveServer::capabilities(),
                "serverInfo": {
                    "name": self.server_name,
                    "version": self.server_version
                }
            }),
        )
    }

    async fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = request.params else {
            return JsonRpcResponse::invalid_params(request.id, "Missing params");
        };
        let Some(name) = params.get("name").and_then(Value::as_str).map(String::from) else {
            return JsonRpcResponse::invalid_params(request.id, "Missing tool name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match self.server.call_tool(&name, arguments).await {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(e) => dispatch_error_response(request.id, e),
        }
    }

    async fn handle_resources_read(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = request.params else {
            return JsonRpcResponse::invalid_params(request.id, "Missing params");
        };
        let Some(uri) = params.get("uri").and_then(Value::as_str).map(String::from) else {
            return JsonRpcResponse::invalid_params(request.id, "Missing resource URI");
        };

        match self.server.read_resource(&uri).await {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(e) => dispatch_error_response(request.id, e),
        }
    }

    async fn handle_prompts_get(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let Some(params) = request.params else {
            return JsonRpcResponse::invalid_params(request.id, "Missing params");
        };
        let Some(name) = params.get("name").and_then(Value::as_str).map(String::from) else {
            return JsonRpcResponse::invalid_params(request.id, "Missing prompt name");
        };
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match self.server.get_prompt(&name, arguments).await {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(e) => dispatch_error_response(request.id, e),
        }
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        // Closing the underlying connection tears the transport down.
        trace!("Bridge transport closed");
    }
}

/// Map dispatch failures to protocol-native error responses: unknown
/// elements are invalid params, handler failures are internal errors.
fn dispatch_error_response(id: Option<Value>, error: DispatchError) -> JsonRpcResponse {
    match error {
        DispatchError::ToolNotFound(_)
        | DispatchError::ResourceNotFound(_)
        | DispatchError::PromptNotFound(_) => JsonRpcResponse::invalid_params(id, error.to_string()),
        DispatchError::Invocation(e) => JsonRpcResponse::internal_error(id, e.to_string()),
    }
}
