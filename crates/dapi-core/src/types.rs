//! Wire envelopes spoken by the DAPI JSON-RPC endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Call envelope POSTed to a node.
///
/// ```
/// use dapi_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("getBestBlockHash", json!({}), 1);
/// assert_eq!(request.method, "getBestBlockHash");
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self { jsonrpc: "2.0", method: method.into(), params, id }
    }
}

/// Reply envelope. Nodes set either `result` or `error`; the `jsonrpc` and `id` fields are
/// tolerated but never checked.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Error object of a failed call.
///
/// Codes in `-32700..=-32600` are protocol errors. `-32603` is an internal failure, and
/// DAPI attaches the node's trace as `data.stack` when it has one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Remote stack trace carried in `data.stack`.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        self.data.as_ref()?.get("stack")?.as_str()
    }
}
