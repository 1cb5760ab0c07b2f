//! JSON-RPC 2.0 wire types shared by every MCP transport (C7).
//!
//! Adapted from `modules::mcp_client`'s `JsonRpcRequest`/`JsonRpcResponse`,
//! kept transport-agnostic so stdio, HTTP, and SSE all serialize/deserialize
//! through the same structs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Value::Number(id.into()),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Monotonically increasing request id, one per binding, per §6's
/// "Request id monotonically increases per binding" requirement.
#[derive(Debug, Default)]
pub struct IdCounter(AtomicU64);

impl IdCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("transport io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("binding {0} is unhealthy")]
    Unhealthy(String),
    #[error("binding {0} not found")]
    NoSuchBinding(String),
    #[error("tool {0} not found in any binding")]
    NoSuchTool(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed by server")]
    ConnectionClosed,
}
