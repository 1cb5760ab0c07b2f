//! HTTP MCP transport: one POST per JSON-RPC request, session-level headers
//! preserved across calls. New transport, sharing the wire codec in
//! `protocol.rs` with the stdio and SSE transports.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use super::protocol::{IdCounter, JsonRpcRequest, JsonRpcResponse, McpError};

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    ids: IdCounter,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, headers: &HashMap<String, String>, timeout_secs: u64) -> Result<Self, McpError> {
        let mut header_map = HeaderMap::new();
        for (k, v) in headers {
            let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| McpError::Io(e.to_string()))?;
            let value = HeaderValue::from_str(v).map_err(|e| McpError::Io(e.to_string()))?;
            header_map.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| McpError::Io(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            headers: header_map,
            ids: IdCounter::default(),
        })
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        let id = self.ids.next();
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&req)
            .send()
            .await
            .map_err(|e| McpError::Io(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(McpError::Io(format!("http status {}", resp.status())));
        }
        let body: JsonRpcResponse = resp.json().await.map_err(|e| McpError::Io(e.to_string()))?;
        Ok(body)
    }
}
