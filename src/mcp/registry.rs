//! Cross-server MCP tool registry and binding lifecycle (C7).
//!
//! Owns one binding per declared `mcp_servers.*` manifest entry, performs the
//! `initialize` → `tools/list` handshake (never reading tools out of the
//! `initialize` reply — see SPEC_FULL.md §9), and resolves a bare tool name
//! to its owning server, breaking ties by the server's declared priority
//! (array order in the manifest, stable across restarts).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::manifest::{BundleManifest, McpServerSection, McpTransport};

use super::http::HttpTransport;
use super::protocol::{McpError, ToolDescriptor};
use super::sse::SseTransport;
use super::stdio::StdioTransport;

enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    Sse(SseTransport),
}

impl Transport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let response = match self {
            Transport::Stdio(t) => t.request(method, params).await?,
            Transport::Http(t) => t.request(method, params).await?,
            Transport::Sse(t) => t.request(method, params).await?,
        };
        response.into_result()
    }
}

pub struct McpBinding {
    name: String,
    transport: Transport,
    healthy: AtomicBool,
    tools: RwLock<Vec<ToolDescriptor>>,
}

impl McpBinding {
    async fn connect(name: String, section: &McpServerSection) -> Result<Self, McpError> {
        let transport = match McpTransport::from(section.transport) {
            McpTransport::Stdio => {
                let command = section
                    .command
                    .as_deref()
                    .ok_or_else(|| McpError::Io(format!("binding {name}: stdio transport requires `command`")))?;
                Transport::Stdio(StdioTransport::spawn(command, &section.args, &section.env)?)
            }
            McpTransport::Http => {
                let url = section
                    .url
                    .as_deref()
                    .ok_or_else(|| McpError::Io(format!("binding {name}: http transport requires `url`")))?;
                Transport::Http(HttpTransport::new(url, &section.headers, section.timeout)?)
            }
            McpTransport::Sse => {
                let url = section
                    .url
                    .as_deref()
                    .ok_or_else(|| McpError::Io(format!("binding {name}: sse transport requires `url`")))?;
                let post_url = format!("{url}/messages");
                Transport::Sse(SseTransport::connect(url, post_url).await?)
            }
        };

        let binding = Self {
            name: name.clone(),
            transport,
            healthy: AtomicBool::new(true),
            tools: RwLock::new(Vec::new()),
        };
        binding.handshake().await?;
        Ok(binding)
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let init_params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "agentctl", "version": env!("CARGO_PKG_VERSION") }
        });
        self.transport.request("initialize", Some(init_params)).await?;

        let tools_result = self.transport.request("tools/list", None).await?;
        let tools: Vec<ToolDescriptor> = tools_result
            .get("tools")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        *self.tools.write().await = tools;
        Ok(())
    }

    pub async fn call(&self, tool: &str, args: Value) -> Result<Value, McpError> {
        let params = serde_json::json!({ "name": tool, "arguments": args });
        match self.transport.request("tools/call", Some(params)).await {
            Ok(v) => Ok(v),
            Err(e) => {
                self.healthy.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.clone()
    }
}

pub struct McpMultiplexer {
    bindings: RwLock<HashMap<String, Arc<McpBinding>>>,
    priority: RwLock<Vec<String>>,
}

impl McpMultiplexer {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            priority: RwLock::new(Vec::new()),
        }
    }

    /// Connect every `mcp_servers.*` binding declared in the manifest, in
    /// manifest-array iteration order (that order becomes tie-break
    /// priority for [`McpMultiplexer::find`]).
    pub async fn connect_from_manifest(&self, manifest: &BundleManifest) -> Vec<(String, McpError)> {
        let mut failures = Vec::new();
        let mut order = Vec::new();
        for (name, section) in &manifest.mcp_servers {
            order.push(name.clone());
            match McpBinding::connect(name.clone(), section).await {
                Ok(binding) => {
                    self.bindings.write().await.insert(name.clone(), Arc::new(binding));
                }
                Err(e) => failures.push((name.clone(), e)),
            }
        }
        *self.priority.write().await = order;
        failures
    }

    /// Resolve a bare tool name to its owning `(server, descriptor)`,
    /// breaking ties across servers that expose the same tool name by
    /// configured priority order.
    pub async fn find(&self, tool_name: &str) -> Option<(String, ToolDescriptor)> {
        let priority = self.priority.read().await;
        let bindings = self.bindings.read().await;
        for server in priority.iter() {
            if let Some(binding) = bindings.get(server) {
                if let Some(descriptor) = binding.tools().await.into_iter().find(|t| t.name == tool_name) {
                    return Some((server.clone(), descriptor));
                }
            }
        }
        None
    }

    pub async fn call(&self, server: &str, tool: &str, args: Value) -> Result<Value, McpError> {
        let bindings = self.bindings.read().await;
        let binding = bindings
            .get(server)
            .ok_or_else(|| McpError::NoSuchBinding(server.to_string()))?
            .clone();
        drop(bindings);
        if !binding.is_healthy() {
            return Err(McpError::Unhealthy(server.to_string()));
        }
        binding.call(tool, args).await
    }

    pub async fn all_tools(&self) -> HashMap<String, Vec<ToolDescriptor>> {
        let bindings = self.bindings.read().await;
        let mut out = HashMap::new();
        for (name, binding) in bindings.iter() {
            out.insert(name.clone(), binding.tools().await);
        }
        out
    }
}

impl Default for McpMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}
