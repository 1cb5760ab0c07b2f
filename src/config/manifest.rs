//! Bundle manifest parsing (C10).
//!
//! Every bundle carries `agent.toml` or `agent.json` at its root, declaring
//! the sections below. Unknown keys are tolerated (`#[serde(default)]`
//! everywhere, `deny_unknown_fields` is never set) since §9 requires unknown
//! keys to warn, never fail.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentSection {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            port: None,
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DependenciesSection {
    #[serde(default)]
    pub runtime_version_constraint: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    /// Shelled out to, inside the sandbox directory, to install `packages`.
    #[serde(default)]
    pub install_command: Option<String>,
}

fn default_max_concurrent() -> u32 {
    8
}
fn default_health_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesSection {
    #[serde(default)]
    pub cpu_limit: Option<f32>,
    #[serde(default)]
    pub memory_limit: Option<u64>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: u32,
    #[serde(default = "default_health_interval")]
    pub health_check_interval: u64,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            cpu_limit: None,
            memory_limit: None,
            max_concurrent_requests: default_max_concurrent(),
            health_check_interval: default_health_interval(),
        }
    }
}

fn default_max_restarts() -> u32 {
    3
}
fn default_restart_delay() -> u64 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSection {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_restart_delay")]
    pub restart_delay: u64,
}

impl Default for DeploymentSection {
    fn default() -> Self {
        Self {
            port: 0,
            auto_restart: false,
            max_restarts: default_max_restarts(),
            restart_delay: default_restart_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    Stdio,
    Http,
    Sse,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpServerSection {
    #[serde(default)]
    pub transport: McpTransportOrDefault,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_request_timeout")]
    pub timeout: u64,
}

/// `McpTransport` with a `Default` impl, so an entirely-omitted `transport`
/// key still parses (falls back to stdio, the most common case).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportOrDefault {
    Stdio,
    Http,
    Sse,
}

impl Default for McpTransportOrDefault {
    fn default() -> Self {
        McpTransportOrDefault::Stdio
    }
}

impl From<McpTransportOrDefault> for McpTransport {
    fn from(value: McpTransportOrDefault) -> Self {
        match value {
            McpTransportOrDefault::Stdio => McpTransport::Stdio,
            McpTransportOrDefault::Http => McpTransport::Http,
            McpTransportOrDefault::Sse => McpTransport::Sse,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentSection {
    pub name: String,
    pub url: String,
    /// `${VAR}`-interpolated at load time.
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BundleManifest {
    pub agent: AgentSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub dependencies: DependenciesSection,
    #[serde(default)]
    pub resources: ResourcesSection,
    #[serde(default)]
    pub deployment: DeploymentSection,
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerSection>,
    #[serde(default)]
    pub sub_agents: HashMap<String, SubAgentSection>,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("missing_manifest")]
    MissingManifest,
    #[error("invalid_manifest: {0}")]
    InvalidManifest(String),
    #[error("io error reading manifest: {0}")]
    Io(#[from] std::io::Error),
}

/// Interpolate `${VAR}` references in every string leaf of the manifest.
/// Unresolvable variables are left untouched (not fatal — §4.10 only makes
/// `agent.name` itself fatal).
fn interpolate(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + end];
        match std::env::var(var_name) {
            Ok(v) => out.push_str(&v),
            Err(_) => out.push_str(&rest[start..start + end + 1]),
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

fn apply_interpolation(manifest: &mut BundleManifest) {
    if let Some(base_url) = manifest.llm.base_url.take() {
        manifest.llm.base_url = Some(interpolate(&base_url));
    }
    for server in manifest.mcp_servers.values_mut() {
        if let Some(url) = server.url.take() {
            server.url = Some(interpolate(&url));
        }
        for v in server.env.values_mut() {
            *v = interpolate(v);
        }
        for v in server.headers.values_mut() {
            *v = interpolate(v);
        }
    }
    for sub in manifest.sub_agents.values_mut() {
        sub.url = interpolate(&sub.url);
        if let Some(token) = sub.auth_token.take() {
            sub.auth_token = Some(interpolate(&token));
        }
    }
}

/// Parse from TOML source (`agent.toml`).
pub fn parse_toml(source: &str) -> Result<BundleManifest, ManifestError> {
    let mut manifest: BundleManifest =
        toml::from_str(source).map_err(|e| ManifestError::InvalidManifest(e.to_string()))?;
    if manifest.agent.name.trim().is_empty() {
        return Err(ManifestError::InvalidManifest(
            "agent.name is required".to_string(),
        ));
    }
    apply_interpolation(&mut manifest);
    Ok(manifest)
}

/// Parse from JSON source (`agent.json`) — the equivalent object-shaped form
/// §4.10 requires the loader to tolerate alongside TOML.
pub fn parse_json(source: &str) -> Result<BundleManifest, ManifestError> {
    let mut manifest: BundleManifest =
        serde_json::from_str(source).map_err(|e| ManifestError::InvalidManifest(e.to_string()))?;
    if manifest.agent.name.trim().is_empty() {
        return Err(ManifestError::InvalidManifest(
            "agent.name is required".to_string(),
        ));
    }
    apply_interpolation(&mut manifest);
    Ok(manifest)
}

/// Locate and parse the manifest inside an extracted bundle directory:
/// prefer `agent.toml`, else `agent.json`.
pub fn load_from_dir(dir: &Path) -> Result<BundleManifest, ManifestError> {
    let toml_path = dir.join("agent.toml");
    let json_path = dir.join("agent.json");
    if toml_path.is_file() {
        let content = std::fs::read_to_string(&toml_path)?;
        parse_toml(&content)
    } else if json_path.is_file() {
        let content = std::fs::read_to_string(&json_path)?;
        parse_json(&content)
    } else {
        Err(ManifestError::MissingManifest)
    }
}

#[cfg(test)]
#[allow(unsafe_code)] // env::set_var / remove_var are unsafe in Rust 2024; tests are single-threaded.
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL_TOML: &str = r#"
[agent]
name = "echo"
"#;

    const FULL_TOML: &str = r#"
[agent]
name = "echo"
version = "1.0.0"
description = "trivial echo agent"
capabilities = ["chat"]
entry_point = "main.py"

[llm]
base_url = "http://localhost:11434"
model = "llama3"
temperature = 0.2

[dependencies]
packages = ["requests"]
install_command = "pip install -r requirements.txt"

[deployment]
port = 0
auto_restart = true
max_restarts = 5

[mcp_servers.files]
transport = "stdio"
command = "mcp-fs"
args = ["--root", "."]

[sub_agents.helper]
name = "helper"
url = "http://localhost:9100"
"#;

    #[test]
    fn parse_minimal_manifest() {
        let m = parse_toml(MINIMAL_TOML).unwrap();
        assert_eq!(m.agent.name, "echo");
        assert_eq!(m.deployment.max_restarts, 3);
        assert_eq!(m.llm.temperature, 0.7);
    }

    #[test]
    fn parse_full_manifest() {
        let m = parse_toml(FULL_TOML).unwrap();
        assert_eq!(m.agent.entry_point.as_deref(), Some("main.py"));
        assert_eq!(m.deployment.max_restarts, 5);
        assert!(m.deployment.auto_restart);
        let files = m.mcp_servers.get("files").unwrap();
        assert_eq!(McpTransport::from(files.transport), McpTransport::Stdio);
        assert_eq!(files.command.as_deref(), Some("mcp-fs"));
        let helper = m.sub_agents.get("helper").unwrap();
        assert_eq!(helper.url, "http://localhost:9100");
    }

    #[test]
    fn missing_name_is_fatal() {
        let err = parse_toml("[agent]\nversion = \"1.0.0\"\n").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidManifest(_)));
    }

    #[test]
    fn unknown_keys_do_not_fail() {
        let toml = r#"
[agent]
name = "echo"
totally_unknown_key = "whatever"
"#;
        assert!(parse_toml(toml).is_ok());
    }

    #[test]
    fn env_interpolation_resolves_variable() {
        unsafe {
            std::env::set_var("AGENTCTL_TEST_TOKEN", "secret123");
        }
        let toml = r#"
[agent]
name = "echo"

[sub_agents.helper]
name = "helper"
url = "http://localhost:9100"
auth_token = "${AGENTCTL_TEST_TOKEN}"
"#;
        let m = parse_toml(toml).unwrap();
        assert_eq!(
            m.sub_agents.get("helper").unwrap().auth_token.as_deref(),
            Some("secret123")
        );
        unsafe {
            std::env::remove_var("AGENTCTL_TEST_TOKEN");
        }
    }

    #[test]
    fn unresolved_interpolation_left_untouched() {
        let toml = r#"
[agent]
name = "echo"

[sub_agents.helper]
name = "helper"
url = "http://localhost:9100"
auth_token = "${AGENTCTL_DOES_NOT_EXIST}"
"#;
        let m = parse_toml(toml).unwrap();
        assert_eq!(
            m.sub_agents.get("helper").unwrap().auth_token.as_deref(),
            Some("${AGENTCTL_DOES_NOT_EXIST}")
        );
    }

    #[test]
    fn parse_json_manifest() {
        let json = r#"{"agent": {"name": "echo-json"}}"#;
        let m = parse_json(json).unwrap();
        assert_eq!(m.agent.name, "echo-json");
    }

    #[test]
    fn load_from_dir_prefers_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("agent.toml"), MINIMAL_TOML).unwrap();
        std::fs::write(dir.path().join("agent.json"), r#"{"agent":{"name":"wrong"}}"#).unwrap();
        let m = load_from_dir(dir.path()).unwrap();
        assert_eq!(m.agent.name, "echo");
    }

    #[test]
    fn load_from_dir_falls_back_to_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("agent.json"), r#"{"agent":{"name":"json-only"}}"#)
            .unwrap();
        let m = load_from_dir(dir.path()).unwrap();
        assert_eq!(m.agent.name, "json-only");
    }

    #[test]
    fn load_from_dir_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let err = load_from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::MissingManifest));
    }
}
