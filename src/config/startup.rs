//! Controller startup configuration (§6 configuration surface).
//!
//! Loaded from TOML with environment-variable overrides applied afterwards,
//! following the same shape as the teacher's config loader: tolerate a
//! missing file by falling back to defaults, and never fail on unknown keys.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8700
}
fn default_base_port() -> u16 {
    9000
}
fn default_max_agents() -> u16 {
    64
}
fn default_agents_directory() -> PathBuf {
    dirs_agents_directory()
}
fn default_restart_on_failure() -> bool {
    true
}
fn default_health_check_interval() -> u64 {
    10
}
fn default_session_timeout() -> u64 {
    1800
}

fn dirs_agents_directory() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".agentctl").join("agents")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_max_agents")]
    pub max_agents: u16,
    #[serde(default = "default_agents_directory")]
    pub agents_directory: PathBuf,
    /// Empty string means auth disabled.
    #[serde(default)]
    pub auth_credential: String,
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default = "default_restart_on_failure")]
    pub restart_on_failure: bool,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_port: default_api_port(),
            base_port: default_base_port(),
            max_agents: default_max_agents(),
            agents_directory: default_agents_directory(),
            auth_credential: String::new(),
            metrics_enabled: true,
            restart_on_failure: default_restart_on_failure(),
            health_check_interval: default_health_check_interval(),
            session_timeout: default_session_timeout(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config at {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn default_config_path() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".agentctl").join("config.toml")
}

/// Load from `path`; a missing file yields built-in defaults (not an error).
pub fn load_config(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ControllerConfig::default(),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(apply_env_overrides(config))
}

/// Checks `AGENTCTL_CONFIG` for an override path, else uses the default.
pub fn load_default_config() -> Result<ControllerConfig, ConfigError> {
    let path = env::var("AGENTCTL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    load_config(&path)
}

fn apply_env_overrides(mut config: ControllerConfig) -> ControllerConfig {
    if let Ok(v) = env::var("AGENTCTL_HOST") {
        config.host = v;
    }
    if let Ok(v) = env::var("AGENTCTL_API_PORT") {
        if let Ok(port) = v.parse() {
            config.api_port = port;
        }
    }
    if let Ok(v) = env::var("AGENTCTL_BASE_PORT") {
        if let Ok(port) = v.parse() {
            config.base_port = port;
        }
    }
    if let Ok(v) = env::var("AGENTCTL_MAX_AGENTS") {
        if let Ok(n) = v.parse() {
            config.max_agents = n;
        }
    }
    if let Ok(v) = env::var("AGENTCTL_AGENTS_DIRECTORY") {
        config.agents_directory = PathBuf::from(v);
    }
    if let Ok(v) = env::var("AGENTCTL_AUTH_CREDENTIAL") {
        config.auth_credential = v;
    }
    if let Ok(v) = env::var("AGENTCTL_METRICS_ENABLED") {
        config.metrics_enabled = parse_bool(&v).unwrap_or(config.metrics_enabled);
    }
    if let Ok(v) = env::var("AGENTCTL_RESTART_ON_FAILURE") {
        config.restart_on_failure = parse_bool(&v).unwrap_or(config.restart_on_failure);
    }
    if let Ok(v) = env::var("AGENTCTL_HEALTH_CHECK_INTERVAL") {
        if let Ok(n) = v.parse() {
            config.health_check_interval = n;
        }
    }
    if let Ok(v) = env::var("AGENTCTL_SESSION_TIMEOUT") {
        if let Ok(n) = v.parse() {
            config.session_timeout = n;
        }
    }
    config
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "true" | "TRUE" | "True" => Some(true),
        "0" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Atomic write: serialize to `<path>.tmp`, back up any existing file to
/// `<path>.bak`, then rename into place.
pub fn save_config(path: &Path, config: &ControllerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let serialized = toml::to_string_pretty(config)?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, serialized).map_err(|source| ConfigError::Write {
        path: tmp_path.clone(),
        source,
    })?;
    if path.exists() {
        let bak_path = path.with_extension("toml.bak");
        let _ = fs::copy(path, bak_path);
    }
    fs::rename(&tmp_path, path).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
#[allow(unsafe_code)] // env::set_var / remove_var are unsafe in Rust 2024; tests are single-threaded.
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.api_port, default_api_port());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "host = \"0.0.0.0\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.base_port, default_base_port());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = ControllerConfig::default();
        config.api_port = 9999;
        save_config(&path, &config).unwrap();
        let reloaded = load_config(&path).unwrap();
        assert_eq!(reloaded.api_port, 9999);
    }

    #[test]
    fn save_creates_backup_of_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        save_config(&path, &ControllerConfig::default()).unwrap();
        let mut config2 = ControllerConfig::default();
        config2.api_port = 1234;
        save_config(&path, &config2).unwrap();
        assert!(path.with_extension("toml.bak").exists());
    }

    #[test]
    fn env_override_host() {
        unsafe {
            env::set_var("AGENTCTL_HOST", "10.0.0.1");
        }
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.host, "10.0.0.1");
        unsafe {
            env::remove_var("AGENTCTL_HOST");
        }
    }

    #[test]
    fn env_override_metrics_enabled_false() {
        unsafe {
            env::set_var("AGENTCTL_METRICS_ENABLED", "0");
        }
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("missing.toml")).unwrap();
        assert!(!config.metrics_enabled);
        unsafe {
            env::remove_var("AGENTCTL_METRICS_ENABLED");
        }
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "not valid [[[ toml").unwrap();
        assert!(load_config(&path).is_err());
    }
}
