//! agentctl: multi-tenant AI-agent deployment controller.
//!
//! `Controller` is the single ambient-state owner (C0): constructed once in
//! `main`, it holds `Arc` handles to every subsystem and is passed explicitly
//! to axum handlers via `State`, never through globals or statics — a
//! deliberate rejection of ambient singletons carried from the teacher's own
//! `GatewayState` extractor pattern.

pub mod agent_runtime;
pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod llm;
pub mod logging;
pub mod mcp;
pub mod metrics;
pub mod ports;
pub mod provision;
pub mod sanitize;
pub mod shutdown;
pub mod storage;
pub mod supervisor;
pub mod tree;

use std::sync::Arc;

use dashmap::DashMap;

use bus::EventBus;
use config::ControllerConfig;
use ports::PortAllocator;
use provision::Provisioner;
use storage::ChecksumIndex;
use supervisor::Supervisor;
use tree::AgentTree;

/// Owns every long-lived subsystem. Cloning is cheap: every field is already
/// `Arc`-backed or internally `Arc`-backed (`Supervisor`, `EventBus`).
#[derive(Clone)]
pub struct Controller {
    pub config: Arc<ControllerConfig>,
    pub bus: EventBus,
    pub ports: Arc<PortAllocator>,
    pub index: Arc<ChecksumIndex>,
    pub provisioner: Arc<Provisioner>,
    pub supervisor: Arc<Supervisor>,
    pub mcp: Arc<mcp::McpMultiplexer>,
    /// One tree per deployed agent that declares `sub_agents`, keyed by the
    /// owning agent's name.
    pub agent_trees: Arc<DashMap<String, AgentTree>>,
}

impl Controller {
    /// Wire every subsystem from a loaded configuration. Does not start any
    /// background task (health sweep, signal handler) — callers decide when
    /// to spawn those, per the binary entry point's own startup sequence.
    pub fn new(config: ControllerConfig, agent_binary: std::path::PathBuf) -> Result<Self, storage::StorageError> {
        let config = Arc::new(config);
        let bus = EventBus::new();
        let ports = Arc::new(PortAllocator::new(config.base_port, config.max_agents));
        let index_path = config.agents_directory.join("index.json");
        let index = Arc::new(ChecksumIndex::load(&index_path)?);
        let provisioner = Arc::new(Provisioner::new(config.agents_directory.clone()));
        let supervisor = Arc::new(Supervisor::new(ports.clone(), bus.clone(), agent_binary));

        Ok(Self {
            config,
            bus,
            ports,
            index,
            provisioner,
            supervisor,
            mcp: Arc::new(mcp::McpMultiplexer::new()),
            agent_trees: Arc::new(DashMap::new()),
        })
    }

    pub fn api_state(&self) -> api::ApiState {
        api::ApiState::new(
            self.config.clone(),
            self.index.clone(),
            self.provisioner.clone(),
            self.supervisor.clone(),
            self.bus.clone(),
        )
    }

    pub fn auth_state(&self) -> auth::AuthState {
        let credential = if self.config.auth_credential.is_empty() {
            None
        } else {
            Some(self.config.auth_credential.clone())
        };
        auth::AuthState {
            credential,
            bus: self.bus.clone(),
        }
    }
}
