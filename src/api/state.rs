//! Management API shared state (C5).

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::bus::EventBus;
use crate::config::ControllerConfig;
use crate::provision::Provisioner;
use crate::storage::ChecksumIndex;
use crate::supervisor::Supervisor;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a handler needs. Cloneable — every field is an `Arc` (or
/// already internally `Arc`-backed, like `Supervisor`/`EventBus`).
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<ControllerConfig>,
    pub index: Arc<ChecksumIndex>,
    pub provisioner: Arc<Provisioner>,
    pub supervisor: Arc<Supervisor>,
    pub bus: EventBus,
    /// Serializes provisioning/upload mutations per agent name, independent
    /// of the supervisor's own per-name lock table for start/stop/restart.
    upload_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ApiState {
    pub fn new(
        config: Arc<ControllerConfig>,
        index: Arc<ChecksumIndex>,
        provisioner: Arc<Provisioner>,
        supervisor: Arc<Supervisor>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            index,
            provisioner,
            supervisor,
            bus,
            upload_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn upload_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.upload_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
