//! Runtime instance data model (C4), mirroring the shape of the teacher's
//! `lifecycle::states::ResourceInstance` / `ResourceError` but specialized
//! to the simple linear state machine §3 requires (no escalation tiers, no
//! user-intervention requests — those have no counterpart in this spec).

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Discovered,
    Provisioning,
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl InstanceState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::Stopping
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    LanguageRuntimeIncompatibility,
    MissingDependency,
    PortInUse,
    PermissionDenied,
    UpstreamConnectFailure,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub exit_code: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub classification: FailureClass,
    pub remediation: String,
    pub declared_runtime: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeInstance {
    pub agent_name: String,
    pub state: InstanceState,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub restart_count: u32,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    pub exit_code: Option<i32>,
    pub last_diagnostic: Option<Diagnostic>,
}

impl RuntimeInstance {
    pub fn discovered(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            state: InstanceState::Discovered,
            port: None,
            pid: None,
            restart_count: 0,
            started_at: None,
            exit_code: None,
            last_diagnostic: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("no_available_port")]
    NoAvailablePort,
    #[error("agent {0} not found")]
    NotFound(String),
    #[error("agent {0} is already running")]
    AlreadyRunning(String),
    #[error("child failed to start: {0}")]
    StartFailed(String),
    #[error("child crashed during readiness window: exit_code={exit_code:?}")]
    CrashedDuringReadiness { exit_code: Option<i32> },
    #[error("readiness timed out after {0:?}")]
    ReadinessTimeout(std::time::Duration),
    #[error("stop failed: {0}")]
    StopFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
