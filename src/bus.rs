//! Controller-wide event bus (C11).
//!
//! A thin `tokio::sync::broadcast` wrapper so every component can publish
//! structured lifecycle events without holding a direct reference to every
//! subscriber. Consumers apply [`EventFilter::matches`] themselves; the
//! underlying channel has no server-side filtering.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerEvent {
    AgentDeployed { name: String, hash: String },
    AgentExists { name: String, hash: String },
    AgentRemoved { name: String },
    InstanceStarted { name: String, port: u16 },
    InstanceStopped { name: String },
    InstanceFailed { name: String, reason: String },
    InstanceRestarted { name: String, attempt: u32 },
    AuthFailure { endpoint: String },
    SystemShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    AgentDeployed,
    AgentExists,
    AgentRemoved,
    InstanceStarted,
    InstanceStopped,
    InstanceFailed,
    InstanceRestarted,
    AuthFailure,
    SystemShuttingDown,
}

impl ControllerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ControllerEvent::AgentDeployed { .. } => EventKind::AgentDeployed,
            ControllerEvent::AgentExists { .. } => EventKind::AgentExists,
            ControllerEvent::AgentRemoved { .. } => EventKind::AgentRemoved,
            ControllerEvent::InstanceStarted { .. } => EventKind::InstanceStarted,
            ControllerEvent::InstanceStopped { .. } => EventKind::InstanceStopped,
            ControllerEvent::InstanceFailed { .. } => EventKind::InstanceFailed,
            ControllerEvent::InstanceRestarted { .. } => EventKind::InstanceRestarted,
            ControllerEvent::AuthFailure { .. } => EventKind::AuthFailure,
            ControllerEvent::SystemShuttingDown => EventKind::SystemShuttingDown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    kinds: Vec<EventKind>,
}

impl EventFilter {
    pub fn new(kinds: Vec<EventKind>) -> Self {
        Self { kinds }
    }

    pub fn matches(&self, event: &ControllerEvent) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&event.kind())
    }
}

/// Broadcast bus shared across the controller. Cheap to clone (wraps an `Arc`
/// internally via `broadcast::Sender`).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ControllerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: ControllerEvent) {
        // Number of active receivers may be zero; that's fine, nobody's listening.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
