//! Graceful shutdown (C12): signal handling, fan-out stop, and the
//! controller's process exit codes.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::bus::{ControllerEvent, EventBus};
use crate::supervisor::Supervisor;

/// Clean shutdown, no instances left running.
pub const EXIT_OK: i32 = 0;
/// Configuration failed to load or validate.
pub const EXIT_CONFIG_ERROR: i32 = 1;
/// The controller could not reach a running state at all (e.g. the
/// management API failed to bind).
pub const EXIT_FATAL_STARTUP: i32 = 2;

/// The default watchdog timeout: twice the supervisor's own per-instance
/// stop grace period, so a single wedged child can't wedge the controller.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolves on SIGINT or (on Unix) SIGTERM, returning which one fired.
pub async fn wait_for_shutdown_signal() -> &'static str {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Fan out `stop` across every running instance via `Supervisor::stop_all`,
/// bounded by `watchdog_timeout`. The checksum index persists on every
/// write already (see `storage::ChecksumIndex::persist`), so there is
/// nothing left to flush here beyond the running instances themselves.
///
/// Returns `true` if every instance stopped before the watchdog expired.
pub async fn graceful_shutdown(supervisor: Arc<Supervisor>, bus: EventBus, watchdog_timeout: Duration) -> bool {
    bus.publish(ControllerEvent::SystemShuttingDown);
    match tokio::time::timeout(watchdog_timeout, supervisor.stop_all()).await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(
                timeout_secs = watchdog_timeout.as_secs(),
                "shutdown watchdog expired before every instance confirmed stopped"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventKind;
    use crate::ports::PortAllocator;

    fn test_supervisor() -> Arc<Supervisor> {
        let ports = Arc::new(PortAllocator::new(40000, 40100));
        let bus = EventBus::new();
        Arc::new(Supervisor::new(ports, bus, std::path::PathBuf::from("/bin/true")))
    }

    #[tokio::test]
    async fn graceful_shutdown_with_no_instances_completes_immediately() {
        let supervisor = test_supervisor();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let ok = graceful_shutdown(supervisor, bus, Duration::from_secs(5)).await;
        assert!(ok);
        let event = rx.recv().await.expect("shutdown event should have been published");
        assert_eq!(event.kind(), EventKind::SystemShuttingDown);
    }
}
