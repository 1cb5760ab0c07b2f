//! Process Supervisor (C4).
//!
//! Generalizes the teacher's `modules::sidecar_service::SidecarService`
//! (spawn via `tokio::process::Command`, poll `/health` against a deadline,
//! take-then-drop-the-lock-before-await on stop) from a single service to a
//! `name -> SupervisedInstance` map, serialized per name via a lock table
//! (`DashMap<String, Arc<Mutex<()>>>`) rather than one global mutex.

pub mod diagnostics;
pub mod instance;

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::bus::{ControllerEvent, EventBus};
use crate::ports::PortAllocator;
use crate::storage::AgentRecord;

use instance::{Diagnostic, InstanceState, RuntimeInstance, SupervisorError};

const READINESS_TIMEOUT: Duration = Duration::from_secs(10);
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);
const STDIO_TAIL_BYTES: usize = 4096;

struct ManagedChild {
    child: Child,
    #[allow(dead_code)]
    stdout_tail: Arc<Mutex<String>>,
    #[allow(dead_code)]
    stderr_tail: Arc<Mutex<String>>,
}

struct SupervisedInstance {
    view: RuntimeInstance,
    child: Option<ManagedChild>,
}

async fn tail_stream<R: AsyncRead + Unpin + Send + 'static>(reader: R, buffer: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut guard = buffer.lock().await;
        guard.push_str(&line);
        guard.push('\n');
        if guard.len() > STDIO_TAIL_BYTES {
            let excess = guard.len() - STDIO_TAIL_BYTES;
            guard.drain(0..excess);
        }
    }
}

pub struct Supervisor {
    instances: DashMap<String, SupervisedInstance>,
    name_locks: DashMap<String, Arc<Mutex<()>>>,
    ports: Arc<PortAllocator>,
    http_client: reqwest::Client,
    bus: EventBus,
    agent_binary: std::path::PathBuf,
}

impl Supervisor {
    pub fn new(ports: Arc<PortAllocator>, bus: EventBus, agent_binary: std::path::PathBuf) -> Self {
        Self {
            instances: DashMap::new(),
            name_locks: DashMap::new(),
            ports,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build supervisor http client"),
            bus,
            agent_binary,
        }
    }

    fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.name_locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn status(&self, name: &str) -> Option<RuntimeInstance> {
        self.instances.get(name).map(|i| i.view.clone())
    }

    pub fn list(&self) -> Vec<RuntimeInstance> {
        self.instances.iter().map(|e| e.view.clone()).collect()
    }

    /// `start(name) → instance`, per §4.4. Serialized per agent name.
    pub async fn start(
        self: &Arc<Self>,
        record: &AgentRecord,
        restart_on_failure_default: bool,
    ) -> Result<RuntimeInstance, SupervisorError> {
        let lock = self.name_lock(&record.name);
        let _guard = lock.lock().await;

        if let Some(existing) = self.instances.get(&record.name) {
            if existing.view.state == InstanceState::Running {
                return Err(SupervisorError::AlreadyRunning(record.name.clone()));
            }
        }

        self.instances.insert(
            record.name.clone(),
            SupervisedInstance {
                view: {
                    let mut v = RuntimeInstance::discovered(&record.name);
                    v.state = InstanceState::Starting;
                    v
                },
                child: None,
            },
        );

        match self.spawn_and_wait_ready(record, restart_on_failure_default).await {
            Ok(view) => {
                self.bus.publish(ControllerEvent::InstanceStarted {
                    name: record.name.clone(),
                    port: view.port.unwrap_or(0),
                });
                Ok(view)
            }
            Err(e) => {
                if let Some(mut entry) = self.instances.get_mut(&record.name) {
                    entry.view.state = InstanceState::Failed;
                }
                self.bus.publish(ControllerEvent::InstanceFailed {
                    name: record.name.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn spawn_and_wait_ready(
        self: &Arc<Self>,
        record: &AgentRecord,
        restart_on_failure_default: bool,
    ) -> Result<RuntimeInstance, SupervisorError> {
        let requested_port = record.manifest.deployment.port;
        let port = if requested_port != 0 {
            self.ports
                .acquire_specific(requested_port)
                .map_err(|_| SupervisorError::NoAvailablePort)?
        } else {
            self.ports.acquire().map_err(|_| SupervisorError::NoAvailablePort)?
        };

        let (program, args) = self.entry_point(record, port);

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(&record.install_dir)
            .env("AGENTCTL_PORT", port.to_string())
            .env("AGENTCTL_MANIFEST", record.install_dir.join("agent.toml"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.ports.release(port);
                return Err(SupervisorError::StartFailed(e.to_string()));
            }
        };

        let pid = child.id();
        let stdout_tail = Arc::new(Mutex::new(String::new()));
        let stderr_tail = Arc::new(Mutex::new(String::new()));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(tail_stream(stdout, stdout_tail.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(tail_stream(stderr, stderr_tail.clone()));
        }

        let health_url = format!("http://127.0.0.1:{port}/health");
        let deadline = Instant::now() + READINESS_TIMEOUT;
        let mut exit_code = None;

        loop {
            if let Some(status) = child.try_wait().map_err(SupervisorError::Io)? {
                exit_code = status.code();
                break;
            }
            if let Ok(resp) = self.http_client.get(&health_url).send().await {
                if resp.status().is_success() {
                    let view = RuntimeInstance {
                        agent_name: record.name.clone(),
                        state: InstanceState::Running,
                        port: Some(port),
                        pid,
                        restart_count: self
                            .instances
                            .get(&record.name)
                            .map(|i| i.view.restart_count)
                            .unwrap_or(0),
                        started_at: Some(Instant::now()),
                        exit_code: None,
                        last_diagnostic: None,
                    };
                    self.instances.insert(
                        record.name.clone(),
                        SupervisedInstance {
                            view: view.clone(),
                            child: Some(ManagedChild {
                                child,
                                stdout_tail,
                                stderr_tail,
                            }),
                        },
                    );
                    return Ok(view);
                }
            }
            if Instant::now() >= deadline {
                let _ = child.start_kill();
                self.ports.release(port);
                let diagnostic = self
                    .build_diagnostic(None, &stdout_tail, &stderr_tail, record)
                    .await;
                self.record_failure(record, diagnostic, restart_on_failure_default);
                return Err(SupervisorError::ReadinessTimeout(READINESS_TIMEOUT));
            }
            sleep(READINESS_POLL_INTERVAL).await;
        }

        self.ports.release(port);
        let diagnostic = self
            .build_diagnostic(exit_code, &stdout_tail, &stderr_tail, record)
            .await;
        self.record_failure(record, diagnostic, restart_on_failure_default);
        Err(SupervisorError::CrashedDuringReadiness { exit_code })
    }

    /// Records the crash diagnostic and, if the manifest or the controller
    /// default requests it and the restart cap hasn't been reached, schedules
    /// a delayed re-`start` on the shared supervisor (not a throwaway copy).
    fn record_failure(
        self: &Arc<Self>,
        record: &AgentRecord,
        diagnostic: Diagnostic,
        restart_on_failure_default: bool,
    ) {
        let restart_requested = record.manifest.deployment.auto_restart || restart_on_failure_default;
        let max_restarts = record.manifest.deployment.max_restarts;
        let mut should_restart = false;
        let mut restart_count = 0;

        if let Some(mut entry) = self.instances.get_mut(&record.name) {
            entry.view.state = InstanceState::Failed;
            entry.view.exit_code = diagnostic.exit_code;
            entry.view.last_diagnostic = Some(diagnostic);
            entry.child = None;
            restart_count = entry.view.restart_count;
            if restart_requested && restart_count < max_restarts {
                entry.view.restart_count += 1;
                should_restart = true;
            }
        }

        if should_restart {
            let record = record.clone();
            let delay = Duration::from_secs(record.manifest.deployment.restart_delay);
            self.bus.publish(ControllerEvent::InstanceRestarted {
                name: record.name.clone(),
                attempt: restart_count + 1,
            });
            let supervisor = self.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                let _ = supervisor.start(&record, restart_on_failure_default).await;
            });
        }
    }

    async fn build_diagnostic(
        &self,
        exit_code: Option<i32>,
        stdout_tail: &Arc<Mutex<String>>,
        stderr_tail: &Arc<Mutex<String>>,
        record: &AgentRecord,
    ) -> Diagnostic {
        let stdout = stdout_tail.lock().await.clone();
        let stderr = stderr_tail.lock().await.clone();
        // Classify against the raw text (patterns match runtime/dependency
        // phrasing, not secrets) but only ever store the redacted tails —
        // this `Diagnostic` is serialized straight into management API
        // responses.
        let (classification, remediation) = diagnostics::classify(&stderr);
        let declared_runtime = record.manifest.dependencies.runtime_version_constraint.clone();
        Diagnostic {
            exit_code,
            stdout_tail: crate::sanitize::redact(&stdout),
            stderr_tail: crate::sanitize::redact(&stderr),
            classification,
            remediation: remediation.to_string(),
            declared_runtime,
        }
    }

    fn entry_point(&self, record: &AgentRecord, port: u16) -> (std::path::PathBuf, Vec<String>) {
        match &record.manifest.agent.entry_point {
            Some(entry) => (record.install_dir.join(entry), vec![port.to_string()]),
            None => (
                self.agent_binary.clone(),
                vec![
                    "--manifest".to_string(),
                    record
                        .install_dir
                        .join("agent.toml")
                        .to_string_lossy()
                        .into_owned(),
                    "--port".to_string(),
                    port.to_string(),
                ],
            ),
        }
    }

    /// `stop(name)`, per §4.4: graceful signal, force-kill after the grace
    /// period. Idempotent — stopping an already-stopped instance is a no-op.
    pub async fn stop(self: &Arc<Self>, name: &str) -> Result<RuntimeInstance, SupervisorError> {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        let mut entry = match self.instances.get_mut(name) {
            Some(e) => e,
            None => return Err(SupervisorError::NotFound(name.to_string())),
        };

        if entry.view.state != InstanceState::Running {
            return Ok(entry.view.clone());
        }
        entry.view.state = InstanceState::Stopping;

        // A MutexGuard must not be held across an await point: take the
        // child out before awaiting its termination.
        let managed = entry.child.take();
        let port = entry.view.port;
        drop(entry);

        if let Some(mut managed) = managed {
            #[cfg(unix)]
            {
                if let Some(pid) = managed.child.id() {
                    // SAFETY: pid comes from `Child::id()` for a process we
                    // are still holding a handle to, so it is either still
                    // our child or a reused pid that simply won't be there
                    // to receive the signal; `kill` with a plain pid/sig
                    // pair never dereferences memory.
                    #[allow(unsafe_code)]
                    unsafe {
                        libc::kill(pid as i32, libc::SIGTERM);
                    }
                }
            }
            let graceful = tokio::time::timeout(STOP_GRACE_PERIOD, managed.child.wait()).await;
            if graceful.is_err() {
                let _ = managed.child.start_kill();
                if let Err(e) = managed.child.wait().await {
                    return Err(SupervisorError::StopFailed(e.to_string()));
                }
            }
        }

        if let Some(port) = port {
            self.ports.release(port);
        }

        if let Some(mut entry) = self.instances.get_mut(name) {
            entry.view.state = InstanceState::Stopped;
            entry.view.port = None;
            entry.view.pid = None;
        }
        self.bus.publish(ControllerEvent::InstanceStopped {
            name: name.to_string(),
        });
        Ok(self.status(name).expect("instance present after stop"))
    }

    /// `restart(name)` = `stop` then `start`.
    pub async fn restart(
        self: &Arc<Self>,
        record: &AgentRecord,
        restart_on_failure_default: bool,
    ) -> Result<RuntimeInstance, SupervisorError> {
        let _ = self.stop(&record.name).await;
        self.start(record, restart_on_failure_default).await
    }

    /// Fan-out stop across every running instance (C12).
    pub async fn stop_all(self: &Arc<Self>) {
        let names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        let futures = names.into_iter().map(|name| {
            let supervisor = self.clone();
            async move {
                let _ = supervisor.stop(&name).await;
            }
        });
        futures::future::join_all(futures).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BundleManifest;
    use std::path::PathBuf;

    fn sample_record(name: &str) -> AgentRecord {
        AgentRecord {
            name: name.to_string(),
            hash: "deadbeef".to_string(),
            install_dir: PathBuf::from("/tmp/nonexistent-agentctl-test"),
            manifest: BundleManifest::default(),
            capabilities: vec![],
            version: "0.1.0".to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn stop_unknown_agent_is_not_found() {
        let ports = Arc::new(PortAllocator::new(21000, 5));
        let bus = EventBus::new();
        let sup = Arc::new(Supervisor::new(ports, bus, PathBuf::from("/bin/true")));
        let err = sup.stop("ghost").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotFound(_)));
    }

    #[tokio::test]
    async fn start_with_bad_entry_point_fails_and_releases_port() {
        let ports = Arc::new(PortAllocator::new(21100, 2));
        let bus = EventBus::new();
        let sup = Arc::new(Supervisor::new(ports.clone(), bus, PathBuf::from("/bin/true")));
        let mut record = sample_record("broken");
        record.manifest.agent.entry_point = Some("does-not-exist.sh".to_string());

        let result = sup.start(&record, false).await;
        assert!(result.is_err());
        assert_eq!(ports.held_count(), 0);
    }

    #[tokio::test]
    async fn stopping_a_stopped_instance_is_idempotent() {
        let ports = Arc::new(PortAllocator::new(21200, 2));
        let bus = EventBus::new();
        let sup = Arc::new(Supervisor::new(ports, bus, PathBuf::from("/bin/true")));
        let record = sample_record("never-started");
        sup.instances.insert(
            record.name.clone(),
            SupervisedInstance {
                view: {
                    let mut v = RuntimeInstance::discovered(&record.name);
                    v.state = InstanceState::Stopped;
                    v
                },
                child: None,
            },
        );
        let view = sup.stop(&record.name).await.unwrap();
        assert_eq!(view.state, InstanceState::Stopped);
    }

    #[tokio::test]
    async fn starting_an_already_running_instance_is_rejected() {
        let ports = Arc::new(PortAllocator::new(21300, 2));
        let bus = EventBus::new();
        let sup = Arc::new(Supervisor::new(ports, bus, PathBuf::from("/bin/true")));
        let record = sample_record("already-up");
        sup.instances.insert(
            record.name.clone(),
            SupervisedInstance {
                view: {
                    let mut v = RuntimeInstance::discovered(&record.name);
                    v.state = InstanceState::Running;
                    v
                },
                child: None,
            },
        );
        let err = sup.start(&record, false).await.unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning(name) if name == "already-up"));
    }
}
