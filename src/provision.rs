//! Environment Provisioner (C3).
//!
//! Ingests a zipped bundle, deduplicates against the checksum index (C2),
//! extracts it, parses its manifest (C10), and builds a per-agent dependency
//! sandbox. Archive extraction uses the `zip` crate — not present in the
//! teacher's stack, added as a real crates.io dependency since nothing in
//! the pack offers zip support (see DESIGN.md).

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;

use crate::config::manifest::{self, ManifestError};
use crate::storage::{AgentRecord, ChecksumIndex, StorageError, hash_bytes};

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("missing_manifest")]
    MissingManifest,
    #[error("invalid_manifest: {0}")]
    InvalidManifest(String),
    #[error("archive extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("sandbox creation failed: {0}")]
    SandboxFailed(String),
    #[error("dependency_install_failed: {stdout}\n{stderr}")]
    DependencyInstallFailed { stdout: String, stderr: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ManifestError> for ProvisionError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::MissingManifest => ProvisionError::MissingManifest,
            ManifestError::InvalidManifest(msg) => ProvisionError::InvalidManifest(msg),
            ManifestError::Io(err) => ProvisionError::Io(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStatus {
    Deployed,
    Cached,
}

pub struct ProvisionOutcome {
    pub record: AgentRecord,
    pub status: ProvisionStatus,
}

pub struct Provisioner {
    agents_directory: PathBuf,
}

impl Provisioner {
    pub fn new(agents_directory: PathBuf) -> Self {
        Self { agents_directory }
    }

    /// `provision(zip_bytes, force) → record`, per §4.3.
    pub async fn provision(
        &self,
        index: &ChecksumIndex,
        zip_bytes: &[u8],
        requested_name: Option<&str>,
        force: bool,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let hash = hash_bytes(zip_bytes);

        if !force {
            if let Some(existing) = index.lookup_by_hash(&hash) {
                return Ok(ProvisionOutcome {
                    record: existing,
                    status: ProvisionStatus::Cached,
                });
            }
        }

        let install_dir = self.agents_directory.join(&hash);
        let extraction_result = self.extract(zip_bytes, &install_dir).await;
        if let Err(e) = extraction_result {
            self.rollback(&install_dir, requested_name, force, &index).await;
            return Err(e);
        }

        let manifest = match manifest::load_from_dir(&install_dir) {
            Ok(m) => m,
            Err(e) => {
                self.rollback(&install_dir, requested_name, force, &index).await;
                return Err(e.into());
            }
        };

        let name = requested_name
            .map(str::to_string)
            .unwrap_or_else(|| manifest.agent.name.clone());

        if let Err(e) = self.ensure_sandbox(&install_dir, &manifest).await {
            self.rollback(&install_dir, requested_name, force, &index).await;
            return Err(e);
        }

        let record = AgentRecord {
            name: name.clone(),
            hash: hash.clone(),
            install_dir: install_dir.clone(),
            capabilities: manifest.agent.capabilities.clone(),
            version: manifest.agent.version.clone(),
            manifest,
            created_at: Utc::now(),
        };

        match index.insert(record.clone(), force) {
            Ok(()) => Ok(ProvisionOutcome {
                record,
                status: ProvisionStatus::Deployed,
            }),
            Err(e) => {
                self.rollback(&install_dir, requested_name, force, &index).await;
                Err(e.into())
            }
        }
    }

    async fn extract(&self, zip_bytes: &[u8], install_dir: &Path) -> Result<(), ProvisionError> {
        let bytes = zip_bytes.to_vec();
        let dest = install_dir.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<(), ProvisionError> {
            let cursor = Cursor::new(bytes);
            let mut archive = zip::ZipArchive::new(cursor)
                .map_err(|e| ProvisionError::ExtractionFailed(e.to_string()))?;
            std::fs::create_dir_all(&dest)?;
            archive
                .extract(&dest)
                .map_err(|e| ProvisionError::ExtractionFailed(e.to_string()))?;
            Ok(())
        })
        .await
        .map_err(|e| ProvisionError::ExtractionFailed(e.to_string()))?
    }

    /// Skips sandbox creation and dependency install if a `dependencies.lock`
    /// smoke-check marker is already present and lists the same packages
    /// (§4.3 idempotence requirement).
    async fn ensure_sandbox(
        &self,
        install_dir: &Path,
        manifest: &manifest::BundleManifest,
    ) -> Result<(), ProvisionError> {
        let sandbox_dir = install_dir.join("env");
        let lock_path = sandbox_dir.join("dependencies.lock");
        let declared = manifest.dependencies.packages.join("\n");

        if lock_path.is_file() {
            let existing = tokio::fs::read_to_string(&lock_path).await.unwrap_or_default();
            if existing == declared {
                return Ok(());
            }
        }

        tokio::fs::create_dir_all(&sandbox_dir)
            .await
            .map_err(|e| ProvisionError::SandboxFailed(e.to_string()))?;

        if let Some(install_command) = &manifest.dependencies.install_command {
            if !manifest.dependencies.packages.is_empty() {
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(install_command)
                    .current_dir(&sandbox_dir)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .output()
                    .await
                    .map_err(|e| ProvisionError::SandboxFailed(e.to_string()))?;

                if !output.status.success() {
                    return Err(ProvisionError::DependencyInstallFailed {
                        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    });
                }
            }
        }

        tokio::fs::write(&lock_path, declared)
            .await
            .map_err(|e| ProvisionError::SandboxFailed(e.to_string()))?;
        Ok(())
    }

    /// Remove the extracted directory unless `force` is set and a prior
    /// record for this name already exists (§4.3 rollback clause).
    async fn rollback(
        &self,
        install_dir: &Path,
        requested_name: Option<&str>,
        force: bool,
        index: &ChecksumIndex,
    ) {
        let has_prior_record = requested_name
            .map(|name| force && index.record_exists(name))
            .unwrap_or(false);
        if !has_prior_record {
            let _ = tokio::fs::remove_dir_all(install_dir).await;
        }
    }
}
