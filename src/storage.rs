//! Checksum / Storage Index (C2).
//!
//! Maps content hash (MD5 of the raw bundle bytes, used solely as a dedup
//! key — see GLOSSARY) to [`AgentRecord`]. Persisted as a single JSON
//! document, rewritten atomically (temp file + rename) following the same
//! discipline as [`crate::config::startup::save_config`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::config::BundleManifest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub name: String,
    pub hash: String,
    pub install_dir: PathBuf,
    pub manifest: BundleManifest,
    pub capabilities: Vec<String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("duplicate_hash")]
    DuplicateHash,
    #[error("agent {0} not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// MD5 of raw bundle bytes, hex-encoded. Used purely as a dedup key, never
/// for authentication or integrity.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    records: HashMap<String, AgentRecord>,
}

pub struct ChecksumIndex {
    path: PathBuf,
    state: RwLock<Document>,
}

impl ChecksumIndex {
    /// Load the index from `path`, or start empty if the file doesn't exist
    /// yet (first controller run).
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let document = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(document),
        })
    }

    fn persist(&self, document: &Document) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(document)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn lookup_by_hash(&self, hash: &str) -> Option<AgentRecord> {
        self.state
            .read()
            .expect("checksum index poisoned")
            .records
            .values()
            .find(|r| r.hash == hash)
            .cloned()
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<AgentRecord> {
        self.state
            .read()
            .expect("checksum index poisoned")
            .records
            .get(name)
            .cloned()
    }

    pub fn record_exists(&self, name: &str) -> bool {
        self.state
            .read()
            .expect("checksum index poisoned")
            .records
            .contains_key(name)
    }

    /// Insert a new record. Fails with `DuplicateHash` unless `force`
    /// overwrites an existing entry for the same name.
    pub fn insert(&self, record: AgentRecord, force: bool) -> Result<(), StorageError> {
        let mut guard = self.state.write().expect("checksum index poisoned");
        if !force
            && guard
                .records
                .values()
                .any(|r| r.hash == record.hash && r.name != record.name)
        {
            return Err(StorageError::DuplicateHash);
        }
        guard.records.insert(record.name.clone(), record);
        self.persist(&guard)
    }

    pub fn remove(&self, name: &str) -> Result<AgentRecord, StorageError> {
        let mut guard = self.state.write().expect("checksum index poisoned");
        let record = guard
            .records
            .remove(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        self.persist(&guard)?;
        Ok(record)
    }

    pub fn list(&self) -> Vec<AgentRecord> {
        self.state
            .read()
            .expect("checksum index poisoned")
            .records
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_record(name: &str, hash: &str) -> AgentRecord {
        AgentRecord {
            name: name.to_string(),
            hash: hash.to_string(),
            install_dir: PathBuf::from(format!("/tmp/{hash}")),
            manifest: BundleManifest::default(),
            capabilities: vec![],
            version: "0.1.0".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn hash_is_deterministic_md5() {
        let h1 = hash_bytes(b"hello world");
        let h2 = hash_bytes(b"hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);
        assert_ne!(h1, hash_bytes(b"hello world!"));
    }

    #[test]
    fn insert_then_lookup_round_trip() {
        let dir = TempDir::new().unwrap();
        let index = ChecksumIndex::load(&dir.path().join("checksums.json")).unwrap();
        index.insert(sample_record("echo", "abc123"), false).unwrap();
        let found = index.lookup_by_hash("abc123").unwrap();
        assert_eq!(found.name, "echo");
        assert!(index.record_exists("echo"));
    }

    #[test]
    fn duplicate_hash_rejected_without_force() {
        let dir = TempDir::new().unwrap();
        let index = ChecksumIndex::load(&dir.path().join("checksums.json")).unwrap();
        index.insert(sample_record("echo", "abc123"), false).unwrap();
        let err = index
            .insert(sample_record("echo2", "abc123"), false)
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateHash));
    }

    #[test]
    fn duplicate_hash_allowed_with_force() {
        let dir = TempDir::new().unwrap();
        let index = ChecksumIndex::load(&dir.path().join("checksums.json")).unwrap();
        index.insert(sample_record("echo", "abc123"), false).unwrap();
        assert!(index.insert(sample_record("echo2", "abc123"), true).is_ok());
    }

    #[test]
    fn remove_then_reinsert_same_hash() {
        let dir = TempDir::new().unwrap();
        let index = ChecksumIndex::load(&dir.path().join("checksums.json")).unwrap();
        index.insert(sample_record("echo", "abc123"), false).unwrap();
        index.remove("echo").unwrap();
        assert!(!index.record_exists("echo"));
        assert!(index.insert(sample_record("echo", "abc123"), false).is_ok());
    }

    #[test]
    fn persists_across_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checksums.json");
        {
            let index = ChecksumIndex::load(&path).unwrap();
            index.insert(sample_record("echo", "abc123"), false).unwrap();
        }
        let reloaded = ChecksumIndex::load(&path).unwrap();
        assert!(reloaded.record_exists("echo"));
    }

    #[test]
    fn remove_missing_returns_not_found() {
        let dir = TempDir::new().unwrap();
        let index = ChecksumIndex::load(&dir.path().join("checksums.json")).unwrap();
        let err = index.remove("ghost").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
