//! Per-identifier configuration record store
//!
//! One directory per identifier on a shared mount, one JSON record per
//! directory, append-only. The write is a conditional create: the record file
//! is staged to a temp file in the target directory and persisted with
//! no-clobber semantics, so when two runs race for the same identifier the
//! first writer wins and the loser sees [`PublishAck::AlreadyExists`], which
//! the state machine treats as success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::{Error, Result};

/// The configuration record shared with the infrastructure pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub identifier: String,
    pub artifact_package_name: String,
    pub target_name: String,
    pub storage_target_name: String,
    pub provisioning_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAck {
    Created,
    /// A record already exists for this identifier; treated as success
    AlreadyExists,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Write the record under the identifier's path, first writer wins
    async fn publish(&self, record: &ConfigRecord) -> Result<PublishAck>;

    /// Read a previously-published record, if any
    async fn read(&self, identifier: &str) -> Result<Option<ConfigRecord>>;
}

/// Filesystem-backed store rooted at a shared directory
pub struct FsConfigStore {
    root: PathBuf,
}

impl FsConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn record_path(&self, identifier: &str) -> PathBuf {
        self.root.join(identifier).join("record.json")
    }
}

#[async_trait]
impl ConfigStore for FsConfigStore {
    async fn publish(&self, record: &ConfigRecord) -> Result<PublishAck> {
        let dir = self.root.join(&record.identifier);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::PublishTransport(format!("create {}: {e}", dir.display())))?;

        let body = serde_json::to_vec_pretty(record)?;

        // Stage in the target directory so the persist is an atomic rename.
        let mut staged = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| Error::PublishTransport(format!("stage record: {e}")))?;
        std::io::Write::write_all(&mut staged, &body)
            .map_err(|e| Error::PublishTransport(format!("write record: {e}")))?;

        let path = self.record_path(&record.identifier);
        match staged.persist_noclobber(&path) {
            Ok(_) => {
                tracing::debug!("Published config record at {}", path.display());
                Ok(PublishAck::Created)
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(
                    "Config record already exists at {}, treating as published",
                    path.display()
                );
                Ok(PublishAck::AlreadyExists)
            }
            Err(e) => Err(Error::PublishTransport(format!(
                "persist {}: {}",
                path.display(),
                e.error
            ))),
        }
    }

    async fn read(&self, identifier: &str) -> Result<Option<ConfigRecord>> {
        let path = self.record_path(identifier);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::PublishTransport(format!(
                    "read {}: {e}",
                    path.display()
                )))
            }
        };
        let record = serde_json::from_str(&content)?;
        Ok(Some(record))
    }
}

/// In-memory store for state machine tests
#[derive(Default)]
pub struct MockConfigStore {
    records: Mutex<HashMap<String, ConfigRecord>>,
    transport_failures: Mutex<Vec<String>>,
}

impl MockConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport failure for the next publish call
    pub fn fails_publish(self, message: &str) -> Self {
        self.transport_failures
            .lock()
            .unwrap()
            .push(message.to_string());
        self
    }

    pub fn published(&self) -> Vec<ConfigRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ConfigStore for MockConfigStore {
    async fn publish(&self, record: &ConfigRecord) -> Result<PublishAck> {
        if let Some(message) = self.transport_failures.lock().unwrap().pop() {
            return Err(Error::PublishTransport(message));
        }
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.identifier) {
            return Ok(PublishAck::AlreadyExists);
        }
        records.insert(record.identifier.clone(), record.clone());
        Ok(PublishAck::Created)
    }

    async fn read(&self, identifier: &str) -> Result<Option<ConfigRecord>> {
        Ok(self.records.lock().unwrap().get(identifier).cloned())
    }
}
