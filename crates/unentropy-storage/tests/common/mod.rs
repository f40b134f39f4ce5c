// crates/unentropy-storage/tests/common/mod.rs
// =============================================================================
// Module: Storage Test Helpers
// Description: Shared fixtures for provider and facade tests.
// Purpose: Build contexts, metrics, configs, and in-memory media.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use unentropy_config::ConnectionConfig;
use unentropy_config::LocalStorageConfig;
use unentropy_config::StorageConfig;
use unentropy_config::StoreConfig;
use unentropy_core::MetricDefinition;
use unentropy_core::MetricId;
use unentropy_core::MetricKind;
use unentropy_core::NewBuildContext;
use unentropy_core::PULL_REQUEST_EVENT;
use unentropy_core::PUSH_EVENT;
use unentropy_core::RecordedMetric;
use unentropy_core::UnitType;
use unentropy_storage::ObjectStoreClient;
use unentropy_storage::StorageError;

/// Returns a local-file store config for `path`.
pub fn local_config(path: &Path) -> StoreConfig {
    StoreConfig {
        storage: StorageConfig::SqliteLocal(LocalStorageConfig {
            path: path.to_path_buf(),
        }),
        connection: ConnectionConfig::default(),
    }
}

/// Returns a build context on `main` for the given event.
pub fn build(sha: &str, run_id: &str, event: &str, timestamp: &str) -> NewBuildContext {
    NewBuildContext {
        commit_sha: sha.to_string(),
        branch: "main".to_string(),
        run_id: run_id.to_string(),
        run_number: run_id.parse().unwrap_or(1),
        event_name: Some(event.to_string()),
        timestamp: timestamp.to_string(),
    }
}

/// Returns a push build context on `main`.
pub fn push(sha: &str, run_id: &str, timestamp: &str) -> NewBuildContext {
    build(sha, run_id, PUSH_EVENT, timestamp)
}

/// Returns a pull-request build context on `main`.
pub fn pull_request(sha: &str, run_id: &str, timestamp: &str) -> NewBuildContext {
    build(sha, run_id, PULL_REQUEST_EVENT, timestamp)
}

/// Returns the `coverage` metric id.
pub fn coverage_id() -> MetricId {
    MetricId::parse("coverage").unwrap()
}

/// Returns a coverage reading in percent.
pub fn coverage(value: f64) -> RecordedMetric {
    RecordedMetric::numeric(
        MetricDefinition::new(coverage_id(), MetricKind::Numeric).with_unit(UnitType::Percent),
        value,
    )
}

/// In-memory object store keyed by object key.
#[derive(Default)]
pub struct InMemoryObjectStore {
    /// Stored objects.
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// When set, `exists` fails with this message.
    pub fail_exists: Option<String>,
    /// When set, `put` fails with this message.
    pub fail_put: Mutex<Option<String>>,
}

impl InMemoryObjectStore {
    /// Returns a copy of the stored object.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

impl ObjectStoreClient for InMemoryObjectStore {
    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        if let Some(message) = &self.fail_exists {
            return Err(StorageError::Backend(message.clone()));
        }
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    fn get(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, StorageError> {
        let bytes = self
            .object(key)
            .ok_or_else(|| StorageError::Backend(format!("object not found: {key}")))?;
        if bytes.len() > max_bytes {
            return Err(StorageError::Invalid("object too large".to_string()));
        }
        Ok(bytes)
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        if let Some(message) = self.fail_put.lock().unwrap().clone() {
            return Err(StorageError::Backend(message));
        }
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }
}
