// crates/unentropy-storage/src/local.rs
// ============================================================================
// Module: Local File Storage Provider
// Description: Database file on the local filesystem.
// Purpose: Back the store with a plain file for local runs and self-hosted CI.
// Dependencies: rusqlite, tracing, unentropy-config, unentropy-store-sqlite
// ============================================================================

//! ## Overview
//! The file is opened (and created with its parent directories when absent)
//! in WAL mode. Every commit is already durable, so `persist` only checks
//! that the provider is ready.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use rusqlite::Connection;
use tracing::debug;
use tracing::info;
use unentropy_config::ConnectionConfig;
use unentropy_config::LocalStorageConfig;
use unentropy_store_sqlite::ConnectionSettings;
use unentropy_store_sqlite::JournalMode;
use unentropy_store_sqlite::open_connection;

use crate::StorageError;
use crate::StorageProvider;
use crate::provider::ProviderState;

// ============================================================================
// SECTION: Provider
// ============================================================================

/// Local filesystem storage provider.
#[derive(Debug)]
pub struct LocalStorageProvider {
    /// Database file path.
    path: PathBuf,
    /// Pragmas applied on open.
    settings: ConnectionSettings,
    /// Lifecycle state.
    state: ProviderState,
}

impl LocalStorageProvider {
    /// Builds a provider for the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when the path is invalid.
    pub fn new(
        config: &LocalStorageConfig,
        connection: &ConnectionConfig,
    ) -> Result<Self, StorageError> {
        config.validate()?;
        Ok(Self {
            path: config.path.clone(),
            settings: connection.settings(JournalMode::Wal),
            state: ProviderState::default(),
        })
    }
}

impl StorageProvider for LocalStorageProvider {
    fn kind(&self) -> &'static str {
        "sqlite-local"
    }

    fn initialize(&mut self) -> Result<&mut Connection, StorageError> {
        self.state.ensure_open()?;
        if !self.state.is_ready() {
            let connection = open_connection(&self.path, &self.settings)?;
            info!(path = %self.path.display(), "opened local metrics database");
            self.state = ProviderState::Ready(connection);
        }
        self.state.connection_mut()
    }

    fn persist(&mut self) -> Result<(), StorageError> {
        self.state.connection()?;
        debug!(path = %self.path.display(), "local database needs no transfer");
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), StorageError> {
        self.state.close()
    }

    fn is_initialized(&self) -> bool {
        self.state.is_ready()
    }

    fn connection(&self) -> Result<&Connection, StorageError> {
        self.state.connection()
    }

    fn connection_mut(&mut self) -> Result<&mut Connection, StorageError> {
        self.state.connection_mut()
    }

    fn database_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
