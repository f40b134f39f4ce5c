// crates/unentropy-storage/src/store.rs
// ============================================================================
// Module: Metrics Store Facade
// Description: One object owning a provider, its connection, and the schema.
// Purpose: Give callers a ready/repository/persist/close contract.
// Dependencies: tracing, unentropy-config, unentropy-store-sqlite
// ============================================================================

//! ## Overview
//! [`MetricsStore`] owns exactly one [`StorageProvider`]. `ready` acquires the
//! database and migrates it; the repository is only reachable afterwards.
//! Dropping the store closes it, logging instead of propagating any failure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tracing::debug;
use tracing::info;
use tracing::warn;
use unentropy_config::StoreConfig;
use unentropy_store_sqlite::MetricsRepository;
use unentropy_store_sqlite::initialize_schema;

use crate::StorageError;
use crate::StorageProvider;
use crate::create_storage_provider;

// ============================================================================
// SECTION: Store
// ============================================================================

/// Persistent metrics store.
///
/// # Invariants
/// - `repository` succeeds only after `ready` has migrated the schema.
pub struct MetricsStore {
    /// Configuration the store was built from.
    config: StoreConfig,
    /// Medium-specific provider.
    provider: Box<dyn StorageProvider>,
    /// True once the schema has been migrated on the open connection.
    schema_ready: bool,
}

impl MetricsStore {
    /// Builds a store for `config` without touching the medium.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when the configuration is invalid.
    pub fn new(config: StoreConfig) -> Result<Self, StorageError> {
        let provider = create_storage_provider(&config)?;
        Ok(Self::with_provider(config, provider))
    }

    /// Builds a store around an existing provider.
    #[must_use]
    pub fn with_provider(config: StoreConfig, provider: Box<dyn StorageProvider>) -> Self {
        Self {
            config,
            provider,
            schema_ready: false,
        }
    }

    /// Builds a store and makes it ready.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when configuration, acquisition, or migration
    /// fails.
    pub fn open(config: StoreConfig) -> Result<Self, StorageError> {
        let mut store = Self::new(config)?;
        store.ready()?;
        Ok(store)
    }

    /// Acquires the database and migrates it to the current schema.
    ///
    /// Calling it again on a ready store does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when acquisition or migration fails, or
    /// [`StorageError::Closed`] after [`MetricsStore::close`].
    pub fn ready(&mut self) -> Result<(), StorageError> {
        if self.schema_ready && self.provider.is_initialized() {
            return Ok(());
        }
        let connection = self.provider.initialize()?;
        let applied = initialize_schema(connection, None)?;
        for migration in &applied {
            debug!(version = %migration.version, "schema migration applied");
        }
        self.schema_ready = true;
        info!(
            storage = self.provider.kind(),
            migrations = applied.len(),
            "metrics store ready"
        );
        Ok(())
    }

    /// Returns the repository over the migrated database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] before [`MetricsStore::ready`]
    /// and [`StorageError::Closed`] after [`MetricsStore::close`].
    pub fn repository(&self) -> Result<MetricsRepository<'_>, StorageError> {
        let connection = self.provider.connection()?;
        if !self.schema_ready {
            return Err(StorageError::NotInitialized);
        }
        Ok(MetricsRepository::new(connection))
    }

    /// Makes local changes durable in the backing medium.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the store is not ready or the transfer
    /// fails.
    pub fn persist(&mut self) -> Result<(), StorageError> {
        self.provider.persist()
    }

    /// Closes the connection and releases temporary files.
    ///
    /// Idempotent; the store cannot be reopened afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the connection cannot be closed cleanly.
    pub fn close(&mut self) -> Result<(), StorageError> {
        self.schema_ready = false;
        self.provider.cleanup()
    }

    /// Returns the underlying provider.
    #[must_use]
    pub fn provider(&self) -> &dyn StorageProvider {
        self.provider.as_ref()
    }

    /// Returns the configuration the store was built from.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }
}

impl Drop for MetricsStore {
    fn drop(&mut self) {
        if let Err(err) = self.provider.cleanup() {
            warn!(error = %err, "metrics store cleanup failed on drop");
        }
    }
}
