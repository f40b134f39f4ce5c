// crates/unentropy-storage/src/error.rs
// ============================================================================
// Module: Storage Errors
// Description: Error type shared by storage providers and the store facade.
// Purpose: Keep configuration, database, and transfer failures distinct.
// Dependencies: thiserror, unentropy-config, unentropy-store-sqlite
// ============================================================================

//! ## Overview
//! [`StorageError`] separates lifecycle misuse (`NotInitialized`, `Closed`)
//! from transfer failures (`Io`, `Backend`) and from errors raised by the
//! configuration and database layers, which are wrapped unchanged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use unentropy_config::ConfigError;
use unentropy_store_sqlite::SqliteStoreError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Storage provider and facade errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Configuration rejected before any I/O.
    #[error("storage config error: {0}")]
    Config(#[from] ConfigError),
    /// Database layer failure.
    #[error("storage database error: {0}")]
    Store(#[from] SqliteStoreError),
    /// Local filesystem failure.
    #[error("storage io error: {0}")]
    Io(String),
    /// Remote medium returned an error.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// Operation requires an initialized provider.
    #[error("storage provider not initialized")]
    NotInitialized,
    /// Provider was cleaned up and cannot be reused.
    #[error("storage provider closed")]
    Closed,
    /// Invalid input or remote payload.
    #[error("storage invalid: {0}")]
    Invalid(String),
}

impl StorageError {
    /// Wraps an I/O error.
    pub(crate) fn io(err: &std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
