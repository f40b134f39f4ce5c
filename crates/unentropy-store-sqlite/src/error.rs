// crates/unentropy-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Store Errors
// Description: Error type shared by the connection, migrator, and repository.
// Purpose: Classify SQLite failures into busy, constraint, and generic errors.
// Dependencies: rusqlite, thiserror, unentropy-core
// ============================================================================

//! ## Overview
//! All store failures are reported as [`SqliteStoreError`]. Raw `rusqlite`
//! errors are classified by [`classify_db_error`]: busy/locked conditions and
//! constraint violations get dedicated variants, with the engine message
//! carried verbatim.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::ErrorCode;
use thiserror::Error;
use unentropy_core::ValidationError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - `Constraint` and `Busy` messages are the engine messages, unmodified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Filesystem error around the database file.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Busy-wait ceiling exceeded while the database was locked.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Integrity constraint violated.
    #[error("sqlite store constraint violation: {0}")]
    Constraint(String),
    /// Invalid input or stored data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Schema version unknown or unsupported.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Migration failed and was rolled back.
    #[error("sqlite store migration failed: {0}")]
    Migration(String),
}

impl From<ValidationError> for SqliteStoreError {
    fn from(error: ValidationError) -> Self {
        Self::Invalid(error.to_string())
    }
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        classify_db_error(&error)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Classifies a `rusqlite` error into a store error.
#[must_use]
pub fn classify_db_error(error: &rusqlite::Error) -> SqliteStoreError {
    match error.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            SqliteStoreError::Busy(error.to_string())
        }
        Some(ErrorCode::ConstraintViolation) => SqliteStoreError::Constraint(error.to_string()),
        _ => SqliteStoreError::Db(error.to_string()),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
