// crates/unentropy-storage/src/provider.rs
// ============================================================================
// Module: Storage Provider Interface
// Description: Uniform lifecycle for the medium holding the database file.
// Purpose: Let the store facade stay agnostic of where the file lives.
// Dependencies: rusqlite, unentropy-store-sqlite
// ============================================================================

//! ## Overview
//! A [`StorageProvider`] acquires the database file from its medium, hands
//! out the open connection, makes local changes durable, and releases every
//! local resource on cleanup.
//!
//! ```text
//! Uninitialized --initialize--> Ready --persist--> Ready
//!        \                        |
//!         `------cleanup------> Closed (terminal)
//! ```
//!
//! Invariants:
//! - `initialize` on a ready provider returns the existing handle without
//!   touching the medium again.
//! - `initialize` and `persist` after `cleanup` fail with
//!   [`StorageError::Closed`].
//! - `cleanup` is idempotent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::mem;
use std::path::Path;

use rusqlite::Connection;
use unentropy_store_sqlite::close_connection;

use crate::StorageError;

// ============================================================================
// SECTION: Provider Trait
// ============================================================================

/// Medium-specific acquisition and persistence of the database file.
pub trait StorageProvider: Send {
    /// Returns the configured `type` tag of the medium.
    fn kind(&self) -> &'static str;

    /// Acquires the database and returns its connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when acquisition fails or the provider is
    /// closed.
    fn initialize(&mut self) -> Result<&mut Connection, StorageError>;

    /// Makes local state durable in the medium.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the provider is not ready or the
    /// transfer fails. A transfer failure is reported after the connection
    /// has been reopened.
    fn persist(&mut self) -> Result<(), StorageError>;

    /// Closes the connection and removes local temporary copies.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the connection cannot be closed cleanly.
    /// The provider is closed regardless.
    fn cleanup(&mut self) -> Result<(), StorageError>;

    /// Returns true when a connection is open.
    fn is_initialized(&self) -> bool;

    /// Returns the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] or [`StorageError::Closed`].
    fn connection(&self) -> Result<&Connection, StorageError>;

    /// Returns the open connection mutably.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotInitialized`] or [`StorageError::Closed`].
    fn connection_mut(&mut self) -> Result<&mut Connection, StorageError>;

    /// Returns the local database file path, when one has been assigned.
    fn database_path(&self) -> Option<&Path>;
}

// ============================================================================
// SECTION: Lifecycle State
// ============================================================================

/// Lifecycle state shared by every provider.
#[derive(Debug, Default)]
pub(crate) enum ProviderState {
    /// No connection has been opened yet.
    #[default]
    Uninitialized,
    /// Connection open.
    Ready(Connection),
    /// Cleaned up; terminal.
    Closed,
}

impl ProviderState {
    /// Returns true when a connection is open.
    pub(crate) const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Fails when the provider has been cleaned up.
    pub(crate) const fn ensure_open(&self) -> Result<(), StorageError> {
        match self {
            Self::Closed => Err(StorageError::Closed),
            Self::Uninitialized | Self::Ready(_) => Ok(()),
        }
    }

    /// Returns the open connection.
    pub(crate) const fn connection(&self) -> Result<&Connection, StorageError> {
        match self {
            Self::Ready(connection) => Ok(connection),
            Self::Uninitialized => Err(StorageError::NotInitialized),
            Self::Closed => Err(StorageError::Closed),
        }
    }

    /// Returns the open connection mutably.
    pub(crate) fn connection_mut(&mut self) -> Result<&mut Connection, StorageError> {
        match self {
            Self::Ready(connection) => Ok(connection),
            Self::Uninitialized => Err(StorageError::NotInitialized),
            Self::Closed => Err(StorageError::Closed),
        }
    }

    /// Takes the open connection, leaving the state uninitialized.
    pub(crate) fn take_connection(&mut self) -> Result<Connection, StorageError> {
        self.ensure_open()?;
        match mem::take(self) {
            Self::Ready(connection) => Ok(connection),
            _ => Err(StorageError::NotInitialized),
        }
    }

    /// Closes any open connection and marks the state closed.
    pub(crate) fn close(&mut self) -> Result<(), StorageError> {
        match mem::replace(self, Self::Closed) {
            Self::Ready(connection) => close_connection(connection).map_err(StorageError::from),
            Self::Uninitialized | Self::Closed => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
