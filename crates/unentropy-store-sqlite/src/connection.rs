// crates/unentropy-store-sqlite/src/connection.rs
// ============================================================================
// Module: SQLite Connection Handle
// Description: Opens database files with single-writer pragmas applied.
// Purpose: Give every storage backend the same connection configuration.
// Dependencies: rusqlite, serde
// ============================================================================

//! ## Overview
//! Connections are opened read-write (creating the file when absent) and
//! configured for a single-writer, crash-tolerant workload: foreign keys on,
//! WAL or DELETE journal, `NORMAL` synchronous, a bounded busy wait, and an
//! in-memory temp store. Backends that ship the file as a single object use
//! the DELETE journal so no `-wal` sidecar holds unflushed pages.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use serde::Deserialize;
use serde::Serialize;

use crate::SqliteStoreError;
use crate::error::classify_db_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Page cache size pragma value (negative means KiB).
const CACHE_SIZE_KIB: i64 = -2_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// WAL journal mode.
    #[default]
    Wal,
    /// Rollback journal deleted at commit; keeps the database a single file.
    Delete,
}

impl JournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full synchronous mode.
    Full,
    /// Normal synchronous mode.
    #[default]
    Normal,
}

impl SyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Pragmas applied to every opened connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Journal mode.
    pub journal_mode: JournalMode,
    /// Synchronous mode.
    pub sync_mode: SyncMode,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl ConnectionSettings {
    /// Returns settings with the given journal mode and default pragmas.
    #[must_use]
    pub fn with_journal_mode(journal_mode: JournalMode) -> Self {
        Self {
            journal_mode,
            ..Self::default()
        }
    }
}

// ============================================================================
// SECTION: Connection Lifecycle
// ============================================================================

/// Opens (creating if absent) the database at `path` and applies pragmas.
///
/// Parent directories are created as needed.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] when the path is invalid, the parent directory
/// cannot be created, or the database cannot be opened.
pub fn open_connection(
    path: &Path,
    settings: &ConnectionSettings,
) -> Result<Connection, SqliteStoreError> {
    validate_store_path(path)?;
    ensure_parent_dir(path)?;
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection =
        Connection::open_with_flags(path, flags).map_err(|err| classify_db_error(&err))?;
    apply_pragmas(&connection, settings)?;
    Ok(connection)
}

/// Applies the connection pragmas.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] when a pragma cannot be applied.
pub fn apply_pragmas(
    connection: &Connection,
    settings: &ConnectionSettings,
) -> Result<(), SqliteStoreError> {
    connection
        .busy_timeout(Duration::from_millis(settings.busy_timeout_ms))
        .map_err(|err| classify_db_error(&err))?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| classify_db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", settings.journal_mode.pragma_value()))
        .map_err(|err| classify_db_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", settings.sync_mode.pragma_value()))
        .map_err(|err| classify_db_error(&err))?;
    connection
        .execute_batch(&format!(
            "PRAGMA cache_size = {CACHE_SIZE_KIB}; PRAGMA temp_store = MEMORY;"
        ))
        .map_err(|err| classify_db_error(&err))?;
    Ok(())
}

/// Folds any WAL content into the main database file.
///
/// A no-op for databases not in WAL mode.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] when the checkpoint fails.
pub fn checkpoint(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection
        .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
        .map_err(|err| classify_db_error(&err))
}

/// Checkpoints and closes a connection, surfacing close failures.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] when the checkpoint or close fails.
pub fn close_connection(connection: Connection) -> Result<(), SqliteStoreError> {
    checkpoint(&connection)?;
    connection.close().map_err(|(_, err)| classify_db_error(&err))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Validates store paths for safety limits.
///
/// # Errors
///
/// Returns [`SqliteStoreError::Invalid`] for empty, overlong, or directory
/// paths.
pub fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}
