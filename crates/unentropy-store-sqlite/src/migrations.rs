// crates/unentropy-store-sqlite/src/migrations.rs
// ============================================================================
// Module: Schema Migrator
// Description: Ordered, transactional schema migrations with a version ledger.
// Purpose: Bring database files of unknown prior version up to the current
//          schema, including the legacy integer-keyed layout.
// Dependencies: rusqlite, time, tracing
// ============================================================================

//! ## Overview
//! Migrations are an append-only list ordered by dotted version string. Each
//! one runs in its own transaction together with its `schema_version` ledger
//! row, so a failure leaves neither the schema change nor the ledger entry.
//!
//! Migration `2.0.0` introspects `metric_definitions.id`. Fresh files get the
//! current tables; files still keyed by integer metric ids are backed up
//! beside the original and rebuilt in place with string ids.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use time::OffsetDateTime;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::SqliteStoreError;
use crate::connection::checkpoint;
use crate::error::classify_db_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Newest schema version known to this build.
pub const CURRENT_SCHEMA_VERSION: &str = "2.0.0";

/// Version ledger table.
const LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version TEXT PRIMARY KEY,
    applied_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    description TEXT
);";

/// Current schema tables.
const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS metric_definitions (
    id TEXT PRIMARY KEY CHECK(id GLOB '[a-z0-9-]*'),
    type TEXT NOT NULL CHECK(type IN ('numeric', 'label')),
    unit TEXT,
    description TEXT
);
CREATE TABLE IF NOT EXISTS build_contexts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    commit_sha TEXT NOT NULL,
    branch TEXT NOT NULL,
    run_id TEXT NOT NULL,
    run_number INTEGER NOT NULL,
    event_name TEXT,
    timestamp DATETIME NOT NULL,
    UNIQUE(commit_sha, run_id)
);
CREATE TABLE IF NOT EXISTS metric_values (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_id TEXT NOT NULL,
    build_id INTEGER NOT NULL,
    value_numeric REAL,
    value_label TEXT,
    FOREIGN KEY (metric_id) REFERENCES metric_definitions(id),
    FOREIGN KEY (build_id) REFERENCES build_contexts(id),
    UNIQUE(metric_id, build_id),
    CHECK(
        (value_numeric IS NOT NULL AND value_label IS NULL) OR
        (value_numeric IS NULL AND value_label IS NOT NULL)
    )
);";

/// Indexes over the current tables.
const INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_build_timestamp
    ON build_contexts(timestamp);
CREATE INDEX IF NOT EXISTS idx_build_branch ON build_contexts(branch);
CREATE INDEX IF NOT EXISTS idx_build_commit ON build_contexts(commit_sha);
CREATE INDEX IF NOT EXISTS idx_build_event_timestamp ON build_contexts(event_name, timestamp);
CREATE INDEX IF NOT EXISTS idx_metric_value_build ON metric_values(build_id);";

/// Rebuilds legacy integer-keyed tables under the current shape.
///
/// Legacy metric values reference definitions by integer id; the copy
/// translates them to the definition `name`, which becomes the string id.
/// Free-text units outside the unit enumeration are dropped to NULL. A value
/// whose definition is gone leaves `metric_id` NULL and fails the copy.
const LEGACY_REBUILD_SQL: &str = "CREATE TABLE metric_definitions_new (
    id TEXT PRIMARY KEY CHECK(id GLOB '[a-z0-9-]*'),
    type TEXT NOT NULL CHECK(type IN ('numeric', 'label')),
    unit TEXT,
    description TEXT
);
INSERT INTO metric_definitions_new (id, type, unit, description)
    SELECT name, type,
        CASE WHEN unit IN ('percent', 'integer', 'bytes', 'duration', 'decimal') THEN unit END,
        description
    FROM metric_definitions;
CREATE TABLE build_contexts_new (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    commit_sha TEXT NOT NULL,
    branch TEXT NOT NULL,
    run_id TEXT NOT NULL,
    run_number INTEGER NOT NULL,
    event_name TEXT,
    timestamp DATETIME NOT NULL,
    UNIQUE(commit_sha, run_id)
);
INSERT INTO build_contexts_new (id, commit_sha, branch, run_id, run_number, event_name, timestamp)
    SELECT id, commit_sha, branch, run_id, run_number, event_name, timestamp FROM build_contexts;
CREATE TABLE metric_values_new (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_id TEXT NOT NULL,
    build_id INTEGER NOT NULL,
    value_numeric REAL,
    value_label TEXT,
    FOREIGN KEY (metric_id) REFERENCES metric_definitions(id),
    FOREIGN KEY (build_id) REFERENCES build_contexts(id),
    UNIQUE(metric_id, build_id),
    CHECK(
        (value_numeric IS NOT NULL AND value_label IS NULL) OR
        (value_numeric IS NULL AND value_label IS NOT NULL)
    )
);
INSERT INTO metric_values_new (id, metric_id, build_id, value_numeric, value_label)
    SELECT mv.id, md.name, mv.build_id, mv.value_numeric, mv.value_label
    FROM metric_values mv
    LEFT JOIN metric_definitions md ON mv.metric_id = md.id;
DROP TABLE metric_values;
DROP TABLE metric_definitions;
DROP TABLE build_contexts;
ALTER TABLE metric_definitions_new RENAME TO metric_definitions;
ALTER TABLE build_contexts_new RENAME TO build_contexts;
ALTER TABLE metric_values_new RENAME TO metric_values;";

/// Ordered migration list.
const MIGRATIONS: &[Migration] = &[Migration {
    version: "2.0.0",
    description: "Clean schema with string metric IDs",
    up: migrate_string_metric_ids,
}];

// ============================================================================
// SECTION: Types
// ============================================================================

/// One schema migration.
struct Migration {
    /// Dotted version string.
    version: &'static str,
    /// Ledger description.
    description: &'static str,
    /// Applies the migration; must record the ledger row in its transaction.
    up: fn(&mut Connection, &Migration) -> Result<AppliedMigration, SqliteStoreError>,
}

impl Migration {
    /// Inserts the ledger row inside `tx` and returns the applied record.
    fn record(
        &self,
        tx: &rusqlite::Transaction<'_>,
        legacy_backup: Option<PathBuf>,
    ) -> Result<AppliedMigration, SqliteStoreError> {
        tx.execute(
            "INSERT OR IGNORE INTO schema_version (version, description) VALUES (?1, ?2)",
            params![self.version, self.description],
        )
        .map_err(|err| classify_db_error(&err))?;
        let applied_at: String = tx
            .query_row(
                "SELECT applied_at FROM schema_version WHERE version = ?1",
                params![self.version],
                |row| row.get(0),
            )
            .map_err(|err| classify_db_error(&err))?;
        Ok(AppliedMigration {
            version: self.version.to_string(),
            description: self.description.to_string(),
            applied_at,
            legacy_backup,
        })
    }
}

/// Migration applied by [`initialize_schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    /// Applied version.
    pub version: String,
    /// Ledger description.
    pub description: String,
    /// Ledger timestamp.
    pub applied_at: String,
    /// Backup copy taken before a legacy rebuild.
    pub legacy_backup: Option<PathBuf>,
}

/// One `schema_version` ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaVersionRecord {
    /// Version string.
    pub version: String,
    /// Application timestamp.
    pub applied_at: String,
    /// Migration description.
    pub description: Option<String>,
}

/// Shape of `metric_definitions` found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefinitionsShape {
    /// Table does not exist yet.
    Absent,
    /// Integer-keyed legacy table.
    Legacy,
    /// String-keyed current table.
    Current,
}

// ============================================================================
// SECTION: Migrator
// ============================================================================

/// Applies pending migrations up to `target_version` (default: newest).
///
/// Migrations already recorded in the ledger are skipped, so calling this
/// repeatedly is a no-op once the schema is current.
///
/// # Errors
///
/// Returns [`SqliteStoreError::VersionMismatch`] for an unknown target version
/// (nothing is applied) and [`SqliteStoreError::Migration`] or a database
/// error when a migration fails; that migration is rolled back.
pub fn initialize_schema(
    connection: &mut Connection,
    target_version: Option<&str>,
) -> Result<Vec<AppliedMigration>, SqliteStoreError> {
    let target_index = match target_version {
        Some(version) => MIGRATIONS
            .iter()
            .position(|migration| migration.version == version)
            .ok_or_else(|| {
                SqliteStoreError::VersionMismatch(format!("unknown target version: {version}"))
            })?,
        None => MIGRATIONS.len().saturating_sub(1),
    };
    connection.execute_batch(LEDGER_SQL).map_err(|err| classify_db_error(&err))?;
    let start = current_migration_index(connection)?.map_or(0, |index| index + 1);
    if start > target_index {
        debug!(version = MIGRATIONS[target_index].version, "schema is up to date");
        return Ok(Vec::new());
    }
    let mut applied = Vec::new();
    for migration in &MIGRATIONS[start..=target_index] {
        debug!(version = migration.version, "applying schema migration");
        let record = (migration.up)(connection, migration).inspect_err(|err| {
            warn!(version = migration.version, error = %err, "schema migration failed");
        })?;
        info!(
            version = %record.version,
            description = %record.description,
            "applied schema migration"
        );
        applied.push(record);
    }
    Ok(applied)
}

/// Returns the newest known migration recorded in the ledger.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] when the ledger cannot be read.
pub fn current_version(connection: &Connection) -> Result<Option<String>, SqliteStoreError> {
    if !ledger_exists(connection)? {
        return Ok(None);
    }
    Ok(current_migration_index(connection)?.map(|index| MIGRATIONS[index].version.to_string()))
}

/// Lists ledger rows ordered by version.
///
/// # Errors
///
/// Returns [`SqliteStoreError`] when the ledger cannot be read.
pub fn schema_versions(
    connection: &Connection,
) -> Result<Vec<SchemaVersionRecord>, SqliteStoreError> {
    if !ledger_exists(connection)? {
        return Ok(Vec::new());
    }
    let mut stmt = connection
        .prepare("SELECT version, applied_at, description FROM schema_version")
        .map_err(|err| classify_db_error(&err))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SchemaVersionRecord {
                version: row.get(0)?,
                applied_at: row.get(1)?,
                description: row.get(2)?,
            })
        })
        .map_err(|err| classify_db_error(&err))?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row.map_err(|err| classify_db_error(&err))?);
    }
    records.sort_by(|left, right| compare_versions(&left.version, &right.version));
    Ok(records)
}

// ============================================================================
// SECTION: Migration 2.0.0
// ============================================================================

/// Creates the current schema, or rebuilds a legacy integer-keyed schema.
fn migrate_string_metric_ids(
    connection: &mut Connection,
    migration: &Migration,
) -> Result<AppliedMigration, SqliteStoreError> {
    match definitions_shape(connection)? {
        DefinitionsShape::Legacy => {
            let backup = backup_database(connection)?;
            rebuild_legacy_schema(connection, migration, backup)
        }
        DefinitionsShape::Absent | DefinitionsShape::Current => {
            let tx = connection.transaction().map_err(|err| classify_db_error(&err))?;
            tx.execute_batch(SCHEMA_SQL).map_err(|err| classify_db_error(&err))?;
            tx.execute_batch(INDEX_SQL).map_err(|err| classify_db_error(&err))?;
            let record = migration.record(&tx, None)?;
            tx.commit().map_err(|err| classify_db_error(&err))?;
            Ok(record)
        }
    }
}

/// Rebuilds legacy tables with foreign-key enforcement suspended.
///
/// `foreign_keys` cannot change inside a transaction, so it is toggled around
/// the rebuild transaction and restored even when the rebuild fails.
fn rebuild_legacy_schema(
    connection: &mut Connection,
    migration: &Migration,
    backup: Option<PathBuf>,
) -> Result<AppliedMigration, SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = OFF;")
        .map_err(|err| classify_db_error(&err))?;
    let result = rebuild_legacy_tables(connection, migration, backup);
    let restored = connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| classify_db_error(&err));
    let record = result?;
    restored?;
    Ok(record)
}

/// Runs the legacy rebuild in a single transaction.
fn rebuild_legacy_tables(
    connection: &mut Connection,
    migration: &Migration,
    backup: Option<PathBuf>,
) -> Result<AppliedMigration, SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| classify_db_error(&err))?;
    tx.execute_batch(LEGACY_REBUILD_SQL)
        .map_err(|err| SqliteStoreError::Migration(format!("legacy rebuild failed: {err}")))?;
    tx.execute_batch(INDEX_SQL).map_err(|err| classify_db_error(&err))?;
    let violations = foreign_key_violations(&tx)?;
    if violations > 0 {
        return Err(SqliteStoreError::Migration(format!(
            "legacy rebuild left {violations} foreign key violation(s)"
        )));
    }
    let record = migration.record(&tx, backup)?;
    tx.commit().map_err(|err| classify_db_error(&err))?;
    Ok(record)
}

/// Copies the database file beside itself before a destructive rebuild.
///
/// Returns `None` for in-memory databases, which have no file to copy.
fn backup_database(connection: &Connection) -> Result<Option<PathBuf>, SqliteStoreError> {
    let Some(path) = connection.path().filter(|path| !path.is_empty()) else {
        warn!("legacy schema found in an in-memory database; no backup taken");
        return Ok(None);
    };
    checkpoint(connection)?;
    let stamp = backup_stamp(OffsetDateTime::now_utc());
    let backup = PathBuf::from(format!("{path}.backup-{stamp}"));
    fs::copy(path, &backup).map_err(|err| {
        SqliteStoreError::Io(format!("failed to back up {path} to {}: {err}", backup.display()))
    })?;
    info!(backup = %backup.display(), "backed up legacy database");
    Ok(Some(backup))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns true when the ledger table exists.
fn ledger_exists(connection: &Connection) -> Result<bool, SqliteStoreError> {
    connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(|err| classify_db_error(&err))
}

/// Returns the index of the newest known migration recorded in the ledger.
///
/// Ledger entries that name no known migration are ignored; entries newer
/// than every known migration are reported once as a warning.
fn current_migration_index(connection: &Connection) -> Result<Option<usize>, SqliteStoreError> {
    let mut stmt = connection
        .prepare("SELECT version FROM schema_version")
        .map_err(|err| classify_db_error(&err))?;
    let versions = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|err| classify_db_error(&err))?;
    let mut current = None;
    for version in versions {
        let version = version.map_err(|err| classify_db_error(&err))?;
        if let Some(index) = MIGRATIONS.iter().position(|migration| migration.version == version)
        {
            current = current.max(Some(index));
        } else if compare_versions(&version, CURRENT_SCHEMA_VERSION) == Ordering::Greater {
            warn!(version = %version, "ledger records a schema newer than this build supports");
        }
    }
    Ok(current)
}

/// Introspects the declared type of `metric_definitions.id`.
fn definitions_shape(connection: &Connection) -> Result<DefinitionsShape, SqliteStoreError> {
    let mut stmt = connection
        .prepare("PRAGMA table_info(metric_definitions)")
        .map_err(|err| classify_db_error(&err))?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))
        .map_err(|err| classify_db_error(&err))?;
    let mut shape = DefinitionsShape::Absent;
    for column in columns {
        let (name, declared_type) = column.map_err(|err| classify_db_error(&err))?;
        if name == "id" {
            shape = if declared_type.eq_ignore_ascii_case("INTEGER") {
                DefinitionsShape::Legacy
            } else {
                DefinitionsShape::Current
            };
        }
    }
    Ok(shape)
}

/// Counts rows reported by `PRAGMA foreign_key_check`.
fn foreign_key_violations(tx: &rusqlite::Transaction<'_>) -> Result<usize, SqliteStoreError> {
    let mut stmt = tx.prepare("PRAGMA foreign_key_check").map_err(|err| classify_db_error(&err))?;
    let rows = stmt.query_map([], |_| Ok(())).map_err(|err| classify_db_error(&err))?;
    let mut count = 0usize;
    for row in rows {
        row.map_err(|err| classify_db_error(&err))?;
        count += 1;
    }
    Ok(count)
}

/// Formats a compact UTC stamp (`YYYYMMDDTHHMMSSZ`) for backup file names.
fn backup_stamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Compares dotted version strings numerically per component.
///
/// Non-numeric components compare as zero; missing components compare as
/// zero, so `2.0` equals `2.0.0`.
fn compare_versions(left: &str, right: &str) -> Ordering {
    let parse = |value: &str| -> Vec<u64> {
        value.split('.').map(|part| part.trim().parse::<u64>().unwrap_or(0)).collect()
    };
    let left = parse(left);
    let right = parse(right);
    let len = left.len().max(right.len());
    for index in 0..len {
        let ordering = left
            .get(index)
            .copied()
            .unwrap_or(0)
            .cmp(&right.get(index).copied().unwrap_or(0));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

// ============================================================================
// SECTION: Tests
// ============================================================================
