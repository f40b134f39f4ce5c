// crates/unentropy-store-sqlite/src/queries.rs
// ============================================================================
// Module: Query Layer
// Description: One function per SQL statement over the metrics tables.
// Purpose: Keep SQL text and row mapping out of the repository logic.
// Dependencies: rusqlite, unentropy-core
// ============================================================================

//! ## Overview
//! Every statement issued against `metric_definitions`, `build_contexts`, and
//! `metric_values` lives here. Functions take a plain [`Connection`] so they
//! run equally inside a transaction (which dereferences to one).
//!
//! Build timestamps are compared through `julianday` so RFC 3339 values with
//! differing offsets or fractional precision still order chronologically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::types::Type;
use unentropy_core::BuildContext;
use unentropy_core::BuildId;
use unentropy_core::MetricDefinition;
use unentropy_core::MetricId;
use unentropy_core::MetricKind;
use unentropy_core::MetricReading;
use unentropy_core::MetricSample;
use unentropy_core::MetricValue;
use unentropy_core::NewBuildContext;
use unentropy_core::UnitType;
use unentropy_core::ValidationError;

use crate::SqliteStoreError;
use crate::error::classify_db_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Build context column list.
const BUILD_COLUMNS: &str = "id, commit_sha, branch, run_id, run_number, event_name, timestamp";
/// Metric value column list, qualified with the `mv` alias.
const VALUE_COLUMNS: &str = "mv.id, mv.metric_id, mv.build_id, mv.value_numeric, mv.value_label";

// ============================================================================
// SECTION: Writes
// ============================================================================

/// Inserts a build context; returns `None` when `(commit_sha, run_id)` exists.
pub fn insert_build_context(
    connection: &Connection,
    build: &NewBuildContext,
) -> Result<Option<BuildId>, SqliteStoreError> {
    connection
        .query_row(
            "INSERT INTO build_contexts
                (commit_sha, branch, run_id, run_number, event_name, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(commit_sha, run_id) DO NOTHING
             RETURNING id",
            params![
                build.commit_sha,
                build.branch,
                build.run_id,
                build.run_number,
                build.event_name,
                build.timestamp
            ],
            |row| row.get(0).map(BuildId::new),
        )
        .optional()
        .map_err(|err| classify_db_error(&err))
}

/// Looks up a build by its natural key.
pub fn select_build_id(
    connection: &Connection,
    commit_sha: &str,
    run_id: &str,
) -> Result<Option<BuildId>, SqliteStoreError> {
    connection
        .query_row(
            "SELECT id FROM build_contexts WHERE commit_sha = ?1 AND run_id = ?2",
            params![commit_sha, run_id],
            |row| row.get(0).map(BuildId::new),
        )
        .optional()
        .map_err(|err| classify_db_error(&err))
}

/// Upserts a definition and returns the stored kind.
///
/// `unit` and `description` keep their prior value when the new one is null.
/// The stored `type` is never changed.
pub fn upsert_metric_definition(
    connection: &Connection,
    definition: &MetricDefinition,
) -> Result<MetricKind, SqliteStoreError> {
    connection
        .query_row(
            "INSERT INTO metric_definitions (id, type, unit, description)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                unit = COALESCE(excluded.unit, metric_definitions.unit),
                description = COALESCE(excluded.description, metric_definitions.description)
             RETURNING type",
            params![
                definition.id.as_str(),
                definition.kind.as_str(),
                definition.unit.map(UnitType::as_str),
                definition.description
            ],
            |row| parse_column::<MetricKind>(row, 0),
        )
        .map_err(|err| classify_db_error(&err))
}

/// Upserts one value keyed by `(metric_id, build_id)`; last write wins.
pub fn upsert_metric_value(
    connection: &Connection,
    metric_id: &MetricId,
    build_id: BuildId,
    reading: &MetricReading,
) -> Result<i64, SqliteStoreError> {
    connection
        .query_row(
            "INSERT INTO metric_values (metric_id, build_id, value_numeric, value_label)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(metric_id, build_id) DO UPDATE SET
                value_numeric = excluded.value_numeric,
                value_label = excluded.value_label
             RETURNING id",
            params![metric_id.as_str(), build_id.get(), reading.as_numeric(), reading.as_label()],
            |row| row.get(0),
        )
        .map_err(|err| classify_db_error(&err))
}

// ============================================================================
// SECTION: Definitions
// ============================================================================

/// Selects one definition.
pub fn select_metric_definition(
    connection: &Connection,
    id: &MetricId,
) -> Result<Option<MetricDefinition>, SqliteStoreError> {
    connection
        .query_row(
            "SELECT id, type, unit, description FROM metric_definitions WHERE id = ?1",
            params![id.as_str()],
            map_definition_row,
        )
        .optional()
        .map_err(|err| classify_db_error(&err))
}

/// Selects every definition ordered by id.
pub fn select_all_metric_definitions(
    connection: &Connection,
) -> Result<Vec<MetricDefinition>, SqliteStoreError> {
    collect_rows(
        connection,
        "SELECT id, type, unit, description FROM metric_definitions ORDER BY id",
        [],
        map_definition_row,
    )
}

// ============================================================================
// SECTION: Builds
// ============================================================================

/// Selects one build context.
pub fn select_build_context(
    connection: &Connection,
    id: BuildId,
) -> Result<Option<BuildContext>, SqliteStoreError> {
    connection
        .query_row(
            &format!("SELECT {BUILD_COLUMNS} FROM build_contexts WHERE id = ?1"),
            params![id.get()],
            map_build_row,
        )
        .optional()
        .map_err(|err| classify_db_error(&err))
}

/// Selects every build ordered by timestamp, then id.
///
/// With `only_with_metrics`, only push builds with at least one value.
pub fn select_all_build_contexts(
    connection: &Connection,
    only_with_metrics: bool,
) -> Result<Vec<BuildContext>, SqliteStoreError> {
    let sql = if only_with_metrics {
        format!(
            "SELECT {BUILD_COLUMNS} FROM build_contexts bc
             WHERE bc.event_name = 'push'
               AND EXISTS (SELECT 1 FROM metric_values mv WHERE mv.build_id = bc.id)
             ORDER BY julianday(bc.timestamp), bc.timestamp, bc.id"
        )
    } else {
        format!(
            "SELECT {BUILD_COLUMNS} FROM build_contexts
             ORDER BY julianday(timestamp), timestamp, id"
        )
    };
    collect_rows(connection, &sql, [], map_build_row)
}

/// Counts stored builds.
pub fn count_builds(connection: &Connection) -> Result<u64, SqliteStoreError> {
    let count: i64 = connection
        .query_row("SELECT COUNT(*) FROM build_contexts", [], |row| row.get(0))
        .map_err(|err| classify_db_error(&err))?;
    u64::try_from(count).map_err(|_| SqliteStoreError::Invalid("negative build count".to_string()))
}

// ============================================================================
// SECTION: Values
// ============================================================================

/// Selects the values of one build ordered by metric id.
pub fn select_metric_values_for_build(
    connection: &Connection,
    build_id: BuildId,
) -> Result<Vec<MetricValue>, SqliteStoreError> {
    collect_rows(
        connection,
        &format!(
            "SELECT {VALUE_COLUMNS} FROM metric_values mv
             WHERE mv.build_id = ?1
             ORDER BY mv.metric_id"
        ),
        params![build_id.get()],
        map_value_row,
    )
}

/// Selects every value ordered by build id, then metric id.
pub fn select_all_metric_values(
    connection: &Connection,
) -> Result<Vec<MetricValue>, SqliteStoreError> {
    collect_rows(
        connection,
        &format!("SELECT {VALUE_COLUMNS} FROM metric_values mv ORDER BY mv.build_id, mv.metric_id"),
        [],
        map_value_row,
    )
}

/// Selects the push-build time series of one metric, oldest first.
pub fn select_metric_time_series(
    connection: &Connection,
    metric_id: &MetricId,
) -> Result<Vec<MetricSample>, SqliteStoreError> {
    collect_rows(
        connection,
        &format!(
            "SELECT {VALUE_COLUMNS}, bc.commit_sha, bc.branch, bc.run_id, bc.run_number,
                    bc.timestamp
             FROM metric_values mv
             JOIN build_contexts bc ON mv.build_id = bc.id
             WHERE mv.metric_id = ?1 AND bc.event_name = 'push'
             ORDER BY julianday(bc.timestamp), bc.timestamp, bc.id"
        ),
        params![metric_id.as_str()],
        |row| {
            Ok(MetricSample {
                value: map_value_row(row)?,
                commit_sha: row.get(5)?,
                branch: row.get(6)?,
                run_id: row.get(7)?,
                run_number: row.get(8)?,
                build_timestamp: row.get(9)?,
            })
        },
    )
}

/// Selects numeric push-build values on `branch` newer than `cutoff`, most
/// recent first.
pub fn select_baseline_values(
    connection: &Connection,
    metric_id: &MetricId,
    branch: &str,
    cutoff: &str,
    limit: u32,
) -> Result<Vec<f64>, SqliteStoreError> {
    collect_rows(
        connection,
        "SELECT mv.value_numeric
         FROM metric_values mv
         JOIN build_contexts bc ON mv.build_id = bc.id
         WHERE mv.metric_id = ?1
           AND bc.branch = ?2
           AND bc.event_name = 'push'
           AND julianday(bc.timestamp) >= julianday(?3)
           AND mv.value_numeric IS NOT NULL
         ORDER BY julianday(bc.timestamp) DESC, bc.timestamp DESC, bc.id DESC
         LIMIT ?4",
        params![metric_id.as_str(), branch, cutoff, limit],
        |row| row.get(0),
    )
}

/// Selects the numeric value of a metric for one (pull-request) build.
pub fn select_build_numeric_value(
    connection: &Connection,
    metric_id: &MetricId,
    build_id: BuildId,
) -> Result<Option<f64>, SqliteStoreError> {
    connection
        .query_row(
            "SELECT value_numeric FROM metric_values
             WHERE metric_id = ?1 AND build_id = ?2 AND value_numeric IS NOT NULL",
            params![metric_id.as_str(), build_id.get()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| classify_db_error(&err))
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Runs a statement and collects every mapped row.
fn collect_rows<T, P, F>(
    connection: &Connection,
    sql: &str,
    params: P,
    map: F,
) -> Result<Vec<T>, SqliteStoreError>
where
    P: rusqlite::Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = connection.prepare(sql).map_err(|err| classify_db_error(&err))?;
    let rows = stmt.query_map(params, map).map_err(|err| classify_db_error(&err))?;
    let mut results = Vec::new();
    for row in rows {
        results.push(row.map_err(|err| classify_db_error(&err))?);
    }
    Ok(results)
}

/// Parses a text column through [`std::str::FromStr`].
fn parse_column<T>(row: &Row<'_>, index: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = ValidationError>,
{
    let raw: String = row.get(index)?;
    raw.parse::<T>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

/// Maps `id, type, unit, description`.
fn map_definition_row(row: &Row<'_>) -> rusqlite::Result<MetricDefinition> {
    let unit = match row.get::<_, Option<String>>(2)? {
        Some(raw) => Some(raw.parse::<UnitType>().map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(err))
        })?),
        None => None,
    };
    Ok(MetricDefinition {
        id: parse_column::<MetricId>(row, 0)?,
        kind: parse_column::<MetricKind>(row, 1)?,
        unit,
        description: row.get(3)?,
    })
}

/// Maps [`BUILD_COLUMNS`].
fn map_build_row(row: &Row<'_>) -> rusqlite::Result<BuildContext> {
    Ok(BuildContext {
        id: BuildId::new(row.get(0)?),
        commit_sha: row.get(1)?,
        branch: row.get(2)?,
        run_id: row.get(3)?,
        run_number: row.get(4)?,
        event_name: row.get(5)?,
        timestamp: row.get(6)?,
    })
}

/// Maps [`VALUE_COLUMNS`].
fn map_value_row(row: &Row<'_>) -> rusqlite::Result<MetricValue> {
    Ok(MetricValue {
        id: row.get(0)?,
        metric_id: parse_column::<MetricId>(row, 1)?,
        build_id: BuildId::new(row.get(2)?),
        value_numeric: row.get(3)?,
        value_label: row.get(4)?,
    })
}
