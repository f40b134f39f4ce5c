// crates/unentropy-store-sqlite/src/repository.rs
// ============================================================================
// Module: Metrics Repository
// Description: Typed write and read operations over the metrics tables.
// Purpose: Own the transactional recording path and the read contracts used
//          by reporting and gate evaluation.
// Dependencies: rusqlite, time, tracing, unentropy-core
// ============================================================================

//! ## Overview
//! [`MetricsRepository`] borrows a migrated connection. Recording a build is a
//! single transaction: the build row, every definition upsert, and every value
//! upsert commit together or not at all.
//!
//! Only `push` builds contribute to history: time series, baselines, and the
//! `only_with_metrics` build listing exclude every other event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use unentropy_core::BuildContext;
use unentropy_core::BuildId;
use unentropy_core::MetricDefinition;
use unentropy_core::MetricId;
use unentropy_core::MetricSample;
use unentropy_core::MetricValue;
use unentropy_core::NewBuildContext;
use unentropy_core::RecordedMetric;

use crate::SqliteStoreError;
use crate::error::classify_db_error;
use crate::queries;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default number of builds considered for a baseline window.
pub const DEFAULT_BASELINE_MAX_BUILDS: u32 = 20;
/// Default baseline age window in days.
pub const DEFAULT_BASELINE_MAX_AGE_DAYS: u32 = 90;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of [`MetricsRepository::record_build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedBuild {
    /// Identifier of the build row the metrics were written to.
    pub build_id: BuildId,
    /// False when `(commit_sha, run_id)` was already recorded and reused.
    pub inserted: bool,
}

/// Repository over a migrated metrics database.
///
/// # Invariants
/// - The borrowed connection has had the schema migrated.
#[derive(Debug, Clone, Copy)]
pub struct MetricsRepository<'a> {
    /// Borrowed connection.
    connection: &'a Connection,
}

// ============================================================================
// SECTION: Repository
// ============================================================================

impl<'a> MetricsRepository<'a> {
    /// Wraps a migrated connection.
    #[must_use]
    pub const fn new(connection: &'a Connection) -> Self {
        Self {
            connection,
        }
    }

    /// Records a build and its metrics in one transaction.
    ///
    /// Re-recording an existing `(commit_sha, run_id)` creates no second row:
    /// the existing build is reused and `inserted` is false. Values for a
    /// `(metric, build)` pair already present are overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] for a malformed build context or a
    /// reading whose kind differs from the stored definition type,
    /// [`SqliteStoreError::Constraint`] for constraint violations, and
    /// [`SqliteStoreError::Busy`] when the database stays locked past the busy
    /// timeout. Nothing is written on error.
    pub fn record_build(
        &self,
        build: &NewBuildContext,
        metrics: &[RecordedMetric],
    ) -> Result<RecordedBuild, SqliteStoreError> {
        build.validate()?;
        for metric in metrics {
            metric.validate()?;
        }
        let tx = Transaction::new_unchecked(self.connection, TransactionBehavior::Immediate)
            .map_err(|err| classify_db_error(&err))?;
        let (build_id, inserted) = match queries::insert_build_context(&tx, build)? {
            Some(build_id) => (build_id, true),
            None => {
                let build_id = queries::select_build_id(&tx, &build.commit_sha, &build.run_id)?
                    .ok_or_else(|| {
                        SqliteStoreError::Db("conflicting build row not found".to_string())
                    })?;
                (build_id, false)
            }
        };
        for metric in metrics {
            let stored_kind = queries::upsert_metric_definition(&tx, &metric.definition)?;
            if stored_kind != metric.reading.kind() {
                return Err(SqliteStoreError::Invalid(format!(
                    "metric {} is stored as {stored_kind} but reading is {}",
                    metric.definition.id,
                    metric.reading.kind()
                )));
            }
            queries::upsert_metric_value(&tx, &metric.definition.id, build_id, &metric.reading)?;
        }
        tx.commit().map_err(|err| classify_db_error(&err))?;
        debug!(
            build_id = build_id.get(),
            inserted,
            metrics = metrics.len(),
            commit_sha = %build.commit_sha,
            "recorded build"
        );
        Ok(RecordedBuild {
            build_id,
            inserted,
        })
    }

    /// Lists builds ordered by timestamp ascending (id breaks ties).
    ///
    /// With `only_with_metrics`, only push builds that have at least one
    /// value are returned.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn all_build_contexts(
        &self,
        only_with_metrics: bool,
    ) -> Result<Vec<BuildContext>, SqliteStoreError> {
        queries::select_all_build_contexts(self.connection, only_with_metrics)
    }

    /// Returns one build context.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn build_context(&self, id: BuildId) -> Result<Option<BuildContext>, SqliteStoreError> {
        queries::select_build_context(self.connection, id)
    }

    /// Counts recorded builds.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn build_count(&self) -> Result<u64, SqliteStoreError> {
        queries::count_builds(self.connection)
    }

    /// Returns one metric definition.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn metric_definition(
        &self,
        id: &MetricId,
    ) -> Result<Option<MetricDefinition>, SqliteStoreError> {
        queries::select_metric_definition(self.connection, id)
    }

    /// Lists every metric definition ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn all_metric_definitions(&self) -> Result<Vec<MetricDefinition>, SqliteStoreError> {
        queries::select_all_metric_definitions(self.connection)
    }

    /// Lists the values recorded for one build ordered by metric id.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn metric_values_for_build(
        &self,
        build_id: BuildId,
    ) -> Result<Vec<MetricValue>, SqliteStoreError> {
        queries::select_metric_values_for_build(self.connection, build_id)
    }

    /// Lists every value ordered by build id, then metric id.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn all_metric_values(&self) -> Result<Vec<MetricValue>, SqliteStoreError> {
        queries::select_all_metric_values(self.connection)
    }

    /// Returns every push-build value of a metric, oldest build first.
    ///
    /// An unknown metric yields an empty series.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn metric_time_series(
        &self,
        id: &MetricId,
    ) -> Result<Vec<MetricSample>, SqliteStoreError> {
        queries::select_metric_time_series(self.connection, id)
    }

    /// Returns the most recent numeric push-build value of a metric on
    /// `branch` no older than `max_age_days`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn baseline_metric_value(
        &self,
        id: &MetricId,
        branch: &str,
        max_age_days: u32,
    ) -> Result<Option<f64>, SqliteStoreError> {
        Ok(self.baseline_metric_values(id, branch, 1, max_age_days)?.into_iter().next())
    }

    /// Returns up to `max_builds` numeric push-build values of a metric on
    /// `branch` no older than `max_age_days`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn baseline_metric_values(
        &self,
        id: &MetricId,
        branch: &str,
        max_builds: u32,
        max_age_days: u32,
    ) -> Result<Vec<f64>, SqliteStoreError> {
        let cutoff = age_cutoff(OffsetDateTime::now_utc(), max_age_days);
        queries::select_baseline_values(self.connection, id, branch, &cutoff, max_builds)
    }

    /// Returns the numeric value of a metric recorded for one build, typically
    /// a pull-request build compared against a baseline.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn pull_request_metric_value(
        &self,
        id: &MetricId,
        build_id: BuildId,
    ) -> Result<Option<f64>, SqliteStoreError> {
        queries::select_build_numeric_value(self.connection, id, build_id)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Earliest cutoff; windows reaching further back include every build.
const EARLIEST_CUTOFF: &str = "0000-01-01T00:00:00Z";

/// Formats the RFC 3339 instant `max_age_days` before `now`.
///
/// Windows beyond the RFC 3339 year range saturate to [`EARLIEST_CUTOFF`].
fn age_cutoff(now: OffsetDateTime, max_age_days: u32) -> String {
    now.checked_sub(Duration::days(i64::from(max_age_days)))
        .and_then(|cutoff| cutoff.format(&Rfc3339).ok())
        .unwrap_or_else(|| EARLIEST_CUTOFF.to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
