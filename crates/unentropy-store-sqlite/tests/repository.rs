// crates/unentropy-store-sqlite/tests/repository.rs
// ============================================================================
// Module: Metrics Repository Tests
// Description: Write path and read contracts of the metrics repository.
// Purpose: Validate ordering, push-only filtering, baselines, and overwrite
//          semantics against a real SQLite file.
// ============================================================================

//! ## Overview
//! Integration tests for [`MetricsRepository`]:
//! - Recording scenarios (single build, duplicate build, overwrite)
//! - Push-only filtering for time series and build listings
//! - Baseline selection by branch, recency, and age window
//! - Kind mismatches and malformed contexts roll back cleanly

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use rusqlite::Connection;
use tempfile::TempDir;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use unentropy_core::BuildId;
use unentropy_core::MetricDefinition;
use unentropy_core::MetricId;
use unentropy_core::MetricKind;
use unentropy_core::NewBuildContext;
use unentropy_core::PULL_REQUEST_EVENT;
use unentropy_core::PUSH_EVENT;
use unentropy_core::RecordedMetric;
use unentropy_core::UnitType;
use unentropy_store_sqlite::ConnectionSettings;
use unentropy_store_sqlite::DEFAULT_BASELINE_MAX_AGE_DAYS;
use unentropy_store_sqlite::MetricsRepository;
use unentropy_store_sqlite::SqliteStoreError;
use unentropy_store_sqlite::initialize_schema;
use unentropy_store_sqlite::open_connection;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn migrated(temp: &TempDir) -> Connection {
    let mut connection =
        open_connection(&temp.path().join("metrics.db"), &ConnectionSettings::default())
            .expect("open connection");
    initialize_schema(&mut connection, None).expect("migrate");
    connection
}

fn days_ago(days: i64) -> String {
    (OffsetDateTime::now_utc() - Duration::days(days)).format(&Rfc3339).unwrap()
}

fn build(sha: &str, run_id: &str, branch: &str, event: &str, timestamp: &str) -> NewBuildContext {
    NewBuildContext {
        commit_sha: sha.to_string(),
        branch: branch.to_string(),
        run_id: run_id.to_string(),
        run_number: run_id.parse().unwrap_or(1),
        event_name: Some(event.to_string()),
        timestamp: timestamp.to_string(),
    }
}

fn push(sha: &str, run_id: &str, timestamp: &str) -> NewBuildContext {
    build(sha, run_id, "main", PUSH_EVENT, timestamp)
}

fn metric_id(raw: &str) -> MetricId {
    MetricId::parse(raw).unwrap()
}

fn coverage(value: f64) -> RecordedMetric {
    RecordedMetric::numeric(
        MetricDefinition::new(metric_id("coverage"), MetricKind::Numeric)
            .with_unit(UnitType::Percent)
            .with_description("Line coverage"),
        value,
    )
}

fn release(label: &str) -> RecordedMetric {
    RecordedMetric::label(MetricDefinition::new(metric_id("release"), MetricKind::Label), label)
}

// ============================================================================
// SECTION: Recording
// ============================================================================

#[test]
fn single_build_produces_one_series_point() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    let sha = "aaa1111111111111111111111111111111111111";

    let recorded = repository
        .record_build(&push(sha, "1", "2024-05-01T12:00:00Z"), &[coverage(85.5)])
        .unwrap();

    assert!(recorded.inserted);
    let series = repository.metric_time_series(&metric_id("coverage")).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].value.value_numeric, Some(85.5));
    assert_eq!(series[0].value.build_id, recorded.build_id);
    assert_eq!(series[0].commit_sha, sha);
    assert_eq!(series[0].build_timestamp, "2024-05-01T12:00:00Z");
    let definition = repository.metric_definition(&metric_id("coverage")).unwrap().unwrap();
    assert_eq!(definition.unit, Some(UnitType::Percent));
}

#[test]
fn duplicate_build_reuses_existing_row() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    let context = push("abc", "7", "2024-05-01T12:00:00Z");

    let first = repository.record_build(&context, &[coverage(70.0)]).unwrap();
    let second = repository.record_build(&context, &[release("v2")]).unwrap();

    assert!(first.inserted);
    assert!(!second.inserted);
    assert_eq!(first.build_id, second.build_id);
    assert_eq!(repository.build_count().unwrap(), 1);
    assert_eq!(repository.all_build_contexts(false).unwrap().len(), 1);
    assert_eq!(repository.metric_values_for_build(first.build_id).unwrap().len(), 2);
}

#[test]
fn rerecording_a_metric_for_a_build_overwrites() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    let context = push("abc", "7", "2024-05-01T12:00:00Z");

    let recorded = repository.record_build(&context, &[coverage(70.0)]).unwrap();
    repository.record_build(&context, &[coverage(75.0)]).unwrap();

    let values = repository.metric_values_for_build(recorded.build_id).unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value_numeric, Some(75.0));
    assert_eq!(values[0].value_label, None);
}

#[test]
fn definition_upsert_keeps_prior_unit_and_description() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    repository.record_build(&push("a", "1", "2024-05-01T00:00:00Z"), &[coverage(1.0)]).unwrap();

    let bare = RecordedMetric::numeric(
        MetricDefinition::new(metric_id("coverage"), MetricKind::Numeric),
        2.0,
    );
    repository.record_build(&push("b", "2", "2024-05-02T00:00:00Z"), &[bare]).unwrap();

    let definition = repository.metric_definition(&metric_id("coverage")).unwrap().unwrap();
    assert_eq!(definition.unit, Some(UnitType::Percent));
    assert_eq!(definition.description.as_deref(), Some("Line coverage"));
}

#[test]
fn definition_upsert_refreshes_unit_when_provided() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    repository.record_build(&push("a", "1", "2024-05-01T00:00:00Z"), &[coverage(1.0)]).unwrap();

    let decimal = RecordedMetric::numeric(
        MetricDefinition::new(metric_id("coverage"), MetricKind::Numeric)
            .with_unit(UnitType::Decimal),
        2.0,
    );
    repository.record_build(&push("b", "2", "2024-05-02T00:00:00Z"), &[decimal]).unwrap();

    let definition = repository.metric_definition(&metric_id("coverage")).unwrap().unwrap();
    assert_eq!(definition.unit, Some(UnitType::Decimal));
}

#[test]
fn kind_mismatch_with_stored_definition_rolls_back() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    repository.record_build(&push("a", "1", "2024-05-01T00:00:00Z"), &[coverage(1.0)]).unwrap();

    let relabeled =
        RecordedMetric::label(MetricDefinition::new(metric_id("coverage"), MetricKind::Label), "x");
    let context = push("b", "2", "2024-05-02T00:00:00Z");
    let Err(err) = repository.record_build(&context, &[release("v1"), relabeled]) else {
        panic!("kind mismatch should fail");
    };

    assert!(matches!(err, SqliteStoreError::Invalid(_)), "unexpected error: {err}");
    assert_eq!(repository.build_count().unwrap(), 1);
    assert!(repository.metric_definition(&metric_id("release")).unwrap().is_none());
    let definition = repository.metric_definition(&metric_id("coverage")).unwrap().unwrap();
    assert_eq!(definition.kind, MetricKind::Numeric);
}

#[test]
fn malformed_build_context_is_rejected() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);

    let Err(err) = repository.record_build(&push("a", "1", "yesterday"), &[coverage(1.0)]) else {
        panic!("non RFC 3339 timestamp should fail");
    };
    assert!(matches!(err, SqliteStoreError::Invalid(ref message) if message.contains("timestamp")));

    let Err(err) = repository.record_build(&push("", "1", "2024-05-01T00:00:00Z"), &[]) else {
        panic!("empty commit sha should fail");
    };
    assert!(matches!(
        err,
        SqliteStoreError::Invalid(ref message) if message.contains("commit_sha")
    ));
    assert_eq!(repository.build_count().unwrap(), 0);
}

#[test]
fn non_finite_readings_are_rejected() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);

    let Err(err) =
        repository.record_build(&push("a", "1", "2024-05-01T00:00:00Z"), &[coverage(f64::NAN)])
    else {
        panic!("NaN should fail");
    };
    assert!(matches!(err, SqliteStoreError::Invalid(_)));
    assert_eq!(repository.build_count().unwrap(), 0);
}

// ============================================================================
// SECTION: Build Listings
// ============================================================================

#[test]
fn build_listing_orders_by_timestamp_and_filters_push_builds_with_metrics() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    repository.record_build(&push("c", "3", "2024-05-03T00:00:00Z"), &[coverage(3.0)]).unwrap();
    repository.record_build(&push("a", "1", "2024-05-01T00:00:00Z"), &[coverage(1.0)]).unwrap();
    repository.record_build(&push("empty", "9", "2024-05-02T00:00:00Z"), &[]).unwrap();
    repository
        .record_build(
            &build("pr", "4", "feature", PULL_REQUEST_EVENT, "2024-05-04T00:00:00Z"),
            &[coverage(4.0)],
        )
        .unwrap();

    let all: Vec<String> = repository
        .all_build_contexts(false)
        .unwrap()
        .into_iter()
        .map(|context| context.commit_sha)
        .collect();
    assert_eq!(all, ["a", "empty", "c", "pr"]);

    let with_metrics: Vec<String> = repository
        .all_build_contexts(true)
        .unwrap()
        .into_iter()
        .map(|context| context.commit_sha)
        .collect();
    assert_eq!(with_metrics, ["a", "c"]);
}

#[test]
fn build_listing_orders_across_utc_offsets() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    repository.record_build(&push("utc", "1", "2024-01-01T09:00:00Z"), &[]).unwrap();
    repository.record_build(&push("offset", "2", "2024-01-01T10:00:00+02:00"), &[]).unwrap();

    let order: Vec<String> = repository
        .all_build_contexts(false)
        .unwrap()
        .into_iter()
        .map(|context| context.commit_sha)
        .collect();
    assert_eq!(order, ["offset", "utc"]);
}

#[test]
fn build_context_round_trips_fields() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    let context = build("abc", "42", "release", PUSH_EVENT, "2024-05-01T00:00:00Z");
    let recorded = repository.record_build(&context, &[]).unwrap();

    let stored = repository.build_context(recorded.build_id).unwrap().unwrap();
    assert_eq!(stored.id, recorded.build_id);
    assert_eq!(stored.run_number, 42);
    assert_eq!(stored.branch, "release");
    assert!(stored.is_push());
    assert!(repository.build_context(BuildId::new(999)).unwrap().is_none());
}

// ============================================================================
// SECTION: Time Series
// ============================================================================

#[test]
fn time_series_is_push_only_and_ordered() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    repository.record_build(&push("b", "2", "2024-05-02T00:00:00Z"), &[coverage(2.0)]).unwrap();
    repository.record_build(&push("a", "1", "2024-05-01T00:00:00Z"), &[coverage(1.0)]).unwrap();
    repository
        .record_build(
            &build("pr", "3", "feature", PULL_REQUEST_EVENT, "2024-05-03T00:00:00Z"),
            &[coverage(99.0)],
        )
        .unwrap();

    let values: Vec<f64> = repository
        .metric_time_series(&metric_id("coverage"))
        .unwrap()
        .into_iter()
        .filter_map(|sample| sample.value.value_numeric)
        .collect();
    assert_eq!(values, [1.0, 2.0]);
    assert!(repository.metric_time_series(&metric_id("unknown")).unwrap().is_empty());
}

#[test]
fn label_series_carry_labels() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    repository.record_build(&push("a", "1", "2024-05-01T00:00:00Z"), &[release("v1")]).unwrap();

    let series = repository.metric_time_series(&metric_id("release")).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].value.value_label.as_deref(), Some("v1"));
    assert_eq!(series[0].value.value_numeric, None);
}

// ============================================================================
// SECTION: Baselines
// ============================================================================

#[test]
fn baseline_is_the_most_recent_push_value_on_the_branch() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    let id = metric_id("coverage");
    repository.record_build(&push("a", "1", &days_ago(3)), &[coverage(80.0)]).unwrap();
    repository.record_build(&push("b", "2", &days_ago(2)), &[coverage(87.0)]).unwrap();

    assert_eq!(
        repository.baseline_metric_value(&id, "main", DEFAULT_BASELINE_MAX_AGE_DAYS).unwrap(),
        Some(87.0)
    );

    repository.record_build(&push("old", "3", &days_ago(10)), &[coverage(10.0)]).unwrap();
    assert_eq!(repository.baseline_metric_value(&id, "main", 90).unwrap(), Some(87.0));

    repository.record_build(&push("new", "4", &days_ago(1)), &[coverage(91.0)]).unwrap();
    assert_eq!(repository.baseline_metric_value(&id, "main", 90).unwrap(), Some(91.0));
}

#[test]
fn baseline_ignores_other_branches_pull_requests_and_stale_builds() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    let id = metric_id("coverage");
    repository.record_build(&push("stale", "1", &days_ago(120)), &[coverage(50.0)]).unwrap();
    repository
        .record_build(&build("dev", "2", "develop", PUSH_EVENT, &days_ago(1)), &[coverage(60.0)])
        .unwrap();
    repository
        .record_build(
            &build("pr", "3", "main", PULL_REQUEST_EVENT, &days_ago(1)),
            &[coverage(70.0)],
        )
        .unwrap();

    assert_eq!(repository.baseline_metric_value(&id, "main", 90).unwrap(), None);
    assert_eq!(repository.baseline_metric_value(&id, "main", 365).unwrap(), Some(50.0));
    assert_eq!(repository.baseline_metric_value(&id, "main", u32::MAX).unwrap(), Some(50.0));
    assert_eq!(repository.baseline_metric_value(&id, "develop", 90).unwrap(), Some(60.0));
    assert_eq!(repository.baseline_metric_value(&metric_id("missing"), "main", 90).unwrap(), None);
}

#[test]
fn baseline_values_are_limited_and_most_recent_first() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    for day in 1..=5_i32 {
        repository
            .record_build(
                &push(&format!("sha{day}"), &day.to_string(), &days_ago(i64::from(day))),
                &[coverage(f64::from(day))],
            )
            .unwrap();
    }

    let values = repository.baseline_metric_values(&metric_id("coverage"), "main", 3, 90).unwrap();
    assert_eq!(values, [1.0, 2.0, 3.0]);
}

#[test]
fn pull_request_value_is_read_by_build() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    let recorded = repository
        .record_build(
            &build("pr", "3", "feature", PULL_REQUEST_EVENT, &days_ago(0)),
            &[coverage(77.5), release("rc")],
        )
        .unwrap();

    assert_eq!(
        repository.pull_request_metric_value(&metric_id("coverage"), recorded.build_id).unwrap(),
        Some(77.5)
    );
    assert_eq!(
        repository.pull_request_metric_value(&metric_id("release"), recorded.build_id).unwrap(),
        None
    );
}

// ============================================================================
// SECTION: Listings
// ============================================================================

#[test]
fn definitions_and_values_are_listed_in_stable_order() {
    let temp = TempDir::new().unwrap();
    let connection = migrated(&temp);
    let repository = MetricsRepository::new(&connection);
    let second = repository
        .record_build(&push("b", "2", "2024-05-02T00:00:00Z"), &[release("v2"), coverage(2.0)])
        .unwrap();
    let first = repository
        .record_build(&push("a", "1", "2024-05-01T00:00:00Z"), &[coverage(1.0)])
        .unwrap();

    let definitions: Vec<String> = repository
        .all_metric_definitions()
        .unwrap()
        .into_iter()
        .map(|definition| definition.id.to_string())
        .collect();
    assert_eq!(definitions, ["coverage", "release"]);

    let for_build: Vec<String> = repository
        .metric_values_for_build(second.build_id)
        .unwrap()
        .into_iter()
        .map(|value| value.metric_id.to_string())
        .collect();
    assert_eq!(for_build, ["coverage", "release"]);

    let all: Vec<(BuildId, String)> = repository
        .all_metric_values()
        .unwrap()
        .into_iter()
        .map(|value| (value.build_id, value.metric_id.to_string()))
        .collect();
    assert_eq!(
        all,
        [
            (second.build_id, "coverage".to_string()),
            (second.build_id, "release".to_string()),
            (first.build_id, "coverage".to_string()),
        ]
    );
}

// ============================================================================
// SECTION: Locking
// ============================================================================

#[test]
fn write_lock_past_busy_timeout_is_reported_as_busy() {
    let temp = TempDir::new().unwrap();
    let holder = migrated(&temp);
    let settings = ConnectionSettings {
        busy_timeout_ms: 50,
        ..ConnectionSettings::default()
    };
    let writer = open_connection(&temp.path().join("metrics.db"), &settings).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let result = MetricsRepository::new(&writer)
        .record_build(&push("aaa", "1", "2024-05-01T00:00:00Z"), &[coverage(80.0)]);

    assert!(matches!(result, Err(SqliteStoreError::Busy(_))), "unexpected result: {result:?}");
    holder.execute_batch("COMMIT;").unwrap();
    assert_eq!(MetricsRepository::new(&writer).build_count().unwrap(), 0);
}
