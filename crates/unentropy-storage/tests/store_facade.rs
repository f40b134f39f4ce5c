// crates/unentropy-storage/tests/store_facade.rs
// ============================================================================
// Module: Metrics Store Facade Tests
// Description: End-to-end scenarios through MetricsStore on a local file.
// Purpose: Validate the ready/repository/persist/close contract and history.
// Dependencies: unentropy-storage, unentropy-core, tempfile
// ============================================================================

//! ## Overview
//! Records builds through the facade and reads them back: time series,
//! baselines, push-only filtering, and lifecycle errors around `close`.

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

mod common;

use tempfile::TempDir;
use unentropy_core::MetricDefinition;
use unentropy_core::MetricId;
use unentropy_core::MetricKind;
use unentropy_core::RecordedMetric;
use unentropy_storage::MetricsStore;
use unentropy_storage::StorageError;

use crate::common::coverage;
use crate::common::coverage_id;
use crate::common::local_config;
use crate::common::pull_request;
use crate::common::push;

/// Wide enough that fixed 2024 timestamps stay inside the baseline window.
const MAX_AGE_DAYS: u32 = 36_500;

fn open_store(temp: &TempDir) -> MetricsStore {
    MetricsStore::open(local_config(&temp.path().join("metrics.db"))).unwrap()
}

#[test]
fn records_and_reads_time_series() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let sha = "aaa1111111111111111111111111111111111111";
    let recorded = store
        .repository()
        .unwrap()
        .record_build(&push(sha, "1", "2024-05-01T12:00:00Z"), &[coverage(85.5)])
        .unwrap();
    assert!(recorded.inserted);

    let series = store.repository().unwrap().metric_time_series(&coverage_id()).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].value.value_numeric, Some(85.5));
    assert_eq!(series[0].commit_sha, sha);
    let unknown = MetricId::parse("bundle-size").unwrap();
    assert!(store.repository().unwrap().metric_time_series(&unknown).unwrap().is_empty());
}

#[test]
fn baseline_tracks_most_recent_push() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let repository = store.repository().unwrap();
    repository.record_build(&push("aaa", "1", "2024-05-01T00:00:00Z"), &[coverage(80.0)]).unwrap();
    repository.record_build(&push("bbb", "2", "2024-05-02T00:00:00Z"), &[coverage(87.0)]).unwrap();
    let baseline = repository.baseline_metric_value(&coverage_id(), "main", MAX_AGE_DAYS).unwrap();
    assert_eq!(baseline, Some(87.0));

    repository.record_build(&push("ccc", "3", "2024-04-01T00:00:00Z"), &[coverage(10.0)]).unwrap();
    let baseline = repository.baseline_metric_value(&coverage_id(), "main", MAX_AGE_DAYS).unwrap();
    assert_eq!(baseline, Some(87.0));
    let other = repository.baseline_metric_value(&coverage_id(), "develop", MAX_AGE_DAYS).unwrap();
    assert_eq!(other, None);
}

#[test]
fn pull_request_builds_stay_out_of_history() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let repository = store.repository().unwrap();
    repository.record_build(&push("aaa", "1", "2024-05-01T00:00:00Z"), &[coverage(80.0)]).unwrap();
    let pr = repository
        .record_build(&pull_request("bbb", "2", "2024-05-02T00:00:00Z"), &[coverage(90.0)])
        .unwrap();
    repository.record_build(&push("ccc", "3", "2024-05-03T00:00:00Z"), &[]).unwrap();

    let all = repository.all_build_contexts(false).unwrap();
    assert_eq!(all.len(), 3);
    let with_metrics = repository.all_build_contexts(true).unwrap();
    assert_eq!(with_metrics.len(), 1);
    assert_eq!(with_metrics[0].commit_sha, "aaa");

    let series = repository.metric_time_series(&coverage_id()).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].value.value_numeric, Some(80.0));
    let baseline = repository.baseline_metric_value(&coverage_id(), "main", MAX_AGE_DAYS).unwrap();
    assert_eq!(baseline, Some(80.0));
    let pr_value = repository.pull_request_metric_value(&coverage_id(), pr.build_id).unwrap();
    assert_eq!(pr_value, Some(90.0));
}

#[test]
fn label_metrics_round_trip_through_store() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let repository = store.repository().unwrap();
    let definition =
        MetricDefinition::new(MetricId::parse("build-status").unwrap(), MetricKind::Label);
    let recorded = repository
        .record_build(
            &push("aaa", "1", "2024-05-01T00:00:00Z"),
            &[RecordedMetric::label(definition, "green"), coverage(75.0)],
        )
        .unwrap();
    let values = repository.metric_values_for_build(recorded.build_id).unwrap();
    let ids: Vec<&str> = values.iter().map(|value| value.metric_id.as_str()).collect();
    assert_eq!(ids, vec!["build-status", "coverage"]);
    assert_eq!(values[0].value_label.as_deref(), Some("green"));
    assert_eq!(values[0].value_numeric, None);
}

#[test]
fn repository_requires_ready() {
    let temp = TempDir::new().unwrap();
    let mut store = MetricsStore::new(local_config(&temp.path().join("metrics.db"))).unwrap();
    assert!(matches!(store.repository(), Err(StorageError::NotInitialized)));
    assert!(matches!(store.persist(), Err(StorageError::NotInitialized)));
    store.ready().unwrap();
    store.ready().unwrap();
    assert_eq!(store.repository().unwrap().build_count().unwrap(), 0);
}

#[test]
fn close_is_terminal_and_data_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("metrics.db");
    let mut store = MetricsStore::open(local_config(&path)).unwrap();
    store
        .repository()
        .unwrap()
        .record_build(&push("aaa", "1", "2024-05-01T00:00:00Z"), &[coverage(85.5)])
        .unwrap();
    store.persist().unwrap();
    store.close().unwrap();
    store.close().unwrap();
    assert!(matches!(store.repository(), Err(StorageError::Closed)));
    assert!(matches!(store.ready(), Err(StorageError::Closed)));
    assert!(matches!(store.persist(), Err(StorageError::Closed)));
    drop(store);

    let reopened = MetricsStore::open(local_config(&path)).unwrap();
    assert_eq!(reopened.repository().unwrap().build_count().unwrap(), 1);
    assert_eq!(reopened.repository().unwrap().all_metric_definitions().unwrap().len(), 1);
}

#[test]
fn dropping_store_releases_the_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("metrics.db");
    {
        let store = MetricsStore::open(local_config(&path)).unwrap();
        store
            .repository()
            .unwrap()
            .record_build(&push("aaa", "1", "2024-05-01T00:00:00Z"), &[coverage(60.0)])
            .unwrap();
    }
    let reopened = MetricsStore::open(local_config(&path)).unwrap();
    let series = reopened.repository().unwrap().metric_time_series(&coverage_id()).unwrap();
    assert_eq!(series.len(), 1);
}

#[test]
fn accessors_expose_config_and_provider() {
    let temp = TempDir::new().unwrap();
    let config = local_config(&temp.path().join("metrics.db"));
    let store = MetricsStore::open(config.clone()).unwrap();
    assert_eq!(store.config(), &config);
    assert_eq!(store.provider().kind(), "sqlite-local");
    assert!(store.provider().is_initialized());
}

#[test]
fn duplicate_build_reuses_row() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let repository = store.repository().unwrap();
    let first = repository
        .record_build(&push("aaa", "1", "2024-05-01T00:00:00Z"), &[coverage(70.0)])
        .unwrap();
    let second = repository
        .record_build(&push("aaa", "1", "2024-05-01T00:00:00Z"), &[coverage(71.0)])
        .unwrap();
    assert_eq!(first.build_id, second.build_id);
    assert!(!second.inserted);
    assert_eq!(repository.build_count().unwrap(), 1);
    let series = repository.metric_time_series(&coverage_id()).unwrap();
    assert_eq!(series[0].value.value_numeric, Some(71.0));
}
