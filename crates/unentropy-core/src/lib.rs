// crates/unentropy-core/src/lib.rs
// ============================================================================
// Module: Unentropy Core Library
// Description: Public API surface for Unentropy domain types.
// Purpose: Expose metric, build, and identifier types shared by all crates.
// Dependencies: crate::{identifiers, metrics, builds}
// ============================================================================

//! ## Overview
//! Unentropy core defines the three entity kinds persisted by the metrics
//! store (metric definitions, build contexts, metric values) together with the
//! identifier newtypes and validation rules shared by the storage crates. It
//! performs no I/O.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod builds;
pub mod identifiers;
pub mod metrics;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use builds::BuildContext;
pub use builds::NewBuildContext;
pub use builds::PULL_REQUEST_EVENT;
pub use builds::PUSH_EVENT;
pub use identifiers::BuildId;
pub use identifiers::MetricId;
pub use metrics::MetricDefinition;
pub use metrics::MetricKind;
pub use metrics::MetricReading;
pub use metrics::MetricSample;
pub use metrics::MetricValue;
pub use metrics::RecordedMetric;
pub use metrics::UnitType;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Validation errors for domain inputs.
///
/// # Invariants
/// - Variants are stable for error classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Metric identifier is not a lowercase hyphen/digit slug.
    #[error("invalid metric id: {0}")]
    MetricId(String),
    /// Metric kind label is not recognized.
    #[error("invalid metric type: {0}")]
    MetricKind(String),
    /// Unit label is not recognized.
    #[error("invalid metric unit: {0}")]
    Unit(String),
    /// Build context fields are missing or malformed.
    #[error("invalid build context: {0}")]
    BuildContext(String),
    /// Metric reading does not match the definition type.
    #[error("metric reading mismatch: {0}")]
    Reading(String),
}
