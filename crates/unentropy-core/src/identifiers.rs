// crates/unentropy-core/src/identifiers.rs
// ============================================================================
// Module: Identifiers
// Description: Newtype identifiers for metrics and builds.
// Purpose: Keep metric slugs validated and build ids distinct from raw ints.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Metric identifiers are lowercase slugs (`[a-z0-9-]+`) that double as the
//! `metric_definitions` primary key. Build identifiers wrap the
//! auto-increment row id of `build_contexts`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::ValidationError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum metric identifier length in bytes.
pub const MAX_METRIC_ID_LENGTH: usize = 64;

// ============================================================================
// SECTION: Metric Identifier
// ============================================================================

/// Metric identifier slug.
///
/// # Invariants
/// - Non-empty, at most [`MAX_METRIC_ID_LENGTH`] bytes.
/// - Contains only `a-z`, `0-9`, and `-`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricId(String);

impl MetricId {
    /// Parses and validates a metric identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MetricId`] when the slug is empty, too long,
    /// or contains characters outside `[a-z0-9-]`.
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ValidationError::MetricId("metric id must not be empty".to_string()));
        }
        if value.len() > MAX_METRIC_ID_LENGTH {
            return Err(ValidationError::MetricId(format!(
                "metric id exceeds {MAX_METRIC_ID_LENGTH} bytes"
            )));
        }
        if !value.bytes().all(is_slug_byte) {
            return Err(ValidationError::MetricId(format!(
                "metric id must match [a-z0-9-]+: {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MetricId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for MetricId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<MetricId> for String {
    fn from(value: MetricId) -> Self {
        value.0
    }
}

/// Returns true for bytes allowed in a metric identifier.
const fn is_slug_byte(byte: u8) -> bool {
    byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-'
}

// ============================================================================
// SECTION: Build Identifier
// ============================================================================

/// Build context row identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(i64);

impl BuildId {
    /// Wraps a raw row identifier.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw row identifier.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
