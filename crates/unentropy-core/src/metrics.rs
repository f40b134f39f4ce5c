// crates/unentropy-core/src/metrics.rs
// ============================================================================
// Module: Metrics
// Description: Metric definitions, readings, and stored values.
// Purpose: Model the numeric/label duality shared by definitions and values.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A metric definition fixes whether a metric carries numeric or label
//! readings. Stored values keep exactly one of `value_numeric` /
//! `value_label`, mirroring the `metric_values` check constraint.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::BuildId;
use crate::MetricId;
use crate::ValidationError;

// ============================================================================
// SECTION: Metric Kind
// ============================================================================

/// Kind of readings a metric produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Real-valued readings stored in `value_numeric`.
    Numeric,
    /// Free-form text readings stored in `value_label`.
    Label,
}

impl MetricKind {
    /// Returns the persisted `type` column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Label => "label",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "numeric" => Ok(Self::Numeric),
            "label" => Ok(Self::Label),
            other => Err(ValidationError::MetricKind(other.to_string())),
        }
    }
}

// ============================================================================
// SECTION: Units
// ============================================================================

/// Display unit attached to a metric definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    /// Percentage (0-100).
    Percent,
    /// Whole-number count.
    Integer,
    /// Size in bytes.
    Bytes,
    /// Duration in seconds.
    Duration,
    /// Arbitrary decimal number.
    Decimal,
}

impl UnitType {
    /// Returns the persisted `unit` column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Percent => "percent",
            Self::Integer => "integer",
            Self::Bytes => "bytes",
            Self::Duration => "duration",
            Self::Decimal => "decimal",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "percent" => Ok(Self::Percent),
            "integer" => Ok(Self::Integer),
            "bytes" => Ok(Self::Bytes),
            "duration" => Ok(Self::Duration),
            "decimal" => Ok(Self::Decimal),
            other => Err(ValidationError::Unit(other.to_string())),
        }
    }
}

// ============================================================================
// SECTION: Definitions
// ============================================================================

/// Schema of a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Metric identifier (primary key).
    pub id: MetricId,
    /// Reading kind.
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Optional display unit.
    #[serde(default)]
    pub unit: Option<UnitType>,
    /// Optional human description.
    #[serde(default)]
    pub description: Option<String>,
}

impl MetricDefinition {
    /// Creates a definition without unit or description.
    #[must_use]
    pub const fn new(id: MetricId, kind: MetricKind) -> Self {
        Self {
            id,
            kind,
            unit: None,
            description: None,
        }
    }

    /// Sets the display unit.
    #[must_use]
    pub fn with_unit(mut self, unit: UnitType) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ============================================================================
// SECTION: Readings
// ============================================================================

/// One already-parsed measurement handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricReading {
    /// Numeric reading.
    Numeric(f64),
    /// Label reading.
    Label(String),
}

impl MetricReading {
    /// Returns the kind of this reading.
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Self::Numeric(_) => MetricKind::Numeric,
            Self::Label(_) => MetricKind::Label,
        }
    }

    /// Returns the numeric value, if any.
    #[must_use]
    pub const fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => Some(*value),
            Self::Label(_) => None,
        }
    }

    /// Returns the label value, if any.
    #[must_use]
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Numeric(_) => None,
            Self::Label(value) => Some(value),
        }
    }
}

/// A metric definition paired with its reading for one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedMetric {
    /// Definition to upsert.
    pub definition: MetricDefinition,
    /// Reading to store.
    pub reading: MetricReading,
}

impl RecordedMetric {
    /// Pairs a numeric definition with a numeric reading.
    #[must_use]
    pub const fn numeric(definition: MetricDefinition, value: f64) -> Self {
        Self {
            definition,
            reading: MetricReading::Numeric(value),
        }
    }

    /// Pairs a label definition with a label reading.
    #[must_use]
    pub fn label(definition: MetricDefinition, value: impl Into<String>) -> Self {
        Self {
            definition,
            reading: MetricReading::Label(value.into()),
        }
    }

    /// Checks the reading against the definition kind.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Reading`] when the reading kind differs from
    /// the definition kind or a numeric reading is not finite.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reading.kind() != self.definition.kind {
            return Err(ValidationError::Reading(format!(
                "metric {} is {} but reading is {}",
                self.definition.id,
                self.definition.kind,
                self.reading.kind()
            )));
        }
        if let MetricReading::Numeric(value) = self.reading
            && !value.is_finite()
        {
            // SQLite stores NaN as NULL, which would break the value check.
            return Err(ValidationError::Reading(format!(
                "metric {} reading must be finite",
                self.definition.id
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Stored Values
// ============================================================================

/// One stored measurement of one metric for one build.
///
/// # Invariants
/// - Exactly one of `value_numeric` / `value_label` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Row identifier.
    pub id: i64,
    /// Metric identifier.
    pub metric_id: MetricId,
    /// Owning build.
    pub build_id: BuildId,
    /// Numeric value for numeric metrics.
    pub value_numeric: Option<f64>,
    /// Label value for label metrics.
    pub value_label: Option<String>,
}

impl MetricValue {
    /// Returns the stored reading.
    #[must_use]
    pub fn reading(&self) -> Option<MetricReading> {
        match (self.value_numeric, &self.value_label) {
            (Some(value), None) => Some(MetricReading::Numeric(value)),
            (None, Some(label)) => Some(MetricReading::Label(label.clone())),
            _ => None,
        }
    }
}

/// Time-series point: a metric value joined to its build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Stored value.
    #[serde(flatten)]
    pub value: MetricValue,
    /// Build commit SHA.
    pub commit_sha: String,
    /// Build branch.
    pub branch: String,
    /// Build run identifier.
    pub run_id: String,
    /// Build run number.
    pub run_number: i64,
    /// Build timestamp (RFC 3339).
    pub build_timestamp: String,
}
