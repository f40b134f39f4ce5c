// crates/unentropy-core/src/builds.rs
// ============================================================================
// Module: Build Contexts
// Description: Build context records and their validation.
// Purpose: Describe one recorded CI execution.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! A build context identifies one CI execution by `(commit_sha, run_id)`.
//! Only builds triggered by a [`PUSH_EVENT`] contribute to long-term history;
//! pull-request builds are recorded but excluded from trends and baselines.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::BuildId;
use crate::ValidationError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Event name of push-triggered builds.
pub const PUSH_EVENT: &str = "push";
/// Event name of pull-request-triggered builds.
pub const PULL_REQUEST_EVENT: &str = "pull_request";

// ============================================================================
// SECTION: Build Contexts
// ============================================================================

/// Build context to be recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBuildContext {
    /// Commit SHA the build ran against.
    pub commit_sha: String,
    /// Branch name.
    pub branch: String,
    /// CI run identifier.
    pub run_id: String,
    /// CI run number.
    pub run_number: i64,
    /// Trigger event (`push`, `pull_request`, ...).
    #[serde(default)]
    pub event_name: Option<String>,
    /// Build timestamp (RFC 3339).
    pub timestamp: String,
}

impl NewBuildContext {
    /// Validates required fields and the timestamp format.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::BuildContext`] when a required field is
    /// empty or the timestamp is not RFC 3339.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in
            [("commit_sha", &self.commit_sha), ("branch", &self.branch), ("run_id", &self.run_id)]
        {
            if value.trim().is_empty() {
                return Err(ValidationError::BuildContext(format!("{field} must be set")));
            }
        }
        OffsetDateTime::parse(&self.timestamp, &Rfc3339).map_err(|_| {
            ValidationError::BuildContext(format!(
                "timestamp must be RFC 3339: {}",
                self.timestamp
            ))
        })?;
        Ok(())
    }

    /// Returns true when the build was triggered by a push.
    #[must_use]
    pub fn is_push(&self) -> bool {
        self.event_name.as_deref() == Some(PUSH_EVENT)
    }
}

/// Stored build context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    /// Row identifier.
    pub id: BuildId,
    /// Commit SHA the build ran against.
    pub commit_sha: String,
    /// Branch name.
    pub branch: String,
    /// CI run identifier.
    pub run_id: String,
    /// CI run number.
    pub run_number: i64,
    /// Trigger event.
    pub event_name: Option<String>,
    /// Build timestamp (RFC 3339).
    pub timestamp: String,
}

impl BuildContext {
    /// Returns true when the build was triggered by a push.
    #[must_use]
    pub fn is_push(&self) -> bool {
        self.event_name.as_deref() == Some(PUSH_EVENT)
    }
}
