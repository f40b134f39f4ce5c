// crates/unentropy-store-sqlite/src/lib.rs
// ============================================================================
// Module: Unentropy SQLite Store Library
// Description: SQLite connection handle, schema migrator, and repository.
// Purpose: Expose the single-file metrics database used by every backend.
// Dependencies: crate::{connection, error, migrations, queries, repository}
// ============================================================================

//! ## Overview
//! The metrics database is one embedded `SQLite` file holding three entity
//! tables plus a `schema_version` ledger. Callers open it with
//! [`open_connection`], bring it up to date with [`initialize_schema`], and
//! then read and write through [`MetricsRepository`].
//!
//! Invariants:
//! - One connection per database file; the store assumes a single writer.
//! - Repository operations run only after the schema is migrated.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod connection;
pub mod error;
pub mod migrations;
pub mod queries;
pub mod repository;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use connection::ConnectionSettings;
pub use connection::DEFAULT_BUSY_TIMEOUT_MS;
pub use connection::JournalMode;
pub use connection::SyncMode;
pub use connection::close_connection;
pub use connection::open_connection;
pub use error::SqliteStoreError;
pub use migrations::AppliedMigration;
pub use migrations::CURRENT_SCHEMA_VERSION;
pub use migrations::SchemaVersionRecord;
pub use migrations::current_version;
pub use migrations::initialize_schema;
pub use migrations::schema_versions;
pub use repository::DEFAULT_BASELINE_MAX_AGE_DAYS;
pub use repository::DEFAULT_BASELINE_MAX_BUILDS;
pub use repository::MetricsRepository;
pub use repository::RecordedBuild;
