// crates/unentropy-storage/src/lib.rs
// ============================================================================
// Module: Unentropy Storage Library
// Description: Storage providers and the metrics store facade.
// Purpose: Keep the metrics database durable across ephemeral CI runs.
// Dependencies: crate::{artifact, error, factory, local, provider, s3, store}
// ============================================================================

//! ## Overview
//! The database is always a local `SQLite` file; providers decide where that
//! file comes from and where it goes afterwards. [`MetricsStore`] ties a
//! provider to the schema migrator and the repository:
//!
//! ```text
//! MetricsStore::open(config)   // acquire the file, migrate the schema
//!     .repository()?           // record builds, read history
//! store.persist()?             // ship the file back to its medium
//! store.close()?               // release the connection and temp files
//! ```
//!
//! Invariants:
//! - One provider, one connection per store; a single writer at a time.
//! - Remote media transfer the whole file, never individual rows.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod artifact;
pub mod error;
pub mod factory;
pub mod local;
pub mod provider;
pub mod s3;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use artifact::ArtifactClient;
pub use artifact::ArtifactStorageProvider;
pub use artifact::ArtifactSummary;
pub use artifact::GitHubArtifactClient;
pub use artifact::WorkflowRunSummary;
pub use error::StorageError;
pub use factory::create_storage_provider;
pub use factory::create_storage_provider_with_env;
pub use local::LocalStorageProvider;
pub use provider::StorageProvider;
pub use s3::ObjectStoreClient;
pub use s3::S3StorageProvider;
pub use store::MetricsStore;
