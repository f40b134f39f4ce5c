// crates/unentropy-storage/src/factory.rs
// ============================================================================
// Module: Storage Provider Factory
// Description: Builds the provider selected by the storage configuration.
// Purpose: Keep medium selection in one place.
// Dependencies: unentropy-config
// ============================================================================

//! ## Overview
//! The tagged [`StorageConfig`] decides the provider at construction time.
//! Configuration is validated here, so a missing credential fails before any
//! file or network access.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;

use unentropy_config::StorageConfig;
use unentropy_config::StoreConfig;

use crate::ArtifactStorageProvider;
use crate::LocalStorageProvider;
use crate::S3StorageProvider;
use crate::StorageError;
use crate::StorageProvider;

// ============================================================================
// SECTION: Factory
// ============================================================================

/// Builds the provider for `config.storage`.
///
/// Unset artifact fields fall back to the `GITHUB_*` process environment.
///
/// # Errors
///
/// Returns [`StorageError::Config`] when the configuration is invalid and
/// [`StorageError`] when the provider's client cannot be built.
pub fn create_storage_provider(
    config: &StoreConfig,
) -> Result<Box<dyn StorageProvider>, StorageError> {
    create_storage_provider_with_env(config, |name| env::var(name).ok())
}

/// Builds the provider for `config.storage`, filling unset artifact fields
/// from `lookup` before validation.
///
/// # Errors
///
/// Returns [`StorageError::Config`] when the configuration is invalid and
/// [`StorageError`] when the provider's client cannot be built.
pub fn create_storage_provider_with_env(
    config: &StoreConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Box<dyn StorageProvider>, StorageError> {
    let config = StoreConfig {
        storage: config.storage.clone().with_env_from(lookup),
        connection: config.connection,
    };
    config.validate()?;
    let provider: Box<dyn StorageProvider> = match &config.storage {
        StorageConfig::SqliteLocal(local) => {
            Box::new(LocalStorageProvider::new(local, &config.connection)?)
        }
        StorageConfig::SqliteS3(s3) => Box::new(S3StorageProvider::new(s3, &config.connection)?),
        StorageConfig::SqliteArtifact(artifact) => Box::new(ArtifactStorageProvider::with_env(
            artifact,
            &config.connection,
            |_| None,
        )?),
    };
    Ok(provider)
}
