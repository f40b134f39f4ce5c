// crates/unentropy-config/src/config.rs
// ============================================================================
// Module: Unentropy Storage Configuration
// Description: Configuration loading and validation for the metrics store.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, toml, unentropy-store-sqlite
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The `[storage]` table is tagged by `type` and selects one of three media:
//!
//! ```toml
//! [storage]
//! type = "sqlite-s3"
//! endpoint = "https://s3.example.com"
//! bucket = "metrics"
//! region = "us-east-1"
//! access_key_id = "..."
//! secret_access_key = "..."
//!
//! [connection]
//! busy_timeout_ms = 5000
//! ```
//!
//! Artifact storage falls back to the `GITHUB_TOKEN`, `GITHUB_REPOSITORY`,
//! and `GITHUB_REF_NAME` environment variables for unset fields. Resolution
//! of those fallbacks is explicit ([`StorageConfig::with_env_defaults`]) so
//! that parsing alone never reads the environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use unentropy_store_sqlite::ConnectionSettings;
use unentropy_store_sqlite::DEFAULT_BUSY_TIMEOUT_MS;
use unentropy_store_sqlite::JournalMode;
use unentropy_store_sqlite::SyncMode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "unentropy.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "UNENTROPY_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Upper bound for `connection.busy_timeout_ms`.
const MAX_BUSY_TIMEOUT_MS: u64 = 600_000;

/// Default local database path.
pub const DEFAULT_LOCAL_PATH: &str = "unentropy.db";
/// Default object key for the database in the bucket.
pub const DEFAULT_DATABASE_KEY: &str = "unentropy.db";
/// Default artifact name searched for and uploaded by the workflow.
pub const DEFAULT_ARTIFACT_NAME: &str = "unentropy-metrics";
/// Default local path the artifact database is extracted to.
pub const DEFAULT_ARTIFACT_DATABASE_PATH: &str = "./unentropy-metrics.db";
/// Branch filter used when neither config nor environment sets one.
pub const DEFAULT_BRANCH_FILTER: &str = "main";
/// Default GitHub REST API base URL.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Environment variable holding the GitHub API token.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
/// Environment variable holding the `owner/name` repository slug.
pub const GITHUB_REPOSITORY_ENV: &str = "GITHUB_REPOSITORY";
/// Environment variable holding the short ref name of the current run.
pub const GITHUB_REF_NAME_ENV: &str = "GITHUB_REF_NAME";

// ============================================================================
// SECTION: Store Config
// ============================================================================

/// Root storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Backing medium for the database file.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Connection tuning shared by every medium.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl StoreConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is `path` when given, else `$UNENTROPY_CONFIG`, else
    /// `unentropy.toml`. Environment fallbacks for artifact storage are
    /// applied before validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::parse(content)?;
        config.storage = config.storage.with_env_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without consulting the environment or validating.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or an unknown
    /// storage `type`.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.storage.validate()
    }
}

// ============================================================================
// SECTION: Connection Config
// ============================================================================

/// Connection tuning applied to every opened database handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SyncMode,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            sync_mode: SyncMode::default(),
        }
    }
}

impl ConnectionConfig {
    /// Builds connection settings for a medium's journal mode.
    #[must_use]
    pub const fn settings(&self, journal_mode: JournalMode) -> ConnectionSettings {
        ConnectionSettings {
            journal_mode,
            sync_mode: self.sync_mode,
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }

    /// Validates connection tuning.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.busy_timeout_ms == 0 || self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "connection.busy_timeout_ms must be between 1 and {MAX_BUSY_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Storage Config
// ============================================================================

/// Storage medium selection, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Database file on the local filesystem.
    SqliteLocal(LocalStorageConfig),
    /// Database file mirrored to an S3-compatible bucket.
    SqliteS3(S3StorageConfig),
    /// Database file carried between runs as a GitHub Actions artifact.
    SqliteArtifact(ArtifactStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::SqliteLocal(LocalStorageConfig::default())
    }
}

impl StorageConfig {
    /// Returns the configured `type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SqliteLocal(_) => "sqlite-local",
            Self::SqliteS3(_) => "sqlite-s3",
            Self::SqliteArtifact(_) => "sqlite-artifact",
        }
    }

    /// Fills unset artifact fields from the process environment.
    #[must_use]
    pub fn with_env_defaults(self) -> Self {
        self.with_env_from(|name| env::var(name).ok())
    }

    /// Fills unset artifact fields from `lookup`.
    #[must_use]
    pub fn with_env_from(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        match self {
            Self::SqliteArtifact(config) => Self::SqliteArtifact(config.with_env_from(lookup)),
            other => other,
        }
    }

    /// Validates the selected medium.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when required settings are missing
    /// or malformed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::SqliteLocal(config) => config.validate(),
            Self::SqliteS3(config) => config.resolve().map(|_| ()),
            Self::SqliteArtifact(config) => config.resolve().map(|_| ()),
        }
    }
}

/// Local file storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalStorageConfig {
    /// Database file path.
    #[serde(default = "default_local_path")]
    pub path: PathBuf,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

impl LocalStorageConfig {
    /// Validates local storage settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty or overlong path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("storage.path", &self.path.to_string_lossy())
    }
}

/// S3-compatible object storage settings as written in the config file.
///
/// Credential fields are optional at parse time so that a missing value is
/// reported by name during validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct S3StorageConfig {
    /// Endpoint URL, including scheme.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bucket holding the database object.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Bucket region.
    #[serde(default)]
    pub region: Option<String>,
    /// Access key id.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: Option<SecretString>,
    /// Object key of the database file.
    #[serde(default = "default_database_key")]
    pub database_key: String,
    /// Force path-style addressing.
    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,
}

impl Default for S3StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            database_key: default_database_key(),
            force_path_style: default_force_path_style(),
        }
    }
}

impl S3StorageConfig {
    /// Validates the settings and returns them with every field present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first missing or malformed
    /// field.
    pub fn resolve(&self) -> Result<S3Settings, ConfigError> {
        let endpoint = required("storage.endpoint", self.endpoint.as_deref())?;
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(ConfigError::Invalid(
                "storage.endpoint must include http:// or https://".to_string(),
            ));
        }
        let bucket = required("storage.bucket", self.bucket.as_deref())?;
        let region = required("storage.region", self.region.as_deref())?;
        let access_key_id = required("storage.access_key_id", self.access_key_id.as_deref())?;
        let secret_access_key = required(
            "storage.secret_access_key",
            self.secret_access_key.as_ref().map(SecretString::expose),
        )?;
        let database_key = self.database_key.trim();
        if database_key.is_empty() {
            return Err(ConfigError::Invalid("storage.database_key must be set".to_string()));
        }
        if database_key.starts_with('/') || database_key.contains('\\') {
            return Err(ConfigError::Invalid(
                "storage.database_key must be a relative key without backslashes".to_string(),
            ));
        }
        Ok(S3Settings {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            region,
            access_key_id,
            secret_access_key: SecretString::from(secret_access_key),
            database_key: database_key.to_string(),
            force_path_style: self.force_path_style,
        })
    }
}

/// Validated S3 settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Settings {
    /// Endpoint URL without a trailing slash.
    pub endpoint: String,
    /// Bucket name.
    pub bucket: String,
    /// Bucket region.
    pub region: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: SecretString,
    /// Object key of the database file.
    pub database_key: String,
    /// Force path-style addressing.
    pub force_path_style: bool,
}

/// GitHub Actions artifact storage settings as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactStorageConfig {
    /// Artifact name to search for.
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    /// Branch whose workflow runs may supply the artifact.
    #[serde(default)]
    pub branch_filter: Option<String>,
    /// Local path the database is extracted to.
    #[serde(default = "default_artifact_database_path")]
    pub database_path: PathBuf,
    /// API token; falls back to `GITHUB_TOKEN`.
    #[serde(default)]
    pub token: Option<SecretString>,
    /// `owner/name` slug; falls back to `GITHUB_REPOSITORY`.
    #[serde(default)]
    pub repository: Option<String>,
    /// REST API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for ArtifactStorageConfig {
    fn default() -> Self {
        Self {
            artifact_name: default_artifact_name(),
            branch_filter: None,
            database_path: default_artifact_database_path(),
            token: None,
            repository: None,
            api_url: default_api_url(),
        }
    }
}

impl ArtifactStorageConfig {
    /// Fills unset token, repository, and branch filter from `lookup`.
    ///
    /// Empty environment values count as unset.
    #[must_use]
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if self.token.is_none() {
            self.token = non_empty(GITHUB_TOKEN_ENV).map(SecretString::from);
        }
        if self.repository.is_none() {
            self.repository = non_empty(GITHUB_REPOSITORY_ENV);
        }
        if self.branch_filter.is_none() {
            self.branch_filter = non_empty(GITHUB_REF_NAME_ENV);
        }
        self
    }

    /// Validates the settings and returns them with every field present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a missing token, a repository not
    /// shaped `owner/name`, or malformed names and URLs.
    pub fn resolve(&self) -> Result<ArtifactSettings, ConfigError> {
        let token = required("storage.token", self.token.as_ref().map(SecretString::expose))
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "storage.token must be set (or {GITHUB_TOKEN_ENV} in the environment)"
                ))
            })?;
        let repository = required("storage.repository", self.repository.as_deref())
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "storage.repository must be set (or {GITHUB_REPOSITORY_ENV} in the \
                     environment)"
                ))
            })?;
        let (owner, name) = split_repository(&repository)?;
        let artifact_name = required("storage.artifact_name", Some(self.artifact_name.as_str()))?;
        let branch_filter = match self.branch_filter.as_deref() {
            Some(branch) => required("storage.branch_filter", Some(branch))?,
            None => DEFAULT_BRANCH_FILTER.to_string(),
        };
        validate_path_string("storage.database_path", &self.database_path.to_string_lossy())?;
        let api_url = self.api_url.trim();
        if !(api_url.starts_with("https://") || api_url.starts_with("http://")) {
            return Err(ConfigError::Invalid(
                "storage.api_url must include http:// or https://".to_string(),
            ));
        }
        Ok(ArtifactSettings {
            artifact_name,
            branch_filter,
            database_path: self.database_path.clone(),
            token: SecretString::from(token),
            owner,
            name,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Validated artifact settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSettings {
    /// Artifact name to search for.
    pub artifact_name: String,
    /// Branch whose workflow runs may supply the artifact.
    pub branch_filter: String,
    /// Local path the database is extracted to.
    pub database_path: PathBuf,
    /// API token.
    pub token: SecretString,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// REST API base URL without a trailing slash.
    pub api_url: String,
}

// ============================================================================
// SECTION: Secrets
// ============================================================================

/// String whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(<redacted>)")
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the caller or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Returns the trimmed value or an error naming the missing field.
fn required(field: &str, value: Option<&str>) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ConfigError::Invalid(format!("{field} must be set"))),
    }
}

/// Splits an `owner/name` repository slug.
fn split_repository(repository: &str) -> Result<(String, String), ConfigError> {
    let malformed = || {
        ConfigError::Invalid(format!(
            "storage.repository must be 'owner/name', got: {repository}"
        ))
    };
    let (owner, name) = repository.split_once('/').ok_or_else(malformed)?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return Err(malformed());
    }
    Ok((owner.to_string(), name.to_string()))
}

/// Default busy timeout for serde.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Default local database path for serde.
fn default_local_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOCAL_PATH)
}

/// Default object key for serde.
fn default_database_key() -> String {
    DEFAULT_DATABASE_KEY.to_string()
}

/// Default path-style addressing for serde.
const fn default_force_path_style() -> bool {
    true
}

/// Default artifact name for serde.
fn default_artifact_name() -> String {
    DEFAULT_ARTIFACT_NAME.to_string()
}

/// Default artifact extraction path for serde.
fn default_artifact_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_ARTIFACT_DATABASE_PATH)
}

/// Default API URL for serde.
fn default_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}
