// crates/unentropy-storage/src/artifact.rs
// ============================================================================
// Module: CI Artifact Storage Provider
// Description: Database file carried between runs as a GitHub Actions artifact.
// Purpose: Restore the previous run's database on hosted CI without a bucket.
// Dependencies: reqwest, serde_json, zip, unentropy-config
// ============================================================================

//! ## Overview
//! `initialize` lists artifacts with the configured name, keeps the ones that
//! have not expired and were produced by a workflow run on the branch filter,
//! downloads the most recent archive, and extracts the database file to the
//! configured path. When nothing matches, a fresh database is created and the
//! provider reports a first run.
//!
//! The REST API offers no artifact upload endpoint, so `persist` only folds
//! the WAL into the main file and checks that the file exists; a later
//! workflow step uploads it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::fs::File;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;
use unentropy_config::ArtifactSettings;
use unentropy_config::ArtifactStorageConfig;
use unentropy_config::ConnectionConfig;
use unentropy_config::SecretString;
use unentropy_store_sqlite::ConnectionSettings;
use unentropy_store_sqlite::JournalMode;
use unentropy_store_sqlite::close_connection;
use unentropy_store_sqlite::open_connection;
use zip::ZipArchive;

use crate::StorageError;
use crate::StorageProvider;
use crate::provider::ProviderState;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest artifact archive accepted on download.
pub const MAX_ARTIFACT_ARCHIVE_BYTES: usize = 512 * 1024 * 1024;
/// Largest database file accepted on extraction.
pub const MAX_EXTRACTED_DATABASE_BYTES: u64 = 1024 * 1024 * 1024;
/// Largest artifact listing accepted.
const MAX_LIST_RESPONSE_BYTES: usize = 4 * 1024 * 1024;
/// Artifacts requested per listing page.
const ARTIFACTS_PER_PAGE: &str = "100";
/// GitHub media type for REST responses.
const GITHUB_ACCEPT: &str = "application/vnd.github+json";
/// Pinned GitHub REST API version.
const GITHUB_API_VERSION: &str = "2022-11-28";
/// User agent sent with every request.
const USER_AGENT: &str = concat!("unentropy/", env!("CARGO_PKG_VERSION"));
/// Request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// One entry of the artifact listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactSummary {
    /// Artifact id.
    pub id: u64,
    /// Artifact name.
    pub name: String,
    /// True once the retention period has elapsed.
    #[serde(default)]
    pub expired: bool,
    /// RFC 3339 creation time.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Workflow run that produced the artifact.
    #[serde(default)]
    pub workflow_run: Option<WorkflowRunSummary>,
}

/// Workflow run reference attached to an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkflowRunSummary {
    /// Run id.
    pub id: u64,
    /// Branch the run was triggered on.
    #[serde(default)]
    pub head_branch: Option<String>,
}

/// Listing response body.
#[derive(Deserialize)]
struct ArtifactList {
    /// Artifacts on this page.
    #[serde(default)]
    artifacts: Vec<ArtifactSummary>,
}

// ============================================================================
// SECTION: Artifact Client
// ============================================================================

/// Minimal artifact API abstraction.
pub trait ArtifactClient: Send + Sync {
    /// Lists artifacts named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the request or decoding fails.
    fn list_artifacts(&self, name: &str) -> Result<Vec<ArtifactSummary>, StorageError>;

    /// Downloads the zip archive of one artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the request fails or the archive is too
    /// large.
    fn download_archive(&self, artifact_id: u64) -> Result<Vec<u8>, StorageError>;
}

/// GitHub REST artifact client.
pub struct GitHubArtifactClient {
    /// Blocking HTTP client.
    client: Client,
    /// API base URL without a trailing slash.
    api_url: String,
    /// Repository owner.
    owner: String,
    /// Repository name.
    name: String,
    /// API token.
    token: SecretString,
}

impl GitHubArtifactClient {
    /// Builds a client for the resolved repository.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] when the HTTP client cannot be built.
    pub fn new(settings: &ArtifactSettings) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| StorageError::Backend(format!("http client build failed: {err}")))?;
        Ok(Self {
            client,
            api_url: settings.api_url.clone(),
            owner: settings.owner.clone(),
            name: settings.name.clone(),
            token: settings.token.clone(),
        })
    }

    /// Builds a repository-scoped API URL.
    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{path}", self.api_url, self.owner, self.name)
    }

    /// Sends an authenticated GET and rejects non-success statuses.
    fn get(&self, url: Url) -> Result<Response, StorageError> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token.expose()))
            .header(ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .send()
            .map_err(|err| StorageError::Backend(format!("github request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Backend(format!("github request failed: {status}")));
        }
        Ok(response)
    }
}

impl ArtifactClient for GitHubArtifactClient {
    fn list_artifacts(&self, name: &str) -> Result<Vec<ArtifactSummary>, StorageError> {
        let url = Url::parse_with_params(
            &self.repo_url("actions/artifacts"),
            &[("name", name), ("per_page", ARTIFACTS_PER_PAGE)],
        )
        .map_err(|err| StorageError::Invalid(format!("artifact list url invalid: {err}")))?;
        let mut response = self.get(url)?;
        let body = read_response_limited(&mut response, MAX_LIST_RESPONSE_BYTES)?;
        let list: ArtifactList = serde_json::from_slice(&body)
            .map_err(|err| StorageError::Invalid(format!("artifact list malformed: {err}")))?;
        Ok(list.artifacts)
    }

    fn download_archive(&self, artifact_id: u64) -> Result<Vec<u8>, StorageError> {
        let url = Url::parse(&self.repo_url(&format!("actions/artifacts/{artifact_id}/zip")))
            .map_err(|err| StorageError::Invalid(format!("artifact url invalid: {err}")))?;
        let mut response = self.get(url)?;
        read_response_limited(&mut response, MAX_ARTIFACT_ARCHIVE_BYTES)
    }
}

// ============================================================================
// SECTION: Provider
// ============================================================================

/// CI artifact storage provider.
pub struct ArtifactStorageProvider {
    /// Validated artifact settings.
    settings: ArtifactSettings,
    /// Pragmas applied on open.
    connection_settings: ConnectionSettings,
    /// Artifact API client.
    client: Arc<dyn ArtifactClient>,
    /// True once the artifact search has run.
    acquired: bool,
    /// True when no prior artifact was found.
    first_run: bool,
    /// Workflow run the restored database came from.
    source_run_id: Option<u64>,
    /// Lifecycle state.
    state: ProviderState,
}

impl ArtifactStorageProvider {
    /// Builds a provider backed by the GitHub REST API.
    ///
    /// Unset token, repository, and branch filter fall back to the
    /// `GITHUB_*` process environment.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] for a missing token or malformed
    /// repository, before any network call.
    pub fn new(
        config: &ArtifactStorageConfig,
        connection: &ConnectionConfig,
    ) -> Result<Self, StorageError> {
        Self::with_env(config, connection, |name| env::var(name).ok())
    }

    /// Builds a provider whose unset fields are filled from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] for a missing token or malformed
    /// repository, before any network call.
    pub fn with_env(
        config: &ArtifactStorageConfig,
        connection: &ConnectionConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, StorageError> {
        let settings = config.clone().with_env_from(lookup).resolve()?;
        let client = Arc::new(GitHubArtifactClient::new(&settings)?);
        Ok(Self::with_client(settings, connection, client))
    }

    /// Builds a provider over a custom artifact client.
    #[must_use]
    pub fn with_client(
        settings: ArtifactSettings,
        connection: &ConnectionConfig,
        client: Arc<dyn ArtifactClient>,
    ) -> Self {
        Self {
            settings,
            connection_settings: connection.settings(JournalMode::Wal),
            client,
            acquired: false,
            first_run: false,
            source_run_id: None,
            state: ProviderState::default(),
        }
    }

    /// Returns the artifact name searched for.
    #[must_use]
    pub fn artifact_name(&self) -> &str {
        &self.settings.artifact_name
    }

    /// Returns the branch whose runs may supply the artifact.
    #[must_use]
    pub fn branch_filter(&self) -> &str {
        &self.settings.branch_filter
    }

    /// Returns true when initialization found no prior artifact.
    #[must_use]
    pub const fn is_first_run(&self) -> bool {
        self.first_run
    }

    /// Returns the workflow run id the database was restored from.
    #[must_use]
    pub const fn source_run_id(&self) -> Option<u64> {
        self.source_run_id
    }

    /// Restores the latest matching artifact, or records a first run.
    fn acquire(&mut self) -> Result<(), StorageError> {
        let artifacts = self.client.list_artifacts(&self.settings.artifact_name)?;
        let selected =
            select_artifact(&artifacts, &self.settings.artifact_name, &self.settings.branch_filter);
        if let Some(artifact) = selected {
            let archive = self.client.download_archive(artifact.id)?;
            let bytes = extract_database(&archive, &self.settings.database_path)?;
            self.first_run = false;
            self.source_run_id = artifact.workflow_run.as_ref().map(|run| run.id);
            info!(
                artifact_id = artifact.id,
                run_id = self.source_run_id,
                bytes,
                path = %self.settings.database_path.display(),
                "restored metrics database from artifact"
            );
        } else {
            self.first_run = true;
            self.source_run_id = None;
            info!(
                artifact = %self.settings.artifact_name,
                branch = %self.settings.branch_filter,
                "no matching artifact; starting fresh"
            );
        }
        self.acquired = true;
        Ok(())
    }
}

impl StorageProvider for ArtifactStorageProvider {
    fn kind(&self) -> &'static str {
        "sqlite-artifact"
    }

    fn initialize(&mut self) -> Result<&mut Connection, StorageError> {
        self.state.ensure_open()?;
        if !self.state.is_ready() {
            if !self.acquired {
                self.acquire()?;
            }
            let connection =
                open_connection(&self.settings.database_path, &self.connection_settings)?;
            self.state = ProviderState::Ready(connection);
        }
        self.state.connection_mut()
    }

    fn persist(&mut self) -> Result<(), StorageError> {
        let connection = self.state.take_connection()?;
        close_connection(connection)?;
        let path = &self.settings.database_path;
        if !path.is_file() {
            return Err(StorageError::Io(format!("database file not found: {}", path.display())));
        }
        self.state = ProviderState::Ready(open_connection(path, &self.connection_settings)?);
        info!(path = %path.display(), "metrics database ready for workflow artifact upload");
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), StorageError> {
        self.state.close()
    }

    fn is_initialized(&self) -> bool {
        self.state.is_ready()
    }

    fn connection(&self) -> Result<&Connection, StorageError> {
        self.state.connection()
    }

    fn connection_mut(&mut self) -> Result<&mut Connection, StorageError> {
        self.state.connection_mut()
    }

    fn database_path(&self) -> Option<&Path> {
        Some(&self.settings.database_path)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Picks the most recent unexpired artifact produced on `branch`.
fn select_artifact<'a>(
    artifacts: &'a [ArtifactSummary],
    name: &str,
    branch: &str,
) -> Option<&'a ArtifactSummary> {
    artifacts
        .iter()
        .filter(|artifact| artifact.name == name && !artifact.expired)
        .filter(|artifact| {
            artifact
                .workflow_run
                .as_ref()
                .and_then(|run| run.head_branch.as_deref())
                .is_some_and(|head| head == branch)
        })
        .max_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        })
}

/// Extracts the entry named like `destination` from a zip archive.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns [`StorageError`] when the archive is unreadable, lacks the
/// database entry, or the entry exceeds the extraction limit.
pub fn extract_database(archive: &[u8], destination: &Path) -> Result<u64, StorageError> {
    let file_name = destination
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| StorageError::Invalid("database path has no file name".to_string()))?;
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|err| StorageError::Invalid(format!("artifact archive unreadable: {err}")))?;
    let mut entry = zip.by_name(file_name).map_err(|_| {
        StorageError::Invalid(format!("artifact archive does not contain {file_name}"))
    })?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| StorageError::io(&err))?;
    }
    let mut output = File::create(destination).map_err(|err| StorageError::io(&err))?;
    let mut limited = entry.by_ref().take(MAX_EXTRACTED_DATABASE_BYTES.saturating_add(1));
    let written = io::copy(&mut limited, &mut output).map_err(|err| StorageError::io(&err))?;
    if written > MAX_EXTRACTED_DATABASE_BYTES {
        drop(output);
        fs::remove_file(destination).map_err(|err| StorageError::io(&err))?;
        return Err(StorageError::Invalid("artifact database exceeds size limit".to_string()));
    }
    output.sync_all().map_err(|err| StorageError::io(&err))?;
    Ok(written)
}

/// Reads the response body while enforcing a byte limit.
fn read_response_limited(
    response: &mut Response,
    max_bytes: usize,
) -> Result<Vec<u8>, StorageError> {
    let expected_len = response.content_length();
    let max_bytes_u64 = u64::try_from(max_bytes)
        .map_err(|_| StorageError::Invalid("response size limit exceeds u64".to_string()))?;
    if let Some(expected) = expected_len
        && expected > max_bytes_u64
    {
        return Err(StorageError::Invalid("github response exceeds size limit".to_string()));
    }
    let mut buf = Vec::new();
    let mut handle = response.take(max_bytes_u64.saturating_add(1));
    handle.read_to_end(&mut buf).map_err(|err| StorageError::io(&err))?;
    if buf.len() > max_bytes {
        return Err(StorageError::Invalid("github response exceeds size limit".to_string()));
    }
    if let Some(expected) = expected_len
        && u64::try_from(buf.len()).is_ok_and(|read| read < expected)
    {
        return Err(StorageError::Invalid("github response truncated".to_string()));
    }
    Ok(buf)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
