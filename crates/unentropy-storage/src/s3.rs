// crates/unentropy-storage/src/s3.rs
// ============================================================================
// Module: Object Storage Provider
// Description: Database file mirrored to an S3-compatible bucket.
// Purpose: Carry the database between stateless CI runs through a bucket.
// Dependencies: aws-sdk-s3, tempfile, tokio, unentropy-config
// ============================================================================

//! ## Overview
//! On `initialize` the configured key is probed with `HEAD`. When it exists
//! the whole object is downloaded into a private temporary directory;
//! otherwise a fresh database is created there. `persist` closes the
//! connection, uploads the file as a single object, and reopens it.
//!
//! The DELETE journal keeps every committed page in the main file, so the
//! uploaded object is always a complete database.
//!
//! A `HEAD` answering "not found" is the only miss treated as a first run;
//! every other probe, download, or upload failure is returned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::future::Future;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use rusqlite::Connection;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;
use tokio::runtime::Runtime;
use tokio::runtime::RuntimeFlavor;
use tracing::info;
use unentropy_config::ConnectionConfig;
use unentropy_config::S3Settings;
use unentropy_config::S3StorageConfig;
use unentropy_store_sqlite::ConnectionSettings;
use unentropy_store_sqlite::JournalMode;
use unentropy_store_sqlite::close_connection;
use unentropy_store_sqlite::open_connection;

use crate::StorageError;
use crate::StorageProvider;
use crate::provider::ProviderState;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest database object accepted on download.
pub const MAX_DATABASE_OBJECT_BYTES: usize = 512 * 1024 * 1024;
/// File name of the database inside the temporary directory.
const TEMP_DATABASE_NAME: &str = "unentropy.db";
/// Prefix of the per-provider temporary directory.
const TEMP_DIR_PREFIX: &str = "unentropy-s3-";
/// Provider name attached to static credentials.
const CREDENTIALS_PROVIDER_NAME: &str = "unentropy-config";

// ============================================================================
// SECTION: Runtime Helpers
// ============================================================================

/// Blocks on an object-store future using a compatible runtime.
fn block_on_with_runtime<F, T>(runtime: &Runtime, future: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        if matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) {
            return tokio::task::block_in_place(|| handle.block_on(future));
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        std::thread::spawn(move || {
            let result = Runtime::new()
                .map_err(|err| StorageError::io(&err))
                .and_then(|runtime| runtime.block_on(future));
            let _ = tx.send(result);
        });
        return rx.recv().unwrap_or_else(|_| {
            Err(StorageError::Io("object store thread join failed".to_string()))
        });
    }
    runtime.block_on(future)
}

// ============================================================================
// SECTION: Object Store Client
// ============================================================================

/// Minimal object-store client abstraction.
pub trait ObjectStoreClient: Send + Sync {
    /// Returns whether `key` exists; "not found" is `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] for every other probe failure.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Reads a whole object with a size limit.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the read fails or exceeds `max_bytes`.
    fn get(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, StorageError>;

    /// Writes a whole object.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] when the write fails.
    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;
}

/// S3-backed object-store client.
struct S3ObjectStoreClient {
    /// Underlying S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Tokio runtime for blocking S3 operations.
    runtime: Option<Arc<Runtime>>,
}

impl Drop for S3ObjectStoreClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = std::thread::spawn(move || drop(runtime));
        }
    }
}

impl S3ObjectStoreClient {
    /// Builds a client with static credentials from validated settings.
    fn new(settings: &S3Settings) -> Result<Self, StorageError> {
        let runtime = Runtime::new().map_err(|err| StorageError::io(&err))?;
        let region = settings.region.clone();
        let endpoint = settings.endpoint.clone();
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.expose().to_string(),
            None,
            None,
            CREDENTIALS_PROVIDER_NAME,
        );
        let shared_config = block_on_with_runtime(&runtime, async move {
            Ok(aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region))
                .endpoint_url(endpoint)
                .credentials_provider(credentials)
                .load()
                .await)
        })?;
        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if settings.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }
        Ok(Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: settings.bucket.clone(),
            runtime: Some(Arc::new(runtime)),
        })
    }

    /// Returns the runtime or an error if shutdown.
    fn runtime(&self) -> Result<&Runtime, StorageError> {
        self.runtime
            .as_ref()
            .map(AsRef::as_ref)
            .ok_or_else(|| StorageError::Io("object store runtime closed".to_string()))
    }
}

impl ObjectStoreClient for S3ObjectStoreClient {
    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let client = self.client.clone();
        block_on_with_runtime(self.runtime()?, async move {
            match client.head_object().bucket(bucket).key(key).send().await {
                Ok(_) => Ok(true),
                Err(err) if err.as_service_error().is_some_and(|err| err.is_not_found()) => {
                    Ok(false)
                }
                Err(err) => Err(StorageError::Backend(format!("head object failed: {err}"))),
            }
        })
    }

    fn get(&self, key: &str, max_bytes: usize) -> Result<Vec<u8>, StorageError> {
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let client = self.client.clone();
        block_on_with_runtime(self.runtime()?, async move {
            let output = client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| StorageError::Backend(format!("get object failed: {err}")))?;
            if let Some(length) = output.content_length() {
                let actual_bytes = usize::try_from(length).unwrap_or(usize::MAX);
                if actual_bytes > max_bytes {
                    return Err(StorageError::Invalid(format!(
                        "database object exceeds size limit ({actual_bytes} > {max_bytes})"
                    )));
                }
            }
            let mut reader = output.body.into_async_read();
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                let read = reader.read(&mut chunk).await.map_err(|err| StorageError::io(&err))?;
                if read == 0 {
                    break;
                }
                if buffer.len().saturating_add(read) > max_bytes {
                    return Err(StorageError::Invalid(format!(
                        "database object exceeds size limit ({max_bytes} bytes)"
                    )));
                }
                buffer.extend_from_slice(&chunk[.. read]);
            }
            Ok(buffer)
        })
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let client = self.client.clone();
        block_on_with_runtime(self.runtime()?, async move {
            client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_type("application/vnd.sqlite3")
                .body(ByteStream::from(bytes))
                .send()
                .await
                .map_err(|err| StorageError::Backend(format!("put object failed: {err}")))?;
            Ok(())
        })
    }
}

// ============================================================================
// SECTION: Provider
// ============================================================================

/// Object-storage provider.
pub struct S3StorageProvider {
    /// Validated bucket settings.
    settings: S3Settings,
    /// Pragmas applied on open.
    connection_settings: ConnectionSettings,
    /// Object-store client.
    client: Arc<dyn ObjectStoreClient>,
    /// Private directory holding the working copy.
    temp_dir: Option<TempDir>,
    /// Working copy path inside `temp_dir`.
    database_path: Option<PathBuf>,
    /// Lifecycle state.
    state: ProviderState,
}

impl S3StorageProvider {
    /// Builds a provider backed by the AWS SDK.
    ///
    /// No network call is made until [`StorageProvider::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] when a required setting is missing
    /// and [`StorageError::Io`] when the transfer runtime cannot start.
    pub fn new(
        config: &S3StorageConfig,
        connection: &ConnectionConfig,
    ) -> Result<Self, StorageError> {
        let settings = config.resolve()?;
        let client = Arc::new(S3ObjectStoreClient::new(&settings)?);
        Ok(Self::with_client(settings, connection, client))
    }

    /// Builds a provider over a custom object-store client.
    #[must_use]
    pub fn with_client(
        settings: S3Settings,
        connection: &ConnectionConfig,
        client: Arc<dyn ObjectStoreClient>,
    ) -> Self {
        Self {
            settings,
            connection_settings: connection.settings(JournalMode::Delete),
            client,
            temp_dir: None,
            database_path: None,
            state: ProviderState::default(),
        }
    }

    /// Returns the object key of the database file.
    #[must_use]
    pub fn database_key(&self) -> &str {
        &self.settings.database_key
    }

    /// Downloads the database into a fresh temporary directory, if present.
    fn acquire(&mut self) -> Result<PathBuf, StorageError> {
        let temp_dir = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir()
            .map_err(|err| StorageError::io(&err))?;
        let path = temp_dir.path().join(TEMP_DATABASE_NAME);
        let key = &self.settings.database_key;
        if self.client.exists(key)? {
            let bytes = self.client.get(key, MAX_DATABASE_OBJECT_BYTES)?;
            fs::write(&path, &bytes).map_err(|err| StorageError::io(&err))?;
            info!(key = %key, bytes = bytes.len(), "downloaded metrics database from bucket");
        } else {
            info!(key = %key, "no metrics database in bucket; starting fresh");
        }
        self.temp_dir = Some(temp_dir);
        self.database_path = Some(path.clone());
        Ok(path)
    }

    /// Uploads the closed working copy.
    fn upload(&self, path: &Path) -> Result<usize, StorageError> {
        let bytes = fs::read(path).map_err(|err| StorageError::io(&err))?;
        let size = bytes.len();
        self.client.put(&self.settings.database_key, bytes)?;
        Ok(size)
    }
}

impl StorageProvider for S3StorageProvider {
    fn kind(&self) -> &'static str {
        "sqlite-s3"
    }

    fn initialize(&mut self) -> Result<&mut Connection, StorageError> {
        self.state.ensure_open()?;
        if !self.state.is_ready() {
            let path = match &self.database_path {
                Some(path) => path.clone(),
                None => self.acquire()?,
            };
            let connection = open_connection(&path, &self.connection_settings)?;
            self.state = ProviderState::Ready(connection);
        }
        self.state.connection_mut()
    }

    fn persist(&mut self) -> Result<(), StorageError> {
        self.state.ensure_open()?;
        let path = self.database_path.clone().ok_or(StorageError::NotInitialized)?;
        let connection = self.state.take_connection()?;
        close_connection(connection)?;
        let uploaded = self.upload(&path);
        self.state = ProviderState::Ready(open_connection(&path, &self.connection_settings)?);
        let bytes = uploaded?;
        info!(key = %self.settings.database_key, bytes, "uploaded metrics database to bucket");
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), StorageError> {
        let closed = self.state.close();
        self.database_path = None;
        let removed = match self.temp_dir.take() {
            Some(temp_dir) => temp_dir.close().map_err(|err| StorageError::io(&err)),
            None => Ok(()),
        };
        closed.and(removed)
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
        self.database_path.as_deref()
    }
}
