#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Multipart form ingestion for web servers.
//!
//! [`FormPost`] parses `multipart/form-data` request bodies, keeps scalar
//! fields in memory, and streams every uploaded file to the configured
//! storage backend: local disk, an S3-compatible bucket, or Dropbox. Each
//! request resolves to exactly one outcome, whether it carried no files, many
//! files, or failed halfway through.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use futures::Stream;
use http::Method;

/// Fluent builder API.
pub mod builder;
/// Construction options and credentials.
pub mod config;
/// Error types exposed by this crate.
pub mod error;
pub mod hooks;
mod latch;
pub mod naming;
pub mod parser;
mod request;
pub mod storage;

#[cfg(feature = "actix")]
pub mod actix;
#[cfg(feature = "axum")]
pub mod axum;

pub use builder::FormPostBuilder;
pub use config::{ApiKeys, FormPostConfig, Limits, Store};
pub use error::{BoxError, ConfigError, FormPostError, StorageError};
pub use hooks::{BodyValidator, FileValidator};
pub use naming::FilenameStrategy;
pub use parser::FileInfo;
pub use storage::{Backend, BoxStream, DiskStorage, FileUpload, StorageEngine, StoredFile};
#[cfg(feature = "dropbox")]
pub use storage::DropboxStorage;
#[cfg(feature = "aws-s3")]
pub use storage::S3Storage;

use crate::{parser::PartEvents, request::RequestState};

/// Result of an ingested request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedForm {
    /// Scalar field values by field name.
    pub fields: HashMap<String, String>,
    /// Stored files by field name, in completion order.
    pub files: HashMap<String, Vec<StoredFile>>,
}

impl UploadedForm {
    /// Returns a text field value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns the first stored file of a field.
    pub fn file(&self, name: &str) -> Option<&StoredFile> {
        self.files.get(name).and_then(|files| files.first())
    }

    /// Total number of stored files.
    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Outcome handed to the completion callback: `Ok(None)` when the request was
/// not a multipart POST and bypassed ingestion.
pub type Completion = Result<Option<UploadedForm>, FormPostError>;

/// Immutable per-instance settings shared by every request.
pub(crate) struct Settings {
    pub(crate) directory: PathBuf,
    /// Directory uploads are resolved under, relative to the storage root.
    pub(crate) prefix: PathBuf,
    pub(crate) filename: FilenameStrategy,
    pub(crate) limits: Limits,
    pub(crate) file_validator: Option<Arc<dyn FileValidator>>,
    pub(crate) body_validator: Option<Arc<dyn BodyValidator>>,
    pub(crate) request_timeout: Option<Duration>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("directory", &self.directory)
            .field("prefix", &self.prefix)
            .field("filename", &self.filename)
            .field("limits", &self.limits)
            .field("file_validator", &self.file_validator.is_some())
            .field("body_validator", &self.body_validator.is_some())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Main ingestion entry point.
///
/// Cheap to clone; configuration and backend clients are shared read-only.
#[derive(Debug)]
pub struct FormPost<S = Backend> {
    settings: Arc<Settings>,
    storage: Arc<S>,
}

impl<S> Clone for FormPost<S> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            storage: Arc::clone(&self.storage),
        }
    }
}

impl FormPost<Backend> {
    /// Creates a fluent builder with default options.
    pub fn builder() -> FormPostBuilder {
        FormPostBuilder::new()
    }

    /// Builds an instance from serializable options.
    pub fn from_config(config: FormPostConfig) -> Result<Self, ConfigError> {
        config.into_builder().build()
    }
}

impl<S> FormPost<S> {
    pub(crate) fn from_parts(settings: Settings, storage: S) -> Self {
        Self {
            settings: Arc::new(settings),
            storage: Arc::new(storage),
        }
    }

    /// Returns the configured storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Base directory (disk) or key prefix (remote backends).
    pub fn directory(&self) -> &Path {
        &self.settings.directory
    }

    /// Active size limits.
    pub fn limits(&self) -> &Limits {
        &self.settings.limits
    }

    /// Active filename strategy.
    pub fn filename_strategy(&self) -> &FilenameStrategy {
        &self.settings.filename
    }
}

impl<S> FormPost<S>
where
    S: StorageEngine + 'static,
{
    /// Ingests one request body.
    ///
    /// Returns `Ok(None)` without reading `body` when the request is not a
    /// `multipart/form-data` POST.
    #[tracing::instrument(level = "debug", skip_all, fields(method = %method))]
    pub async fn process<B, O, E>(
        &self,
        method: &Method,
        content_type: Option<&str>,
        body: B,
    ) -> Completion
    where
        B: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        let Some(events) = PartEvents::open(method, content_type, body, &self.settings.limits)?
        else {
            tracing::debug!("request bypassed multipart ingestion");
            return Ok(None);
        };

        let run = RequestState::new(&self.settings, &self.storage).run(events);
        let form = match self.settings.request_timeout {
            Some(deadline) => tokio::time::timeout(deadline, run)
                .await
                .map_err(|_| FormPostError::Timeout(deadline))??,
            None => run.await?,
        };

        tracing::debug!(
            fields = form.fields.len(),
            files = form.file_count(),
            "request ingested"
        );
        Ok(Some(form))
    }

    /// Direct-call mode: ingests the request and hands the outcome to
    /// `callback`, which runs exactly once.
    pub async fn upload<B, O, E, F>(
        &self,
        method: &Method,
        content_type: Option<&str>,
        body: B,
        callback: F,
    ) where
        B: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
        F: FnOnce(Completion),
    {
        callback(self.process(method, content_type, body).await);
    }

    /// Parses only the scalar fields of a request, discarding file contents.
    pub async fn parse_fields<B, O, E>(
        &self,
        method: &Method,
        content_type: Option<&str>,
        body: B,
    ) -> Result<Option<HashMap<String, String>>, FormPostError>
    where
        B: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        match PartEvents::open(method, content_type, body, &self.settings.limits)? {
            Some(events) => request::collect_fields(events).await.map(Some),
            None => Ok(None),
        }
    }
}
