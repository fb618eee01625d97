//! Storage engine abstraction and the built-in backends.

use std::{
    io,
    path::{Component, PathBuf},
    pin::Pin,
};

use bytes::Bytes;
use futures::Stream;
use mime::Mime;

use crate::{error::StorageError, parser::FileInfo};

/// Disk-backed storage backend.
pub mod disk;
/// Dropbox API storage backend.
#[cfg(feature = "dropbox")]
pub mod dropbox;
/// S3-compatible object storage backend.
#[cfg(feature = "aws-s3")]
pub mod s3;

pub use disk::DiskStorage;
#[cfg(feature = "dropbox")]
pub use dropbox::DropboxStorage;
#[cfg(feature = "aws-s3")]
pub use s3::S3Storage;

/// Streamed file body handed to a storage engine.
///
/// An `Err` item means the upload was aborted upstream; the engine must
/// discard whatever it wrote for this file and fail.
pub type BoxStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// Descriptor of one file being persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Client-side metadata of the file part.
    pub info: FileInfo,
    /// Resolved directory relative to the backend's root: joined onto the
    /// disk root, or used as the key prefix by remote backends.
    pub directory: PathBuf,
    /// Sanitized persisted filename.
    pub filename: String,
}

impl FileUpload {
    /// `/`-joined storage key for remote backends.
    pub fn key(&self) -> String {
        self.directory
            .components()
            .filter_map(|component| match component {
                Component::Normal(segment) => segment.to_str(),
                _ => None,
            })
            .chain(std::iter::once(self.filename.as_str()))
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Metadata describing a persisted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Form field name.
    pub field_name: String,
    /// Client-supplied filename.
    pub original_name: String,
    /// Name the file was stored under.
    pub filename: String,
    /// Backend location: filesystem path, `s3://bucket/key`, or Dropbox path.
    pub location: String,
    /// Filesystem path when stored on disk.
    pub path: Option<PathBuf>,
    /// Declared content type.
    pub mime: Mime,
    /// Stored size in bytes.
    pub size: u64,
}

impl StoredFile {
    /// Builds the output record for `upload` stored at `location`.
    pub fn new(upload: &FileUpload, location: impl Into<String>, size: u64) -> Self {
        Self {
            field_name: upload.info.field_name.clone(),
            original_name: upload.info.original_name.clone(),
            filename: upload.filename.clone(),
            location: location.into(),
            path: None,
            mime: upload.info.mime.clone(),
            size,
        }
    }
}

/// Async trait abstraction for file storage backends.
#[async_trait::async_trait]
pub trait StorageEngine: Send + Sync + std::fmt::Debug {
    /// Consumes `body` and persists it as described by `upload`.
    async fn store(&self, upload: &FileUpload, body: BoxStream) -> Result<StoredFile, StorageError>;
}

/// Closed set of built-in backends, chosen once at configuration time.
#[derive(Debug)]
pub enum Backend {
    /// Local filesystem.
    Disk(DiskStorage),
    /// S3-compatible object store.
    #[cfg(feature = "aws-s3")]
    ObjectStore(S3Storage),
    /// Dropbox API.
    #[cfg(feature = "dropbox")]
    Dropbox(DropboxStorage),
}

#[async_trait::async_trait]
impl StorageEngine for Backend {
    async fn store(&self, upload: &FileUpload, body: BoxStream) -> Result<StoredFile, StorageError> {
        match self {
            Self::Disk(storage) => storage.store(upload, body).await,
            #[cfg(feature = "aws-s3")]
            Self::ObjectStore(storage) => storage.store(upload, body).await,
            #[cfg(feature = "dropbox")]
            Self::Dropbox(storage) => storage.store(upload, body).await,
        }
    }
}

pub(crate) fn aborted(err: &io::Error) -> StorageError {
    StorageError::new(format!("upload aborted: {err}"))
}
