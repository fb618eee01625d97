use std::{error::Error as StdError, fmt, time::Duration};

use http::StatusCode;
use thiserror::Error;

use crate::config::Store;

/// Boxed error returned by user-supplied hooks.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Error raised while constructing a [`FormPost`](crate::FormPost).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The storage selector does not name a supported backend.
    #[error("storage `{store}` is not supported")]
    UnsupportedStore {
        /// Selector as supplied by the caller.
        store: String,
    },
    /// The backend exists but its cargo feature was not compiled in.
    #[error("storage `{store}` requires the `{feature}` feature")]
    StoreDisabled {
        /// Selected backend.
        store: Store,
        /// Cargo feature that enables the backend.
        feature: &'static str,
    },
    /// A remote backend was selected without matching credentials.
    #[error("storage `{store}` requires API credentials")]
    MissingCredentials {
        /// Selected backend.
        store: Store,
    },
    /// Credentials were supplied for a different backend.
    #[error("credentials for `{given}` cannot be used with storage `{store}`")]
    MismatchedCredentials {
        /// Selected backend.
        store: Store,
        /// Backend the credentials belong to.
        given: Store,
    },
    /// `max_file_size` was configured as zero.
    #[error("max_file_size must be greater than zero")]
    ZeroMaxFileSize,
    /// `min_file_size` is larger than `max_file_size`.
    #[error("min_file_size ({min}) cannot exceed max_file_size ({max})")]
    InvalidSizeRange {
        /// Configured minimum in bytes.
        min: u64,
        /// Configured maximum in bytes.
        max: u64,
    },
    /// A fixed filename was configured as an empty string.
    #[error("fixed filename cannot be empty")]
    EmptyFixedFilename,
    /// The default disk directory could not be determined.
    #[error("cannot determine working directory: {message}")]
    WorkingDirectory {
        /// Underlying I/O error message.
        message: String,
    },
}

/// Error raised by a storage backend while persisting a file.
#[derive(Debug)]
pub struct StorageError {
    message: String,
    source: Option<BoxError>,
}

impl StorageError {
    /// Creates a storage error with a message only.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a storage error wrapping an underlying cause.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error message without the source chain.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

/// Request-level error delivered through the completion path.
#[derive(Debug, Error)]
pub enum FormPostError {
    /// The multipart body could not be parsed.
    #[error("malformed multipart body: {0}")]
    Parse(#[source] multer::Error),
    /// The whole request body exceeded `max_body_size`.
    #[error("request body exceeds {max_body_size} bytes")]
    BodyTooLarge {
        /// Configured limit in bytes.
        max_body_size: u64,
    },
    /// The per-file validator rejected a file part.
    #[error("file `{file}` in field `{field}` rejected by file validator")]
    FileRejected {
        /// Field name of the rejected part.
        field: String,
        /// Client-supplied filename of the rejected part.
        file: String,
    },
    /// The whole-body validator rejected the request.
    #[error("request rejected by body validator")]
    BodyRejected,
    /// A validator returned an error instead of a verdict.
    #[error("validator failed: {0}")]
    Validator(#[source] BoxError),
    /// A file exceeded `max_file_size`.
    #[error("file in field `{field}` exceeds {max_file_size} bytes")]
    FileSizeLimitExceeded {
        /// Field name of the oversized file.
        field: String,
        /// Configured limit in bytes.
        max_file_size: u64,
    },
    /// A file was smaller than `min_file_size`.
    #[error("file in field `{field}` is {size} bytes, below the {min_file_size} byte minimum")]
    FileTooSmall {
        /// Field name of the undersized file.
        field: String,
        /// Received size in bytes.
        size: u64,
        /// Configured minimum in bytes.
        min_file_size: u64,
    },
    /// A storage backend failed to persist a file.
    #[error("storage failed for field `{field}`: {source}")]
    Storage {
        /// Field name of the failed file.
        field: String,
        /// Backend error.
        #[source]
        source: StorageError,
    },
    /// The request did not settle before the configured deadline.
    #[error("request not completed within {0:?}")]
    Timeout(Duration),
}

impl FormPostError {
    /// Returns `true` for errors raised by a validation hook verdict.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::FileRejected { .. } | Self::BodyRejected)
    }

    /// Returns `true` for file or body size limit violations.
    pub fn is_size_limit(&self) -> bool {
        matches!(
            self,
            Self::FileSizeLimitExceeded { .. } | Self::FileTooSmall { .. } | Self::BodyTooLarge { .. }
        )
    }

    /// Maps the error to the HTTP status a server should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } | Self::FileSizeLimitExceeded { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Self::FileRejected { .. } | Self::BodyRejected | Self::FileTooSmall { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Validator(_) | Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
        }
    }
}

impl From<multer::Error> for FormPostError {
    fn from(err: multer::Error) -> Self {
        match err {
            multer::Error::StreamSizeExceeded { limit } => Self::BodyTooLarge {
                max_body_size: limit,
            },
            other => Self::Parse(other),
        }
    }
}
