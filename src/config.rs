use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::error::ConfigError;

/// Storage backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Store {
    /// Local filesystem under a base directory.
    #[default]
    Disk,
    /// S3-compatible object store.
    ObjectStore,
    /// Dropbox file-hosting API.
    Dropbox,
}

impl Store {
    /// Canonical selector string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disk => "disk",
            Self::ObjectStore => "aws-s3",
            Self::Dropbox => "dropbox",
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Store {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(Self::Disk),
            "s3" | "aws-s3" | "object-store" => Ok(Self::ObjectStore),
            "dropbox" | "third-party-api" => Ok(Self::Dropbox),
            _ => Err(ConfigError::UnsupportedStore {
                store: value.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for Store {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Credentials for the remote storage backends.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ApiKeys {
    /// Access-key pair and bucket for an S3-compatible object store.
    ObjectStore {
        /// Access key id.
        access_key_id: String,
        /// Secret access key.
        secret_access_key: String,
        /// Target bucket.
        bucket: String,
        /// Bucket region.
        #[serde(default = "default_region")]
        region: String,
        /// Custom endpoint for S3-compatible services.
        #[serde(default)]
        endpoint: Option<String>,
        /// Canned ACL applied to uploaded objects, e.g. `public-read`.
        #[serde(default)]
        acl: Option<String>,
    },
    /// OAuth token for the Dropbox API.
    Dropbox {
        /// Bearer access token.
        access_token: String,
        /// Application client id.
        #[serde(default)]
        client_id: Option<String>,
    },
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

impl ApiKeys {
    /// Backend these credentials belong to.
    pub fn store(&self) -> Store {
        match self {
            Self::ObjectStore { .. } => Store::ObjectStore,
            Self::Dropbox { .. } => Store::Dropbox,
        }
    }

    /// Reads object-store credentials from `AWS_ACCESS_KEY_ID`,
    /// `AWS_SECRET_ACCESS_KEY`, `S3_BUCKET_NAME`, and optionally `AWS_REGION`,
    /// `S3_ENDPOINT` and `S3_ACL`.
    pub fn s3_from_env() -> Option<Self> {
        Some(Self::ObjectStore {
            access_key_id: env_var("AWS_ACCESS_KEY_ID")?,
            secret_access_key: env_var("AWS_SECRET_ACCESS_KEY")?,
            bucket: env_var("S3_BUCKET_NAME")?,
            region: env_var("AWS_REGION").unwrap_or_else(default_region),
            endpoint: env_var("S3_ENDPOINT"),
            acl: env_var("S3_ACL"),
        })
    }

    /// Reads Dropbox credentials from `DROPBOX_ACCESS_TOKEN` and optionally
    /// `DROPBOX_CLIENT_ID`.
    pub fn dropbox_from_env() -> Option<Self> {
        Some(Self::Dropbox {
            access_token: env_var("DROPBOX_ACCESS_TOKEN")?,
            client_id: env_var("DROPBOX_CLIENT_ID"),
        })
    }
}

// Secrets stay out of logs.
impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ObjectStore {
                bucket,
                region,
                endpoint,
                ..
            } => f
                .debug_struct("ObjectStore")
                .field("bucket", bucket)
                .field("region", region)
                .field("endpoint", endpoint)
                .finish_non_exhaustive(),
            Self::Dropbox { client_id, .. } => f
                .debug_struct("Dropbox")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Size limits enforced while ingesting a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum accepted size in bytes for a single file.
    pub max_file_size: Option<u64>,
    /// Minimum accepted size in bytes for a single file.
    pub min_file_size: Option<u64>,
    /// Maximum size in bytes of a text field value; longer values are dropped.
    pub max_field_size: Option<u64>,
    /// Maximum size in bytes of the whole request body.
    pub max_body_size: Option<u64>,
}

impl Limits {
    /// Validates limit consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_file_size == Some(0) {
            return Err(ConfigError::ZeroMaxFileSize);
        }

        if let (Some(min), Some(max)) = (self.min_file_size, self.max_file_size) {
            if min > max {
                return Err(ConfigError::InvalidSizeRange { min, max });
            }
        }

        Ok(())
    }
}

/// Serializable construction options.
///
/// Hooks and custom naming functions cannot be expressed in a config file;
/// add them on the builder returned by [`FormPostConfig::into_builder`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FormPostConfig {
    /// Storage backend selector.
    pub store: Store,
    /// Base directory (disk) or key prefix (remote backends).
    pub directory: Option<PathBuf>,
    /// Fixed persisted filename; absent means content hashing.
    pub filename: Option<String>,
    /// Size limits.
    #[serde(flatten)]
    pub limits: Limits,
    /// Per-request deadline in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Remote backend credentials.
    pub api: Option<ApiKeys>,
}

impl FormPostConfig {
    /// Per-request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Converts the options into a builder.
    pub fn into_builder(self) -> crate::FormPostBuilder {
        let timeout = self.request_timeout();
        let mut builder = crate::FormPostBuilder::new()
            .store(self.store)
            .limits(self.limits);
        if let Some(directory) = self.directory {
            builder = builder.directory(directory);
        }
        if let Some(filename) = self.filename {
            builder = builder.filename(crate::FilenameStrategy::Fixed(filename));
        }
        if let Some(timeout) = timeout {
            builder = builder.request_timeout(timeout);
        }
        if let Some(api) = self.api {
            builder = builder.api(api);
        }
        builder
    }
}
