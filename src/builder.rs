use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use crate::{
    config::{ApiKeys, Limits, Store},
    error::ConfigError,
    hooks::{BodyValidator, FileValidator},
    naming::FilenameStrategy,
    parser::FileInfo,
    storage::{Backend, DiskStorage, StorageEngine},
    FormPost, Settings,
};

/// Builder for configuring a [`FormPost`] instance.
#[derive(Clone, Default)]
pub struct FormPostBuilder {
    store: Store,
    directory: Option<PathBuf>,
    filename: FilenameStrategy,
    limits: Limits,
    file_validator: Option<Arc<dyn FileValidator>>,
    body_validator: Option<Arc<dyn BodyValidator>>,
    request_timeout: Option<Duration>,
    api: Option<ApiKeys>,
    dropbox_api_base: Option<String>,
}

impl FormPostBuilder {
    /// Creates a builder with default configuration: disk storage in the
    /// working directory, hashed filenames, no limits, no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the storage backend.
    pub fn store(mut self, store: Store) -> Self {
        self.store = store;
        self
    }

    /// Sets the base directory (disk) or key prefix (remote backends).
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Sets the persisted filename strategy.
    pub fn filename(mut self, strategy: FilenameStrategy) -> Self {
        self.filename = strategy;
        self
    }

    /// Replaces all size limits.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the maximum accepted size of a single file.
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.limits.max_file_size = Some(bytes);
        self
    }

    /// Sets the minimum accepted size of a single file.
    pub fn min_file_size(mut self, bytes: u64) -> Self {
        self.limits.min_file_size = Some(bytes);
        self
    }

    /// Sets the maximum size of a text field value.
    pub fn max_field_size(mut self, bytes: u64) -> Self {
        self.limits.max_field_size = Some(bytes);
        self
    }

    /// Sets the maximum size of the whole request body.
    pub fn max_body_size(mut self, bytes: u64) -> Self {
        self.limits.max_body_size = Some(bytes);
        self
    }

    /// Sets a synchronous per-file validator.
    pub fn validate_file<F>(self, f: F) -> Self
    where
        F: Fn(&FileInfo) -> bool + Send + Sync + 'static,
    {
        self.file_validator(f)
    }

    /// Sets a per-file validator, which may be asynchronous.
    pub fn file_validator(mut self, validator: impl FileValidator + 'static) -> Self {
        self.file_validator = Some(Arc::new(validator));
        self
    }

    /// Sets a synchronous whole-body validator.
    pub fn validate_body<F>(self, f: F) -> Self
    where
        F: Fn(&std::collections::HashMap<String, String>, &[FileInfo]) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.body_validator(f)
    }

    /// Sets a whole-body validator, which may be asynchronous.
    ///
    /// With a body validator configured, files are buffered in memory and
    /// only written once the validator admits the request.
    pub fn body_validator(mut self, validator: impl BodyValidator + 'static) -> Self {
        self.body_validator = Some(Arc::new(validator));
        self
    }

    /// Sets a deadline for ingesting one request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets credentials for a remote backend.
    pub fn api(mut self, api: ApiKeys) -> Self {
        self.api = Some(api);
        self
    }

    /// Overrides the Dropbox content API base URL.
    pub fn dropbox_api_base(mut self, url: impl Into<String>) -> Self {
        self.dropbox_api_base = Some(url.into());
        self
    }

    /// Validates options and builds an instance with the selected backend.
    pub fn build(self) -> Result<FormPost, ConfigError> {
        self.validate()?;
        let directory = match (&self.directory, self.store) {
            (Some(directory), _) => directory.clone(),
            (None, Store::Disk) => {
                std::env::current_dir().map_err(|err| ConfigError::WorkingDirectory {
                    message: err.to_string(),
                })?
            }
            (None, _) => PathBuf::new(),
        };

        let prefix = match self.store {
            Store::Disk => PathBuf::new(),
            _ => directory.clone(),
        };
        let backend = match self.store {
            Store::Disk => {
                if self.api.is_some() {
                    tracing::debug!("ignoring API credentials for disk storage");
                }
                Backend::Disk(DiskStorage::new(directory.clone()))
            }
            Store::ObjectStore => object_store(self.api.as_ref())?,
            Store::Dropbox => dropbox(self.api.as_ref(), self.dropbox_api_base.as_deref())?,
        };

        tracing::debug!(store = %self.store, directory = %directory.display(), "form post configured");
        Ok(FormPost::from_parts(self.into_settings(directory, prefix), backend))
    }

    /// Validates options and builds an instance around a custom storage
    /// engine. The store selector and credentials are ignored, and the
    /// directory, if any, is resolved relative to the engine's own root.
    pub fn build_with_storage<S>(self, storage: S) -> Result<FormPost<S>, ConfigError>
    where
        S: StorageEngine,
    {
        self.validate()?;
        let directory = self.directory.clone().unwrap_or_default();
        Ok(FormPost::from_parts(
            self.into_settings(directory.clone(), directory),
            storage,
        ))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        if let FilenameStrategy::Fixed(name) = &self.filename {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyFixedFilename);
            }
        }
        Ok(())
    }

    fn into_settings(self, directory: PathBuf, prefix: PathBuf) -> Settings {
        Settings {
            directory,
            prefix,
            filename: self.filename,
            limits: self.limits,
            file_validator: self.file_validator,
            body_validator: self.body_validator,
            request_timeout: self.request_timeout,
        }
    }
}

impl fmt::Debug for FormPostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormPostBuilder")
            .field("store", &self.store)
            .field("directory", &self.directory)
            .field("filename", &self.filename)
            .field("limits", &self.limits)
            .field("file_validator", &self.file_validator.is_some())
            .field("body_validator", &self.body_validator.is_some())
            .field("request_timeout", &self.request_timeout)
            .field("api", &self.api)
            .finish()
    }
}

fn credentials_for(store: Store, api: Option<&ApiKeys>) -> Result<&ApiKeys, ConfigError> {
    match api {
        Some(api) if api.store() == store => Ok(api),
        Some(api) => Err(ConfigError::MismatchedCredentials {
            store,
            given: api.store(),
        }),
        None => Err(ConfigError::MissingCredentials { store }),
    }
}

#[cfg(feature = "aws-s3")]
fn object_store(api: Option<&ApiKeys>) -> Result<Backend, ConfigError> {
    use crate::storage::S3Storage;

    let ApiKeys::ObjectStore {
        access_key_id,
        secret_access_key,
        bucket,
        region,
        endpoint,
        acl,
    } = credentials_for(Store::ObjectStore, api)?
    else {
        return Err(ConfigError::MissingCredentials {
            store: Store::ObjectStore,
        });
    };

    let mut storage = S3Storage::new(
        access_key_id,
        secret_access_key,
        bucket.clone(),
        region.clone(),
        endpoint.as_deref(),
    );
    if let Some(acl) = acl {
        storage = storage.with_acl(acl);
    }
    Ok(Backend::ObjectStore(storage))
}

#[cfg(not(feature = "aws-s3"))]
fn object_store(_api: Option<&ApiKeys>) -> Result<Backend, ConfigError> {
    Err(ConfigError::StoreDisabled {
        store: Store::ObjectStore,
        feature: "aws-s3",
    })
}

#[cfg(feature = "dropbox")]
fn dropbox(api: Option<&ApiKeys>, api_base: Option<&str>) -> Result<Backend, ConfigError> {
    use crate::storage::DropboxStorage;

    let ApiKeys::Dropbox {
        access_token,
        client_id,
    } = credentials_for(Store::Dropbox, api)?
    else {
        return Err(ConfigError::MissingCredentials {
            store: Store::Dropbox,
        });
    };

    let mut storage = DropboxStorage::new(access_token.clone());
    if let Some(client_id) = client_id {
        storage = storage.with_client_id(client_id.clone());
    }
    if let Some(api_base) = api_base {
        storage = storage.with_api_base(api_base);
    }
    Ok(Backend::Dropbox(storage))
}

#[cfg(not(feature = "dropbox"))]
fn dropbox(_api: Option<&ApiKeys>, _api_base: Option<&str>) -> Result<Backend, ConfigError> {
    Err(ConfigError::StoreDisabled {
        store: Store::Dropbox,
        feature: "dropbox",
    })
}
