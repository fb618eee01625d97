use reqwest::{header, Body, Client};
use serde::{Deserialize, Serialize};

use crate::{
    error::StorageError,
    storage::{BoxStream, FileUpload, StorageEngine, StoredFile},
};

const DEFAULT_API_BASE: &str = "https://content.dropboxapi.com";
const UPLOAD_PATH: &str = "/2/files/upload";
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Streams uploads to the Dropbox content API.
#[derive(Clone)]
pub struct DropboxStorage {
    http: Client,
    access_token: String,
    client_id: Option<String>,
    api_base: String,
}

impl std::fmt::Debug for DropboxStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropboxStorage")
            .field("client_id", &self.client_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: &'a str,
    autorename: bool,
    mute: bool,
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    path_display: Option<String>,
    path_lower: Option<String>,
    size: u64,
}

impl DropboxStorage {
    /// Creates a backend authenticated with an OAuth bearer token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            access_token: access_token.into(),
            client_id: None,
            api_base: DEFAULT_API_BASE.to_owned(),
        }
    }

    /// Records the application client id, sent as the user agent.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Overrides the content API base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    fn remote_path(upload: &FileUpload) -> String {
        format!("/{}", upload.key())
    }
}

#[async_trait::async_trait]
impl StorageEngine for DropboxStorage {
    async fn store(&self, upload: &FileUpload, body: BoxStream) -> Result<StoredFile, StorageError> {
        let path = Self::remote_path(upload);
        let arg = serde_json::to_string(&UploadArg {
            path: &path,
            mode: "add",
            autorename: true,
            mute: false,
        })
        .map_err(|err| StorageError::with_source("failed to encode Dropbox-API-Arg", err))?;

        let mut request = self
            .http
            .post(format!("{}{UPLOAD_PATH}", self.api_base))
            .bearer_auth(&self.access_token)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(API_ARG_HEADER, arg)
            .body(Body::wrap_stream(body));
        if let Some(client_id) = &self.client_id {
            request = request.header(header::USER_AGENT, client_id);
        }

        let response = request
            .send()
            .await
            .map_err(|err| StorageError::with_source(format!("upload of `{path}` failed"), err))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StorageError::new(format!(
                "upload of `{path}` rejected with {status}: {detail}"
            )));
        }

        let metadata: FileMetadata = response.json().await.map_err(|err| {
            StorageError::with_source(format!("invalid upload response for `{path}`"), err)
        })?;
        let location = metadata
            .path_display
            .or(metadata.path_lower)
            .unwrap_or(path);

        tracing::debug!(path = %location, size = metadata.size, "stored file in dropbox");
        Ok(StoredFile::new(upload, location, metadata.size))
    }
}
