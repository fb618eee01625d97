use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::ObjectCannedAcl,
    Client,
};
use bytes::BytesMut;
use futures::StreamExt;

use crate::{
    error::StorageError,
    storage::{aborted, BoxStream, FileUpload, StorageEngine, StoredFile},
};

const CREDENTIALS_PROVIDER: &str = "form-post";

/// Uploads files to an S3-compatible bucket with `PutObject`.
///
/// The body is collected before the request is sent, so memory use per file
/// is bounded by the configured `max_file_size`.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    acl: Option<ObjectCannedAcl>,
}

impl S3Storage {
    /// Creates a backend with static credentials.
    ///
    /// `endpoint` targets an S3-compatible service and switches to path-style
    /// addressing.
    pub fn new(
        access_key_id: &str,
        secret_access_key: &str,
        bucket: impl Into<String>,
        region: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Self {
        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        );
        let region: String = region.into();
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials);
        if let Some(endpoint) = endpoint {
            config = config.endpoint_url(endpoint).force_path_style(true);
        }

        Self::with_client(Client::from_conf(config.build()), bucket)
    }

    /// Creates a backend around an existing SDK client.
    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            acl: None,
        }
    }

    /// Applies a canned ACL such as `public-read` to every object.
    pub fn with_acl(mut self, acl: &str) -> Self {
        self.acl = Some(ObjectCannedAcl::from(acl));
        self
    }

    /// Target bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait::async_trait]
impl StorageEngine for S3Storage {
    async fn store(
        &self,
        upload: &FileUpload,
        mut body: BoxStream,
    ) -> Result<StoredFile, StorageError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| aborted(&err))?;
            buf.extend_from_slice(&chunk);
        }

        let key = upload.key();
        let size = buf.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(upload.info.mime.essence_str())
            .set_acl(self.acl.clone())
            .body(ByteStream::from(buf.freeze()))
            .send()
            .await
            .map_err(|err| {
                StorageError::new(format!(
                    "failed to put `{key}` into bucket `{}`: {}",
                    self.bucket,
                    DisplayErrorContext(&err)
                ))
            })?;

        tracing::debug!(bucket = %self.bucket, key = %key, size, "stored file in object store");
        Ok(StoredFile::new(
            upload,
            format!("s3://{}/{key}", self.bucket),
            size,
        ))
    }
}
