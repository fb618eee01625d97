//! Optional validation hooks.
//!
//! Both hooks default to admitting everything. A hook may answer with a
//! verdict (`Ok(true)` admits, `Ok(false)` rejects) or fail with an error,
//! which is reported as a request-level validator failure.

use std::collections::HashMap;

use crate::{error::BoxError, parser::FileInfo};

/// Per-file gate invoked when a file part starts, before any byte is stored.
#[async_trait::async_trait]
pub trait FileValidator: Send + Sync {
    /// Decides whether the file part is admitted.
    async fn validate(&self, file: &FileInfo) -> Result<bool, BoxError>;
}

#[async_trait::async_trait]
impl<F> FileValidator for F
where
    F: Fn(&FileInfo) -> bool + Send + Sync,
{
    async fn validate(&self, file: &FileInfo) -> Result<bool, BoxError> {
        Ok(self(file))
    }
}

/// Whole-body gate invoked after all parts were parsed and before buffered
/// files are committed to storage.
#[async_trait::async_trait]
pub trait BodyValidator: Send + Sync {
    /// Decides whether the request's files are committed.
    async fn validate(
        &self,
        fields: &HashMap<String, String>,
        files: &[FileInfo],
    ) -> Result<bool, BoxError>;
}

#[async_trait::async_trait]
impl<F> BodyValidator for F
where
    F: Fn(&HashMap<String, String>, &[FileInfo]) -> bool + Send + Sync,
{
    async fn validate(
        &self,
        fields: &HashMap<String, String>,
        files: &[FileInfo],
    ) -> Result<bool, BoxError> {
        Ok(self(fields, files))
    }
}
