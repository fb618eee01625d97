use std::path::{Component, Path, PathBuf};

use futures::StreamExt;
use tokio::{
    fs,
    io::{AsyncWriteExt, BufWriter},
};
use uuid::Uuid;

use crate::{
    error::StorageError,
    storage::{aborted, BoxStream, FileUpload, StorageEngine, StoredFile},
};

/// Writes uploads below a root directory.
///
/// Bytes are streamed into a hidden temporary file next to the target and
/// renamed into place once the body completes, so an aborted, failed or
/// cancelled upload never leaves a partial file under the final name.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Creates a disk backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory every upload is written under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins an upload's relative directory onto the root.
    fn target_directory(&self, upload: &FileUpload) -> Result<PathBuf, StorageError> {
        let relative = upload
            .directory
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !relative {
            return Err(StorageError::new(format!(
                "directory `{}` escapes storage root `{}`",
                upload.directory.display(),
                self.root.display()
            )));
        }
        Ok(self.root.join(&upload.directory))
    }

    async fn write_temp(
        &self,
        temp_path: &Path,
        mut body: BoxStream,
    ) -> Result<u64, StorageError> {
        let file = fs::File::create(temp_path).await.map_err(|err| {
            StorageError::with_source(format!("failed to create `{}`", temp_path.display()), err)
        })?;
        let mut writer = BufWriter::new(file);
        let mut size = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| aborted(&err))?;
            size += chunk.len() as u64;
            writer.write_all(&chunk).await.map_err(|err| {
                StorageError::with_source(format!("failed to write `{}`", temp_path.display()), err)
            })?;
        }

        writer.flush().await.map_err(|err| {
            StorageError::with_source(format!("failed to flush `{}`", temp_path.display()), err)
        })?;
        Ok(size)
    }
}

/// Removes a temporary file when dropped unless it was moved into place.
///
/// The writer task can be cancelled at any `.await`, so cleanup cannot rely on
/// the error path alone.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = std::fs::remove_file(&self.path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %err, "failed to remove partial upload");
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl StorageEngine for DiskStorage {
    async fn store(&self, upload: &FileUpload, body: BoxStream) -> Result<StoredFile, StorageError> {
        let directory = self.target_directory(upload)?;

        fs::create_dir_all(&directory).await.map_err(|err| {
            StorageError::with_source(
                format!("failed to create directory `{}`", directory.display()),
                err,
            )
        })?;

        let path = directory.join(&upload.filename);
        let mut part = PartFile::new(
            directory.join(format!(".{}.{}.part", upload.filename, Uuid::new_v4())),
        );

        let size = self.write_temp(&part.path, body).await?;
        fs::rename(&part.path, &path).await.map_err(|err| {
            StorageError::with_source(format!("failed to move upload into `{}`", path.display()), err)
        })?;
        part.disarm();

        tracing::debug!(path = %path.display(), size, "stored file on disk");
        let mut stored = StoredFile::new(upload, path.display().to_string(), size);
        stored.path = Some(path);
        Ok(stored)
    }
}
