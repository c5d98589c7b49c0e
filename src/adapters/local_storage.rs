//! # Local Filesystem Storage
//!
//! Object storage on a local directory: bucket `b`, key `k` lives at
//! `<root>/b/k`. Fetched artifacts are staged as uniquely named files in the
//! staging directory and removed again by cleanup.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::StepError;
use crate::models::{ArtifactHandle, Locator, StepKind};

#[derive(Debug, Clone)]
pub struct LocalFsStorage {
    root: PathBuf,
    staging_dir: PathBuf,
}

impl LocalFsStorage {
    pub fn new(root: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Filesystem path of an object; rejects keys that escape their bucket
    pub fn object_path(&self, locator: &Locator) -> Result<PathBuf, StepError> {
        for part in [&locator.bucket, &locator.key] {
            let escapes = Path::new(part).components().any(|c| {
                matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
            });
            if escapes {
                return Err(StepError::permanent(format!(
                    "locator {locator} escapes the storage root"
                )));
            }
        }
        Ok(self.root.join(&locator.bucket).join(&locator.key))
    }

    /// Reserve a uniquely named file in the staging directory
    pub async fn staging_file(&self, prefix: &str, extension: &str) -> Result<PathBuf, StepError> {
        fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| io_error("create staging directory", e))?;

        let suffix = if extension.is_empty() {
            String::new()
        } else {
            format!(".{extension}")
        };
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(&suffix)
            .tempfile_in(&self.staging_dir)
            .map_err(|e| io_error("reserve staging file", e))?;
        let (_, path) = file
            .keep()
            .map_err(|e| io_error("keep staging file", e.error))?;
        Ok(path)
    }

    /// Copy the source object into staging
    pub async fn fetch(&self, source: &Locator) -> Result<ArtifactHandle, StepError> {
        let source_path = self.object_path(source)?;
        match fs::metadata(&source_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(StepError::permanent(format!("{source} is not an object")));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StepError::permanent(format!("{source} does not exist")));
            }
            Err(e) => return Err(io_error("stat source", e)),
        }

        let extension = source_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        // Removed again if the copy fails or the attempt is abandoned
        let staged = StagedFile::new(self.staging_file("fetch-", extension).await?);
        fs::copy(&source_path, staged.path())
            .await
            .map_err(|e| io_error("download", e))?;

        debug!(source = %source, staged = %staged.path().display(), "⬇️ Object fetched");
        Ok(ArtifactHandle::new(StepKind::Fetch, staged.keep()))
    }

    /// Copy an artifact to its destination object
    pub async fn store(
        &self,
        artifact: &ArtifactHandle,
        destination: &Locator,
    ) -> Result<(), StepError> {
        let destination_path = self.object_path(destination)?;
        if let Some(parent) = destination_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create destination folder", e))?;
        }

        match fs::copy(artifact.location(), &destination_path).await {
            Ok(_) => {
                debug!(destination = %destination, "⬆️ Object stored");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StepError::permanent(format!(
                "artifact {artifact} vanished before upload"
            ))),
            Err(e) => Err(io_error("upload", e)),
        }
    }

    /// Remove a staged artifact; an artifact that is already gone is fine
    pub async fn cleanup(&self, artifact: &ArtifactHandle) -> Result<(), StepError> {
        match fs::remove_file(artifact.location()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove staged artifact", e)),
        }
    }
}

/// A reserved staging file, removed on drop unless the step produced it
pub(crate) struct StagedFile {
    path: PathBuf,
    armed: bool,
}

impl StagedFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Hand the file over to an artifact handle
    pub(crate) fn keep(mut self) -> String {
        self.armed = false;
        self.path.to_string_lossy().into_owned()
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Classify an I/O failure for the retry loop
pub(crate) fn io_error(action: &str, error: std::io::Error) -> StepError {
    match error.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
            StepError::permanent(format!("{action} failed: {error}"))
        }
        _ => StepError::transient(format!("{action} failed: {error}")),
    }
}
