//! Step operations backed by the local filesystem and a transform command.

use std::path::PathBuf;

use super::command_transformer::CommandTransformer;
use super::local_storage::LocalFsStorage;
use crate::config::{StorageConfig, TransformConfig};
use crate::error::StepError;
use crate::models::{ArtifactHandle, JobDescriptor};
use crate::orchestration::types::StepOperations;

#[derive(Debug, Clone)]
pub struct LocalSteps {
    storage: LocalFsStorage,
    transformer: CommandTransformer,
}

impl LocalSteps {
    pub fn new(storage: LocalFsStorage, transformer: CommandTransformer) -> Self {
        Self {
            storage,
            transformer,
        }
    }

    pub fn from_config(storage: &StorageConfig, transform: &TransformConfig) -> Self {
        let staging_dir = storage
            .staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("conveyor-staging"));
        Self::new(
            LocalFsStorage::new(storage.root.clone(), staging_dir),
            CommandTransformer::new(transform.command.clone(), transform.output_extension.clone()),
        )
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.storage.staging_dir().to_path_buf()
    }
}

#[async_trait::async_trait]
impl StepOperations for LocalSteps {
    async fn fetch(&self, job: &JobDescriptor) -> Result<ArtifactHandle, StepError> {
        self.storage.fetch(&job.source).await
    }

    async fn transform(
        &self,
        job: &JobDescriptor,
        input: &ArtifactHandle,
        instruction: &str,
    ) -> Result<ArtifactHandle, StepError> {
        self.transformer
            .transform(&self.storage, job, input, instruction)
            .await
    }

    async fn store(&self, job: &JobDescriptor, artifact: &ArtifactHandle) -> Result<(), StepError> {
        self.storage.store(artifact, &job.destination).await
    }

    async fn cleanup(&self, artifact: &ArtifactHandle) -> Result<(), StepError> {
        self.storage.cleanup(artifact).await
    }
}
