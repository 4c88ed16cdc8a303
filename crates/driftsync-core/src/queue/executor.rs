use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::models::{FileRecord, OperationType, PendingOperation, SyncFolderConfig, SyncStatus};
use crate::services::MetadataStore;
use crate::transfer::{remote_path, TransferCoordinator};
use crate::{Error, Result};

/// Performs one queued operation against the remote.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, operation: &PendingOperation, cancel: &CancellationToken)
        -> Result<()>;
}

/// Executes operations through a [`TransferCoordinator`] and keeps the
/// affected file records in step.
pub struct TransportExecutor {
    coordinator: TransferCoordinator,
    store: MetadataStore,
}

impl TransportExecutor {
    pub const fn new(coordinator: TransferCoordinator, store: MetadataStore) -> Self {
        Self { coordinator, store }
    }

    async fn folder(&self, folder_id: &str) -> Result<SyncFolderConfig> {
        self.store
            .load_folder(folder_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync folder {folder_id}")))
    }

    async fn upload(
        &self,
        folder: &SyncFolderConfig,
        operation: &PendingOperation,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let local = operation.local_file_path.as_ref().map_or_else(
            || folder.local_root.join(&operation.file_path),
            PathBuf::from,
        );
        let remote = remote_path(&folder.remote_root, &operation.file_path);
        let outcome = self
            .coordinator
            .upload(&folder.id, &local, &remote, cancel)
            .await?;

        let mut record = self
            .store
            .get(&folder.id, &operation.file_path)
            .await?
            .unwrap_or_else(|| {
                FileRecord::new(&folder.id, &operation.file_path, &folder.device_id)
            });
        record.size = outcome.size;
        record.content_hash = outcome.content_hash;
        record.sync_status = SyncStatus::Synced;
        self.store.upsert(&record).await
    }

    async fn relocate(&self, folder: &SyncFolderConfig, operation: &PendingOperation) -> Result<()> {
        let destination = operation.destination_path.as_deref().ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} of {} has no destination",
                operation.operation_type, operation.file_path
            ))
        })?;
        self.coordinator
            .transport()
            .move_or_rename(
                &remote_path(&folder.remote_root, &operation.file_path),
                &remote_path(&folder.remote_root, destination),
            )
            .await?;

        self.store
            .rename_record(&folder.id, &operation.file_path, destination)
            .await?;
        Ok(())
    }

    async fn create_folder(
        &self,
        folder: &SyncFolderConfig,
        operation: &PendingOperation,
    ) -> Result<()> {
        let full = remote_path(&folder.remote_root, &operation.file_path);
        let (parent, name) = full.rsplit_once('/').unwrap_or(("", full.as_str()));
        self.coordinator.transport().create_folder(parent, name).await?;

        let mut record = FileRecord::new(&folder.id, &operation.file_path, &folder.device_id);
        if let Some(existing) = self.store.get(&folder.id, &operation.file_path).await? {
            record = existing;
        }
        record.is_directory = true;
        record.sync_status = SyncStatus::Synced;
        self.store.upsert(&record).await
    }
}

#[async_trait]
impl OperationExecutor for TransportExecutor {
    async fn execute(
        &self,
        operation: &PendingOperation,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let folder = self.folder(&operation.folder_id).await?;
        tracing::debug!(
            folder = %folder.id,
            kind = %operation.operation_type,
            path = %operation.file_path,
            "Executing operation"
        );

        match operation.operation_type {
            OperationType::Upload => self.upload(&folder, operation, cancel).await,
            OperationType::Delete => {
                self.coordinator
                    .transport()
                    .delete_remote(&remote_path(&folder.remote_root, &operation.file_path))
                    .await?;
                self.store.delete(&folder.id, &operation.file_path).await?;
                Ok(())
            }
            OperationType::Rename | OperationType::Move => self.relocate(&folder, operation).await,
            OperationType::CreateFolder => self.create_folder(&folder, operation).await,
        }
    }
}
