//! Thread-safe metadata store shared by the detector, queue and orchestrator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    ConflictRepository, Database, FileRepository, FolderRepository, OperationRepository,
    SettingsRepository, SqliteConflictRepository, SqliteFileRepository, SqliteFolderRepository,
    SqliteOperationRepository, SqliteSettingsRepository, SqliteUploadSessionRepository,
    UploadSession, UploadSessionRepository,
};
use crate::models::{
    Conflict, ConflictId, ConflictPolicy, FileRecord, FolderStatus, OperationId,
    OperationStatus, PendingOperation, SyncFolderConfig,
};
use crate::Result;

/// Async facade over the `SQLite` metadata database.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl MetadataStore {
    /// Open (or create) the store at the given filesystem path.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::debug!(path = %db_path.display(), "Opened metadata store");
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Location of the database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    // File records

    pub async fn upsert(&self, record: &FileRecord) -> Result<()> {
        let db = self.db.lock().await;
        SqliteFileRepository::new(db.connection()).upsert(record)
    }

    pub async fn get(&self, folder_id: &str, relative_path: &str) -> Result<Option<FileRecord>> {
        let db = self.db.lock().await;
        SqliteFileRepository::new(db.connection()).get(folder_id, relative_path)
    }

    pub async fn list_under(&self, folder_id: &str, prefix: &str) -> Result<Vec<FileRecord>> {
        let db = self.db.lock().await;
        SqliteFileRepository::new(db.connection()).list_under(folder_id, prefix)
    }

    pub async fn delete(&self, folder_id: &str, relative_path: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteFileRepository::new(db.connection()).delete(folder_id, relative_path)
    }

    /// Move a record (and those below it) to a new path atomically.
    pub async fn rename_record(&self, folder_id: &str, from: &str, to: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteFileRepository::new(db.connection()).rename(folder_id, from, to)
    }

    // Operation queue

    /// Non-terminal operations, FIFO by creation time.
    pub async fn list_pending(&self) -> Result<Vec<PendingOperation>> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).list_active()
    }

    /// Insert an operation, atomically replacing the active one on the same path.
    pub async fn enqueue_or_replace(
        &self,
        operation: &PendingOperation,
    ) -> Result<Option<OperationId>> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).enqueue_or_replace(operation)
    }

    pub async fn get_operation(&self, id: &OperationId) -> Result<Option<PendingOperation>> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).get(id)
    }

    pub async fn update_operation(&self, operation: &PendingOperation) -> Result<()> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).update(operation)
    }

    pub async fn list_operations(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<PendingOperation>> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).list(status)
    }

    pub async fn delete_operation(&self, id: &OperationId) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).delete(id)
    }

    /// Purge completed operations finished before `older_than` (Unix ms).
    pub async fn purge_completed(&self, older_than: i64) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).purge_completed(older_than)
    }

    pub async fn operation_counts(&self) -> Result<HashMap<OperationStatus, usize>> {
        let db = self.db.lock().await;
        SqliteOperationRepository::new(db.connection()).count_by_status()
    }

    // Conflicts

    pub async fn record_conflict(&self, conflict: &Conflict) -> Result<()> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).record(conflict)
    }

    pub async fn list_open_conflicts(&self, folder_id: Option<&str>) -> Result<Vec<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list_open(folder_id)
    }

    pub async fn get_conflict(&self, id: &ConflictId) -> Result<Option<Conflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).get(id)
    }

    pub async fn mark_conflict_resolved(
        &self,
        id: &ConflictId,
        resolution: ConflictPolicy,
        at: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).mark_resolved(id, resolution, at)
    }

    pub async fn clear_open_conflict(&self, folder_id: &str, relative_path: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).clear_open(folder_id, relative_path)
    }

    pub async fn purge_resolved_conflicts(&self, older_than: i64) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).purge_resolved(older_than)
    }

    // Folders

    pub async fn save_folder(&self, folder: &SyncFolderConfig) -> Result<()> {
        let db = self.db.lock().await;
        SqliteFolderRepository::new(db.connection()).save(folder)
    }

    pub async fn load_folder(&self, id: &str) -> Result<Option<SyncFolderConfig>> {
        let db = self.db.lock().await;
        SqliteFolderRepository::new(db.connection()).load(id)
    }

    pub async fn list_folders(&self) -> Result<Vec<SyncFolderConfig>> {
        let db = self.db.lock().await;
        SqliteFolderRepository::new(db.connection()).list()
    }

    pub async fn delete_folder(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteFolderRepository::new(db.connection()).delete(id)
    }

    pub async fn set_last_sync_at(&self, id: &str, at: i64) -> Result<()> {
        let db = self.db.lock().await;
        SqliteFolderRepository::new(db.connection()).set_last_sync_at(id, at)
    }

    pub async fn set_folder_status(&self, id: &str, status: FolderStatus) -> Result<()> {
        let db = self.db.lock().await;
        SqliteFolderRepository::new(db.connection()).set_status(id, status)
    }

    // Upload sessions

    pub async fn get_upload_session(
        &self,
        folder_id: &str,
        relative_path: &str,
    ) -> Result<Option<UploadSession>> {
        let db = self.db.lock().await;
        SqliteUploadSessionRepository::new(db.connection()).get_session(folder_id, relative_path)
    }

    pub async fn save_upload_session(&self, session: &UploadSession) -> Result<()> {
        let db = self.db.lock().await;
        SqliteUploadSessionRepository::new(db.connection()).save_session(session)
    }

    pub async fn delete_upload_session(&self, folder_id: &str, relative_path: &str) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteUploadSessionRepository::new(db.connection())
            .delete_session(folder_id, relative_path)
    }

    // Settings

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).get_setting(key)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).set_setting(key, value)
    }

    /// This device's id, created on first use.
    pub async fn device_id(&self) -> Result<String> {
        let db = self.db.lock().await;
        SqliteSettingsRepository::new(db.connection()).device_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn in_memory_record_roundtrip() {
        let store = MetadataStore::open_in_memory().unwrap();

        let record = FileRecord::new("docs", "a.txt", "laptop");
        store.upsert(&record).await.unwrap();
        assert_eq!(store.get("docs", "a.txt").await.unwrap(), Some(record));
        assert_eq!(store.list_under("docs", "").await.unwrap().len(), 1);
        assert!(store.delete("docs", "a.txt").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clones_share_one_database() {
        let store = MetadataStore::open_in_memory().unwrap();
        let clone = store.clone();

        let op = PendingOperation::upload("docs", "a.txt", "/tmp/a.txt");
        store.enqueue_or_replace(&op).await.unwrap();
        assert_eq!(clone.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("driftsync.db");

        let store = MetadataStore::open(&path).unwrap();
        let device_id = store.device_id().await.unwrap();
        drop(store);

        let reopened = MetadataStore::open(&path).unwrap();
        assert_eq!(reopened.device_id().await.unwrap(), device_id);
        assert_eq!(reopened.path(), Some(path.as_path()));
    }
}
