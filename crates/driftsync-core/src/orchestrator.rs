//! Sync passes: enumerate both sides, analyze, apply, persist.
//!
//! A pass commits the folder's `last_sync_at` only after every step
//! succeeded, so an interrupted pass is simply repeated next time.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::detector::{hash_file_async, ChangeDetector, LocalEntry};
use crate::models::{
    Conflict, ConflictId, ConflictPolicy, FileRecord, FolderStatus, OperationId, OperationType,
    PendingOperation, SyncFolderConfig, SyncStatus,
};
use crate::queue::{
    CleanupReport, OperationExecutor, OperationQueue, ProcessReport, QueueStats, TransportExecutor,
};
use crate::services::MetadataStore;
use crate::sync::{
    analyze, increment_version, merge_records, resolve, FileEntry, PathDecision, Resolution,
    SyncAction,
};
use crate::transfer::{remote_path, TransferCoordinator, Transport};
use crate::{util, Error, Result};

/// What one pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub folder_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub uploads_queued: Vec<String>,
    pub downloaded: Vec<String>,
    pub deletes_queued: Vec<String>,
    /// Local renames sent as one remote move, as `from -> to`
    pub moves_queued: Vec<String>,
    pub deleted_locally: Vec<String>,
    /// Conflicts left open for the user
    pub conflicts: Vec<String>,
    /// Conflicts settled by the folder policy
    pub auto_resolved: Vec<String>,
    /// Downloads suppressed by one-way sync
    pub skipped: Vec<String>,
    pub unchanged: usize,
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderSyncStatus {
    pub folder_id: String,
    pub status: FolderStatus,
    pub last_sync_at: Option<i64>,
    pub in_progress: bool,
    pub open_conflicts: usize,
    pub pending_operations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveAllReport {
    pub resolved: Vec<String>,
    pub skipped: Vec<String>,
}

/// Per-path step chosen from an analyzer decision and the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Upload,
    Download,
    DeleteRemote,
    DeleteLocal,
    Conflict,
    Unchanged,
}

/// When both sides hold differing files the stored record settles which one
/// changed. A path that was synced before and vanished on one side unchanged
/// on the other was deleted, not created.
fn plan(
    action: SyncAction,
    local: Option<&FileEntry>,
    remote: Option<&FileEntry>,
    known: Option<&FileRecord>,
    last_sync_at: Option<i64>,
) -> Step {
    if let (Some(local), Some(remote), Some(record)) = (local, remote, known) {
        let both_files = !local.is_directory && !remote.is_directory;
        if action != SyncAction::NoAction && both_files {
            if let Some(step) = against_record(local, remote, record, last_sync_at) {
                return step;
            }
        }
    }

    let was_synced = known.is_some_and(|record| record.sync_status == SyncStatus::Synced);
    let unchanged_since =
        |entry: &FileEntry| last_sync_at.is_some_and(|last| entry.modified_at <= last);

    match action {
        SyncAction::NoAction => Step::Unchanged,
        SyncAction::Conflict => Step::Conflict,
        SyncAction::Upload => match (local, remote) {
            (Some(local), None) if was_synced && unchanged_since(local) => Step::DeleteLocal,
            _ => Step::Upload,
        },
        SyncAction::Download => match (local, remote) {
            (None, Some(remote)) if was_synced && unchanged_since(remote) => Step::DeleteRemote,
            _ => Step::Download,
        },
    }
}

/// Decide a file present on both sides with different content from what
/// was last agreed on. Timestamps alone can't tell a remote changed by our
/// own upload from one changed by someone else.
fn against_record(
    local: &FileEntry,
    remote: &FileEntry,
    record: &FileRecord,
    last_sync_at: Option<i64>,
) -> Option<Step> {
    match record.sync_status {
        SyncStatus::Synced
            if !record.content_hash.is_empty()
                && !local.hash.is_empty()
                && !remote.hash.is_empty() =>
        {
            let base = record.content_hash.as_str();
            Some(match (local.hash != base, remote.hash != base) {
                (true, false) => Step::Upload,
                (false, true) => Step::Download,
                _ => Step::Conflict,
            })
        }
        // Local edit still queued; only a remote change since then competes
        SyncStatus::PendingUpload => last_sync_at.map(|last| {
            if remote.modified_at > last {
                Step::Conflict
            } else {
                Step::Upload
            }
        }),
        _ => None,
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(index, _)| &path[..index])
}

fn relocation_kind(from: &str, to: &str) -> OperationType {
    if parent_of(from) == parent_of(to) {
        OperationType::Rename
    } else {
        OperationType::Move
    }
}

/// State shared across the steps of one pass.
struct Pass<'a> {
    folder: &'a SyncFolderConfig,
    started_at: i64,
    known: HashMap<String, FileRecord>,
    open_conflicts: HashMap<String, Conflict>,
    active: HashSet<(OperationType, String)>,
    report: SyncReport,
}

/// Drives sync passes and exposes the engine to callers.
pub struct SyncOrchestrator {
    store: MetadataStore,
    coordinator: TransferCoordinator,
    queue: OperationQueue,
    executor: Arc<dyn OperationExecutor>,
    config: EngineConfig,
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(store: MetadataStore, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let coordinator = TransferCoordinator::new(transport, store.clone(), &config);
        let queue = OperationQueue::new(store.clone(), config.clone());
        let executor: Arc<dyn OperationExecutor> =
            Arc::new(TransportExecutor::new(coordinator.clone(), store.clone()));
        Self {
            store,
            coordinator,
            queue,
            executor,
            config,
            locks: std::sync::Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub const fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub const fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Token cancelled by [`Self::shutdown`]; passes and transfers observe it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn folder_lock(&self, folder_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(folder_id.to_string()).or_default())
    }

    async fn load_folder(&self, folder_id: &str) -> Result<SyncFolderConfig> {
        self.store
            .load_folder(folder_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sync folder {folder_id}")))
    }

    /// Run one pass for `folder_id`. An overlapping pass is rejected.
    pub async fn trigger_sync(&self, folder_id: &str) -> Result<SyncReport> {
        let lock = self.folder_lock(folder_id);
        let Ok(_guard) = lock.try_lock() else {
            return Err(Error::SyncInProgress(folder_id.to_string()));
        };

        let folder = self.load_folder(folder_id).await?;
        if folder.status == FolderStatus::Paused {
            return Err(Error::InvalidInput(format!("sync folder {folder_id} is paused")));
        }

        let started_at = util::now_millis();
        tracing::info!(folder = %folder.id, "Sync pass started");
        self.store
            .set_folder_status(&folder.id, FolderStatus::Syncing)
            .await?;

        match self.run_pass(&folder, started_at, &self.shutdown).await {
            Ok(report) => {
                self.store.set_last_sync_at(&folder.id, started_at).await?;
                self.store
                    .set_folder_status(&folder.id, FolderStatus::Idle)
                    .await?;
                tracing::info!(
                    folder = %folder.id,
                    uploads = report.uploads_queued.len(),
                    downloads = report.downloaded.len(),
                    conflicts = report.conflicts.len(),
                    "Sync pass finished"
                );
                Ok(report)
            }
            Err(error) => {
                let status = if matches!(error, Error::Cancelled) {
                    FolderStatus::Idle
                } else {
                    FolderStatus::Error
                };
                tracing::error!(folder = %folder.id, %error, "Sync pass aborted");
                if let Err(status_error) = self.store.set_folder_status(&folder.id, status).await {
                    tracing::error!(folder = %folder.id, error = %status_error, "Could not record folder status");
                }
                Err(error)
            }
        }
    }

    async fn run_pass(
        &self,
        folder: &SyncFolderConfig,
        started_at: i64,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let detector = ChangeDetector::new(folder, self.store.clone(), self.config.clone())?;
        let local_entries = detector.enumerate().await?;

        let mut remote = self
            .coordinator
            .transport()
            .list_remote(&folder.remote_root)
            .await?;
        remote.retain(|entry| {
            !detector
                .excludes()
                .is_excluded(&entry.relative_path, entry.is_directory)
        });

        let known: HashMap<String, FileRecord> = self
            .store
            .list_under(&folder.id, "")
            .await?
            .into_iter()
            .map(|record| (record.relative_path.clone(), record))
            .collect();
        let remote_paths: HashSet<&str> = remote
            .iter()
            .map(|entry| entry.relative_path.as_str())
            .collect();
        let local = local_listing(&local_entries, &known, &remote_paths).await?;
        let decisions = analyze(&local, &remote, folder.last_sync_at);

        let open_conflicts = self
            .store
            .list_open_conflicts(Some(&folder.id))
            .await?
            .into_iter()
            .map(|conflict| (conflict.relative_path.clone(), conflict))
            .collect();
        let active = self
            .queue
            .snapshot()
            .await?
            .into_iter()
            .filter(|operation| operation.folder_id == folder.id)
            .map(|operation| (operation.operation_type, operation.file_path))
            .collect();

        let mut pass = Pass {
            folder,
            started_at,
            known,
            open_conflicts,
            active,
            report: SyncReport {
                folder_id: folder.id.clone(),
                started_at,
                ..SyncReport::default()
            },
        };

        let steps: Vec<(PathDecision, Step)> = decisions
            .into_iter()
            .map(|decision| {
                let step = plan(
                    decision.action,
                    decision.local.as_ref(),
                    decision.remote.as_ref(),
                    pass.known.get(&decision.path),
                    folder.last_sync_at,
                );
                (decision, step)
            })
            .collect();
        let renames = detect_renames(&folder.local_root, &steps, &pass.known).await?;
        let rename_targets: HashSet<&str> = renames.values().map(String::as_str).collect();

        let mut seen = BTreeSet::new();
        for (decision, step) in &steps {
            let step = *step;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            seen.insert(decision.path.clone());
            // Timestamps said one side changed but both moved off the stored hash
            let reason = if step == Step::Conflict && decision.action != SyncAction::Conflict {
                "both modified since last sync"
            } else {
                decision.reason
            };
            tracing::debug!(folder = %folder.id, path = %decision.path, ?step, reason, "Applying decision");

            if step != Step::Conflict {
                self.clear_conflict(&mut pass, &decision.path).await?;
            }
            if let Some(destination) = renames.get(&decision.path) {
                self.queue_move(&mut pass, &decision.path, destination).await?;
                continue;
            }
            if rename_targets.contains(decision.path.as_str()) {
                continue;
            }
            match (step, decision.local.as_ref(), decision.remote.as_ref()) {
                (Step::Upload | Step::DeleteLocal, Some(local), _) if !folder.is_two_way() => {
                    self.queue_upload(&mut pass, local).await?;
                }
                (Step::Upload, Some(local), _) => self.queue_upload(&mut pass, local).await?,
                (Step::DeleteLocal, Some(local), _) => self.delete_local(&mut pass, local).await?,
                (Step::Download, _, Some(remote)) => self.download(&mut pass, remote, cancel).await?,
                (Step::DeleteRemote, _, Some(_)) => self.queue_remote_delete(&mut pass, &decision.path).await?,
                (Step::Conflict, Some(local), Some(remote)) => {
                    self.handle_conflict(&mut pass, local, remote, reason, cancel)
                        .await?;
                }
                (Step::Unchanged, local, _) => self.mark_unchanged(&mut pass, local).await?,
                _ => {}
            }
        }

        // Gone from both sides
        let stale: Vec<String> = pass
            .known
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        for path in stale {
            self.store.delete(&folder.id, &path).await?;
        }

        pass.report.finished_at = util::now_millis();
        Ok(pass.report)
    }

    async fn clear_conflict(&self, pass: &mut Pass<'_>, path: &str) -> Result<()> {
        if pass.open_conflicts.remove(path).is_some() {
            self.store.clear_open_conflict(&pass.folder.id, path).await?;
            tracing::info!(folder = %pass.folder.id, path, "Conflict no longer applies");
        }
        Ok(())
    }

    /// Record the local state as pending upload and enqueue the transfer.
    async fn queue_upload(&self, pass: &mut Pass<'_>, local: &FileEntry) -> Result<()> {
        let folder = pass.folder;
        let path = local.relative_path.as_str();
        let known = pass.known.get(path);
        let changed = known.is_none_or(|record| {
            record.stat_differs(local.size, local.modified_at)
                || record.sync_status != SyncStatus::PendingUpload
        });

        let mut record = known
            .cloned()
            .unwrap_or_else(|| FileRecord::new(&folder.id, path, &folder.device_id));
        record.is_directory = local.is_directory;
        record.size = local.size;
        record.content_hash.clone_from(&local.hash);
        if changed {
            increment_version(&mut record, &folder.device_id, pass.started_at);
        }
        record.modified_at = local.modified_at;
        record.sync_status = SyncStatus::PendingUpload;
        self.store.upsert(&record).await?;

        let kind = if local.is_directory {
            OperationType::CreateFolder
        } else {
            OperationType::Upload
        };
        if !pass.active.contains(&(kind, path.to_string())) {
            let operation = if local.is_directory {
                PendingOperation::new(&folder.id, kind, path)
            } else {
                let absolute = folder.local_root.join(path);
                PendingOperation::upload(&folder.id, path, absolute.to_string_lossy())
            };
            self.queue
                .enqueue(&operation.with_max_retries(self.config.max_retries))
                .await?;
            pass.active.insert((kind, path.to_string()));
        }
        pass.report.uploads_queued.push(path.to_string());
        Ok(())
    }

    async fn queue_remote_delete(&self, pass: &mut Pass<'_>, path: &str) -> Result<()> {
        let key = (OperationType::Delete, path.to_string());
        if !pass.active.contains(&key) {
            let operation = PendingOperation::new(&pass.folder.id, OperationType::Delete, path)
                .with_max_retries(self.config.max_retries);
            self.queue.enqueue(&operation).await?;
            pass.active.insert(key);
        }
        pass.report.deletes_queued.push(path.to_string());
        Ok(())
    }

    async fn queue_move(&self, pass: &mut Pass<'_>, from: &str, to: &str) -> Result<()> {
        let kind = relocation_kind(from, to);
        let key = (kind, from.to_string());
        if !pass.active.contains(&key) {
            let operation = PendingOperation::new(&pass.folder.id, kind, from)
                .with_destination(to)
                .with_max_retries(self.config.max_retries);
            self.queue.enqueue(&operation).await?;
            pass.active.insert(key);
            tracing::info!(folder = %pass.folder.id, from, to, %kind, "Local rename queued");
        }
        pass.report.moves_queued.push(format!("{from} -> {to}"));
        Ok(())
    }

    async fn delete_local(&self, pass: &mut Pass<'_>, local: &FileEntry) -> Result<()> {
        let target = pass.folder.local_root.join(&local.relative_path);
        let removed = if local.is_directory {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        match removed {
            Ok(()) => {}
            // Parent directory already removed
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        self.store
            .delete(&pass.folder.id, &local.relative_path)
            .await?;
        pass.known.remove(&local.relative_path);
        tracing::info!(folder = %pass.folder.id, path = %local.relative_path, "Removed local copy deleted remotely");
        pass.report.deleted_locally.push(local.relative_path.clone());
        Ok(())
    }

    async fn download(
        &self,
        pass: &mut Pass<'_>,
        remote: &FileEntry,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !pass.folder.is_two_way() {
            pass.report.skipped.push(remote.relative_path.clone());
            return Ok(());
        }
        let record = self
            .fetch(pass.folder, remote, pass.known.get(&remote.relative_path), cancel)
            .await?;
        pass.known.insert(record.relative_path.clone(), record);
        pass.report.downloaded.push(remote.relative_path.clone());
        Ok(())
    }

    /// Download one remote entry and persist the resulting record.
    async fn fetch(
        &self,
        folder: &SyncFolderConfig,
        remote: &FileEntry,
        known: Option<&FileRecord>,
        cancel: &CancellationToken,
    ) -> Result<FileRecord> {
        let path = remote.relative_path.as_str();
        let local_path = folder.local_root.join(path);
        if remote.is_directory {
            tokio::fs::create_dir_all(&local_path).await?;
        } else {
            let expected = (!remote.hash.is_empty()).then_some(remote.hash.as_str());
            self.coordinator
                .download(
                    &remote_path(&folder.remote_root, path),
                    &local_path,
                    expected,
                    cancel,
                )
                .await?;
            set_modified(&local_path, remote.modified_at).await?;
        }

        let metadata = tokio::fs::metadata(&local_path).await?;
        let mut record = known
            .cloned()
            .unwrap_or_else(|| FileRecord::new(&folder.id, path, &folder.device_id));
        record.is_directory = remote.is_directory;
        record.size = if remote.is_directory { 0 } else { metadata.len() };
        record.content_hash.clone_from(&remote.hash);
        record.modified_at = metadata
            .modified()
            .map_or(remote.modified_at, util::system_time_millis);
        record.sync_status = SyncStatus::Synced;
        self.store.upsert(&record).await?;
        tracing::debug!(folder = %folder.id, path, "Downloaded");
        Ok(record)
    }

    async fn handle_conflict(
        &self,
        pass: &mut Pass<'_>,
        local: &FileEntry,
        remote: &FileEntry,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let folder = pass.folder;
        let path = local.relative_path.as_str();

        // Same divergence as last time keeps its id
        let conflict = match pass.open_conflicts.get(path) {
            Some(open) if open.local_hash == local.hash && open.remote_hash == remote.hash => {
                open.clone()
            }
            _ => {
                let conflict = Conflict {
                    id: ConflictId::new(),
                    folder_id: folder.id.clone(),
                    relative_path: path.to_string(),
                    local_modified_at: local.modified_at,
                    remote_modified_at: remote.modified_at,
                    local_hash: local.hash.clone(),
                    remote_hash: remote.hash.clone(),
                    reason: reason.to_string(),
                    detected_at: pass.started_at,
                    resolution: None,
                    resolved_at: None,
                };
                self.store.record_conflict(&conflict).await?;
                tracing::warn!(folder = %folder.id, path, reason, "Conflict detected");
                conflict
            }
        };

        let policy = folder.conflict_resolution_policy;
        match resolve(&conflict, policy) {
            Resolution::Upload => {
                self.queue_upload(pass, local).await?;
            }
            Resolution::Download if folder.is_two_way() => {
                let record = self
                    .fetch(folder, remote, pass.known.get(path), cancel)
                    .await?;
                pass.known.insert(path.to_string(), record);
                pass.report.downloaded.push(path.to_string());
            }
            Resolution::Download => {
                pass.report.skipped.push(path.to_string());
                return self.leave_open(pass, path).await;
            }
            Resolution::Undecided | Resolution::Deferred => {
                return self.leave_open(pass, path).await;
            }
        }

        self.store
            .mark_conflict_resolved(&conflict.id, policy, pass.started_at)
            .await?;
        pass.open_conflicts.remove(path);
        tracing::info!(folder = %folder.id, path, %policy, "Conflict resolved by folder policy");
        pass.report.auto_resolved.push(path.to_string());
        Ok(())
    }

    async fn leave_open(&self, pass: &mut Pass<'_>, path: &str) -> Result<()> {
        let folder = pass.folder;
        let mut record = pass
            .known
            .get(path)
            .cloned()
            .unwrap_or_else(|| FileRecord::new(&folder.id, path, &folder.device_id));
        if record.sync_status != SyncStatus::Conflict {
            record.sync_status = SyncStatus::Conflict;
            self.store.upsert(&record).await?;
            pass.known.insert(path.to_string(), record);
        }
        pass.report.conflicts.push(path.to_string());
        Ok(())
    }

    async fn mark_unchanged(&self, pass: &mut Pass<'_>, local: Option<&FileEntry>) -> Result<()> {
        pass.report.unchanged += 1;
        let Some(local) = local else {
            return Ok(());
        };
        let folder = pass.folder;
        let known = pass.known.get(&local.relative_path);
        let current = known.is_some_and(|record| {
            record.sync_status == SyncStatus::Synced
                && record.content_hash == local.hash
                && !record.stat_differs(local.size, local.modified_at)
        });
        if current {
            return Ok(());
        }

        let mut record = known.cloned().unwrap_or_else(|| {
            FileRecord::new(&folder.id, &local.relative_path, &folder.device_id)
        });
        record.is_directory = local.is_directory;
        record.size = local.size;
        record.content_hash.clone_from(&local.hash);
        record.modified_at = local.modified_at;
        record.sync_status = SyncStatus::Synced;
        self.store.upsert(&record).await?;
        pass.known.insert(local.relative_path.clone(), record);
        Ok(())
    }

    /// Open conflicts across all folders.
    pub async fn get_conflicts(&self) -> Result<Vec<Conflict>> {
        self.store.list_open_conflicts(None).await
    }

    /// Settle one open conflict with an explicit policy.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &ConflictId,
        policy: ConflictPolicy,
    ) -> Result<Resolution> {
        let conflict = self
            .store
            .get_conflict(conflict_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {conflict_id}")))?;
        if conflict.is_resolved() {
            return Err(Error::InvalidInput(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let lock = self.folder_lock(&conflict.folder_id);
        let _guard = lock.lock().await;
        let folder = self.load_folder(&conflict.folder_id).await?;
        let path = conflict.relative_path.as_str();
        let now = util::now_millis();
        let resolution = resolve(&conflict, policy);

        match resolution {
            Resolution::Upload => {
                let absolute = folder.local_root.join(path);
                let metadata = tokio::fs::metadata(&absolute).await?;
                let mut record = self
                    .store
                    .get(&folder.id, path)
                    .await?
                    .unwrap_or_else(|| FileRecord::new(&folder.id, path, &folder.device_id));
                record.size = metadata.len();
                record.content_hash = String::new();
                increment_version(&mut record, &folder.device_id, now);
                record.modified_at = metadata
                    .modified()
                    .map_or(conflict.local_modified_at, util::system_time_millis);
                record.sync_status = SyncStatus::PendingUpload;
                self.store.upsert(&record).await?;

                let operation =
                    PendingOperation::upload(&folder.id, path, absolute.to_string_lossy())
                        .with_max_retries(self.config.max_retries);
                self.queue.enqueue(&operation).await?;
            }
            Resolution::Download => {
                if !folder.is_two_way() {
                    return Err(Error::InvalidInput(format!(
                        "sync folder {} is one-way and never downloads",
                        folder.id
                    )));
                }
                let remote = FileEntry::file(
                    path,
                    conflict.remote_hash.clone(),
                    0,
                    conflict.remote_modified_at,
                );
                let known = self.store.get(&folder.id, path).await?;
                self.fetch(&folder, &remote, known.as_ref(), &self.shutdown)
                    .await?;
            }
            Resolution::Undecided => {
                return Err(Error::InvalidInput(format!(
                    "{path} has identical timestamps on both sides; choose keep_local or keep_server"
                )));
            }
            Resolution::Deferred => {
                return Err(Error::InvalidInput(format!(
                    "{policy} leaves {path} unresolved"
                )));
            }
        }

        self.store
            .mark_conflict_resolved(conflict_id, policy, now)
            .await?;
        tracing::info!(folder = %folder.id, path, %policy, ?resolution, "Conflict resolved");
        Ok(resolution)
    }

    /// Apply one policy to every open conflict; ties and deferrals stay open.
    pub async fn resolve_all_conflicts(&self, policy: ConflictPolicy) -> Result<ResolveAllReport> {
        let mut report = ResolveAllReport::default();
        for conflict in self.get_conflicts().await? {
            let label = format!("{}:{}", conflict.folder_id, conflict.relative_path);
            match resolve(&conflict, policy) {
                Resolution::Upload | Resolution::Download => {
                    match self.resolve_conflict(&conflict.id, policy).await {
                        Ok(_) => report.resolved.push(label),
                        Err(Error::InvalidInput(reason)) => {
                            tracing::warn!(conflict = %conflict.id, %reason, "Conflict left open");
                            report.skipped.push(label);
                        }
                        Err(error) => return Err(error),
                    }
                }
                Resolution::Undecided | Resolution::Deferred => report.skipped.push(label),
            }
        }
        Ok(report)
    }

    /// Active queue entries, FIFO.
    pub async fn get_pending_operations(&self) -> Result<Vec<PendingOperation>> {
        self.queue.snapshot().await
    }

    pub fn subscribe_queue(&self) -> watch::Receiver<QueueStats> {
        self.queue.subscribe()
    }

    pub async fn retry_operation(&self, id: &OperationId) -> Result<PendingOperation> {
        self.queue.retry(id).await
    }

    pub async fn cancel_operation(&self, id: &OperationId) -> Result<()> {
        self.queue.cancel(id).await
    }

    /// Drain operations due at `now` once.
    pub async fn process_queue(&self, now: i64) -> Result<ProcessReport> {
        self.queue
            .process_due(now, Arc::clone(&self.executor), &self.shutdown)
            .await
    }

    pub async fn cleanup_queue(&self, now: i64) -> Result<CleanupReport> {
        self.queue.cleanup(now).await
    }

    /// Keep draining the queue until `cancel` fires.
    pub async fn run_queue(&self, cancel: CancellationToken) -> Result<()> {
        self.queue.run(Arc::clone(&self.executor), cancel).await
    }

    pub async fn get_sync_status(&self, folder_id: &str) -> Result<FolderSyncStatus> {
        let folder = self.load_folder(folder_id).await?;
        let in_progress = self.folder_lock(folder_id).try_lock().is_err();
        let open_conflicts = self.store.list_open_conflicts(Some(folder_id)).await?.len();
        let pending_operations = self
            .queue
            .snapshot()
            .await?
            .iter()
            .filter(|operation| operation.folder_id == folder_id)
            .count();
        Ok(FolderSyncStatus {
            folder_id: folder.id,
            status: folder.status,
            last_sync_at: folder.last_sync_at,
            in_progress,
            open_conflicts,
            pending_operations,
        })
    }

    /// Reconcile records received from another device with the local ones.
    ///
    /// Returns how many stored records changed.
    pub async fn merge_remote_metadata(
        &self,
        folder_id: &str,
        records: Vec<FileRecord>,
    ) -> Result<usize> {
        let mut changed = 0;
        for incoming in records {
            if incoming.folder_id != folder_id {
                return Err(Error::InvalidInput(format!(
                    "record {} belongs to folder {}",
                    incoming.relative_path, incoming.folder_id
                )));
            }
            let merged = match self.store.get(folder_id, &incoming.relative_path).await? {
                Some(local) => {
                    let outcome = merge_records(&local, &incoming);
                    tracing::debug!(
                        folder = folder_id,
                        path = %incoming.relative_path,
                        winner = ?outcome.winner,
                        causal = outcome.causal,
                        "Merged remote metadata"
                    );
                    (outcome.record != local).then_some(outcome.record)
                }
                None => Some(incoming),
            };
            if let Some(record) = merged {
                self.store.upsert(&record).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Watch a folder and run a pass for every debounced batch of changes
    /// while `auto_sync` is on. Returns when `cancel` fires.
    pub async fn watch_folder(&self, folder_id: &str, cancel: CancellationToken) -> Result<()> {
        let folder = self.load_folder(folder_id).await?;
        let detector = ChangeDetector::new(&folder, self.store.clone(), self.config.clone())?;
        let (events_tx, mut events) = mpsc::channel(self.config.watcher_channel_capacity);
        let detector_cancel = cancel.child_token();
        let detector_task =
            tokio::spawn(async move { detector.run(events_tx, detector_cancel).await });

        while let Some(batch) = events.recv().await {
            tracing::info!(folder = folder_id, changes = batch.len(), "Changes detected");
            let auto_sync = match self.load_folder(folder_id).await {
                Ok(folder) => folder.auto_sync,
                Err(error) => {
                    tracing::warn!(folder = folder_id, %error, "Could not reload folder");
                    false
                }
            };
            if !auto_sync {
                continue;
            }
            // Other failures are logged by the pass; the next batch retries
            if let Err(Error::SyncInProgress(_)) = self.trigger_sync(folder_id).await {
                tracing::debug!(folder = folder_id, "Pass already running");
            }
        }

        detector_task
            .await
            .map_err(|error| Error::Io(std::io::Error::other(error)))?
    }
}

/// Local listing for the analyzer. Stored hashes are reused while size and
/// mtime match; otherwise only paths also present remotely are hashed.
async fn local_listing(
    entries: &[LocalEntry],
    known: &HashMap<String, FileRecord>,
    remote_paths: &HashSet<&str>,
) -> Result<Vec<FileEntry>> {
    let mut listing = Vec::with_capacity(entries.len());
    let mut hashed = 0_usize;
    for entry in entries {
        if entry.is_directory {
            listing.push(FileEntry::directory(&entry.relative_path, entry.modified_at));
            continue;
        }
        let stored = known
            .get(&entry.relative_path)
            .filter(|record| {
                !record.content_hash.is_empty()
                    && !record.stat_differs(entry.size, entry.modified_at)
            })
            .map(|record| record.content_hash.clone());
        let hash = match stored {
            Some(hash) => hash,
            None if remote_paths.contains(entry.relative_path.as_str()) => {
                hashed += 1;
                hash_file_async(entry.absolute_path.clone()).await?
            }
            None => String::new(),
        };
        listing.push(FileEntry::file(
            &entry.relative_path,
            hash,
            entry.size,
            entry.modified_at,
        ));
    }
    tracing::debug!(entries = listing.len(), hashed, "Built local listing");
    Ok(listing)
}

/// Pair files about to be deleted remotely with new local files of the same
/// content, keyed by the old path. Candidates are hashed only when their
/// size matches a vanished file.
async fn detect_renames(
    local_root: &Path,
    steps: &[(PathDecision, Step)],
    known: &HashMap<String, FileRecord>,
) -> Result<HashMap<String, String>> {
    let deleted: HashSet<&str> = steps
        .iter()
        .filter(|(_, step)| *step == Step::DeleteRemote)
        .map(|(decision, _)| decision.path.as_str())
        .collect();
    // A file under a deleted directory would vanish before its move ran
    let mut vanished: Vec<&FileRecord> = steps
        .iter()
        .filter(|(_, step)| *step == Step::DeleteRemote)
        .filter_map(|(decision, _)| {
            let record = known.get(&decision.path)?;
            let remote = decision.remote.as_ref()?;
            let unchanged = !remote.is_directory
                && !record.content_hash.is_empty()
                && remote.hash == record.content_hash;
            (unchanged && !ancestors(&decision.path).any(|dir| deleted.contains(dir)))
                .then_some(record)
        })
        .collect();

    let mut renames = HashMap::new();
    for (decision, step) in steps {
        if vanished.is_empty() {
            break;
        }
        let (Step::Upload, Some(local), None) =
            (*step, decision.local.as_ref(), decision.remote.as_ref())
        else {
            continue;
        };
        if local.is_directory
            || known.contains_key(&decision.path)
            || !vanished.iter().any(|record| record.size == local.size)
        {
            continue;
        }
        let hash = hash_file_async(local_root.join(&decision.path)).await?;
        if let Some(index) = vanished
            .iter()
            .position(|record| record.size == local.size && record.content_hash == hash)
        {
            let source = vanished.swap_remove(index);
            renames.insert(source.relative_path.clone(), decision.path.clone());
        }
    }
    Ok(renames)
}

async fn set_modified(path: &Path, modified_at: i64) -> Result<()> {
    let Ok(millis) = u64::try_from(modified_at) else {
        return Ok(());
    };
    let time = SystemTime::UNIX_EPOCH + Duration::from_millis(millis);
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(time)
    })
    .await
    .map_err(|error| Error::Io(std::io::Error::other(error)))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncType;
    use crate::transfer::testing::ScriptedTransport;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000_000;
    const T1: i64 = T0 + 60_000;
    const T2: i64 = T0 + 120_000;

    struct Fixture {
        local: TempDir,
        remote: TempDir,
        store: MetadataStore,
        transport: Arc<ScriptedTransport>,
        orchestrator: SyncOrchestrator,
    }

    impl Fixture {
        async fn new(folder: impl FnOnce(SyncFolderConfig) -> SyncFolderConfig) -> Self {
            let local = TempDir::new().unwrap();
            let remote = TempDir::new().unwrap();
            let store = MetadataStore::open_in_memory().unwrap();
            let config = folder(SyncFolderConfig::new("docs", "laptop", local.path(), "docs"));
            store.save_folder(&config).await.unwrap();

            let transport = Arc::new(ScriptedTransport::new(remote.path()));
            let orchestrator =
                SyncOrchestrator::new(store.clone(), transport.clone(), EngineConfig::default());
            Self {
                local,
                remote,
                store,
                transport,
                orchestrator,
            }
        }

        fn write_local(&self, path: &str, bytes: &[u8], modified_at: i64) {
            write_at(&self.local.path().join(path), bytes, modified_at);
        }

        fn write_remote(&self, path: &str, bytes: &[u8], modified_at: i64) {
            write_at(&self.remote.path().join("docs").join(path), bytes, modified_at);
        }

        async fn folder(&self) -> SyncFolderConfig {
            self.store.load_folder("docs").await.unwrap().unwrap()
        }
    }

    fn write_at(path: &Path, bytes: &[u8], modified_at: i64) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(modified_at as u64);
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn network_down() -> Error {
        Error::Network("connection refused".to_string())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn only_local_change_uploads() {
        let fx = Fixture::new(|folder| folder).await;
        fx.write_remote("a.txt", b"server copy", T0);
        fx.store.set_last_sync_at("docs", T1).await.unwrap();
        fx.write_local("a.txt", b"edited on laptop", T2);

        let report = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(report.uploads_queued, vec!["a.txt".to_string()]);
        assert!(report.conflicts.is_empty());

        let pending = fx.orchestrator.get_pending_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation_type, OperationType::Upload);
        assert_eq!(pending[0].file_path, "a.txt");

        let folder = fx.folder().await;
        assert_eq!(folder.last_sync_at, Some(report.started_at));
        assert_eq!(folder.status, FolderStatus::Idle);

        let drained = fx.orchestrator.process_queue(util::now_millis()).await.unwrap();
        assert_eq!(drained.completed, 1);
        assert_eq!(
            std::fs::read(fx.remote.path().join("docs/a.txt")).unwrap(),
            b"edited on laptop"
        );
        let record = fx.store.get("docs", "a.txt").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);
        assert_eq!(record.version, 1);
        assert_eq!(record.vector_clock.get("laptop"), 1);
    }

    fn synced(path: &str, hash: &str, status: SyncStatus) -> FileRecord {
        let mut record = FileRecord::new("docs", path, "laptop");
        record.content_hash = hash.to_string();
        record.sync_status = status;
        record
    }

    #[test]
    fn stored_hash_tells_which_side_changed() {
        let file = |hash: &str, at: i64| FileEntry::file("a.txt", hash.to_string(), 3, at);
        let base = synced("a.txt", "h1", SyncStatus::Synced);
        let step = |local: &FileEntry, remote: &FileEntry, action| {
            plan(action, Some(local), Some(remote), Some(&base), Some(T1))
        };

        // Remote touched by our own upload after the last pass
        assert_eq!(step(&file("h2", T2), &file("h1", T2), SyncAction::Conflict), Step::Upload);
        assert_eq!(step(&file("h1", T0), &file("h2", T0), SyncAction::Conflict), Step::Download);
        assert_eq!(step(&file("h2", T2), &file("h3", T0), SyncAction::Upload), Step::Conflict);
        assert_eq!(step(&file("h1", T0), &file("h1", T0), SyncAction::NoAction), Step::Unchanged);
    }

    #[test]
    fn queued_upload_only_conflicts_with_a_newer_remote() {
        let local = FileEntry::file("a.txt", "h2".to_string(), 3, T0);
        let old_remote = FileEntry::file("a.txt", "h1".to_string(), 3, T0);
        let new_remote = FileEntry::file("a.txt", "h3".to_string(), 3, T2);
        let pending = synced("a.txt", "h2", SyncStatus::PendingUpload);

        assert_eq!(
            plan(SyncAction::Conflict, Some(&local), Some(&old_remote), Some(&pending), Some(T1)),
            Step::Upload
        );
        assert_eq!(
            plan(SyncAction::Download, Some(&local), Some(&new_remote), Some(&pending), Some(T1)),
            Step::Conflict
        );
        // Never synced: timestamps decide
        assert_eq!(
            plan(SyncAction::Download, Some(&local), Some(&new_remote), Some(&pending), None),
            Step::Download
        );
    }

    #[test]
    fn relocation_kind_follows_parent_directory() {
        assert_eq!(relocation_kind("a.txt", "b.txt"), OperationType::Rename);
        assert_eq!(relocation_kind("notes/a.txt", "notes/b.txt"), OperationType::Rename);
        assert_eq!(relocation_kind("a.txt", "notes/a.txt"), OperationType::Move);
        assert_eq!(ancestors("a/b/c.txt").collect::<Vec<_>>(), vec!["a", "a/b"]);
    }

    /// Sync `a.txt`, edit it locally, queue the upload, then run another
    /// pass before the queue drains.
    async fn pass_before_upload_drains(policy: ConflictPolicy) -> (Fixture, SyncReport) {
        let fx = Fixture::new(|folder| folder.with_policy(policy)).await;
        fx.write_remote("a.txt", b"v1", T0);
        fx.write_local("a.txt", b"v1", T0);
        let first = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(first.unchanged, 1);

        // Edited between the two passes
        fx.write_local("a.txt", b"v2 local edit", first.started_at + 1);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(second.uploads_queued, vec!["a.txt".to_string()]);

        let third = fx.orchestrator.trigger_sync("docs").await.unwrap();
        (fx, third)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_edit_is_not_overwritten_by_keep_server() {
        let (fx, third) = pass_before_upload_drains(ConflictPolicy::KeepServer).await;
        assert_eq!(third.uploads_queued, vec!["a.txt".to_string()]);
        assert!(third.downloaded.is_empty());
        assert!(third.auto_resolved.is_empty());
        assert_eq!(
            std::fs::read(fx.local.path().join("a.txt")).unwrap(),
            b"v2 local edit"
        );
        assert_eq!(fx.orchestrator.get_pending_operations().await.unwrap().len(), 1);

        fx.orchestrator.process_queue(util::now_millis()).await.unwrap();
        assert_eq!(
            std::fs::read(fx.remote.path().join("docs/a.txt")).unwrap(),
            b"v2 local edit"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_edit_raises_no_conflict() {
        let (fx, third) = pass_before_upload_drains(ConflictPolicy::AskUser).await;
        assert!(third.conflicts.is_empty());
        assert!(fx.orchestrator.get_conflicts().await.unwrap().is_empty());
        let record = fx.store.get("docs", "a.txt").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::PendingUpload);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn own_upload_does_not_conflict_with_next_edit() {
        let fx = Fixture::new(|folder| folder).await;
        fx.write_local("a.txt", b"first draft", T0);
        let first = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(first.uploads_queued, vec!["a.txt".to_string()]);
        let drained = fx.orchestrator.process_queue(util::now_millis()).await.unwrap();
        assert_eq!(drained.completed, 1);

        fx.write_local("a.txt", b"second draft", util::now_millis() + 1_000);
        let second = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(second.uploads_queued, vec!["a.txt".to_string()]);
        assert!(second.conflicts.is_empty());
        assert!(second.downloaded.is_empty());

        fx.orchestrator.process_queue(util::now_millis()).await.unwrap();
        assert_eq!(
            std::fs::read(fx.remote.path().join("docs/a.txt")).unwrap(),
            b"second draft"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_rename_becomes_one_remote_rename() {
        let fx = Fixture::new(|folder| folder).await;
        fx.write_remote("draft.txt", b"chapter one", T1);
        fx.write_local("draft.txt", b"chapter one", T1);
        fx.orchestrator.trigger_sync("docs").await.unwrap();

        std::fs::rename(
            fx.local.path().join("draft.txt"),
            fx.local.path().join("final.txt"),
        )
        .unwrap();
        let report = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(report.moves_queued, vec!["draft.txt -> final.txt".to_string()]);
        assert!(report.uploads_queued.is_empty());
        assert!(report.deletes_queued.is_empty());

        let pending = fx.orchestrator.get_pending_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation_type, OperationType::Rename);
        assert_eq!(pending[0].file_path, "draft.txt");
        assert_eq!(pending[0].destination_path.as_deref(), Some("final.txt"));

        // Seen again before the drain: nothing new is queued
        fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(fx.orchestrator.get_pending_operations().await.unwrap().len(), 1);

        let drained = fx.orchestrator.process_queue(util::now_millis()).await.unwrap();
        assert_eq!(drained.completed, 1);
        assert!(!fx.remote.path().join("docs/draft.txt").exists());
        assert_eq!(
            std::fs::read(fx.remote.path().join("docs/final.txt")).unwrap(),
            b"chapter one"
        );
        assert!(fx.store.get("docs", "draft.txt").await.unwrap().is_none());
        let record = fx.store.get("docs", "final.txt").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Synced);

        let settled = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(settled.unchanged, 1);
        assert!(settled.moves_queued.is_empty());
        assert!(fx.orchestrator.get_pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn move_into_new_directory_is_a_remote_move() {
        let fx = Fixture::new(|folder| folder).await;
        fx.write_remote("report.pdf", b"%PDF quarterly", T1);
        fx.write_local("report.pdf", b"%PDF quarterly", T1);
        fx.write_local("other.pdf", b"%PDF different", T1);
        fx.orchestrator.trigger_sync("docs").await.unwrap();
        fx.orchestrator.process_queue(util::now_millis()).await.unwrap();

        std::fs::create_dir_all(fx.local.path().join("archive")).unwrap();
        std::fs::rename(
            fx.local.path().join("report.pdf"),
            fx.local.path().join("archive/report.pdf"),
        )
        .unwrap();
        let report = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(
            report.moves_queued,
            vec!["report.pdf -> archive/report.pdf".to_string()]
        );
        assert_eq!(report.uploads_queued, vec!["archive".to_string()]);

        let kinds: Vec<OperationType> = fx
            .orchestrator
            .get_pending_operations()
            .await
            .unwrap()
            .into_iter()
            .map(|operation| operation.operation_type)
            .collect();
        assert!(kinds.contains(&OperationType::Move));
        assert!(!kinds.contains(&OperationType::Upload));

        fx.orchestrator.process_queue(util::now_millis()).await.unwrap();
        assert_eq!(
            std::fs::read(fx.remote.path().join("docs/archive/report.pdf")).unwrap(),
            b"%PDF quarterly"
        );
        assert!(!fx.remote.path().join("docs/report.pdf").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflict_resolved_with_keep_newest_uploads() {
        let fx = Fixture::new(|folder| folder).await;
        fx.store.set_last_sync_at("docs", T0).await.unwrap();
        fx.write_remote("b.txt", b"server edit", T1);
        fx.write_local("b.txt", b"laptop edit", T2);

        let report = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(report.conflicts, vec!["b.txt".to_string()]);
        let conflicts = fx.orchestrator.get_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].reason, "both modified since last sync");
        let record = fx.store.get("docs", "b.txt").await.unwrap().unwrap();
        assert_eq!(record.sync_status, SyncStatus::Conflict);

        // A second pass keeps the same open conflict
        let again = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(again.conflicts, vec!["b.txt".to_string()]);
        let still_open = fx.orchestrator.get_conflicts().await.unwrap();
        assert_eq!(still_open[0].id, conflicts[0].id);

        let resolution = fx
            .orchestrator
            .resolve_conflict(&conflicts[0].id, ConflictPolicy::KeepNewest)
            .await
            .unwrap();
        assert_eq!(resolution, Resolution::Upload);
        assert!(fx.orchestrator.get_conflicts().await.unwrap().is_empty());

        let pending = fx.orchestrator.get_pending_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].file_path, "b.txt");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn folder_policy_settles_conflicts_during_the_pass() {
        let fx = Fixture::new(|folder| folder.with_policy(ConflictPolicy::KeepServer)).await;
        fx.store.set_last_sync_at("docs", T0).await.unwrap();
        fx.write_remote("b.txt", b"server edit", T1);
        fx.write_local("b.txt", b"laptop edit", T2);

        let report = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(report.auto_resolved, vec!["b.txt".to_string()]);
        assert_eq!(report.downloaded, vec!["b.txt".to_string()]);
        assert!(report.conflicts.is_empty());
        assert_eq!(
            std::fs::read(fx.local.path().join("b.txt")).unwrap(),
            b"server edit"
        );
        assert!(fx.orchestrator.get_conflicts().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn downloads_settle_without_bouncing_back() {
        let fx = Fixture::new(|folder| folder).await;
        fx.write_remote("notes/c.txt", b"from the server", T1);

        let first = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(
            first.downloaded,
            vec!["notes".to_string(), "notes/c.txt".to_string()]
        );
        assert_eq!(
            std::fs::read(fx.local.path().join("notes/c.txt")).unwrap(),
            b"from the server"
        );

        let second = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert!(second.uploads_queued.is_empty());
        assert!(second.downloaded.is_empty());
        assert_eq!(second.unchanged, 2);
        assert!(fx.orchestrator.get_pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn one_way_folder_skips_downloads() {
        let fx = Fixture::new(|folder| folder.with_sync_type(SyncType::OneWay)).await;
        fx.write_remote("c.txt", b"server only", T1);

        let report = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(report.skipped, vec!["c.txt".to_string()]);
        assert!(!fx.local.path().join("c.txt").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_deletion_is_propagated() {
        let fx = Fixture::new(|folder| folder).await;
        fx.write_remote("a.txt", b"same", T1);
        fx.write_local("a.txt", b"same", T1);

        let first = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(first.unchanged, 1);

        std::fs::remove_file(fx.local.path().join("a.txt")).unwrap();
        let second = fx.orchestrator.trigger_sync("docs").await.unwrap();
        assert_eq!(second.deletes_queued, vec!["a.txt".to_string()]);
        assert!(second.downloaded.is_empty());

        fx.orchestrator.process_queue(util::now_millis()).await.unwrap();
        assert!(!fx.remote.path().join("docs/a.txt").exists());
        assert!(fx.store.get("docs", "a.txt").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_pass_is_rejected() {
        let fx = Fixture::new(|folder| folder).await;
        let lock = fx.orchestrator.folder_lock("docs");
        let _running = lock.lock().await;

        let result = fx.orchestrator.trigger_sync("docs").await;
        assert!(matches!(result, Err(Error::SyncInProgress(folder)) if folder == "docs"));
        assert!(fx.orchestrator.get_sync_status("docs").await.unwrap().in_progress);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_pass_keeps_last_sync_at() {
        let fx = Fixture::new(|folder| folder).await;
        fx.store.set_last_sync_at("docs", T0).await.unwrap();
        fx.write_local("a.txt", b"new", T2);
        fx.transport.fail("list_remote", 1, network_down);

        let result = fx.orchestrator.trigger_sync("docs").await;
        assert!(matches!(result, Err(Error::Network(_))));
        let folder = fx.folder().await;
        assert_eq!(folder.last_sync_at, Some(T0));
        assert_eq!(folder.status, FolderStatus::Error);
        assert!(fx.orchestrator.get_pending_operations().await.unwrap().is_empty());

        let report = fx.orchestrator.trigger_sync("docs").await.unwrap();
        let folder = fx.folder().await;
        assert_eq!(folder.last_sync_at, Some(report.started_at));
        assert_eq!(folder.status, FolderStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_metadata_merges_by_version() {
        let fx = Fixture::new(|folder| folder).await;
        let mut local = FileRecord::new("docs", "a.txt", "laptop");
        increment_version(&mut local, "laptop", T1);
        fx.store.upsert(&local).await.unwrap();

        let mut incoming = local.clone();
        incoming.content_hash = "phone-hash".to_string();
        increment_version(&mut incoming, "phone", T2);

        let changed = fx
            .orchestrator
            .merge_remote_metadata("docs", vec![incoming.clone()])
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let stored = fx.store.get("docs", "a.txt").await.unwrap().unwrap();
        assert_eq!(stored.device_id, "phone");
        assert_eq!(stored.version, 2);

        // Re-delivery is a no-op
        let again = fx
            .orchestrator
            .merge_remote_metadata("docs", vec![incoming])
            .await
            .unwrap();
        assert_eq!(again, 0);
    }
}
