//! Change detection: native watch events plus periodic reconciliation scans,
//! normalized into a debounced stream of [`FileEvent`] batches.

mod debounce;
mod exclude;
mod scan;
mod watcher;

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use debounce::Debouncer;
pub use exclude::ExcludeMatcher;
pub use scan::{hash_file, hash_file_async, reconcile, walk_local, LocalEntry};
pub use watcher::{convert_event, FolderWatcher, WatchSignal};

use crate::config::EngineConfig;
use crate::models::{FileEvent, SyncFolderConfig};
use crate::services::MetadataStore;
use crate::{util, Error, Result};

/// Watches one sync folder and reports what changed.
pub struct ChangeDetector {
    folder_id: String,
    root: PathBuf,
    store: MetadataStore,
    excludes: ExcludeMatcher,
    config: EngineConfig,
}

impl ChangeDetector {
    pub fn new(folder: &SyncFolderConfig, store: MetadataStore, config: EngineConfig) -> Result<Self> {
        let excludes =
            ExcludeMatcher::new(&folder.local_root, &folder.exclude_patterns, store.path())?;
        Ok(Self {
            folder_id: folder.id.clone(),
            root: folder.local_root.clone(),
            store,
            excludes,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub const fn excludes(&self) -> &ExcludeMatcher {
        &self.excludes
    }

    /// Walk the folder on the blocking pool.
    pub async fn enumerate(&self) -> Result<Vec<LocalEntry>> {
        let root = self.root.clone();
        let excludes = self.excludes.clone();
        tokio::task::spawn_blocking(move || walk_local(&root, &excludes))
            .await
            .map_err(|error| Error::Io(std::io::Error::other(error)))?
    }

    /// Reconciliation scan against the metadata store (size + mtime only).
    pub async fn scan(&self) -> Result<Vec<FileEvent>> {
        let entries = self.enumerate().await?;
        let known = self.store.list_under(&self.folder_id, "").await?;
        let events = reconcile(&entries, &known, util::now_millis());
        tracing::debug!(folder = %self.folder_id, changes = events.len(), "Reconciliation scan");
        Ok(events)
    }

    /// Run until cancelled, sending debounced batches to `events`.
    ///
    /// A scan runs at startup, every `scan_interval`, and whenever the native
    /// watcher reports that it lost events.
    pub async fn run(
        &self,
        events: mpsc::Sender<Vec<FileEvent>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (_watcher, mut raw) =
            FolderWatcher::start(&self.root, self.config.watcher_channel_capacity)?;
        let mut debouncer = Debouncer::new(self.config.debounce_window_ms);
        let mut scan_tick = tokio::time::interval(self.config.scan_interval());
        scan_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let idle = self.config.scan_interval();

        loop {
            let wait = debouncer.next_deadline().map_or(idle, |deadline| {
                let remaining = deadline.saturating_sub(util::now_millis()).max(0);
                std::time::Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
            });

            let mut batch = tokio::select! {
                () = cancel.cancelled() => {
                    let remaining = debouncer.flush();
                    if !remaining.is_empty() {
                        let _ = events.send(remaining).await;
                    }
                    tracing::info!(folder = %self.folder_id, "Change detector stopped");
                    return Ok(());
                }
                signal = raw.recv() => match signal {
                    Some(WatchSignal::Event(event)) => {
                        if !self.is_excluded(&event) {
                            debouncer.push(event);
                        }
                        Vec::new()
                    }
                    Some(WatchSignal::Rescan) => self.scan_or_skip().await,
                    None => return Err(Error::Watcher("watcher channel closed".to_string())),
                },
                _ = scan_tick.tick() => self.scan_or_skip().await,
                () = tokio::time::sleep(wait) => Vec::new(),
            };

            batch.extend(debouncer.drain_ready(util::now_millis()));
            if batch.is_empty() {
                continue;
            }
            if events.send(batch).await.is_err() {
                // Consumer went away
                return Ok(());
            }
        }
    }

    /// A failed scan is retried on the next tick rather than ending the watch.
    async fn scan_or_skip(&self) -> Vec<FileEvent> {
        match self.scan().await {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(folder = %self.folder_id, %error, "Reconciliation scan failed");
                Vec::new()
            }
        }
    }

    fn is_excluded(&self, event: &FileEvent) -> bool {
        let is_dir = self.root.join(&event.path).is_dir();
        self.excludes.is_excluded(&event.path, is_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileAction, FileRecord};
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn scan_compares_disk_with_store() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("new.txt"), "new").unwrap();
        std::fs::write(dir.path().join("skip.tmp"), "tmp").unwrap();

        let store = MetadataStore::open_in_memory().unwrap();
        store
            .upsert(&FileRecord::new("docs", "gone.txt", "laptop"))
            .await
            .unwrap();

        let folder = SyncFolderConfig::new("docs", "laptop", dir.path(), "/docs")
            .with_excludes(vec!["*.tmp".to_string()]);
        let detector = ChangeDetector::new(&folder, store, EngineConfig::default()).unwrap();

        let events: Vec<_> = detector
            .scan()
            .await
            .unwrap()
            .into_iter()
            .map(|event| (event.path, event.action))
            .collect();
        assert_eq!(
            events,
            vec![
                ("gone.txt".to_string(), FileAction::Deleted),
                ("new.txt".to_string(), FileAction::Created),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_emits_startup_scan_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let folder = SyncFolderConfig::new("docs", "laptop", dir.path(), "/docs");
        let detector = ChangeDetector::new(
            &folder,
            MetadataStore::open_in_memory().unwrap(),
            EngineConfig::default(),
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { detector.run(tx, cancel).await })
        };

        let first = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(first.iter().any(|event| event.path == "a.txt"));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_scan_keeps_the_detector_running() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("docs");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "a").unwrap();

        let folder = SyncFolderConfig::new("docs", "laptop", &root, "/docs");
        let config = EngineConfig {
            scan_interval_secs: 1,
            debounce_window_ms: 50,
            ..EngineConfig::default()
        };
        let detector =
            ChangeDetector::new(&folder, MetadataStore::open_in_memory().unwrap(), config)
                .unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { detector.run(tx, cancel).await })
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        // Later scans hit a missing root
        std::fs::remove_dir_all(&root).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2_500)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
