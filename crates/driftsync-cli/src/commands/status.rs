use driftsync_core::{FolderSyncStatus, QueueStats};
use serde::Serialize;

use crate::commands::common::{format_relative_time, load_config, now_ms, open_store, DataPaths};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub folders: Vec<FolderSyncStatus>,
    pub queue: QueueStats,
}

pub async fn run_status(as_json: bool, paths: &DataPaths) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let queue = driftsync_core::queue::OperationQueue::new(store.clone(), load_config(paths)?);
    let stats = queue.refresh_stats().await?;
    let pending = queue.snapshot().await?;

    let mut folders = Vec::new();
    for folder in store.list_folders().await? {
        let open_conflicts = store.list_open_conflicts(Some(&folder.id)).await?.len();
        let pending_operations = pending
            .iter()
            .filter(|operation| operation.folder_id == folder.id)
            .count();
        folders.push(FolderSyncStatus {
            folder_id: folder.id,
            status: folder.status,
            last_sync_at: folder.last_sync_at,
            // Passes only run inside another process
            in_progress: false,
            open_conflicts,
            pending_operations,
        });
    }

    if as_json {
        let item = StatusItem {
            folders,
            queue: stats,
        };
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    let now = now_ms();
    for line in format_status_lines(&folders, now) {
        println!("{line}");
    }
    println!(
        "queue: {} pending, {} retrying, {} failed, {} completed",
        stats.pending, stats.retrying, stats.failed, stats.completed
    );
    Ok(())
}

pub fn format_status_lines(folders: &[FolderSyncStatus], now_ms: i64) -> Vec<String> {
    folders
        .iter()
        .map(|folder| {
            let last_sync = folder
                .last_sync_at
                .map_or_else(|| "never".to_string(), |at| format_relative_time(at, now_ms));
            format!(
                "{:<16}  {:<8}  last sync {last_sync:<10}  {} conflicts  {} queued",
                folder.folder_id,
                folder.status.as_str(),
                folder.open_conflicts,
                folder.pending_operations
            )
        })
        .collect()
}
