use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use driftsync_core::{
    Conflict, EngineConfig, LocalTransport, MetadataStore, PendingOperation, SyncFolderConfig,
    SyncOrchestrator, SyncReport, SyncType,
};

use crate::error::CliError;

const DB_FILE: &str = "driftsync.db";
const CONFIG_FILE: &str = "config.json";
const REMOTE_DIR_SETTING: &str = "local_transport_root";

/// Files under the data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub data_dir: PathBuf,
}

impl DataPaths {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }
}

pub fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> Result<DataPaths, CliError> {
    let data_dir = cli_data_dir
        .or_else(|| env::var_os("DRIFTSYNC_DATA_DIR").map(PathBuf::from))
        .or_else(default_data_dir)
        .ok_or(CliError::NoDataDir)?;
    Ok(DataPaths { data_dir })
}

pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("driftsync"))
}

pub fn open_store(paths: &DataPaths) -> Result<MetadataStore, CliError> {
    Ok(MetadataStore::open(paths.db_path())?)
}

pub fn load_config(paths: &DataPaths) -> Result<EngineConfig, CliError> {
    Ok(EngineConfig::load_or_default(paths.config_path())?)
}

/// Remote directory from the flag or environment, falling back to the one
/// remembered in the store. A newly given directory is remembered.
pub async fn resolve_remote_dir(
    store: &MetadataStore,
    cli_remote_dir: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    let given = cli_remote_dir.or_else(|| env::var_os("DRIFTSYNC_REMOTE_DIR").map(PathBuf::from));
    if let Some(dir) = given {
        std::fs::create_dir_all(&dir)?;
        let dir = std::fs::canonicalize(dir)?;
        store
            .set_setting(REMOTE_DIR_SETTING, &dir.to_string_lossy())
            .await?;
        return Ok(dir);
    }

    store
        .get_setting(REMOTE_DIR_SETTING)
        .await?
        .map(PathBuf::from)
        .ok_or(CliError::RemoteNotConfigured)
}

pub async fn open_orchestrator(
    paths: &DataPaths,
    cli_remote_dir: Option<PathBuf>,
) -> Result<SyncOrchestrator, CliError> {
    let config = load_config(paths)?;
    let store = open_store(paths)?;
    let remote_dir = resolve_remote_dir(&store, cli_remote_dir).await?;
    tracing::debug!(remote = %remote_dir.display(), "Using local transport");
    let transport = Arc::new(LocalTransport::new(remote_dir)?);
    Ok(SyncOrchestrator::new(store, transport, config))
}

/// Folder ids to act on: the requested one, or every registered folder.
pub async fn target_folders(
    store: &MetadataStore,
    folder: Option<&str>,
) -> Result<Vec<String>, CliError> {
    if let Some(id) = folder {
        let id = normalize_folder_id(id)?;
        return match store.load_folder(&id).await? {
            Some(_) => Ok(vec![id]),
            None => Err(CliError::FolderNotFound(id)),
        };
    }
    Ok(store
        .list_folders()
        .await?
        .into_iter()
        .map(|folder| folder.id)
        .collect())
}

pub fn normalize_folder_id(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyFolderId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Pick the single candidate whose id starts with `query`.
pub fn resolve_by_prefix<T>(
    query: &str,
    candidates: impl IntoIterator<Item = (String, T)>,
) -> Result<T, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::IdNotFound(query.to_string()));
    }

    let mut matches: Vec<(String, T)> = candidates
        .into_iter()
        .filter(|(id, _)| id.starts_with(query))
        .collect();
    match matches.len() {
        0 => Err(CliError::IdNotFound(query.to_string())),
        1 => Ok(matches.remove(0).1),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|(id, _)| short_id(id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn format_folder_lines(folders: &[SyncFolderConfig], now_ms: i64) -> Vec<String> {
    folders
        .iter()
        .map(|folder| {
            let direction = match folder.sync_type {
                SyncType::OneWay => "one-way",
                SyncType::TwoWay => "two-way",
            };
            let last_sync = folder
                .last_sync_at
                .map_or_else(|| "never".to_string(), |at| format_relative_time(at, now_ms));
            format!(
                "{:<16}  {:<8}  {direction:<7}  {:<11}  last sync {last_sync:<10}  {}",
                folder.id,
                folder.status.as_str(),
                folder.conflict_resolution_policy.as_str(),
                folder.local_root.display()
            )
        })
        .collect()
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{:<13}  {}:{}  local={} remote={}  {}",
                short_id(&conflict.id.to_string()),
                conflict.folder_id,
                conflict.relative_path,
                format_timestamp(conflict.local_modified_at),
                format_timestamp(conflict.remote_modified_at),
                conflict.reason
            )
        })
        .collect()
}

pub fn format_operation_lines(operations: &[PendingOperation], now_ms: i64) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            let mut line = format!(
                "{:<13}  {:<9}  {:<13}  {}:{}  tries {}/{}",
                short_id(&operation.id.to_string()),
                operation.status.as_str(),
                operation.operation_type.as_str(),
                operation.folder_id,
                operation.file_path,
                operation.retry_count,
                operation.max_retries
            );
            if let Some(next) = operation.next_attempt_at.filter(|at| *at > now_ms) {
                line.push_str(&format!("  next in {}s", (next - now_ms + 999) / 1000));
            }
            if let Some(error) = &operation.error_message {
                line.push_str(&format!("  ({error})"));
            }
            line
        })
        .collect()
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {} queued, {} downloaded, {} deletes queued, {} removed locally, {} conflicts, {} unchanged",
        report.folder_id,
        report.uploads_queued.len(),
        report.downloaded.len(),
        report.deletes_queued.len(),
        report.deleted_locally.len(),
        report.conflicts.len(),
        report.unchanged
    )];
    lines.extend(report.moves_queued.iter().map(|pair| format!("  moved     {pair}")));
    lines.extend(report.conflicts.iter().map(|path| format!("  conflict  {path}")));
    lines.extend(report.skipped.iter().map(|path| format!("  skipped   {path} (one-way)")));
    lines
}

pub fn expand_local_root(path: &Path) -> Result<PathBuf, CliError> {
    Ok(std::fs::canonicalize(path)?)
}
