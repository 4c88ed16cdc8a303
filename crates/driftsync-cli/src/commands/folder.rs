use std::path::Path;

use driftsync_core::{ConflictPolicy, SyncFolderConfig, SyncType};

use crate::commands::common::{
    expand_local_root, format_folder_lines, normalize_folder_id, now_ms, open_store, DataPaths,
};
use crate::error::CliError;

/// Options for `folder add`
pub struct NewFolder<'a> {
    pub id: &'a str,
    pub path: &'a Path,
    pub remote_root: Option<&'a str>,
    pub one_way: bool,
    pub policy: ConflictPolicy,
    pub excludes: Vec<String>,
    pub auto_sync: bool,
}

pub async fn run_folder_add(new: NewFolder<'_>, paths: &DataPaths) -> Result<(), CliError> {
    let id = normalize_folder_id(new.id)?;
    let store = open_store(paths)?;
    if store.load_folder(&id).await?.is_some() {
        return Err(CliError::FolderExists(id));
    }

    let local_root = expand_local_root(new.path)?;
    let device_id = store.device_id().await?;
    let remote_root = new.remote_root.map_or_else(|| id.clone(), str::to_string);
    let sync_type = if new.one_way {
        SyncType::OneWay
    } else {
        SyncType::TwoWay
    };

    let mut folder = SyncFolderConfig::new(&id, device_id, local_root, remote_root)
        .with_policy(new.policy)
        .with_sync_type(sync_type)
        .with_excludes(new.excludes);
    folder.auto_sync = new.auto_sync;
    store.save_folder(&folder).await?;

    println!("{id}");
    Ok(())
}

pub async fn run_folder_list(as_json: bool, paths: &DataPaths) -> Result<(), CliError> {
    let folders = open_store(paths)?.list_folders().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&folders)?);
        return Ok(());
    }

    if folders.is_empty() {
        println!("No sync folders. Add one with `driftsync folder add <id> <path>`.");
        return Ok(());
    }

    for line in format_folder_lines(&folders, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_folder_remove(id: &str, paths: &DataPaths) -> Result<(), CliError> {
    let id = normalize_folder_id(id)?;
    if !open_store(paths)?.delete_folder(&id).await? {
        return Err(CliError::FolderNotFound(id));
    }
    println!("{id}");
    Ok(())
}
