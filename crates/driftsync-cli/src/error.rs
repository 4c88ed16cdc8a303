use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] driftsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Folder ID cannot be empty")]
    EmptyFolderId,
    #[error("Unknown sync folder: {0}")]
    FolderNotFound(String),
    #[error("Sync folder already exists: {0}")]
    FolderExists(String),
    #[error("Nothing matches id/prefix: {0}")]
    IdNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Could not resolve a data directory; pass --data-dir or set DRIFTSYNC_DATA_DIR")]
    NoDataDir,
    #[error(
        "No remote directory configured. Pass --remote-dir once or set DRIFTSYNC_REMOTE_DIR."
    )]
    RemoteNotConfigured,
    #[error("Sync failed for {0} folder(s)")]
    SyncFailed(usize),
}
