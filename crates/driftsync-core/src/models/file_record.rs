//! File record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::sync::VectorClock;

/// Sync state of a single path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local and remote agree
    #[default]
    Synced,
    /// Local change waiting to reach the remote
    PendingUpload,
    /// Remote change waiting to be fetched
    PendingDownload,
    /// Both sides changed; needs resolution
    Conflict,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::PendingUpload => "pending_upload",
            Self::PendingDownload => "pending_download",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending_upload" => Ok(Self::PendingUpload),
            "pending_download" => Ok(Self::PendingDownload),
            "conflict" => Ok(Self::Conflict),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown sync status: {other}"
            ))),
        }
    }
}

/// Metadata for one synchronized path within a folder root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Owning sync folder
    pub folder_id: String,
    /// Path relative to the folder root, `/`-separated
    pub relative_path: String,
    /// Size in bytes
    pub size: u64,
    /// Hex BLAKE3 digest; empty for directories or unhashed files
    pub content_hash: String,
    /// Directory flag
    pub is_directory: bool,
    /// Last modification (Unix ms)
    pub modified_at: i64,
    /// Current sync state
    pub sync_status: SyncStatus,
    /// Lamport clock of the last writer
    pub version: u64,
    /// Device that wrote `version`
    pub device_id: String,
    /// Causal history across devices
    pub vector_clock: VectorClock,
}

impl FileRecord {
    /// Create a synced file record with version 0 and an empty clock.
    #[must_use]
    pub fn new(
        folder_id: impl Into<String>,
        relative_path: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            folder_id: folder_id.into(),
            relative_path: relative_path.into(),
            size: 0,
            content_hash: String::new(),
            is_directory: false,
            modified_at: 0,
            sync_status: SyncStatus::Synced,
            version: 0,
            device_id: device_id.into(),
            vector_clock: VectorClock::new(),
        }
    }

    /// Content-addressed equality: identical hashes never need a transfer.
    pub fn same_content(&self, other: &Self) -> bool {
        !self.content_hash.is_empty() && self.content_hash == other.content_hash
    }

    /// Whether the cheap stat signals (size, mtime) differ from `other`.
    pub fn stat_differs(&self, size: u64, modified_at: i64) -> bool {
        self.size != size || self.modified_at != modified_at
    }
}
