//! Sync folder configuration model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::Error;

/// Direction of a folder sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Local changes are pushed; remote changes are never pulled
    OneWay,
    /// Changes flow both ways
    #[default]
    TwoWay,
}

/// How conflicts are settled for a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Local copy overwrites the server
    KeepLocal,
    /// Server copy overwrites local
    KeepServer,
    /// Newer modification time wins
    KeepNewest,
    /// Leave the conflict open for the user
    #[default]
    AskUser,
}

/// Folder lifecycle as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FolderStatus {
    #[default]
    Idle,
    Syncing,
    Error,
    Paused,
}

impl SyncType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneWay => "one_way",
            Self::TwoWay => "two_way",
        }
    }
}

impl ConflictPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeepLocal => "keep_local",
            Self::KeepServer => "keep_server",
            Self::KeepNewest => "keep_newest",
            Self::AskUser => "ask_user",
        }
    }
}

impl FolderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
            Self::Paused => "paused",
        }
    }
}

impl FromStr for SyncType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "one_way" => Ok(Self::OneWay),
            "two_way" => Ok(Self::TwoWay),
            other => Err(Error::InvalidInput(format!("unknown sync type: {other}"))),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep_local" => Ok(Self::KeepLocal),
            "keep_server" => Ok(Self::KeepServer),
            "keep_newest" => Ok(Self::KeepNewest),
            "ask_user" => Ok(Self::AskUser),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict policy: {other}"
            ))),
        }
    }
}

impl FromStr for FolderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "syncing" => Ok(Self::Syncing),
            "error" => Ok(Self::Error),
            "paused" => Ok(Self::Paused),
            other => Err(Error::InvalidInput(format!("unknown folder status: {other}"))),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for FolderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One watched root and how it syncs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFolderConfig {
    /// Folder identifier
    pub id: String,
    /// Device running this engine
    pub device_id: String,
    /// Local directory
    pub local_root: PathBuf,
    /// Root on the remote backend
    pub remote_root: String,
    /// Sync direction
    pub sync_type: SyncType,
    /// Whether watcher events trigger passes automatically
    pub auto_sync: bool,
    /// Conflict policy applied after analysis
    pub conflict_resolution_policy: ConflictPolicy,
    /// Ordered gitignore-style exclusion globs
    pub exclude_patterns: Vec<String>,
    /// Start time of the last fully successful pass (Unix ms)
    pub last_sync_at: Option<i64>,
    /// Current status
    pub status: FolderStatus,
}

impl SyncFolderConfig {
    /// Create a two-way, auto-syncing folder that asks the user on conflicts.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        device_id: impl Into<String>,
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            local_root: local_root.into(),
            remote_root: remote_root.into(),
            sync_type: SyncType::TwoWay,
            auto_sync: true,
            conflict_resolution_policy: ConflictPolicy::AskUser,
            exclude_patterns: Vec::new(),
            last_sync_at: None,
            status: FolderStatus::Idle,
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_resolution_policy = policy;
        self
    }

    #[must_use]
    pub const fn with_sync_type(mut self, sync_type: SyncType) -> Self {
        self.sync_type = sync_type;
        self
    }

    #[must_use]
    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub const fn is_two_way(&self) -> bool {
        matches!(self.sync_type, SyncType::TwoWay)
    }
}
