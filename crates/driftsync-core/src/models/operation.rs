//! Pending operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Default retry cap for queued operations
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of remote mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Upload,
    Delete,
    Rename,
    Move,
    CreateFolder,
}

impl OperationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Delete => "delete",
            Self::Rename => "rename",
            Self::Move => "move",
            Self::CreateFolder => "create_folder",
        }
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "delete" => Ok(Self::Delete),
            "rename" => Ok(Self::Rename),
            "move" => Ok(Self::Move),
            "create_folder" => Ok(Self::CreateFolder),
            other => Err(Error::InvalidInput(format!(
                "unknown operation type: {other}"
            ))),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue state of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Retrying,
    Failed,
    Completed,
}

impl OperationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }

    /// `pending` and `retrying` operations still have work to do.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            other => Err(Error::InvalidInput(format!(
                "unknown operation status: {other}"
            ))),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of work that must reach the remote side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub folder_id: String,
    pub operation_type: OperationType,
    /// Remote-relative path the operation acts on
    pub file_path: String,
    /// Absolute local source for uploads
    pub local_file_path: Option<String>,
    /// Target path for rename/move
    pub destination_path: Option<String>,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Creation timestamp (Unix ms); FIFO order key
    pub created_at: i64,
    /// Earliest time the next attempt may run (Unix ms)
    pub next_attempt_at: Option<i64>,
    pub last_retry_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

impl PendingOperation {
    /// Create a new pending operation for `file_path`.
    #[must_use]
    pub fn new(
        folder_id: impl Into<String>,
        operation_type: OperationType,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            folder_id: folder_id.into(),
            operation_type,
            file_path: file_path.into(),
            local_file_path: None,
            destination_path: None,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: crate::util::now_millis(),
            next_attempt_at: None,
            last_retry_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Upload of a local file to `file_path`.
    #[must_use]
    pub fn upload(
        folder_id: impl Into<String>,
        file_path: impl Into<String>,
        local_file_path: impl Into<String>,
    ) -> Self {
        let mut operation = Self::new(folder_id, OperationType::Upload, file_path);
        operation.local_file_path = Some(local_file_path.into());
        operation
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination_path = Some(destination.into());
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the driver may attempt this operation at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.status.is_active() && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}
