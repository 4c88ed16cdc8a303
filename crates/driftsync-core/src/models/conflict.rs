//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ConflictPolicy;

/// A unique identifier for a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A path the analyzer could not settle automatically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Conflict identifier
    pub id: ConflictId,
    /// Folder the path belongs to
    pub folder_id: String,
    /// Path relative to the folder root
    pub relative_path: String,
    /// Local modification time (Unix ms)
    pub local_modified_at: i64,
    /// Remote modification time (Unix ms)
    pub remote_modified_at: i64,
    /// Local content hash
    pub local_hash: String,
    /// Remote content hash
    pub remote_hash: String,
    /// Why the analyzer flagged this path
    pub reason: String,
    /// When the conflict was detected (Unix ms)
    pub detected_at: i64,
    /// Chosen resolution once resolved
    pub resolution: Option<ConflictPolicy>,
    /// Resolution timestamp (Unix ms)
    pub resolved_at: Option<i64>,
}

impl Conflict {
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
