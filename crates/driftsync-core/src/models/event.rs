//! Normalized filesystem event model

use serde::{Deserialize, Serialize};

/// What happened to a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Created,
    Modified,
    Deleted,
    Moved,
}

/// A debounced change to one path under a folder root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// Path relative to the folder root
    pub path: String,
    pub action: FileAction,
    /// Observation time (Unix ms)
    pub timestamp: i64,
    /// Previous path for `Moved`
    pub from: Option<String>,
}

impl FileEvent {
    #[must_use]
    pub fn new(path: impl Into<String>, action: FileAction, timestamp: i64) -> Self {
        Self {
            path: path.into(),
            action,
            timestamp,
            from: None,
        }
    }

    #[must_use]
    pub fn moved(from: impl Into<String>, to: impl Into<String>, timestamp: i64) -> Self {
        Self {
            path: to.into(),
            action: FileAction::Moved,
            timestamp,
            from: Some(from.into()),
        }
    }
}
