//! Data models for driftsync

mod conflict;
mod event;
mod file_record;
mod folder;
mod operation;

pub use conflict::{Conflict, ConflictId};
pub use event::{FileAction, FileEvent};
pub use file_record::{FileRecord, SyncStatus};
pub use folder::{ConflictPolicy, FolderStatus, SyncFolderConfig, SyncType};
pub use operation::{
    OperationId, OperationStatus, OperationType, PendingOperation, DEFAULT_MAX_RETRIES,
};
