//! driftsync-core - Core library for driftsync
//!
//! This crate contains the sync engine shared by every driftsync front end:
//! the metadata store, change detection, conflict analysis, CRDT metadata
//! merge, the offline operation queue and the transfer layer.

pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod services;
pub mod sync;
pub mod transfer;
pub mod util;

pub use config::EngineConfig;
pub use error::{Error, ErrorClass, Result};
pub use models::{
    Conflict, ConflictId, ConflictPolicy, FileAction, FileEvent, FileRecord, FolderStatus,
    OperationId, OperationStatus, OperationType, PendingOperation, SyncFolderConfig, SyncStatus,
    SyncType,
};
pub use orchestrator::{FolderSyncStatus, ResolveAllReport, SyncOrchestrator, SyncReport};
pub use queue::QueueStats;
pub use services::MetadataStore;
pub use transfer::{LocalTransport, Transport};
