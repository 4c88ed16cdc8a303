//! Sync decision logic: per-path conflict analysis and cross-device metadata merge.

pub mod analyzer;
pub mod crdt;

pub use analyzer::{
    analyze, classify, resolve, resolve_all, AnalysisCounts, AnalysisSummary, FileEntry,
    PathDecision, Resolution, SyncAction,
};
pub use crdt::{
    increment_version, lww_winner, merge_records, CausalOrder, MergeOutcome, MergeWinner,
    VectorClock,
};
