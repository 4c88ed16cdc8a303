//! Conflict analysis: classify every path seen on either side into an action.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{Conflict, ConflictPolicy};

/// One entry of a local or remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub relative_path: String,
    pub hash: String,
    pub size: u64,
    /// Unix ms
    pub modified_at: i64,
    #[serde(default)]
    pub is_directory: bool,
}

impl FileEntry {
    #[must_use]
    pub fn file(
        relative_path: impl Into<String>,
        hash: impl Into<String>,
        size: u64,
        modified_at: i64,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            hash: hash.into(),
            size,
            modified_at,
            is_directory: false,
        }
    }

    #[must_use]
    pub fn directory(relative_path: impl Into<String>, modified_at: i64) -> Self {
        Self {
            relative_path: relative_path.into(),
            hash: String::new(),
            size: 0,
            modified_at,
            is_directory: true,
        }
    }
}

/// What the orchestrator should do with a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    Upload,
    Download,
    NoAction,
    Conflict,
}

/// Classification of one path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathDecision {
    pub path: String,
    pub action: SyncAction,
    pub reason: &'static str,
    pub local: Option<FileEntry>,
    pub remote: Option<FileEntry>,
}

/// Aggregated analysis for progress reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub to_upload: Vec<PathDecision>,
    pub to_download: Vec<PathDecision>,
    pub conflicts: Vec<PathDecision>,
    pub no_action: Vec<PathDecision>,
}

/// Counts per action bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisCounts {
    pub upload: usize,
    pub download: usize,
    pub conflict: usize,
    pub no_action: usize,
}

impl AnalysisSummary {
    pub fn from_decisions(decisions: Vec<PathDecision>) -> Self {
        let mut summary = Self::default();
        for decision in decisions {
            match decision.action {
                SyncAction::Upload => summary.to_upload.push(decision),
                SyncAction::Download => summary.to_download.push(decision),
                SyncAction::Conflict => summary.conflicts.push(decision),
                SyncAction::NoAction => summary.no_action.push(decision),
            }
        }
        summary
    }

    pub fn counts(&self) -> AnalysisCounts {
        AnalysisCounts {
            upload: self.to_upload.len(),
            download: self.to_download.len(),
            conflict: self.conflicts.len(),
            no_action: self.no_action.len(),
        }
    }
}

/// Classify a single path present on at least one side.
pub fn classify(
    local: Option<&FileEntry>,
    remote: Option<&FileEntry>,
    last_sync_at: Option<i64>,
) -> (SyncAction, &'static str) {
    let (local, remote) = match (local, remote) {
        (Some(_), None) => return (SyncAction::Upload, "new local file"),
        (None, Some(_)) => return (SyncAction::Download, "new remote file"),
        (None, None) => return (SyncAction::NoAction, "absent on both sides"),
        (Some(local), Some(remote)) => (local, remote),
    };

    if local.is_directory && remote.is_directory {
        return (SyncAction::NoAction, "directory exists on both sides");
    }

    if local.hash == remote.hash {
        return (SyncAction::NoAction, "identical content");
    }

    let Some(last_sync_at) = last_sync_at else {
        return match local.modified_at.cmp(&remote.modified_at) {
            std::cmp::Ordering::Greater => (SyncAction::Upload, "local copy is newer"),
            std::cmp::Ordering::Less => (SyncAction::Download, "remote copy is newer"),
            std::cmp::Ordering::Equal => (
                SyncAction::Conflict,
                "same timestamp with different content",
            ),
        };
    };

    let local_changed = local.modified_at > last_sync_at;
    let remote_changed = remote.modified_at > last_sync_at;

    match (local_changed, remote_changed) {
        (true, true) => (SyncAction::Conflict, "both modified since last sync"),
        (true, false) => (SyncAction::Upload, "modified locally since last sync"),
        (false, true) => (SyncAction::Download, "modified remotely since last sync"),
        (false, false) => (
            SyncAction::Conflict,
            "content differs without timestamp change",
        ),
    }
}

/// Classify every distinct path across both listings, sorted by path.
pub fn analyze(
    local: &[FileEntry],
    remote: &[FileEntry],
    last_sync_at: Option<i64>,
) -> Vec<PathDecision> {
    let local_by_path: BTreeMap<&str, &FileEntry> = local
        .iter()
        .map(|entry| (entry.relative_path.as_str(), entry))
        .collect();
    let remote_by_path: BTreeMap<&str, &FileEntry> = remote
        .iter()
        .map(|entry| (entry.relative_path.as_str(), entry))
        .collect();

    let paths: BTreeSet<&str> = local_by_path
        .keys()
        .chain(remote_by_path.keys())
        .copied()
        .collect();

    paths
        .into_iter()
        .map(|path| {
            let local = local_by_path.get(path).copied();
            let remote = remote_by_path.get(path).copied();
            let (action, reason) = classify(local, remote, last_sync_at);
            tracing::debug!(path, ?action, reason, "classified path");
            PathDecision {
                path: path.to_string(),
                action,
                reason,
                local: local.cloned(),
                remote: remote.cloned(),
            }
        })
        .collect()
}

/// Outcome of applying a policy to a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Push the local copy
    Upload,
    /// Pull the remote copy
    Download,
    /// Timestamps tie under `keep_newest`; the caller decides
    Undecided,
    /// Left for the user
    Deferred,
}

/// Map a conflict to an action under `policy`.
pub fn resolve(conflict: &Conflict, policy: ConflictPolicy) -> Resolution {
    match policy {
        ConflictPolicy::KeepLocal => Resolution::Upload,
        ConflictPolicy::KeepServer => Resolution::Download,
        ConflictPolicy::KeepNewest => {
            match conflict.local_modified_at.cmp(&conflict.remote_modified_at) {
                std::cmp::Ordering::Greater => Resolution::Upload,
                std::cmp::Ordering::Less => Resolution::Download,
                std::cmp::Ordering::Equal => Resolution::Undecided,
            }
        }
        ConflictPolicy::AskUser => Resolution::Deferred,
    }
}

/// Apply one policy to many conflicts. Pure; nothing is executed.
pub fn resolve_all(conflicts: &[Conflict], policy: ConflictPolicy) -> BTreeMap<String, Resolution> {
    conflicts
        .iter()
        .map(|conflict| (conflict.relative_path.clone(), resolve(conflict, policy)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConflictId;
    use pretty_assertions::assert_eq;

    const T0: i64 = 1_000;
    const T1: i64 = 2_000;
    const T2: i64 = 3_000;

    fn conflict(path: &str, local_modified_at: i64, remote_modified_at: i64) -> Conflict {
        Conflict {
            id: ConflictId::new(),
            folder_id: "docs".to_string(),
            relative_path: path.to_string(),
            local_modified_at,
            remote_modified_at,
            local_hash: "L".to_string(),
            remote_hash: "R".to_string(),
            reason: "both modified since last sync".to_string(),
            detected_at: T2,
            resolution: None,
            resolved_at: None,
        }
    }

    #[test]
    fn one_sided_paths_transfer() {
        let local = [FileEntry::file("only-local.txt", "h1", 1, T1)];
        let remote = [FileEntry::file("only-remote.txt", "h2", 1, T1)];
        let decisions = analyze(&local, &remote, Some(T0));

        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].path, "only-local.txt");
        assert_eq!(decisions[0].action, SyncAction::Upload);
        assert_eq!(decisions[1].path, "only-remote.txt");
        assert_eq!(decisions[1].action, SyncAction::Download);
    }

    #[test]
    fn equal_hash_is_no_action_regardless_of_timestamps() {
        for last_sync_at in [None, Some(T0), Some(T2 + 1)] {
            for (local_time, remote_time) in [(T0, T2), (T2, T0), (T1, T1)] {
                let local = FileEntry::file("x", "same", 3, local_time);
                let remote = FileEntry::file("x", "same", 3, remote_time);
                assert_eq!(
                    classify(Some(&local), Some(&remote), last_sync_at).0,
                    SyncAction::NoAction
                );
            }
        }
    }

    #[test]
    fn first_sync_newer_side_wins_and_tie_conflicts() {
        let older = FileEntry::file("x", "h1", 1, T1);
        let newer = FileEntry::file("x", "h2", 1, T2);
        assert_eq!(classify(Some(&newer), Some(&older), None).0, SyncAction::Upload);
        assert_eq!(classify(Some(&older), Some(&newer), None).0, SyncAction::Download);

        let tie = FileEntry::file("x", "h3", 1, T1);
        assert_eq!(classify(Some(&older), Some(&tie), None).0, SyncAction::Conflict);
    }

    #[test]
    fn scenario_only_local_changed_uploads() {
        // The remote copy was last written at T1, which the previous pass
        // (finished at T1) already saw; only the local T2 edit is new.
        let local = [FileEntry::file("a.txt", "H1", 10, T2)];
        let remote = [FileEntry::file("a.txt", "H2", 12, T1)];
        let decisions = analyze(&local, &remote, Some(T1));
        assert_eq!(decisions[0].action, SyncAction::Upload);

        // A remote write after the last pass turns the same pair into a conflict.
        let decisions = analyze(&local, &remote, Some(T0));
        assert_eq!(decisions[0].action, SyncAction::Conflict);
    }

    #[test]
    fn since_last_sync_rules() {
        let last = Some(T1);
        let unchanged_local = FileEntry::file("x", "h1", 1, T0);
        let unchanged_remote = FileEntry::file("x", "h2", 1, T0);
        let changed_local = FileEntry::file("x", "h1", 1, T2);
        let changed_remote = FileEntry::file("x", "h2", 1, T2);

        assert_eq!(
            classify(Some(&changed_local), Some(&unchanged_remote), last).0,
            SyncAction::Upload
        );
        assert_eq!(
            classify(Some(&unchanged_local), Some(&changed_remote), last).0,
            SyncAction::Download
        );
        assert_eq!(
            classify(Some(&changed_local), Some(&changed_remote), last),
            (SyncAction::Conflict, "both modified since last sync")
        );
        assert_eq!(
            classify(Some(&unchanged_local), Some(&unchanged_remote), last),
            (SyncAction::Conflict, "content differs without timestamp change")
        );
    }

    #[test]
    fn directories_on_both_sides_need_nothing() {
        let local = FileEntry::directory("photos", T2);
        let remote = FileEntry::directory("photos", T0);
        assert_eq!(classify(Some(&local), Some(&remote), Some(T1)).0, SyncAction::NoAction);
    }

    #[test]
    fn summary_counts_every_bucket() {
        let local = [
            FileEntry::file("a", "1", 1, T2),
            FileEntry::file("b", "2", 1, T2),
            FileEntry::file("c", "3", 1, T0),
        ];
        let remote = [
            FileEntry::file("b", "x", 1, T2),
            FileEntry::file("c", "3", 1, T2),
            FileEntry::file("d", "4", 1, T2),
        ];
        let counts = AnalysisSummary::from_decisions(analyze(&local, &remote, Some(T1))).counts();
        assert_eq!(
            counts,
            AnalysisCounts {
                upload: 1,
                download: 1,
                conflict: 1,
                no_action: 1,
            }
        );
    }

    #[test]
    fn scenario_both_modified_then_keep_newest_uploads() {
        let local = FileEntry::file("b.txt", "L", 1, T2);
        let remote = FileEntry::file("b.txt", "R", 1, T1 + 500);
        assert_eq!(
            classify(Some(&local), Some(&remote), Some(T1)).0,
            SyncAction::Conflict
        );

        let conflict = conflict("b.txt", T2, T1 + 500);
        assert_eq!(resolve(&conflict, ConflictPolicy::KeepNewest), Resolution::Upload);
    }

    #[test]
    fn policies_map_to_actions() {
        let c = conflict("a", T1, T1);
        assert_eq!(resolve(&c, ConflictPolicy::KeepLocal), Resolution::Upload);
        assert_eq!(resolve(&c, ConflictPolicy::KeepServer), Resolution::Download);
        assert_eq!(resolve(&c, ConflictPolicy::KeepNewest), Resolution::Undecided);
        assert_eq!(resolve(&c, ConflictPolicy::AskUser), Resolution::Deferred);
    }

    #[test]
    fn resolve_all_is_a_pure_mapping() {
        let conflicts = vec![conflict("a", T2, T1), conflict("b", T1, T2)];
        let before = conflicts.clone();
        let actions = resolve_all(&conflicts, ConflictPolicy::KeepNewest);

        assert_eq!(conflicts, before);
        assert_eq!(actions.get("a"), Some(&Resolution::Upload));
        assert_eq!(actions.get("b"), Some(&Resolution::Download));
    }
}
