//! Metadata reconciliation across devices.
//!
//! Records written independently on different devices converge through
//! last-write-wins on the Lamport `version`, with the device id as a
//! deterministic tiebreak. Vector clocks short-circuit LWW whenever one
//! update causally dominates the other.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::FileRecord;

/// Per-device counters describing causal history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    clocks: BTreeMap<String, u64>,
}

/// Causal relation between two clocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    Before,
    After,
    Equal,
    Concurrent,
}

impl VectorClock {
    /// Create a new empty vector clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for a device
    pub fn increment(&mut self, device_id: &str) {
        let counter = self.clocks.entry(device_id.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
    }

    /// Counter for a device (0 when unseen)
    pub fn get(&self, device_id: &str) -> u64 {
        self.clocks.get(device_id).copied().unwrap_or(0)
    }

    /// Componentwise max with another clock
    pub fn merge(&mut self, other: &Self) {
        for (device, &value) in &other.clocks {
            let entry = self.clocks.entry(device.clone()).or_insert(0);
            *entry = (*entry).max(value);
        }
    }

    /// Merged copy of two clocks
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    /// Every component ≤ the other's, and the clocks differ
    pub fn happens_before(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    /// Neither clock happens before the other
    pub fn is_concurrent_with(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut less = false;
        let mut greater = false;

        for device in self.clocks.keys().chain(other.clocks.keys()) {
            match self.get(device).cmp(&other.get(device)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return CausalOrder::Concurrent;
            }
        }

        match (less, greater) {
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (false, false) => CausalOrder::Equal,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.values().all(|&value| value == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.clocks.iter().map(|(device, &value)| (device.as_str(), value))
    }
}

/// Which side of a merge won
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeWinner {
    Local,
    Remote,
}

/// Outcome of reconciling two records for the same path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub winner: MergeWinner,
    /// Whether the vector clocks decided without LWW
    pub causal: bool,
    pub record: FileRecord,
}

/// Plain LWW: higher version, then greater device id.
pub fn lww_winner(local: &FileRecord, remote: &FileRecord) -> MergeWinner {
    match remote.version.cmp(&local.version) {
        Ordering::Greater => MergeWinner::Remote,
        Ordering::Less => MergeWinner::Local,
        Ordering::Equal => {
            if remote.device_id > local.device_id {
                MergeWinner::Remote
            } else {
                MergeWinner::Local
            }
        }
    }
}

/// Reconcile two records for the same path.
///
/// The winning record carries the merged clock and the larger of the two
/// versions, so a later merge against either input is a no-op.
pub fn merge_records(local: &FileRecord, remote: &FileRecord) -> MergeOutcome {
    let (winner, causal) = match local.vector_clock.compare(&remote.vector_clock) {
        CausalOrder::Before => (MergeWinner::Remote, true),
        CausalOrder::After => (MergeWinner::Local, true),
        CausalOrder::Equal | CausalOrder::Concurrent => (lww_winner(local, remote), false),
    };

    let mut record = match winner {
        MergeWinner::Local => local.clone(),
        MergeWinner::Remote => remote.clone(),
    };
    record.vector_clock = local.vector_clock.merged(&remote.vector_clock);
    record.version = local.version.max(remote.version);

    MergeOutcome {
        winner,
        causal,
        record,
    }
}

/// Stamp a local edit before it propagates.
pub fn increment_version(record: &mut FileRecord, device_id: &str, now: i64) {
    record.version = record.version.saturating_add(1);
    record.device_id = device_id.to_string();
    record.modified_at = now;
    record.vector_clock.increment(device_id);
}
