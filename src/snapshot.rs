//! Point-in-time heap snapshots (component E) and their diffs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::record::{now_ms, AllocationRecord};
use crate::registry::ClassStat;

static NEXT_SNAPSHOT_ID: AtomicU64 = AtomicU64::new(1);

/// An immutable point-in-time view of heap state.
///
/// Construction always completes before the snapshot is shared, so once
/// a caller holds one it can be read freely without locks.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Monotonically increasing id, unique within the process.
    pub snapshot_id: u64,
    /// Wall-clock milliseconds at capture.
    pub timestamp_ms: u64,
    /// Id of the thread that captured this snapshot.
    pub capturing_thread_id: u64,
    /// Name of the thread that captured this snapshot.
    pub capturing_thread_name: String,
    /// Heap bytes in use at capture time.
    pub total_heap_used: u64,
    /// Heap bytes committed at capture time.
    pub total_heap_committed: u64,
    /// Maximum heap bytes the runtime will commit.
    pub total_heap_max: u64,
    /// Per-class aggregates at capture time.
    pub class_stats: HashMap<String, ClassStat>,
    /// A bounded copy of recently tracked allocations, keyed by object id
    /// for diffing against another snapshot's set.
    pub allocations: HashMap<u64, AllocationRecord>,
}

impl Snapshot {
    /// Claim the next process-wide snapshot id. Exposed so the facade
    /// can stamp a snapshot under its own write lock without a second
    /// source of truth for id allocation.
    pub fn next_id() -> u64 {
        NEXT_SNAPSHOT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Build a snapshot from pre-gathered heap totals, class stats, and
    /// a recent-allocations copy, stamping a fresh id and the current
    /// time.
    pub fn capture(
        total_heap_used: u64,
        total_heap_committed: u64,
        total_heap_max: u64,
        class_stats: HashMap<String, ClassStat>,
        allocations: HashMap<u64, AllocationRecord>,
        capturing_thread_id: u64,
        capturing_thread_name: impl Into<String>,
    ) -> Self {
        Self {
            snapshot_id: Self::next_id(),
            timestamp_ms: now_ms(),
            capturing_thread_id,
            capturing_thread_name: capturing_thread_name.into(),
            total_heap_used,
            total_heap_committed,
            total_heap_max,
            class_stats,
            allocations,
        }
    }

    /// Diff `self` (the base) against `other` (the current).
    pub fn compare(&self, other: &Snapshot) -> SnapshotDiff {
        let time_delta_ms = other.timestamp_ms as i64 - self.timestamp_ms as i64;
        let heap_delta = other.total_heap_used as i64 - self.total_heap_used as i64;

        let mut class_diffs: HashMap<String, ClassDiff> = HashMap::new();
        for (class_name, after) in &other.class_stats {
            let before = self.class_stats.get(class_name).copied().unwrap_or_default();
            class_diffs.insert(
                class_name.clone(),
                ClassDiff {
                    instance_delta: after.instance_count as i64 - before.instance_count as i64,
                    size_delta: after.total_size_bytes as i64 - before.total_size_bytes as i64,
                },
            );
        }
        for (class_name, before) in &self.class_stats {
            class_diffs.entry(class_name.clone()).or_insert_with(|| ClassDiff {
                instance_delta: -(before.instance_count as i64),
                size_delta: -(before.total_size_bytes as i64),
            });
        }

        let new_allocations: Vec<u64> = other
            .allocations
            .keys()
            .filter(|id| !self.allocations.contains_key(*id))
            .copied()
            .collect();
        let freed_allocations: Vec<u64> = self
            .allocations
            .keys()
            .filter(|id| !other.allocations.contains_key(*id))
            .copied()
            .collect();

        SnapshotDiff {
            base_snapshot_id: self.snapshot_id,
            current_snapshot_id: other.snapshot_id,
            time_delta_ms,
            heap_delta,
            class_diffs,
            new_allocations,
            freed_allocations,
        }
    }
}

/// Per-class change between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassDiff {
    /// Change in live instance count; negative means shrinkage.
    pub instance_delta: i64,
    /// Change in total size in bytes.
    pub size_delta: i64,
}

/// The difference between a base snapshot and a later, current one.
#[derive(Debug, Clone)]
pub struct SnapshotDiff {
    /// Id of the base (older) snapshot.
    pub base_snapshot_id: u64,
    /// Id of the current (newer) snapshot.
    pub current_snapshot_id: u64,
    /// `current.timestamp_ms - base.timestamp_ms`.
    pub time_delta_ms: i64,
    /// `current.total_heap_used - base.total_heap_used`.
    pub heap_delta: i64,
    /// Per-class instance/size deltas; a class present in only one
    /// snapshot is counted as a full delta against zero.
    pub class_diffs: HashMap<String, ClassDiff>,
    /// Object ids present in `current` but not `base`.
    pub new_allocations: Vec<u64>,
    /// Object ids present in `base` but not `current`.
    pub freed_allocations: Vec<u64>,
}

impl SnapshotDiff {
    /// Classes whose `instance_delta` is at least `min_growth`, sorted
    /// by `instance_delta` descending.
    pub fn potential_leaks(&self, min_growth: i64) -> Vec<(String, ClassDiff)> {
        let mut grown: Vec<(String, ClassDiff)> = self
            .class_diffs
            .iter()
            .filter(|(_, diff)| diff.instance_delta >= min_growth)
            .map(|(name, diff)| (name.clone(), *diff))
            .collect();
        grown.sort_by(|a, b| b.1.instance_delta.cmp(&a.1.instance_delta));
        grown
    }
}
