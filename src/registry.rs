//! The live object registry (component C): object-id to allocation
//! record, with derived per-class and per-site aggregates and a
//! background cleanup worker that enforces the tracked-object cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::join_with_timeout;
use crate::record::{now_ms, AllocationRecord};
use crate::sharded_lock::ShardedRwLock;

/// How often the cleanup worker wakes to check for a stop signal,
/// independent of `cleanup_interval_ms`.
const CLEANUP_TICK_MS: u64 = 100;

/// Bound on how long `stop_cleanup` waits for the worker to join.
const WORKER_STOP_TIMEOUT_MS: u64 = 500;

/// Per-class aggregate: how many live instances, and their combined
/// size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassStat {
    /// Number of currently-tracked instances of this class.
    pub instance_count: u64,
    /// Combined size in bytes of those instances.
    pub total_size_bytes: u64,
}

impl ClassStat {
    /// `total_size_bytes / instance_count`, or `0` if there are no
    /// instances.
    pub fn avg_size(&self) -> u64 {
        if self.instance_count == 0 {
            0
        } else {
            self.total_size_bytes / self.instance_count
        }
    }
}

/// Per-site aggregate: cumulative allocation pressure at one call site,
/// append-only for the registry's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SiteStat {
    /// Cumulative number of allocations observed at this site.
    pub allocation_count: u64,
    /// Cumulative size in bytes allocated at this site.
    pub total_size_bytes: u64,
}

impl SiteStat {
    /// `total_size_bytes / allocation_count`, or `0` if there have been
    /// no allocations.
    pub fn avg_size(&self) -> u64 {
        if self.allocation_count == 0 {
            0
        } else {
            self.total_size_bytes / self.allocation_count
        }
    }
}

/// The live object registry.
///
/// `class_stats` decrements on free and on eviction; `site_stats` is
/// append-only (cumulative allocation pressure at a call site, not a
/// live-set view, so it only ever grows).
pub struct ObjectRegistry {
    objects: DashMap<u64, Arc<AllocationRecord>>,
    class_stats: ShardedRwLock<String, ClassStat>,
    site_stats: ShardedRwLock<String, SiteStat>,
    tracked_count: AtomicU64,
    total_tracked: AtomicU64,
    total_freed: AtomicU64,
    evicted_entries: AtomicU64,
    max_tracked_objects: AtomicU32,
    cleanup_interval_ms: AtomicU64,
    cleanup_running: Arc<AtomicBool>,
    cleanup_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ObjectRegistry {
    /// Build a registry with the given eviction cap and cleanup cadence.
    pub fn new(max_tracked_objects: u32, cleanup_interval_ms: u64) -> Self {
        Self {
            objects: DashMap::new(),
            class_stats: ShardedRwLock::new(),
            site_stats: ShardedRwLock::new(),
            tracked_count: AtomicU64::new(0),
            total_tracked: AtomicU64::new(0),
            total_freed: AtomicU64::new(0),
            evicted_entries: AtomicU64::new(0),
            max_tracked_objects: AtomicU32::new(max_tracked_objects),
            cleanup_interval_ms: AtomicU64::new(cleanup_interval_ms),
            cleanup_running: Arc::new(AtomicBool::new(false)),
            cleanup_handle: parking_lot::Mutex::new(None),
        }
    }

    /// Insert `record` if its `object_id` is not already present;
    /// otherwise a no-op. Updates `class_stats` and `site_stats`.
    pub fn track(&self, record: Arc<AllocationRecord>) {
        let object_id = record.object_id;
        let class_name = record.class_name.clone();
        let site = record.allocation_site.clone();
        let size = record.size_bytes;

        let inserted = self.objects.insert(object_id, record).is_none();
        if !inserted {
            return;
        }

        self.class_stats.with_shard_write(&class_name, |shard| {
            let entry = shard.entry(class_name.clone()).or_default();
            entry.instance_count += 1;
            entry.total_size_bytes += size;
        });
        self.site_stats.with_shard_write(&site, |shard| {
            let entry = shard.entry(site.clone()).or_default();
            entry.allocation_count += 1;
            entry.total_size_bytes += size;
        });

        self.tracked_count.fetch_add(1, Ordering::Relaxed);
        self.total_tracked.fetch_add(1, Ordering::Relaxed);

        if self.tracked_count.load(Ordering::Relaxed)
            > self.max_tracked_objects.load(Ordering::Relaxed) as u64
        {
            self.evict_oldest();
        }
    }

    /// Remove `object_id` if present, decrementing `class_stats` (the
    /// class entry is dropped once its count reaches zero) and never
    /// touching `site_stats`.
    pub fn untrack(&self, object_id: u64) -> bool {
        let Some((_, record)) = self.objects.remove(&object_id) else {
            return false;
        };
        self.decrement_class_stat(&record.class_name, record.size_bytes);
        self.total_freed.fetch_add(1, Ordering::Relaxed);
        self.tracked_count.fetch_sub(1, Ordering::Relaxed);
        true
    }

    fn decrement_class_stat(&self, class_name: &str, size: u64) {
        self.class_stats.with_shard_write(class_name, |shard| {
            if let Some(stat) = shard.get_mut(class_name) {
                stat.instance_count = stat.instance_count.saturating_sub(1);
                stat.total_size_bytes = stat.total_size_bytes.saturating_sub(size);
                if stat.instance_count == 0 {
                    shard.remove(class_name);
                }
            }
        });
    }

    /// Find and evict the oldest-timestamp entry. Decrements
    /// `class_stats`, never `site_stats`.
    fn evict_oldest(&self) {
        let oldest = self
            .objects
            .iter()
            .min_by_key(|entry| entry.value().timestamp_ms)
            .map(|entry| *entry.key());

        if let Some(object_id) = oldest {
            if let Some((_, record)) = self.objects.remove(&object_id) {
                self.decrement_class_stat(&record.class_name, record.size_bytes);
                self.tracked_count.fetch_sub(1, Ordering::Relaxed);
                self.evicted_entries.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Look up a record by id.
    pub fn get(&self, object_id: u64) -> Option<Arc<AllocationRecord>> {
        self.objects.get(&object_id).map(|entry| entry.clone())
    }

    /// Whether `object_id` is currently tracked.
    pub fn is_tracked(&self, object_id: u64) -> bool {
        self.objects.contains_key(&object_id)
    }

    /// Every currently-tracked record.
    pub fn get_all(&self) -> Vec<Arc<AllocationRecord>> {
        self.objects.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Every currently-tracked record of the given class.
    pub fn get_by_class(&self, class_name: &str) -> Vec<Arc<AllocationRecord>> {
        self.objects
            .iter()
            .filter(|entry| entry.value().class_name == class_name)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Records ingested at or after `timestamp_ms`.
    pub fn get_after(&self, timestamp_ms: u64) -> Vec<Arc<AllocationRecord>> {
        self.objects
            .iter()
            .filter(|entry| entry.value().timestamp_ms >= timestamp_ms)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Records whose age relative to the current wall clock is at least
    /// `age_ms`.
    pub fn get_older_than(&self, age_ms: u64) -> Vec<Arc<AllocationRecord>> {
        let now = now_ms();
        self.objects
            .iter()
            .filter(|entry| entry.value().age_ms(now) >= age_ms)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// A point-in-time copy of the per-class aggregates.
    pub fn get_class_statistics(&self) -> HashMap<String, ClassStat> {
        self.class_stats.to_hash_map()
    }

    /// A point-in-time copy of the per-site aggregates.
    pub fn get_site_statistics(&self) -> HashMap<String, SiteStat> {
        self.site_stats.to_hash_map()
    }

    /// The `limit` classes with the largest `total_size_bytes`,
    /// descending.
    pub fn get_top_classes(&self, limit: usize) -> Vec<(String, ClassStat)> {
        let mut entries: Vec<_> = self.get_class_statistics().into_par_iter().collect();
        entries.par_sort_unstable_by(|a, b| b.1.total_size_bytes.cmp(&a.1.total_size_bytes));
        entries.truncate(limit);
        entries
    }

    /// The `limit` sites with the largest `total_size_bytes`,
    /// descending.
    pub fn get_top_sites(&self, limit: usize) -> Vec<(String, SiteStat)> {
        let mut entries: Vec<_> = self.get_site_statistics().into_par_iter().collect();
        entries.par_sort_unstable_by(|a, b| b.1.total_size_bytes.cmp(&a.1.total_size_bytes));
        entries.truncate(limit);
        entries
    }

    /// Number of currently-tracked (live) entries.
    pub fn tracked_count(&self) -> u64 {
        self.tracked_count.load(Ordering::Relaxed)
    }

    /// Cumulative inserts since the registry was created or last
    /// cleared.
    pub fn total_tracked(&self) -> u64 {
        self.total_tracked.load(Ordering::Relaxed)
    }

    /// Cumulative removes via `untrack`.
    pub fn total_freed(&self) -> u64 {
        self.total_freed.load(Ordering::Relaxed)
    }

    /// Cumulative removes via background cleanup eviction.
    pub fn evicted_entries(&self) -> u64 {
        self.evicted_entries.load(Ordering::Relaxed)
    }

    /// Empty every map and reset every counter to zero.
    pub fn clear(&self) {
        self.objects.clear();
        self.class_stats.clear();
        self.site_stats.clear();
        self.tracked_count.store(0, Ordering::Relaxed);
        self.total_tracked.store(0, Ordering::Relaxed);
        self.total_freed.store(0, Ordering::Relaxed);
        self.evicted_entries.store(0, Ordering::Relaxed);
    }

    /// Run one cleanup pass: while `tracked_count` exceeds the cap,
    /// evict the oldest entry.
    pub fn run_cleanup_once(&self) {
        let mut evicted = 0u32;
        while self.tracked_count.load(Ordering::Relaxed)
            > self.max_tracked_objects.load(Ordering::Relaxed) as u64
        {
            let before = self.tracked_count.load(Ordering::Relaxed);
            self.evict_oldest();
            if self.tracked_count.load(Ordering::Relaxed) == before {
                // Nothing left to evict; avoid spinning.
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, "registry cleanup evicted oldest entries");
        }
    }

    /// Spawn the background cleanup worker. A no-op if one is already
    /// running.
    ///
    /// The worker wakes every [`CLEANUP_TICK_MS`] to check for a stop
    /// signal, and only runs an actual cleanup pass once
    /// `cleanup_interval_ms` has elapsed, so `stop_cleanup` isn't stuck
    /// waiting out a multi-second `cleanup_interval_ms` to notice it.
    pub fn start_cleanup(self: &Arc<Self>) {
        if self.cleanup_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = Arc::clone(self);
        let running = Arc::clone(&self.cleanup_running);
        let handle = thread::spawn(move || {
            info!("registry cleanup worker started");
            registry.run_cleanup_once();
            let tick = Duration::from_millis(CLEANUP_TICK_MS);
            let mut elapsed = Duration::ZERO;
            while running.load(Ordering::SeqCst) {
                let interval = Duration::from_millis(
                    registry.cleanup_interval_ms.load(Ordering::Relaxed),
                );
                thread::sleep(tick.min(interval.max(Duration::from_millis(1))));
                elapsed += tick;
                if elapsed >= interval {
                    registry.run_cleanup_once();
                    elapsed = Duration::ZERO;
                }
            }
            info!("registry cleanup worker stopped");
        });
        *self.cleanup_handle.lock() = Some(handle);
    }

    /// Signal the cleanup worker to stop and join it with a bounded
    /// wait (see [`crate::error::join_with_timeout`]). The registry
    /// remains usable for reads regardless of whether the join
    /// completes within the bound.
    pub fn stop_cleanup(&self) {
        self.cleanup_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.cleanup_handle.lock().take() {
            if let Err(err) = join_with_timeout(handle, "registry cleanup worker", WORKER_STOP_TIMEOUT_MS) {
                warn!(%err, "registry cleanup worker did not stop in time");
            }
        }
    }
}

impl Drop for ObjectRegistry {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}
