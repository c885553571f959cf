//! The heap analyzer facade (component H): owns the registry, counters,
//! snapshots, sliding window, and leak detector; routes events from the
//! queue; exposes the public query surface.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::agent::SamplingPolicy;
use crate::config::HeapVigilConfig;
use crate::counters::CounterMap;
use crate::error::{join_with_timeout, HeapVigilError, Result};
use crate::estimation::{SizeEstimator, SmartSizeEstimator};
use crate::event::Event;
use crate::gc_monitor::{GcMonitor, GcStatistics, GcStatsSource, NullGcStatsSource};
use crate::queue::EventQueue;
use crate::record::{now_ms, AllocationRecord};
use crate::registry::{ClassStat, ObjectRegistry, SiteStat};
use crate::leak::{LeakDetector, LeakListener, LeakReport};
use crate::snapshot::{Snapshot, SnapshotDiff};
use crate::window::SlidingWindowAnalyzer;

const EVENT_PROCESSOR_IDLE_SLEEP: Duration = Duration::from_micros(100);
const WORKER_STOP_TIMEOUT_MS: u64 = 500;

/// Aggregate allocation-count/byte statistics with top-N breakdowns.
#[derive(Debug, Clone, Default)]
pub struct AllocationStats {
    /// Total allocation events recorded.
    pub count: u64,
    /// Total bytes recorded.
    pub total_bytes: u64,
    /// Up to 10 classes by cumulative bytes, descending.
    pub top_classes_by_bytes: Vec<(String, i64)>,
    /// Up to 10 threads by cumulative bytes, descending.
    pub top_threads_by_bytes: Vec<(String, i64)>,
}

/// Heap usage pool reading, mirroring a JVM-style memory pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapMemoryUsage {
    /// Bytes currently in use.
    pub used: u64,
    /// Bytes committed by the runtime.
    pub committed: u64,
    /// Maximum bytes the runtime will commit, or `u64::MAX` if
    /// unbounded.
    pub max: u64,
}

/// A pluggable source of heap usage totals, analogous to
/// [`GcStatsSource`] for collection counters.
pub trait HeapUsageSource: Send + Sync {
    /// Read current heap usage totals.
    fn read(&self) -> HeapMemoryUsage;
}

/// A [`HeapUsageSource`] that always reports zero, for hosts with no
/// accessible heap metric.
#[derive(Debug, Default)]
pub struct NullHeapUsageSource;

impl HeapUsageSource for NullHeapUsageSource {
    fn read(&self) -> HeapMemoryUsage {
        HeapMemoryUsage::default()
    }
}

/// Usage reading for one named heap pool (e.g. a generational space), in
/// the same shape as [`HeapMemoryUsage`] but scoped to that pool.
#[derive(Debug, Clone)]
pub struct HeapPoolUsage {
    /// Pool name as reported by the runtime (e.g. "Eden Space", "Old Gen").
    pub name: String,
    /// Bytes currently in use in this pool.
    pub used: u64,
    /// Bytes committed to this pool.
    pub committed: u64,
    /// Maximum bytes this pool will commit, or `u64::MAX` if unbounded.
    pub max: u64,
}

/// A pluggable source of per-pool heap usage breakdowns. Distinct from
/// [`HeapUsageSource`] because a runtime may expose pool-level detail
/// (or none at all) independently of its aggregate totals.
pub trait HeapPoolUsageSource: Send + Sync {
    /// Read current usage for every pool the runtime exposes. An empty
    /// vector means the runtime does not break usage down by pool.
    fn read(&self) -> Vec<HeapPoolUsage>;
}

/// A [`HeapPoolUsageSource`] that reports no pools, for hosts with no
/// accessible per-pool breakdown.
#[derive(Debug, Default)]
pub struct NullHeapPoolUsageSource;

impl HeapPoolUsageSource for NullHeapPoolUsageSource {
    fn read(&self) -> Vec<HeapPoolUsage> {
        Vec::new()
    }
}

struct RecentAllocations {
    ring: VecDeque<Arc<AllocationRecord>>,
    cap: usize,
}

impl RecentAllocations {
    fn new(cap: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(cap.min(1024)),
            cap,
        }
    }

    fn push(&mut self, record: Arc<AllocationRecord>) {
        self.ring.push_back(record);
        while self.ring.len() > self.cap {
            self.ring.pop_front();
        }
    }

    fn recent(&self, limit: usize) -> Vec<Arc<AllocationRecord>> {
        self.ring.iter().rev().take(limit).cloned().collect()
    }

    fn as_map(&self) -> HashMap<u64, AllocationRecord> {
        self.ring
            .iter()
            .map(|r| (r.object_id, (**r).clone()))
            .collect()
    }

    fn clear(&mut self) {
        self.ring.clear();
    }
}

struct SnapshotHistory {
    snapshots: Vec<Snapshot>,
    cap: usize,
}

impl SnapshotHistory {
    fn new(cap: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            cap,
        }
    }

    fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
        while self.snapshots.len() > self.cap {
            self.snapshots.remove(0);
        }
    }

    fn clear(&mut self) {
        self.snapshots.clear();
    }
}

/// At most one process-wide handle may be registered at a time; the
/// entry point a decoupled event source calls routes through whichever
/// handle (if any) currently holds the slot.
static ACTIVE_HANDLE: Mutex<Option<Arc<HeapAnalyzer>>> = Mutex::new(None);

/// The facade owning every other component (B–G) and the queue
/// consumer.
pub struct HeapAnalyzer {
    config: HeapVigilConfig,
    queue: Arc<EventQueue>,
    registry: Arc<ObjectRegistry>,
    window: Arc<SlidingWindowAnalyzer>,
    detector: Arc<LeakDetector>,
    class_byte_counters: CounterMap,
    thread_byte_counters: CounterMap,
    recent_allocations: Mutex<RecentAllocations>,
    snapshot_history: Mutex<SnapshotHistory>,
    estimator: Mutex<Box<dyn SizeEstimator>>,
    sampling_policy: SamplingPolicy,
    gc_monitor: Arc<GcMonitor>,
    heap_usage_source: Arc<dyn HeapUsageSource>,
    heap_pool_usage_source: Arc<dyn HeapPoolUsageSource>,
    analyzing: AtomicBool,
    event_processor_running: Arc<AtomicBool>,
    event_processor_handle: Mutex<Option<JoinHandle<()>>>,
    start_time_ms: AtomicU64,
}

impl HeapAnalyzer {
    /// Build an analyzer over `config`, with default (null) GC and heap
    /// usage sources. Does not start any background worker.
    pub fn new(config: HeapVigilConfig) -> Arc<Self> {
        Self::with_sources(
            config,
            Arc::new(NullGcStatsSource),
            Arc::new(NullHeapUsageSource),
            Arc::new(NullHeapPoolUsageSource),
        )
    }

    /// Build an analyzer with explicit GC and heap usage sources, for
    /// hosts that can supply real runtime metrics.
    pub fn with_sources(
        config: HeapVigilConfig,
        gc_source: Arc<dyn GcStatsSource>,
        heap_usage_source: Arc<dyn HeapUsageSource>,
        heap_pool_usage_source: Arc<dyn HeapPoolUsageSource>,
    ) -> Arc<Self> {
        let queue = Arc::new(EventQueue::with_capacity(config.event_queue_capacity));
        let registry = Arc::new(ObjectRegistry::new(
            config.max_tracked_objects,
            config.cleanup_interval_ms,
        ));
        let window = Arc::new(SlidingWindowAnalyzer::new(config.window_size));
        let detector = Arc::new(LeakDetector::new(
            config.age_threshold_ms,
            config.growth_threshold,
            config.report_history_cap,
        ));
        let sampling_policy = SamplingPolicy::new(config.sampling_interval);
        let recent_cap = config.recent_allocations_cap as usize;
        let snapshot_cap = config.snapshot_history_cap as usize;

        Arc::new(Self {
            queue,
            registry,
            window,
            detector,
            class_byte_counters: CounterMap::new(),
            thread_byte_counters: CounterMap::new(),
            recent_allocations: Mutex::new(RecentAllocations::new(recent_cap)),
            snapshot_history: Mutex::new(SnapshotHistory::new(snapshot_cap)),
            estimator: Mutex::new(Box::new(SmartSizeEstimator::new())),
            sampling_policy,
            gc_monitor: Arc::new(GcMonitor::new(gc_source)),
            heap_usage_source,
            heap_pool_usage_source,
            analyzing: AtomicBool::new(false),
            event_processor_running: Arc::new(AtomicBool::new(false)),
            event_processor_handle: Mutex::new(None),
            start_time_ms: AtomicU64::new(0),
            config,
        })
    }

    /// Register `self` as the single process-wide active handle.
    ///
    /// Enforced with an atomic compare-and-set over a mutex slot: if a
    /// handle is already registered this returns
    /// [`HeapVigilError::AlreadyRegistered`] rather than silently
    /// replacing it.
    pub fn register(self: &Arc<Self>) -> Result<()> {
        let mut slot = ACTIVE_HANDLE.lock();
        if slot.is_some() {
            return Err(HeapVigilError::AlreadyRegistered);
        }
        *slot = Some(Arc::clone(self));
        Ok(())
    }

    /// Clear the process-wide handle if it currently points at `self`.
    pub fn unregister(self: &Arc<Self>) {
        let mut slot = ACTIVE_HANDLE.lock();
        if let Some(active) = slot.as_ref() {
            if Arc::ptr_eq(active, self) {
                *slot = None;
            }
        }
    }

    /// The entry point a decoupled event source calls. A no-op if no
    /// handle is currently registered.
    pub fn record_allocation_via_active_handle(record: Arc<AllocationRecord>) {
        let handle = ACTIVE_HANDLE.lock().clone();
        if let Some(analyzer) = handle {
            analyzer.record_allocation(record);
        }
    }

    /// The event queue events are pushed onto by the native agent or an
    /// adapter.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// The sampling policy applied before events are enqueued.
    pub fn sampling_policy(&self) -> &SamplingPolicy {
        &self.sampling_policy
    }

    /// Start analysis: spawns the event processor, registry cleanup
    /// worker, and GC poller. Idempotent.
    pub fn start_analysis(self: &Arc<Self>) {
        if self.analyzing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.start_time_ms.store(now_ms(), Ordering::Relaxed);
        self.registry.start_cleanup();
        self.gc_monitor.start();
        self.detector.start();
        self.start_event_processor();
        info!("heap analyzer started");
    }

    fn start_event_processor(self: &Arc<Self>) {
        if self.event_processor_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let analyzer = Arc::clone(self);
        let running = Arc::clone(&self.event_processor_running);
        let handle = thread::spawn(move || {
            info!("event processor started");
            while running.load(Ordering::SeqCst) {
                match analyzer.queue.pop() {
                    Some(event) => analyzer.dispatch_event(event),
                    None => thread::sleep(EVENT_PROCESSOR_IDLE_SLEEP),
                }
            }
            info!("event processor stopped");
        });
        *self.event_processor_handle.lock() = Some(handle);
    }

    fn dispatch_event(self: &Arc<Self>, event: Event) {
        match event {
            Event::Alloc { .. } => {
                let estimator_guard = self.estimator.lock();
                let record = AllocationRecord::from_alloc_event(
                    event,
                    &self.config.framework_prefixes,
                    estimator_guard.as_ref(),
                );
                drop(estimator_guard);
                self.record_allocation(Arc::new(record));
            }
            Event::Free { tag, .. } => {
                self.registry.untrack(tag);
            }
            Event::GcStart { .. } | Event::GcFinish { .. } => {
                debug!("gc lifecycle event observed");
            }
        }
    }

    /// Stop analysis: signals and joins every background worker with a
    /// bounded wait. Idempotent.
    pub fn stop_analysis(&self) {
        if !self.analyzing.swap(false, Ordering::SeqCst) {
            return;
        }
        self.event_processor_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.event_processor_handle.lock().take() {
            if let Err(err) = join_with_timeout(handle, "event processor", WORKER_STOP_TIMEOUT_MS) {
                warn!(%err, "event processor did not stop in time");
            }
        }
        self.registry.stop_cleanup();
        self.gc_monitor.stop();
        self.detector.stop();
        info!("heap analyzer stopped");
    }

    /// Whether analysis is currently running.
    pub fn is_analyzing(&self) -> bool {
        self.analyzing.load(Ordering::SeqCst)
    }

    /// Record one allocation: appends to the recent-allocations ring,
    /// updates per-class/per-thread byte counters, and tracks it in the
    /// registry. Accepted regardless of the `analyzing` flag, matching
    /// the facade's ingest-whenever-it-exists semantics. Safe to call
    /// from any thread.
    pub fn record_allocation(&self, record: Arc<AllocationRecord>) {
        self.class_byte_counters
            .add(&record.class_name, record.size_bytes as i64);
        self.thread_byte_counters
            .add(&record.thread_name, record.size_bytes as i64);
        self.recent_allocations.lock().push(Arc::clone(&record));
        self.registry.track(record);
    }

    /// Capture a new snapshot from current registry/heap state, append
    /// it to history (evicting oldest beyond the configured cap), and
    /// return it.
    pub fn take_snapshot(&self) -> Snapshot {
        let class_stats = self.registry.get_class_statistics();
        let usage = self.heap_usage_source.read();
        let allocations = self.recent_allocations.lock().as_map();

        let snapshot = Snapshot::capture(
            usage.used,
            usage.committed,
            usage.max,
            class_stats.clone(),
            allocations,
            thread_id_placeholder(),
            "snapshot-writer",
        );

        self.window.add_snapshot(&class_stats);

        let mut history = self.snapshot_history.lock();
        history.push(snapshot.clone());
        snapshot
    }

    /// A point-in-time copy of the snapshot history, oldest first.
    pub fn get_snapshots(&self) -> Vec<Snapshot> {
        self.snapshot_history.lock().snapshots.clone()
    }

    /// The most recently captured snapshot, if any.
    pub fn get_latest_snapshot(&self) -> Option<Snapshot> {
        self.snapshot_history.lock().snapshots.last().cloned()
    }

    /// Diff two snapshots by id, or `None` if either id is not found in
    /// history.
    pub fn compare_snapshots(&self, base_id: u64, current_id: u64) -> Option<SnapshotDiff> {
        let history = self.snapshot_history.lock();
        let base = history.snapshots.iter().find(|s| s.snapshot_id == base_id)?;
        let current = history
            .snapshots
            .iter()
            .find(|s| s.snapshot_id == current_id)?;
        Some(base.compare(current))
    }

    /// Run the leak detector over the current registry and window
    /// state.
    pub fn detect_leaks(&self) -> Option<LeakReport> {
        self.detector.detect(&self.registry, &self.window)
    }

    /// Register a listener notified on every non-empty leak report.
    pub fn add_leak_listener(&self, listener: Arc<dyn LeakListener>) {
        self.detector.add_listener(listener);
    }

    /// Current heap usage totals.
    pub fn get_heap_memory_usage(&self) -> HeapMemoryUsage {
        self.heap_usage_source.read()
    }

    /// Per-pool heap usage breakdown, empty if the runtime exposes none.
    pub fn get_heap_pool_usages(&self) -> Vec<HeapPoolUsage> {
        self.heap_pool_usage_source.read()
    }

    /// Current GC statistics.
    pub fn get_gc_statistics(&self) -> GcStatistics {
        self.gc_monitor.get_statistics()
    }

    /// Allocation count/byte totals with top-10 class and thread
    /// breakdowns.
    pub fn get_allocation_stats(&self) -> AllocationStats {
        AllocationStats {
            count: self.registry.total_tracked(),
            total_bytes: self
                .class_byte_counters
                .get_sorted_by_sum(usize::MAX)
                .iter()
                .map(|(_, bytes)| *bytes as u64)
                .sum(),
            top_classes_by_bytes: self.class_byte_counters.get_sorted_by_sum(10),
            top_threads_by_bytes: self.thread_byte_counters.get_sorted_by_sum(10),
        }
    }

    /// The `limit` most recently recorded allocations, newest first.
    pub fn get_recent_allocations(&self, limit: usize) -> Vec<Arc<AllocationRecord>> {
        self.recent_allocations.lock().recent(limit)
    }

    /// Per-class registry aggregates.
    pub fn get_class_statistics(&self) -> HashMap<String, ClassStat> {
        self.registry.get_class_statistics()
    }

    /// Per-site registry aggregates.
    pub fn get_site_statistics(&self) -> HashMap<String, SiteStat> {
        self.registry.get_site_statistics()
    }

    /// Empty every owned collection and reset derived counters. Safe to
    /// call while stopped or running.
    pub fn clear(&self) {
        self.registry.clear();
        self.window.clear();
        self.detector.clear();
        self.class_byte_counters.clear();
        self.thread_byte_counters.clear();
        self.recent_allocations.lock().clear();
        self.snapshot_history.lock().clear();
    }

    /// Wall-clock milliseconds when `start_analysis` was last called,
    /// or 0 if never started.
    pub fn start_time_ms(&self) -> u64 {
        self.start_time_ms.load(Ordering::Relaxed)
    }
}

impl Drop for HeapAnalyzer {
    fn drop(&mut self) {
        self.stop_analysis();
    }
}

fn thread_id_placeholder() -> u64 {
    // std::thread::ThreadId has no stable numeric conversion; the facade
    // records the caller's OS thread only when an agent supplies one
    // directly via an Alloc/Free event. Snapshot capture itself is not
    // attributed to a particular application thread.
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StackFrame;

    fn alloc_event(tag: u64, class: &str, size: u64, ts: u64) -> Event {
        Event::alloc(tag, size, ts, class, 1, "main", vec![StackFrame::new(class, "f", None, None)])
    }

    #[test]
    fn basic_round_trip_scenario_matches_spec_example() {
        let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
        analyzer.start_analysis();

        assert!(analyzer.queue.push(alloc_event(1, "C", 100, 1000)));
        // Drive the dispatch synchronously instead of racing the
        // background processor thread in a test.
        while analyzer.registry.tracked_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(analyzer.registry.tracked_count(), 1);
        let stats = analyzer.get_class_statistics();
        assert_eq!(stats.get("C").unwrap().instance_count, 1);
        assert_eq!(stats.get("C").unwrap().total_size_bytes, 100);

        assert!(analyzer.queue.push(Event::Free {
            tag: 1,
            size: 100,
            timestamp_ms: 2000,
            thread_id: 1,
        }));
        while analyzer.registry.tracked_count() != 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(analyzer.get_class_statistics().get("C").is_none());

        analyzer.stop_analysis();
    }

    #[test]
    fn start_analysis_is_idempotent() {
        let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
        analyzer.start_analysis();
        analyzer.start_analysis();
        assert!(analyzer.is_analyzing());
        analyzer.stop_analysis();
        assert!(!analyzer.is_analyzing());
    }

    #[test]
    fn clear_resets_all_derived_state() {
        let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
        let record = Arc::new(AllocationRecord::from_alloc_event(
            alloc_event(1, "C", 100, 1000),
            &[],
            &SmartSizeEstimator::new(),
        ));
        analyzer.record_allocation(record);
        analyzer.clear();

        assert_eq!(analyzer.registry.tracked_count(), 0);
        assert!(analyzer.get_class_statistics().is_empty());
        assert!(analyzer.get_recent_allocations(10).is_empty());
    }

    #[test]
    fn snapshot_immediately_after_clear_reports_zeros() {
        let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
        analyzer.clear();
        let snapshot = analyzer.take_snapshot();
        assert!(snapshot.class_stats.is_empty());
        assert_eq!(snapshot.total_heap_used, 0);
    }

    #[test]
    fn register_rejects_a_second_concurrent_handle() {
        let a = HeapAnalyzer::new(HeapVigilConfig::testing());
        let b = HeapAnalyzer::new(HeapVigilConfig::testing());
        a.register().unwrap();
        let err = b.register();
        assert!(err.is_err());
        a.unregister();
        b.register().unwrap();
        b.unregister();
    }

    #[test]
    fn snapshot_diff_reports_unknown_ids_as_none() {
        let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
        analyzer.take_snapshot();
        assert!(analyzer.compare_snapshots(999_999, 999_998).is_none());
    }
}
