//! The GC / memory-usage monitor (component I): a background poller
//! reading collection counters at a fixed cadence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::join_with_timeout;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const WORKER_STOP_TIMEOUT_MS: u64 = 500;

/// Cumulative collector counters read once per poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReading {
    /// Cumulative number of collection cycles observed.
    pub count: u64,
    /// Cumulative collection time in milliseconds.
    pub time_ms: u64,
}

/// A source of runtime GC counters. Implementations report zeros if the
/// underlying runtime metric is unavailable; the monitor never treats
/// that as an error.
pub trait GcStatsSource: Send + Sync {
    /// Read the current cumulative `(count, time_ms)` for the
    /// configured collector.
    fn read(&self) -> GcReading;
}

/// A `GcStatsSource` that always reports zero, for hosts with no
/// accessible collector metrics.
#[derive(Debug, Default)]
pub struct NullGcStatsSource;

impl GcStatsSource for NullGcStatsSource {
    fn read(&self) -> GcReading {
        GcReading::default()
    }
}

/// Derived statistics exposed to callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStatistics {
    /// Cumulative number of collection cycles.
    pub collection_count: u64,
    /// Cumulative collection time in milliseconds.
    pub collection_time_ms: u64,
    /// Time in milliseconds of the most recently observed poll's delta,
    /// or 0 if no collections have occurred since the previous poll.
    pub last_collection_time_ms: u64,
    /// `collection_time_ms / collection_count`, or 0 if no collections
    /// have been observed.
    pub avg_pause_ms: f64,
}

struct State {
    total_collections: u64,
    total_pause_ms: u64,
    last_delta_ms: u64,
    last_reading: GcReading,
}

/// Polls a [`GcStatsSource`] at a fixed 500 ms cadence on a background
/// thread.
pub struct GcMonitor {
    source: Arc<dyn GcStatsSource>,
    state: Arc<Mutex<State>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GcMonitor {
    /// Build a monitor over the given stats source.
    pub fn new(source: Arc<dyn GcStatsSource>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(State {
                total_collections: 0,
                total_pause_ms: 0,
                last_delta_ms: 0,
                last_reading: GcReading::default(),
            })),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the polling thread. A no-op if already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = Arc::clone(self);
        let handle = thread::spawn(move || {
            info!("gc monitor started");
            while monitor.running.load(Ordering::SeqCst) {
                monitor.poll_once();
                thread::sleep(POLL_INTERVAL);
            }
            info!("gc monitor stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    fn poll_once(&self) {
        let reading = self.source.read();
        let mut state = self.state.lock();

        let collection_delta = reading.count.saturating_sub(state.last_reading.count);
        let time_delta = reading.time_ms.saturating_sub(state.last_reading.time_ms);

        state.total_collections += collection_delta;
        state.total_pause_ms += time_delta;
        if collection_delta > 0 {
            state.last_delta_ms = time_delta;
        }
        state.last_reading = reading;
    }

    /// Signal the poller to stop and join it with a bounded wait (see
    /// [`crate::error::join_with_timeout`]).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if let Err(err) = join_with_timeout(handle, "gc monitor", WORKER_STOP_TIMEOUT_MS) {
                warn!(%err, "gc monitor did not stop in time");
            }
        }
    }

    /// Whether the poller is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current derived statistics.
    pub fn get_statistics(&self) -> GcStatistics {
        let state = self.state.lock();
        let avg_pause_ms = if state.total_collections == 0 {
            0.0
        } else {
            state.total_pause_ms as f64 / state.total_collections as f64
        };
        GcStatistics {
            collection_count: state.total_collections,
            collection_time_ms: state.total_pause_ms,
            last_collection_time_ms: state.last_delta_ms,
            avg_pause_ms,
        }
    }
}

impl Drop for GcMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource {
        reading: Mutex<GcReading>,
    }

    impl GcStatsSource for FixedSource {
        fn read(&self) -> GcReading {
            *self.reading.lock()
        }
    }

    #[test]
    fn null_source_reports_zero() {
        let monitor = Arc::new(GcMonitor::new(Arc::new(NullGcStatsSource)));
        monitor.poll_once();
        let stats = monitor.get_statistics();
        assert_eq!(stats.collection_count, 0);
        assert_eq!(stats.avg_pause_ms, 0.0);
    }

    #[test]
    fn poll_accumulates_deltas() {
        let source = Arc::new(FixedSource {
            reading: Mutex::new(GcReading { count: 0, time_ms: 0 }),
        });
        let monitor = Arc::new(GcMonitor::new(source.clone()));

        monitor.poll_once();
        *source.reading.lock() = GcReading {
            count: 3,
            time_ms: 30,
        };
        monitor.poll_once();

        let stats = monitor.get_statistics();
        assert_eq!(stats.collection_count, 3);
        assert_eq!(stats.collection_time_ms, 30);
        assert_eq!(stats.last_collection_time_ms, 30);
        assert!((stats.avg_pause_ms - 10.0).abs() < 1e-9);
    }

    #[test]
    fn start_and_stop_are_idempotent_and_join_cleanly() {
        let monitor = Arc::new(GcMonitor::new(Arc::new(NullGcStatsSource)));
        monitor.start();
        monitor.start();
        assert!(monitor.is_running());
        thread::sleep(Duration::from_millis(20));
        monitor.stop();
        assert!(!monitor.is_running());
    }
}
