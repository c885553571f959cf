//! The in-process memory-profiling core of a runtime memory analyzer.
//!
//! This crate ingests an allocation/deallocation event stream from a
//! native agent embedded in a managed-heap runtime, maintains a live
//! object registry with per-class and per-allocation-site aggregates,
//! captures point-in-time heap snapshots, and runs a multi-strategy
//! leak detector over that history. It is the hot path of a larger
//! memory-analyzer tool; CLI, GUI, and report-rendering layers are thin
//! adapters over the query surface exposed here.
//!
//! The facade is [`analyzer::HeapAnalyzer`]. A minimal consumer looks
//! like:
//!
//! ```
//! use heapvigil::analyzer::HeapAnalyzer;
//! use heapvigil::config::HeapVigilConfig;
//!
//! let analyzer = HeapAnalyzer::new(HeapVigilConfig::default());
//! analyzer.start_analysis();
//! let snapshot = analyzer.take_snapshot();
//! assert_eq!(snapshot.class_stats.len(), 0);
//! analyzer.stop_analysis();
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod agent;
pub mod analyzer;
pub mod config;
pub mod counters;
pub mod error;
pub mod estimation;
pub mod event;
pub mod gc_monitor;
pub mod leak;
pub mod queue;
pub mod record;
pub mod registry;
pub mod sharded_lock;
pub mod snapshot;
pub mod window;

pub use analyzer::HeapAnalyzer;
pub use config::{HeapVigilConfig, HeapVigilConfigBuilder};
pub use error::{HeapVigilError, Result};
pub use event::{Event, StackFrame};
pub use leak::{LeakCandidate, LeakReport, LeakType};
pub use record::AllocationRecord;
pub use registry::ObjectRegistry;
pub use snapshot::{Snapshot, SnapshotDiff};

/// Initialize the crate's tracing subscriber with a sensible default
/// filter. Intended for standalone binaries and examples; library
/// consumers embedded in a larger application should configure their
/// own subscriber instead.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn facade_is_reachable_through_the_crate_root() {
        let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
        analyzer.start_analysis();
        assert!(analyzer.is_analyzing());
        analyzer.stop_analysis();
    }

    #[test]
    fn public_re_exports_resolve() {
        let _: Arc<ObjectRegistry> = Arc::new(ObjectRegistry::new(10, 1_000));
        let _ = HeapVigilConfigBuilder::new().build().unwrap();
    }
}
