//! The native agent contract (component J): capability negotiation and
//! sampling policy for the in-process event source.
//!
//! This module is a contract, not an implementation: the agent itself
//! (process attachment, runtime tagging, frame capture) lives outside
//! the core. What lives here is the vocabulary the core and any event
//! source agree on.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// One capability an agent may request at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Assign and track a 64-bit tag per live object.
    TagObjects,
    /// Deliver allocation-sample events.
    AllocationSamples,
    /// Deliver object-free events.
    FreeNotifications,
    /// Deliver GC start/finish events.
    GcLifecycle,
    /// Resolve declaring method names for captured frames.
    MethodNames,
    /// Resolve source file names for captured frames.
    SourceFileNames,
    /// Resolve source line numbers for captured frames.
    LineNumbers,
}

/// The full capability set the core requires from an agent.
pub const REQUIRED_CAPABILITIES: &[Capability] = &[
    Capability::TagObjects,
    Capability::AllocationSamples,
    Capability::FreeNotifications,
    Capability::GcLifecycle,
    Capability::MethodNames,
    Capability::SourceFileNames,
    Capability::LineNumbers,
];

/// Admits every Nth allocation; `interval == 0` disables sampling
/// (records all). Applied by the event source before enqueueing, so the
/// core never sees skipped events at all.
#[derive(Debug)]
pub struct SamplingPolicy {
    interval: AtomicU32,
    counter: AtomicU64,
}

impl SamplingPolicy {
    /// Build a policy admitting every `interval`th allocation. `0`
    /// disables sampling.
    pub fn new(interval: u32) -> Self {
        Self {
            interval: AtomicU32::new(interval),
            counter: AtomicU64::new(0),
        }
    }

    /// Whether the next allocation should be admitted. Advances the
    /// internal counter as a side effect.
    pub fn should_admit(&self) -> bool {
        let interval = self.interval.load(Ordering::Relaxed);
        if interval == 0 {
            return true;
        }
        let seen = self.counter.fetch_add(1, Ordering::Relaxed);
        seen % interval as u64 == 0
    }

    /// Replace the sampling interval.
    pub fn set_interval(&self, interval: u32) {
        self.interval.store(interval, Ordering::Relaxed);
    }

    /// The currently configured interval.
    pub fn interval(&self) -> u32 {
        self.interval.load(Ordering::Relaxed)
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Whether the event stream from an agent is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// The agent is delivering events.
    Open,
    /// The agent signaled end-of-stream; the analyzer should drain
    /// remaining events and stop expecting more.
    Terminated,
}
