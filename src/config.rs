//! Runtime-tunable configuration for the analyzer and its components.
//!
//! Mirrors the "recognized configuration options" contract: every knob
//! here is read by exactly one component, and every default matches the
//! value stated against that knob.

use serde::{Deserialize, Serialize};

use crate::error::{HeapVigilError, Result};

/// Configuration shared by the event queue, registry, leak detector,
/// sliding-window analyzer, and heap analyzer facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapVigilConfig {
    /// Admit only every Nth allocation before it reaches the queue.
    /// `0` disables sampling (record all).
    pub sampling_interval: u32,
    /// Registry eviction threshold.
    pub max_tracked_objects: u32,
    /// Interval, in milliseconds, between registry cleanup sweeps.
    pub cleanup_interval_ms: u64,
    /// Minimum age, in milliseconds, for the age-based leak strategy.
    pub age_threshold_ms: u64,
    /// Minimum instance count for the growth-based and window-based
    /// leak strategies.
    pub growth_threshold: u32,
    /// Length of the sliding window's per-class sample ring.
    pub window_size: u16,
    /// Capacity of the facade's recent-allocations ring.
    pub recent_allocations_cap: u32,
    /// Capacity of the snapshot history list.
    pub snapshot_history_cap: u16,
    /// Capacity of the leak report history list.
    pub report_history_cap: u16,
    /// Capacity of the single-producer/single-consumer event queue.
    /// Must be a power of two.
    pub event_queue_capacity: usize,
    /// Prefixes that mark a stack frame as belonging to the runtime's
    /// standard library or to this analyzer's own namespace; such
    /// frames are skipped when deriving an allocation site.
    pub framework_prefixes: Vec<String>,
}

impl Default for HeapVigilConfig {
    fn default() -> Self {
        Self {
            sampling_interval: 10,
            max_tracked_objects: 100_000,
            cleanup_interval_ms: 5_000,
            age_threshold_ms: 60_000,
            growth_threshold: 100,
            window_size: 10,
            recent_allocations_cap: 10_000,
            snapshot_history_cap: 100,
            report_history_cap: 50,
            event_queue_capacity: 65_536,
            framework_prefixes: default_framework_prefixes(),
        }
    }
}

fn default_framework_prefixes() -> Vec<String> {
    vec![
        "java.".to_string(),
        "javax.".to_string(),
        "jdk.".to_string(),
        "sun.".to_string(),
        "heapvigil::".to_string(),
    ]
}

impl HeapVigilConfig {
    /// A configuration tuned for local development: frequent cleanup,
    /// low thresholds, so leak behavior is visible quickly.
    pub fn development() -> Self {
        Self {
            sampling_interval: 1,
            max_tracked_objects: 10_000,
            cleanup_interval_ms: 2_000,
            age_threshold_ms: 10_000,
            growth_threshold: 20,
            window_size: 5,
            ..Self::default()
        }
    }

    /// A configuration tuned for fast, deterministic tests: tiny caps,
    /// short intervals.
    pub fn testing() -> Self {
        Self {
            sampling_interval: 0,
            max_tracked_objects: 1_000,
            cleanup_interval_ms: 50,
            age_threshold_ms: 1_000,
            growth_threshold: 5,
            window_size: 3,
            recent_allocations_cap: 256,
            snapshot_history_cap: 10,
            report_history_cap: 10,
            event_queue_capacity: 1_024,
            ..Self::default()
        }
    }

    /// A configuration tuned for high-volume production traffic:
    /// aggressive sampling, the full default caps.
    pub fn production() -> Self {
        Self {
            sampling_interval: 50,
            ..Self::default()
        }
    }

    /// Validate range and shape constraints not expressible in the type
    /// system alone.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(HeapVigilError::InvalidConfig {
                field: "window_size",
                value: self.window_size.to_string(),
            });
        }
        if self.max_tracked_objects == 0 {
            return Err(HeapVigilError::InvalidConfig {
                field: "max_tracked_objects",
                value: self.max_tracked_objects.to_string(),
            });
        }
        if !self.event_queue_capacity.is_power_of_two() {
            return Err(HeapVigilError::InvalidConfig {
                field: "event_queue_capacity",
                value: self.event_queue_capacity.to_string(),
            });
        }
        if self.cleanup_interval_ms == 0 {
            return Err(HeapVigilError::InvalidConfig {
                field: "cleanup_interval_ms",
                value: self.cleanup_interval_ms.to_string(),
            });
        }
        Ok(())
    }
}

/// Fluent builder for [`HeapVigilConfig`], mirroring the crate's other
/// component builders.
#[derive(Debug, Default)]
pub struct HeapVigilConfigBuilder {
    config: HeapVigilConfig,
}

impl HeapVigilConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self {
            config: HeapVigilConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn from(config: HeapVigilConfig) -> Self {
        Self { config }
    }

    /// Set the sampling interval.
    pub fn sampling_interval(mut self, n: u32) -> Self {
        self.config.sampling_interval = n;
        self
    }

    /// Set the registry eviction threshold.
    pub fn max_tracked_objects(mut self, n: u32) -> Self {
        self.config.max_tracked_objects = n;
        self
    }

    /// Set the cleanup sweep interval.
    pub fn cleanup_interval_ms(mut self, ms: u64) -> Self {
        self.config.cleanup_interval_ms = ms;
        self
    }

    /// Set the age-based leak threshold.
    pub fn age_threshold_ms(mut self, ms: u64) -> Self {
        self.config.age_threshold_ms = ms;
        self
    }

    /// Set the growth-based and window-based leak threshold.
    pub fn growth_threshold(mut self, n: u32) -> Self {
        self.config.growth_threshold = n;
        self
    }

    /// Set the sliding window length.
    pub fn window_size(mut self, n: u16) -> Self {
        self.config.window_size = n;
        self
    }

    /// Set the recent-allocations ring capacity.
    pub fn recent_allocations_cap(mut self, n: u32) -> Self {
        self.config.recent_allocations_cap = n;
        self
    }

    /// Set the snapshot history capacity.
    pub fn snapshot_history_cap(mut self, n: u16) -> Self {
        self.config.snapshot_history_cap = n;
        self
    }

    /// Set the leak report history capacity.
    pub fn report_history_cap(mut self, n: u16) -> Self {
        self.config.report_history_cap = n;
        self
    }

    /// Set the event queue capacity; must be a power of two.
    pub fn event_queue_capacity(mut self, n: usize) -> Self {
        self.config.event_queue_capacity = n;
        self
    }

    /// Replace the framework stack-frame prefixes.
    pub fn framework_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.config.framework_prefixes = prefixes;
        self
    }

    /// Validate and return the built configuration.
    pub fn build(self) -> Result<HeapVigilConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = HeapVigilConfig::default();
        assert_eq!(cfg.sampling_interval, 10);
        assert_eq!(cfg.max_tracked_objects, 100_000);
        assert_eq!(cfg.cleanup_interval_ms, 5_000);
        assert_eq!(cfg.age_threshold_ms, 60_000);
        assert_eq!(cfg.growth_threshold, 100);
        assert_eq!(cfg.window_size, 10);
        assert_eq!(cfg.recent_allocations_cap, 10_000);
        assert_eq!(cfg.snapshot_history_cap, 100);
        assert_eq!(cfg.report_history_cap, 50);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_window_size() {
        let cfg = HeapVigilConfigBuilder::new().window_size(0).build();
        assert!(cfg.is_err());
    }

    #[test]
    fn rejects_non_power_of_two_queue_capacity() {
        let cfg = HeapVigilConfigBuilder::new()
            .event_queue_capacity(1000)
            .build();
        assert!(cfg.is_err());
    }

    #[test]
    fn presets_validate() {
        assert!(HeapVigilConfig::development().validate().is_ok());
        assert!(HeapVigilConfig::testing().validate().is_ok());
        assert!(HeapVigilConfig::production().validate().is_ok());
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = HeapVigilConfigBuilder::new()
            .growth_threshold(42)
            .window_size(7)
            .build()
            .unwrap();
        assert_eq!(cfg.growth_threshold, 42);
        assert_eq!(cfg.window_size, 7);
    }
}
