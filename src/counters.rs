//! Thread-safe atomic counter and per-key counter map (component D).
//!
//! Follows the crate's atomic-statistics pattern: every update is a
//! single atomic op or a compare-and-swap loop, never a mutex, so
//! `increment`/`add` stay cheap on the hot allocation path.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// A single high-throughput atomic counter: count, sum, min, max, and
/// the running sum of squares needed for `stddev`.
#[derive(Debug)]
pub struct AtomicCounter {
    count: AtomicU64,
    sum: AtomicI64,
    sum_sq_bits: AtomicU64,
    min: AtomicI64,
    max: AtomicI64,
    first: AtomicI64,
    last: AtomicI64,
}

const UNSET: i64 = i64::MIN;

impl AtomicCounter {
    /// Build a fresh, zeroed counter.
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicI64::new(0),
            sum_sq_bits: AtomicU64::new(0.0f64.to_bits()),
            min: AtomicI64::new(UNSET),
            max: AtomicI64::new(UNSET),
            first: AtomicI64::new(UNSET),
            last: AtomicI64::new(UNSET),
        }
    }

    /// Add 1 to the counter (equivalent to `add(1)`).
    pub fn increment(&self) {
        self.add(1);
    }

    /// Add `value` to the counter, updating every derived statistic.
    pub fn add(&self, value: i64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.add_sum_sq(value);
        self.update_min(value);
        self.update_max(value);
        self.first.compare_exchange(UNSET, value, Ordering::Relaxed, Ordering::Relaxed)
            .ok();
        self.last.store(value, Ordering::Relaxed);
    }

    fn add_sum_sq(&self, value: i64) {
        let delta = (value as f64) * (value as f64);
        let mut current = self.sum_sq_bits.load(Ordering::Relaxed);
        loop {
            let new = f64::from_bits(current) + delta;
            match self.sum_sq_bits.compare_exchange_weak(
                current,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn update_min(&self, value: i64) {
        let mut current = self.min.load(Ordering::Relaxed);
        loop {
            if current != UNSET && current <= value {
                break;
            }
            match self.min.compare_exchange_weak(
                current,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn update_max(&self, value: i64) {
        let mut current = self.max.load(Ordering::Relaxed);
        loop {
            if current != UNSET && current >= value {
                break;
            }
            match self.max.compare_exchange_weak(
                current,
                value,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of `add`/`increment` calls observed.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Running sum of all observed values.
    pub fn sum(&self) -> i64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Smallest observed value, or `None` if nothing has been added yet.
    pub fn min(&self) -> Option<i64> {
        match self.min.load(Ordering::Relaxed) {
            UNSET => None,
            v => Some(v),
        }
    }

    /// Largest observed value, or `None` if nothing has been added yet.
    pub fn max(&self) -> Option<i64> {
        match self.max.load(Ordering::Relaxed) {
            UNSET => None,
            v => Some(v),
        }
    }

    /// Arithmetic mean of observed values, or `0.0` if none.
    pub fn avg(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Population standard deviation of observed values, or `0.0` if
    /// fewer than one value has been added.
    pub fn stddev(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        let mean = self.avg();
        let sum_sq = f64::from_bits(self.sum_sq_bits.load(Ordering::Relaxed));
        let variance = (sum_sq / count as f64) - mean * mean;
        variance.max(0.0).sqrt()
    }

    /// First value ever added, or `None`.
    pub fn first(&self) -> Option<i64> {
        match self.first.load(Ordering::Relaxed) {
            UNSET => None,
            v => Some(v),
        }
    }

    /// Most recently added value, or `None`.
    pub fn last(&self) -> Option<i64> {
        match self.last.load(Ordering::Relaxed) {
            UNSET => None,
            v => Some(v),
        }
    }

    /// Reset every field to its initial state.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.sum_sq_bits.store(0.0f64.to_bits(), Ordering::Relaxed);
        self.min.store(UNSET, Ordering::Relaxed);
        self.max.store(UNSET, Ordering::Relaxed);
        self.first.store(UNSET, Ordering::Relaxed);
        self.last.store(UNSET, Ordering::Relaxed);
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-key collection of [`AtomicCounter`]s, created on first use.
///
/// Backs the heap analyzer's per-class and per-thread allocation-byte
/// totals.
#[derive(Debug, Default)]
pub struct CounterMap {
    counters: DashMap<String, Arc<AtomicCounter>>,
}

impl CounterMap {
    /// Build an empty map.
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Get the counter for `key`, creating a fresh one if absent.
    pub fn counter(&self, key: &str) -> Arc<AtomicCounter> {
        self.counters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AtomicCounter::new()))
            .clone()
    }

    /// Add `value` to the counter for `key`, creating it if absent.
    pub fn add(&self, key: &str, value: i64) {
        self.counter(key).add(value);
    }

    /// Keys sorted by descending `sum`, truncated to `limit`.
    pub fn get_sorted_by_sum(&self, limit: usize) -> Vec<(String, i64)> {
        let mut entries: Vec<(String, i64)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().sum()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(limit);
        entries
    }

    /// Number of distinct keys tracked.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether no keys have been tracked yet.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_and_add_accumulate() {
        let counter = AtomicCounter::new();
        counter.increment();
        counter.add(4);
        assert_eq!(counter.count(), 2);
        assert_eq!(counter.sum(), 5);
    }

    #[test]
    fn min_max_track_extremes() {
        let counter = AtomicCounter::new();
        for v in [5, 1, 9, 3] {
            counter.add(v);
        }
        assert_eq!(counter.min(), Some(1));
        assert_eq!(counter.max(), Some(9));
    }

    #[test]
    fn avg_and_stddev() {
        let counter = AtomicCounter::new();
        for v in [2, 4, 4, 4, 5, 5, 7, 9] {
            counter.add(v);
        }
        assert!((counter.avg() - 5.0).abs() < 1e-9);
        assert!((counter.stddev() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn first_and_last_track_insertion_order() {
        let counter = AtomicCounter::new();
        counter.add(10);
        counter.add(20);
        counter.add(30);
        assert_eq!(counter.first(), Some(10));
        assert_eq!(counter.last(), Some(30));
    }

    #[test]
    fn reset_clears_all_fields() {
        let counter = AtomicCounter::new();
        counter.add(42);
        counter.reset();
        assert_eq!(counter.count(), 0);
        assert_eq!(counter.min(), None);
        assert_eq!(counter.first(), None);
    }

    #[test]
    fn counter_map_creates_on_first_use_and_sorts_by_sum() {
        let map = CounterMap::new();
        map.add("a", 10);
        map.add("b", 100);
        map.add("a", 5);
        let top = map.get_sorted_by_sum(10);
        assert_eq!(top[0].0, "b");
        assert_eq!(top[1], ("a".to_string(), 15));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        use std::thread;
        let counter = Arc::new(AtomicCounter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    c.increment();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.count(), 8000);
    }
}
