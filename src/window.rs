//! The sliding-window analyzer (component F): a bounded per-class
//! history of instance-count/size samples, feeding the window-based
//! leak strategy.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::registry::ClassStat;

/// One sample in a class's ring: its instance count and total size at
/// the time a snapshot was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Live instance count at sample time.
    pub instance_count: u64,
    /// Total size in bytes at sample time.
    pub total_size_bytes: u64,
}

/// Computed statistics for one class's window of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Number of adjacent newest-to-oldest pairs showing growth.
    pub growth_count: u32,
    /// Sum of the positive deltas counted in `growth_count`.
    pub total_growth: u64,
    /// Largest instance count observed in the window.
    pub max_instance_count: u64,
    /// Smallest instance count observed in the window.
    pub min_instance_count: u64,
    /// OLS slope of instance_count against sample index (0 = newest).
    pub slope: f64,
    /// `growth_count >= max(1, sample_count / 2)`: growth showed up in
    /// at least half of the adjacent comparisons in the window.
    pub is_consistent_growth: bool,
}

/// Fixed-length, per-class history of samples.
pub struct SlidingWindowAnalyzer {
    window_size: usize,
    rings: Mutex<HashMap<String, VecDeque<Sample>>>,
}

impl SlidingWindowAnalyzer {
    /// Build an analyzer keeping up to `window_size` samples per class.
    pub fn new(window_size: u16) -> Self {
        Self {
            window_size: window_size.max(1) as usize,
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Push a new sample for each class present in `class_stats`,
    /// newest-first, evicting the oldest once a class's ring exceeds
    /// `window_size`.
    pub fn add_snapshot(&self, class_stats: &HashMap<String, ClassStat>) {
        let mut rings = self.rings.lock();
        for (class_name, stat) in class_stats {
            let ring = rings.entry(class_name.clone()).or_default();
            ring.push_front(Sample {
                instance_count: stat.instance_count,
                total_size_bytes: stat.total_size_bytes,
            });
            while ring.len() > self.window_size {
                ring.pop_back();
            }
        }
    }

    /// Compute [`WindowStats`] for every class with at least 3 samples.
    pub fn analyze(&self) -> HashMap<String, WindowStats> {
        let rings = self.rings.lock();
        let mut out = HashMap::new();
        for (class_name, ring) in rings.iter() {
            if ring.len() < 3 {
                continue;
            }
            out.insert(class_name.clone(), compute_window_stats(ring));
        }
        out
    }

    /// Number of classes currently tracked, regardless of sample count.
    pub fn tracked_class_count(&self) -> usize {
        self.rings.lock().len()
    }

    /// Remove every class's history.
    pub fn clear(&self) {
        self.rings.lock().clear();
    }
}

fn compute_window_stats(ring: &VecDeque<Sample>) -> WindowStats {
    let mut growth_count: u32 = 0;
    let mut total_growth: u64 = 0;
    for pair in ring.iter().collect::<Vec<_>>().windows(2) {
        let (newer, older) = (pair[0], pair[1]);
        if newer.instance_count > older.instance_count {
            growth_count += 1;
            total_growth += newer.instance_count - older.instance_count;
        }
    }

    let max_instance_count = ring.iter().map(|s| s.instance_count).max().unwrap_or(0);
    let min_instance_count = ring.iter().map(|s| s.instance_count).min().unwrap_or(0);
    let slope = ols_slope(ring);
    let sample_count = ring.len() as u64;
    let is_consistent_growth = growth_count as u64 >= (sample_count / 2).max(1);

    WindowStats {
        growth_count,
        total_growth,
        max_instance_count,
        min_instance_count,
        slope,
        is_consistent_growth,
    }
}

/// Ordinary-least-squares slope of `instance_count` against sample
/// index, where index 0 is the newest sample. Returns 0 if the
/// denominator `n*sum_x2 - sum_x^2` is below `1e-4`.
fn ols_slope(ring: &VecDeque<Sample>) -> f64 {
    let n = ring.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;

    for (index, sample) in ring.iter().enumerate() {
        let x = index as f64;
        let y = sample.instance_count as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator.abs() < 1e-4 {
        return 0.0;
    }
    (n * sum_xy - sum_x * sum_y) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_stats(count: u64, size: u64) -> HashMap<String, ClassStat> {
        let mut map = HashMap::new();
        map.insert(
            "Grow".to_string(),
            ClassStat {
                instance_count: count,
                total_size_bytes: size,
            },
        );
        map
    }

    #[test]
    fn fewer_than_three_samples_yields_no_stats() {
        let analyzer = SlidingWindowAnalyzer::new(5);
        analyzer.add_snapshot(&class_stats(10, 1000));
        analyzer.add_snapshot(&class_stats(20, 2000));
        assert!(analyzer.analyze().get("Grow").is_none());
    }

    #[test]
    fn ring_caps_at_window_size() {
        let analyzer = SlidingWindowAnalyzer::new(3);
        for count in [10, 20, 30, 40, 50] {
            analyzer.add_snapshot(&class_stats(count, count * 1000));
        }
        let stats = analyzer.analyze();
        let grow = stats.get("Grow").unwrap();
        assert_eq!(grow.max_instance_count, 50);
        assert_eq!(grow.min_instance_count, 30);
    }

    #[test]
    fn consistent_growth_scenario_matches_spec_example() {
        let analyzer = SlidingWindowAnalyzer::new(5);
        for count in [10, 20, 30, 40, 50] {
            analyzer.add_snapshot(&class_stats(count, count * 1000));
        }
        let stats = analyzer.analyze();
        let grow = stats.get("Grow").unwrap();
        assert_eq!(grow.growth_count, 4);
        assert!(grow.slope > 0.0);
        assert!(grow.is_consistent_growth);
    }

    #[test]
    fn flat_samples_yield_zero_slope_and_no_growth() {
        let analyzer = SlidingWindowAnalyzer::new(5);
        for _ in 0..5 {
            analyzer.add_snapshot(&class_stats(10, 1000));
        }
        let stats = analyzer.analyze();
        let grow = stats.get("Grow").unwrap();
        assert_eq!(grow.growth_count, 0);
        assert_eq!(grow.slope, 0.0);
        assert!(!grow.is_consistent_growth);
    }

    #[test]
    fn clear_removes_all_history() {
        let analyzer = SlidingWindowAnalyzer::new(5);
        analyzer.add_snapshot(&class_stats(10, 1000));
        analyzer.clear();
        assert_eq!(analyzer.tracked_class_count(), 0);
    }
}
