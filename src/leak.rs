//! The leak detector (component G): three detection strategies over the
//! registry and sliding window, rolled up into a severity-ranked report
//! with bounded history and listener notification.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::record::{now_ms, AllocationRecord};
use crate::registry::ObjectRegistry;
use crate::window::SlidingWindowAnalyzer;

/// Which strategy produced a [`LeakCandidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeakType {
    /// Records older than the age threshold, grouped by class.
    AgeBased,
    /// A class whose live instance count crossed a multiple of the
    /// growth threshold.
    GrowthBased,
    /// A class showing consistent growth across the sliding window.
    WindowBased,
    /// Reserved for a future reference-chain strategy; never emitted by
    /// the strategies implemented here.
    ReferenceBased,
}

/// One suspected leak, produced by exactly one strategy.
#[derive(Debug, Clone)]
pub struct LeakCandidate {
    /// The offending class.
    pub class_name: String,
    /// Live instance count backing this candidate.
    pub instance_count: u64,
    /// Combined size in bytes backing this candidate.
    pub total_size: u64,
    /// Which strategy produced this candidate.
    pub leak_type: LeakType,
    /// The allocation site most associated with this candidate.
    pub allocation_site: String,
    /// Up to 10 representative records.
    pub sample_records: Vec<Arc<AllocationRecord>>,
    /// Human-readable description of why this was flagged.
    pub description: String,
    /// Wall-clock milliseconds when this candidate was produced.
    pub detected_at_ms: u64,
    /// Severity in `[0, 100]`, derived from size, count, and type.
    pub severity: u32,
}

const MAX_SAMPLE_RECORDS: usize = 10;

fn size_bucket_score(total_size: u64) -> u32 {
    const MB: u64 = 1024 * 1024;
    match total_size {
        s if s >= 100 * MB => 40,
        s if s >= 10 * MB => 30,
        s if s >= 1 * MB => 20,
        s if s >= 100 * 1024 => 10,
        _ => 0,
    }
}

fn count_bucket_score(instance_count: u64) -> u32 {
    match instance_count {
        c if c >= 10_000 => 40,
        c if c >= 1_000 => 30,
        c if c >= 100 => 20,
        c if c >= 10 => 10,
        _ => 0,
    }
}

fn type_score(leak_type: LeakType) -> u32 {
    match leak_type {
        LeakType::AgeBased => 10,
        LeakType::GrowthBased => 15,
        LeakType::WindowBased => 20,
        LeakType::ReferenceBased => 0,
    }
}

fn compute_severity(total_size: u64, instance_count: u64, leak_type: LeakType) -> u32 {
    (size_bucket_score(total_size) + count_bucket_score(instance_count) + type_score(leak_type))
        .min(100)
}

fn most_frequent_site(records: &[Arc<AllocationRecord>]) -> String {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for record in records {
        let site = record.allocation_site.as_str();
        if !counts.contains_key(site) {
            order.push(site);
        }
        *counts.entry(site).or_insert(0) += 1;
    }
    order
        .into_iter()
        .max_by_key(|site| counts[site])
        .unwrap_or("unknown")
        .to_string()
}

/// Summary counts and totals derived from a report's candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportSummary {
    /// Total candidates in the report.
    pub total: usize,
    /// Candidates with severity `>= 70`.
    pub high: usize,
    /// Candidates with severity in `[40, 70)`.
    pub medium: usize,
    /// Candidates with severity `< 40`.
    pub low: usize,
    /// Sum of `total_size` across all candidates.
    pub total_size: u64,
    /// Sum of `instance_count` across all candidates.
    pub total_instances: u64,
}

fn summarize(candidates: &[LeakCandidate]) -> ReportSummary {
    let mut summary = ReportSummary {
        total: candidates.len(),
        ..Default::default()
    };
    for candidate in candidates {
        match candidate.severity {
            s if s >= 70 => summary.high += 1,
            s if s >= 40 => summary.medium += 1,
            _ => summary.low += 1,
        }
        summary.total_size += candidate.total_size;
        summary.total_instances += candidate.instance_count;
    }
    summary
}

/// A leak report: a severity-ranked set of candidates from one
/// `detect()` call.
#[derive(Debug, Clone)]
pub struct LeakReport {
    /// Monotonically increasing id.
    pub report_id: u64,
    /// Wall-clock milliseconds at construction.
    pub timestamp_ms: u64,
    /// Candidates, sorted by `severity` descending.
    pub candidates: Vec<LeakCandidate>,
    /// The `detect()` call sequence number that produced this report.
    pub detection_sequence: u64,
    /// Derived rollup of `candidates`.
    pub summary: ReportSummary,
}

impl LeakReport {
    fn new(report_id: u64, detection_sequence: u64, mut candidates: Vec<LeakCandidate>) -> Self {
        candidates.sort_by(|a, b| b.severity.cmp(&a.severity));
        let summary = summarize(&candidates);
        Self {
            report_id,
            timestamp_ms: now_ms(),
            candidates,
            detection_sequence,
            summary,
        }
    }

    /// Human-readable recommendations derived from this report.
    pub fn get_recommendations(&self) -> Vec<String> {
        if self.candidates.is_empty() {
            return vec!["No leaks detected; continue monitoring.".to_string()];
        }

        let mut lines = Vec::new();
        if self.candidates.iter().any(|c| c.severity >= 70) {
            lines.push("URGENT: one or more candidates have high severity (>=70); investigate promptly.".to_string());
        }

        let mut seen_types = Vec::new();
        for candidate in &self.candidates {
            if seen_types.contains(&candidate.leak_type) {
                continue;
            }
            seen_types.push(candidate.leak_type);
            let line = match candidate.leak_type {
                LeakType::AgeBased => {
                    "Age-based: objects are surviving far longer than expected; check for missing cleanup or cache eviction."
                }
                LeakType::GrowthBased => {
                    "Growth-based: a class's live instance count has grown past the threshold; check for an unbounded collection or listener registration."
                }
                LeakType::WindowBased => {
                    "Window-based: a class shows consistent growth across recent snapshots; check for a slow, steady accumulation."
                }
                LeakType::ReferenceBased => {
                    "Reference-based: an object graph is preventing collection; check for retained references."
                }
            };
            lines.push(line.to_string());
        }

        if let Some(top) = self.candidates.first() {
            lines.push(format!(
                "Top suspect: {} ({} instances, {} bytes, severity {}).",
                top.class_name, top.instance_count, top.total_size, top.severity
            ));
        }

        lines
    }
}

/// A callback invoked synchronously after a non-empty report is
/// appended to history. Panics and long-running callbacks are not the
/// detector's problem to solve; errors are swallowed, never propagated.
pub trait LeakListener: Send + Sync {
    /// Called with the freshly produced report.
    fn on_leak_detected(&self, report: &LeakReport);
}

/// Runs the three detection strategies and owns bounded report history.
pub struct LeakDetector {
    age_threshold_ms: u64,
    growth_threshold: u32,
    detecting: AtomicBool,
    in_detect: AtomicBool,
    detection_count: AtomicU64,
    next_report_id: AtomicU64,
    reports: Mutex<Vec<LeakReport>>,
    report_history_cap: usize,
    listeners: Mutex<Vec<Arc<dyn LeakListener>>>,
    last_report: Mutex<Option<LeakReport>>,
}

impl LeakDetector {
    /// Build a detector with the given thresholds and report history
    /// cap.
    pub fn new(age_threshold_ms: u64, growth_threshold: u32, report_history_cap: u16) -> Self {
        Self {
            age_threshold_ms,
            growth_threshold,
            detecting: AtomicBool::new(false),
            in_detect: AtomicBool::new(false),
            detection_count: AtomicU64::new(0),
            next_report_id: AtomicU64::new(1),
            reports: Mutex::new(Vec::new()),
            report_history_cap: report_history_cap as usize,
            listeners: Mutex::new(Vec::new()),
            last_report: Mutex::new(None),
        }
    }

    /// Enable detection.
    pub fn start(&self) {
        self.detecting.store(true, Ordering::SeqCst);
    }

    /// Disable detection. `detect()` becomes a no-op until `start()`.
    pub fn stop(&self) {
        self.detecting.store(false, Ordering::SeqCst);
    }

    /// Whether detection is currently enabled.
    pub fn is_detecting(&self) -> bool {
        self.detecting.load(Ordering::SeqCst)
    }

    /// Register a listener, notified on every non-empty report.
    pub fn add_listener(&self, listener: Arc<dyn LeakListener>) {
        self.listeners.lock().push(listener);
    }

    /// Run all three strategies. Returns `None` if detection is
    /// disabled. Re-entrant calls (a listener calling back into
    /// `detect()`) return the last produced report without re-running.
    pub fn detect(
        &self,
        registry: &ObjectRegistry,
        window: &SlidingWindowAnalyzer,
    ) -> Option<LeakReport> {
        if !self.is_detecting() {
            return None;
        }
        if self.in_detect.swap(true, Ordering::SeqCst) {
            return self.last_report.lock().clone();
        }

        let mut candidates = Vec::new();
        candidates.extend(self.detect_age_based(registry));
        candidates.extend(self.detect_growth_based(registry));
        candidates.extend(self.detect_window_based(registry, window));

        let sequence = self.detection_count.fetch_add(1, Ordering::Relaxed) + 1;
        let report_id = self.next_report_id.fetch_add(1, Ordering::Relaxed);
        let report = LeakReport::new(report_id, sequence, candidates);

        if !report.candidates.is_empty() {
            let mut reports = self.reports.lock();
            reports.push(report.clone());
            while reports.len() > self.report_history_cap {
                reports.remove(0);
            }
            drop(reports);
            self.notify_listeners(&report);
        }

        *self.last_report.lock() = Some(report.clone());
        self.in_detect.store(false, Ordering::SeqCst);
        Some(report)
    }

    fn notify_listeners(&self, report: &LeakReport) {
        for listener in self.listeners.lock().iter() {
            let listener = Arc::clone(listener);
            let report = report.clone();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_leak_detected(&report);
            }));
            if outcome.is_err() {
                warn!("leak listener panicked; ignoring");
            }
        }
    }

    fn detect_age_based(&self, registry: &ObjectRegistry) -> Vec<LeakCandidate> {
        let old_records = registry.get_older_than(self.age_threshold_ms);
        let mut by_class: HashMap<String, Vec<Arc<AllocationRecord>>> = HashMap::new();
        for record in old_records {
            by_class.entry(record.class_name.clone()).or_default().push(record);
        }

        let mut candidates = Vec::new();
        for (class_name, records) in by_class {
            if (records.len() as u32) < self.growth_threshold {
                continue;
            }
            let total_size: u64 = records.iter().map(|r| r.size_bytes).sum();
            let instance_count = records.len() as u64;
            let allocation_site = records[0].allocation_site.clone();
            let severity = compute_severity(total_size, instance_count, LeakType::AgeBased);
            candidates.push(LeakCandidate {
                class_name,
                instance_count,
                total_size,
                leak_type: LeakType::AgeBased,
                allocation_site,
                sample_records: records.iter().take(MAX_SAMPLE_RECORDS).cloned().collect(),
                description: format!(
                    "Found {instance_count} objects older than {} seconds",
                    self.age_threshold_ms / 1000
                ),
                detected_at_ms: now_ms(),
                severity,
            });
        }
        candidates
    }

    fn detect_growth_based(&self, registry: &ObjectRegistry) -> Vec<LeakCandidate> {
        let threshold = 2 * self.growth_threshold as u64;
        let mut candidates = Vec::new();
        for (class_name, stat) in registry.get_class_statistics() {
            if stat.instance_count < threshold {
                continue;
            }
            let records = registry.get_by_class(&class_name);
            let allocation_site = most_frequent_site(&records);
            let severity =
                compute_severity(stat.total_size_bytes, stat.instance_count, LeakType::GrowthBased);
            candidates.push(LeakCandidate {
                class_name: class_name.clone(),
                instance_count: stat.instance_count,
                total_size: stat.total_size_bytes,
                leak_type: LeakType::GrowthBased,
                allocation_site,
                sample_records: records.into_iter().take(MAX_SAMPLE_RECORDS).collect(),
                description: format!(
                    "{class_name} has {} live instances, at or above 2x the growth threshold",
                    stat.instance_count
                ),
                detected_at_ms: now_ms(),
                severity,
            });
        }
        candidates
    }

    fn detect_window_based(
        &self,
        registry: &ObjectRegistry,
        window: &SlidingWindowAnalyzer,
    ) -> Vec<LeakCandidate> {
        let class_stats = registry.get_class_statistics();
        let window_stats = window.analyze();

        let mut candidates = Vec::new();
        for (class_name, stats) in window_stats {
            if !stats.is_consistent_growth || stats.growth_count < 3 {
                continue;
            }
            let Some(current) = class_stats.get(&class_name) else {
                continue;
            };
            if current.instance_count < self.growth_threshold as u64 {
                continue;
            }

            let records = registry.get_by_class(&class_name);
            let allocation_site = most_frequent_site(&records);
            let severity = compute_severity(
                current.total_size_bytes,
                current.instance_count,
                LeakType::WindowBased,
            );
            candidates.push(LeakCandidate {
                class_name: class_name.clone(),
                instance_count: current.instance_count,
                total_size: current.total_size_bytes,
                leak_type: LeakType::WindowBased,
                allocation_site,
                sample_records: records.into_iter().take(MAX_SAMPLE_RECORDS).collect(),
                description: format!(
                    "Consistent growth over {} windows (total growth: {} instances)",
                    stats.growth_count, stats.total_growth
                ),
                detected_at_ms: now_ms(),
                severity,
            });
        }
        candidates
    }

    /// Number of non-empty reports produced so far.
    pub fn detection_count(&self) -> u64 {
        self.detection_count.load(Ordering::Relaxed)
    }

    /// A point-in-time copy of the report history, oldest first.
    pub fn get_reports(&self) -> Vec<LeakReport> {
        self.reports.lock().clone()
    }

    /// The most recently appended report, if any.
    pub fn get_latest_report(&self) -> Option<LeakReport> {
        self.reports.lock().last().cloned()
    }

    /// Remove all report history and reset the detection counter.
    pub fn clear(&self) {
        self.reports.lock().clear();
        self.detection_count.store(0, Ordering::Relaxed);
        *self.last_report.lock() = None;
    }
}
