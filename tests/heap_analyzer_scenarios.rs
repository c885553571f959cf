//! End-to-end scenarios driving [`HeapAnalyzer`] through its public
//! surface only, matching the crate's data-flow: event -> registry ->
//! snapshot/window -> leak detector.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use heapvigil::agent::SamplingPolicy;
use heapvigil::analyzer::HeapAnalyzer;
use heapvigil::config::HeapVigilConfig;
use heapvigil::event::{Event, StackFrame};
use heapvigil::leak::{LeakListener, LeakReport, LeakType};

fn alloc(tag: u64, class: &str, size: u64, ts: u64) -> Event {
    Event::alloc(
        tag,
        size,
        ts,
        class,
        1,
        "main",
        vec![StackFrame::new(class, "f", Some(format!("{class}.java")), Some(10))],
    )
}

#[test]
fn basic_round_trip_through_the_queue() {
    let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
    analyzer.start_analysis();

    assert!(analyzer.queue().push(alloc(1, "C", 100, 1_000)));
    for _ in 0..200 {
        if analyzer.get_class_statistics().contains_key("C") {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }

    let stats = analyzer.get_class_statistics();
    let c = stats.get("C").expect("C should be tracked after dispatch");
    assert_eq!(c.instance_count, 1);
    assert_eq!(c.total_size_bytes, 100);

    let sites = analyzer.get_site_statistics();
    assert_eq!(sites.get("C.f(C.java:10)").map(|s| s.allocation_count), Some(1));

    assert!(analyzer.queue().push(Event::Free {
        tag: 1,
        size: 100,
        timestamp_ms: 2_000,
        thread_id: 1,
    }));
    for _ in 0..200 {
        if !analyzer.get_class_statistics().contains_key("C") {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert!(!analyzer.get_class_statistics().contains_key("C"));
    // Site stats are cumulative allocation pressure and never decrement.
    assert_eq!(
        analyzer.get_site_statistics().get("C.f(C.java:10)").map(|s| s.allocation_count),
        Some(1)
    );

    analyzer.stop_analysis();
}

#[test]
fn snapshot_diff_reflects_fifty_new_instances() {
    let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
    let base = analyzer.take_snapshot();

    for id in 0..50u64 {
        analyzer.record_allocation(Arc::new(heapvigil::record::AllocationRecord::from_alloc_event(
            alloc(id, "Leaky", 1_024, 1_000 + id),
            &[],
            &heapvigil::estimation::SmartSizeEstimator::new(),
        )));
    }

    let current = analyzer.take_snapshot();
    let diff = base.compare(&current);
    let leaky = diff.class_diffs.get("Leaky").expect("Leaky present in diff");
    assert_eq!(leaky.instance_delta, 50);
    assert_eq!(leaky.size_delta, 51_200);
    assert_eq!(diff.new_allocations.len(), 50);
    assert_eq!(diff.freed_allocations.len(), 0);
}

#[test]
fn compare_snapshots_by_id_round_trips_through_the_facade() {
    let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
    let base = analyzer.take_snapshot();
    let current = analyzer.take_snapshot();
    let diff = analyzer
        .compare_snapshots(base.snapshot_id, current.snapshot_id)
        .expect("both ids are in history");
    assert_eq!(diff.base_snapshot_id, base.snapshot_id);
    assert_eq!(diff.current_snapshot_id, current.snapshot_id);
}

#[test]
fn take_snapshot_is_safely_concurrent_across_threads() {
    let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let analyzer = Arc::clone(&analyzer);
            thread::spawn(move || {
                (0..25)
                    .map(|_| analyzer.take_snapshot().snapshot_id)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all_ids: Vec<u64> = Vec::new();
    for handle in handles {
        all_ids.extend(handle.join().unwrap());
    }
    assert_eq!(all_ids.len(), 100);
    let mut unique = all_ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), all_ids.len(), "every snapshot id must be distinct");
}

#[test]
fn age_based_leak_detection_end_to_end() {
    let mut config = HeapVigilConfig::testing();
    config.age_threshold_ms = 5_000;
    config.growth_threshold = 10;
    let analyzer = HeapAnalyzer::new(config);
    analyzer.start_analysis();

    let now = heapvigil::record::now_ms();
    for id in 0..15u64 {
        analyzer.record_allocation(Arc::new(heapvigil::record::AllocationRecord::from_alloc_event(
            alloc(id, "Old", 100, now.saturating_sub(10_000)),
            &[],
            &heapvigil::estimation::SmartSizeEstimator::new(),
        )));
    }

    let report = analyzer.detect_leaks().expect("detection is enabled once started");
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.candidates[0].leak_type, LeakType::AgeBased);
    assert_eq!(report.candidates[0].instance_count, 15);
    assert_eq!(report.candidates[0].total_size, 1_500);

    analyzer.stop_analysis();
}

#[test]
fn leak_listener_is_notified_on_non_empty_report() {
    struct CountingListener(Arc<AtomicU32>);
    impl LeakListener for CountingListener {
        fn on_leak_detected(&self, _report: &LeakReport) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut config = HeapVigilConfig::testing();
    config.age_threshold_ms = 1_000;
    config.growth_threshold = 5;
    let analyzer = HeapAnalyzer::new(config);
    analyzer.start_analysis();

    let calls = Arc::new(AtomicU32::new(0));
    analyzer.add_leak_listener(Arc::new(CountingListener(Arc::clone(&calls))));

    let now = heapvigil::record::now_ms();
    for id in 0..10u64 {
        analyzer.record_allocation(Arc::new(heapvigil::record::AllocationRecord::from_alloc_event(
            alloc(id, "Old", 100, now.saturating_sub(5_000)),
            &[],
            &heapvigil::estimation::SmartSizeEstimator::new(),
        )));
    }

    analyzer.detect_leaks();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    analyzer.stop_analysis();
}

#[test]
fn clear_resets_every_derived_aggregate() {
    let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
    analyzer.record_allocation(Arc::new(heapvigil::record::AllocationRecord::from_alloc_event(
        alloc(1, "C", 100, 1_000),
        &[],
        &heapvigil::estimation::SmartSizeEstimator::new(),
    )));
    analyzer.take_snapshot();
    analyzer.clear();

    assert!(analyzer.get_class_statistics().is_empty());
    assert!(analyzer.get_site_statistics().is_empty());
    assert!(analyzer.get_recent_allocations(10).is_empty());
    assert!(analyzer.get_snapshots().is_empty());

    let snapshot = analyzer.take_snapshot();
    assert!(snapshot.class_stats.is_empty());
    assert_eq!(snapshot.total_heap_used, 0);
}

#[test]
fn allocation_stats_report_top_classes_and_threads_by_bytes() {
    let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
    for (id, class, thread, size) in [
        (1u64, "Big", "t1", 10_000u64),
        (2, "Small", "t2", 10),
        (3, "Big", "t1", 5_000),
    ] {
        analyzer.record_allocation(Arc::new(heapvigil::record::AllocationRecord::from_alloc_event(
            Event::alloc(id, size, id, class, 1, thread, vec![]),
            &[],
            &heapvigil::estimation::SmartSizeEstimator::new(),
        )));
    }

    let stats = analyzer.get_allocation_stats();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.total_bytes, 15_010);
    assert_eq!(stats.top_classes_by_bytes[0].0, "Big");
    assert_eq!(stats.top_threads_by_bytes[0].0, "t1");
}

#[test]
fn sampling_policy_admits_exactly_one_in_n() {
    let policy = SamplingPolicy::new(3);
    let admitted: usize = (0..9).filter(|_| policy.should_admit()).count();
    assert_eq!(admitted, 3);
}

#[test]
fn heap_pool_usage_defaults_to_empty_without_a_configured_source() {
    let analyzer = HeapAnalyzer::new(HeapVigilConfig::testing());
    assert!(analyzer.get_heap_pool_usages().is_empty());
}
