//! The immutable allocation record (component B) and its derivation
//! from an ingested [`Event::Alloc`].

use std::hash::{Hash, Hasher};

use crate::estimation::SizeEstimator;
use crate::event::{Event, StackFrame};

/// Current wall-clock time in milliseconds, used wherever the registry
/// or leak detector needs "now" rather than an event-supplied timestamp.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// An immutable description of one allocation.
///
/// Equality and hashing are by `object_id` alone, matching the spec's
/// identity model: two records with the same id are the same object,
/// regardless of any other field.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
    /// 64-bit tag uniquely naming this object for the lifetime of its
    /// tracking.
    pub object_id: u64,
    /// Fully-qualified class name.
    pub class_name: String,
    /// Size in bytes, as supplied by the event source or estimated.
    pub size_bytes: u64,
    /// Wall-clock milliseconds at ingest.
    pub timestamp_ms: u64,
    /// Id of the allocating thread.
    pub thread_id: u64,
    /// Name of the allocating thread.
    pub thread_name: String,
    /// Captured frames, oldest caller last, length at most
    /// [`crate::event::MAX_FRAMES`].
    pub frames: Vec<StackFrame>,
    /// The derived allocation site: the first frame not in a framework
    /// prefix, falling back to the first frame, or `"unknown"` if there
    /// are no frames.
    pub allocation_site: String,
}

impl PartialEq for AllocationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id
    }
}

impl Eq for AllocationRecord {}

impl Hash for AllocationRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_id.hash(state);
    }
}

impl AllocationRecord {
    /// Build a record from an `Alloc` event, deriving `allocation_site`
    /// against `framework_prefixes` and falling back to `estimator` when
    /// the event reports a zero size.
    ///
    /// # Panics
    /// Panics if `event` is not an `Event::Alloc`.
    pub fn from_alloc_event(
        event: Event,
        framework_prefixes: &[String],
        estimator: &dyn SizeEstimator,
    ) -> Self {
        let Event::Alloc {
            tag,
            size,
            timestamp_ms,
            class_name,
            thread_id,
            thread_name,
            frames,
        } = event
        else {
            panic!("from_alloc_event called with a non-Alloc event");
        };

        let allocation_site = derive_allocation_site(&frames, framework_prefixes);
        let size_bytes = if size == 0 {
            estimator
                .estimate_size(&class_name)
                .map(|n| n as u64)
                .unwrap_or(0)
        } else {
            size
        };

        Self {
            object_id: tag,
            class_name,
            size_bytes,
            timestamp_ms,
            thread_id,
            thread_name,
            frames,
            allocation_site,
        }
    }

    /// Age of this record in milliseconds relative to `now`.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp_ms)
    }
}

/// The top frame not matching any `framework_prefixes` entry, falling
/// back to the first frame, or `"unknown"` if `frames` is empty.
fn derive_allocation_site(frames: &[StackFrame], framework_prefixes: &[String]) -> String {
    let non_framework = frames.iter().find(|frame| {
        !framework_prefixes
            .iter()
            .any(|prefix| frame.declaring_class.starts_with(prefix.as_str()))
    });

    match non_framework.or_else(|| frames.first()) {
        Some(frame) => frame.display(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimation::SmartSizeEstimator;

    fn prefixes() -> Vec<String> {
        vec!["java.".to_string(), "heapvigil::".to_string()]
    }

    #[test]
    fn identity_is_object_id_alone() {
        let frames = vec![StackFrame::new("C", "f", None, None)];
        let a = AllocationRecord::from_alloc_event(
            Event::alloc(1, 100, 1, "C", 1, "t", frames.clone()),
            &prefixes(),
            &SmartSizeEstimator::new(),
        );
        let b = AllocationRecord::from_alloc_event(
            Event::alloc(1, 999, 2, "Other", 2, "t2", vec![]),
            &prefixes(),
            &SmartSizeEstimator::new(),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn allocation_site_skips_framework_frames() {
        let frames = vec![
            StackFrame::new("java.util.ArrayList", "add", None, None),
            StackFrame::new("C", "f", Some("C.java".to_string()), Some(10)),
        ];
        let record = AllocationRecord::from_alloc_event(
            Event::alloc(1, 100, 1000, "C", 1, "t", frames),
            &prefixes(),
            &SmartSizeEstimator::new(),
        );
        assert_eq!(record.allocation_site, "C.f(C.java:10)");
    }

    #[test]
    fn allocation_site_falls_back_to_first_frame() {
        let frames = vec![StackFrame::new("java.util.ArrayList", "add", None, None)];
        let record = AllocationRecord::from_alloc_event(
            Event::alloc(1, 100, 1000, "C", 1, "t", frames),
            &prefixes(),
            &SmartSizeEstimator::new(),
        );
        assert_eq!(record.allocation_site, "java.util.ArrayList.add");
    }

    #[test]
    fn allocation_site_is_unknown_with_no_frames() {
        let record = AllocationRecord::from_alloc_event(
            Event::alloc(1, 100, 1000, "C", 1, "t", vec![]),
            &prefixes(),
            &SmartSizeEstimator::new(),
        );
        assert_eq!(record.allocation_site, "unknown");
    }

    #[test]
    fn zero_size_falls_back_to_estimator() {
        let mut estimator = SmartSizeEstimator::new();
        estimator.learn_from_real_allocation("C", 256);
        let record = AllocationRecord::from_alloc_event(
            Event::alloc(1, 0, 1000, "C", 1, "t", vec![]),
            &prefixes(),
            &estimator,
        );
        assert!(record.size_bytes > 0);
    }
}
