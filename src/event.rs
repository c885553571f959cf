//! The event schema delivered by a native agent, and carried through the
//! event queue.

/// One frame of a captured call stack, as `declaring_class.method(file:line)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Fully-qualified declaring class or type name.
    pub declaring_class: String,
    /// Method or function name.
    pub method: String,
    /// Source file, if the agent could resolve one.
    pub file: Option<String>,
    /// Source line, if the agent could resolve one.
    pub line: Option<u32>,
}

impl StackFrame {
    /// Build a frame from its parts.
    pub fn new(
        declaring_class: impl Into<String>,
        method: impl Into<String>,
        file: Option<String>,
        line: Option<u32>,
    ) -> Self {
        Self {
            declaring_class: declaring_class.into(),
            method: method.into(),
            file,
            line,
        }
    }

    /// Render as `class.method(file:line)`, matching the agent's
    /// structured-frame serialization.
    pub fn display(&self) -> String {
        let location = match (&self.file, self.line) {
            (Some(file), Some(line)) => format!("{file}:{line}"),
            (Some(file), None) => file.clone(),
            (None, Some(line)) => format!(":{line}"),
            (None, None) => String::new(),
        };
        if location.is_empty() {
            format!("{}.{}", self.declaring_class, self.method)
        } else {
            format!("{}.{}({})", self.declaring_class, self.method, location)
        }
    }
}

/// Maximum number of frames carried by a single allocation event, per
/// the native agent contract.
pub const MAX_FRAMES: usize = 20;

/// The event schema delivered by the native agent (§4.J), and the item
/// type of the event queue.
#[derive(Debug, Clone)]
pub enum Event {
    /// An allocation sample admitted by the agent's sampling policy.
    Alloc {
        /// Runtime-assigned or address-derived object tag.
        tag: u64,
        /// Size in bytes as reported by the runtime.
        size: u64,
        /// Wall-clock milliseconds at capture.
        timestamp_ms: u64,
        /// Fully-qualified class name of the allocated object.
        class_name: String,
        /// Id of the allocating thread.
        thread_id: u64,
        /// Name of the allocating thread.
        thread_name: String,
        /// Best-effort captured frames, already truncated to
        /// [`MAX_FRAMES`] by the agent.
        frames: Vec<StackFrame>,
    },
    /// An object-free notification.
    Free {
        /// Tag of the freed object.
        tag: u64,
        /// Size in bytes, as last known for the object.
        size: u64,
        /// Wall-clock milliseconds at capture.
        timestamp_ms: u64,
        /// Id of the thread observing the free.
        thread_id: u64,
    },
    /// Start of a collection cycle.
    GcStart {
        /// Wall-clock milliseconds at capture.
        timestamp_ms: u64,
    },
    /// End of a collection cycle.
    GcFinish {
        /// Wall-clock milliseconds at capture.
        timestamp_ms: u64,
    },
}

impl Event {
    /// Truncate `frames` to [`MAX_FRAMES`] and build an `Alloc` event.
    #[allow(clippy::too_many_arguments)]
    pub fn alloc(
        tag: u64,
        size: u64,
        timestamp_ms: u64,
        class_name: impl Into<String>,
        thread_id: u64,
        thread_name: impl Into<String>,
        mut frames: Vec<StackFrame>,
    ) -> Self {
        frames.truncate(MAX_FRAMES);
        Event::Alloc {
            tag,
            size,
            timestamp_ms,
            class_name: class_name.into(),
            thread_id,
            thread_name: thread_name.into(),
            frames,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_truncates_frames_beyond_twenty() {
        let frames: Vec<_> = (0..30)
            .map(|i| StackFrame::new("C", format!("m{i}"), None, None))
            .collect();
        let event = Event::alloc(1, 8, 0, "C", 1, "main", frames);
        match event {
            Event::Alloc { frames, .. } => assert_eq!(frames.len(), MAX_FRAMES),
            _ => panic!("expected Alloc"),
        }
    }

    #[test]
    fn frame_display_formats_class_method_file_line() {
        let frame = StackFrame::new("C", "f", Some("C.java".to_string()), Some(10));
        assert_eq!(frame.display(), "C.f(C.java:10)");
    }

    #[test]
    fn frame_display_falls_back_without_location() {
        let frame = StackFrame::new("C", "f", None, None);
        assert_eq!(frame.display(), "C.f");
    }
}
