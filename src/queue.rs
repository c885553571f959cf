//! Single-producer/single-consumer lock-free event queue between the
//! native agent and the heap analyzer (component A).
//!
//! Adapted from the crate's async-memory ring buffer: a fixed-capacity
//! array of slots indexed by two atomic cursors, with the producer
//! publishing under `Release` and the consumer observing under
//! `Acquire`. That ring stores a `Copy` struct and moves it with
//! `ptr::write_volatile`/`ptr::read_volatile`; [`Event`] owns a `String`
//! and a `Vec<StackFrame>`, so slots here hold `MaybeUninit<Event>` and
//! are moved in and out with plain `ptr::write`/`ptr::read` (ownership
//! transfer, no bitwise-copy semantics needed), and the atomics already
//! supply the ordering volatile would otherwise protect.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::event::Event;

/// Default ring capacity: 65,536 slots, a power of two.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// A bounded, lock-free, single-producer/single-consumer ring of
/// [`Event`] values.
///
/// `push` and `pop` never block and never allocate. On a full ring,
/// `push` drops the newest event and increments [`EventQueue::dropped_events`];
/// the queue never blocks the producer to make room.
pub struct EventQueue {
    slots: UnsafeCell<Box<[MaybeUninit<Event>]>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    dropped_events: AtomicUsize,
    mask: usize,
}

// SAFETY: `push` is only ever called by the single producer and only
// touches `write_pos` (written) and `read_pos` (read, Acquire). `pop` is
// only ever called by the single consumer and only touches `read_pos`
// (written) and `write_pos` (read, Acquire). The slot array is accessed
// by index ranges that `write_pos`/`read_pos` keep disjoint between the
// two roles, so there is no data race despite the shared `UnsafeCell`.
unsafe impl Sync for EventQueue {}
unsafe impl Send for EventQueue {}

impl EventQueue {
    /// Build a queue with the given capacity, which must be a power of
    /// two.
    ///
    /// # Panics
    /// Panics if `capacity` is zero or not a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity.is_power_of_two());
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(MaybeUninit::uninit());
        }
        Self {
            slots: UnsafeCell::new(slots.into_boxed_slice()),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            dropped_events: AtomicUsize::new(0),
            mask: capacity - 1,
        }
    }

    /// Build a queue with [`DEFAULT_CAPACITY`] slots.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Push an event. Returns `true` if it was enqueued, `false` if the
    /// ring was full (the event is dropped and [`dropped_events`] is
    /// incremented).
    ///
    /// [`dropped_events`]: EventQueue::dropped_events
    pub fn push(&self, event: Event) -> bool {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let next_write = (write_pos + 1) & self.mask;

        if next_write == self.read_pos.load(Ordering::Acquire) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: `write_pos` is owned by the single producer; the slot
        // at `write_pos` cannot be concurrently read because the
        // consumer only reads slots strictly before `write_pos`
        // (mod capacity), and we just confirmed the ring is not full.
        unsafe {
            let slots = &mut *self.slots.get();
            slots[write_pos].as_mut_ptr().write(event);
        }

        self.write_pos.store(next_write, Ordering::Release);
        true
    }

    /// Pop the next event, or `None` if the ring is empty.
    pub fn pop(&self) -> Option<Event> {
        let read_pos = self.read_pos.load(Ordering::Relaxed);

        if read_pos == self.write_pos.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: `read_pos` is owned by the single consumer; we just
        // confirmed a producer has published up through at least this
        // slot (Acquire on write_pos), so the slot holds an initialized
        // value that has not yet been read.
        let event = unsafe {
            let slots = &mut *self.slots.get();
            slots[read_pos].as_ptr().read()
        };

        let next_read = (read_pos + 1) & self.mask;
        self.read_pos.store(next_read, Ordering::Release);
        Some(event)
    }

    /// Approximate number of events currently queued.
    pub fn size(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        write_pos.wrapping_sub(read_pos) & self.mask
    }

    /// Total number of events dropped because the ring was full.
    pub fn dropped_events(&self) -> usize {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Capacity of the ring, in slots.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        // Drain and drop any events still parked between read_pos and
        // write_pos so their owned Strings/Vecs are freed.
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn sample(tag: u64) -> Event {
        Event::alloc(tag, 16, tag, "C", 1, "main", Vec::new())
    }

    #[test]
    fn push_pop_round_trip() {
        let q = EventQueue::with_capacity(8);
        assert!(q.push(sample(1)));
        match q.pop() {
            Some(Event::Alloc { tag, .. }) => assert_eq!(tag, 1),
            _ => panic!("expected Alloc(1)"),
        }
        assert!(q.pop().is_none());
    }

    #[test]
    fn fifo_ordering_for_single_producer() {
        let q = EventQueue::with_capacity(8);
        for i in 0..5 {
            assert!(q.push(sample(i)));
        }
        for i in 0..5 {
            match q.pop() {
                Some(Event::Alloc { tag, .. }) => assert_eq!(tag, i),
                _ => panic!("expected Alloc({i})"),
            }
        }
    }

    #[test]
    fn full_ring_drops_newest_and_counts() {
        // capacity 4 holds 3 live events (one slot always kept empty
        // to distinguish full from empty).
        let q = EventQueue::with_capacity(4);
        assert!(q.push(sample(1)));
        assert!(q.push(sample(2)));
        assert!(q.push(sample(3)));
        assert!(!q.push(sample(4)));
        assert_eq!(q.dropped_events(), 1);

        match q.pop() {
            Some(Event::Alloc { tag, .. }) => assert_eq!(tag, 1),
            _ => panic!("expected Alloc(1)"),
        }
    }

    #[test]
    fn wraps_around_capacity() {
        let q = EventQueue::with_capacity(4);
        for round in 0..10 {
            assert!(q.push(sample(round)));
            match q.pop() {
                Some(Event::Alloc { tag, .. }) => assert_eq!(tag, round),
                _ => panic!("expected Alloc({round})"),
            }
        }
    }

    #[test]
    fn concurrent_producer_consumer_preserves_all_events() {
        let q = Arc::new(EventQueue::with_capacity(1024));
        let producer_q = Arc::clone(&q);
        let producer = thread::spawn(move || {
            for i in 0..10_000u64 {
                while !producer_q.push(sample(i)) {
                    std::thread::yield_now();
                }
            }
        });

        let mut received = Vec::with_capacity(10_000);
        while received.len() < 10_000 {
            if let Some(Event::Alloc { tag, .. }) = q.pop() {
                received.push(tag);
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();

        for (i, tag) in received.iter().enumerate() {
            assert_eq!(*tag, i as u64);
        }
    }

    #[test]
    fn drop_frees_owned_payloads_of_parked_events() {
        let q = EventQueue::with_capacity(8);
        for i in 0..5 {
            q.push(Event::alloc(i, 8, i, "C", 1, "thread", Vec::new()));
        }
        drop(q);
    }
}
