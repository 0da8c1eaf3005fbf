//! Bounded lock-free MPMC queue.
//!
//! A fixed-capacity multi-producer multi-consumer ring buffer in the
//! Vyukov style. Backpressure is by refusal: a full queue hands the item
//! straight back instead of blocking.
//!
//! # Synchronization protocol
//!
//! Each slot carries its own sequence counter; `head` (producers) and
//! `tail` (consumers) are unbounded u64 cursors, and the buffer index is
//! `cursor & mask`. The per-slot sequence prevents ABA without tagged
//! pointers:
//!
//! - A slot is free for the producer at cursor `h` when `seq == h`.
//!   The producer CAS-advances `head`, writes the value, then stores
//!   `seq = h + 1` with Release to publish it.
//! - A slot is ready for the consumer at cursor `t` when `seq == t + 1`.
//!   The consumer CAS-advances `tail`, reads the value, then stores
//!   `seq = t + capacity` with Release to recycle the slot.
//!
//! Sequence loads are Acquire so the value write/read on either side is
//! ordered against the publication. Cursor CASes are Relaxed: the slot
//! sequence is the only publication channel for the data itself.
//!
//! Ordering guarantee: FIFO holds per producer. Across producers, an item
//! enqueued later in wall time may be popped earlier if that producer's
//! CAS won first.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// Error returned by [`BoundedQueue::push`] when the queue is full.
///
/// Carries the refused item back to the caller, who decides whether to
/// retry, drop, or shed load.
pub struct QueueFull<T>(pub T);

impl<T> std::fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> std::fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("queue is full")
    }
}

struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A bounded lock-free multi-producer multi-consumer queue.
pub struct BoundedQueue<T> {
    /// Producer cursor.
    head: CachePadded<AtomicU64>,
    /// Consumer cursor.
    tail: CachePadded<AtomicU64>,
    slots: Box<[Slot<T>]>,
    mask: u64,
}

// Safety: values move through slots guarded by the per-slot sequence
// protocol above; a slot's value is written by exactly one producer
// (the CAS winner for that cursor) and read by exactly one consumer
// before the slot is recycled. T only needs to be Send.
unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Creates a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "capacity must be a power of two, got {capacity}"
        );
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicU64::new(i as u64),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            slots,
            mask: (capacity - 1) as u64,
        }
    }

    /// Returns the queue capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Weakly consistent depth estimate.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.saturating_sub(tail) as usize
    }

    /// Returns true if the queue appears empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts to enqueue an item. Never blocks; a full queue returns the
    /// item back inside [`QueueFull`].
    pub fn push(&self, item: T) -> Result<(), QueueFull<T>> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(head & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(head) as i64;

            if dif == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: winning the CAS grants exclusive write
                        // access to this slot until the Release store below.
                        unsafe { (*slot.value.get()).write(item) };
                        slot.seq.store(head.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => head = current,
                }
            } else if dif < 0 {
                // The slot one lap behind has not been consumed: full.
                return Err(QueueFull(item));
            } else {
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to dequeue an item. Never blocks; an empty queue returns
    /// `None`.
    pub fn pop(&self) -> Option<T> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(tail & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq.wrapping_sub(tail.wrapping_add(1)) as i64;

            if dif == 0 {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: winning the CAS grants exclusive read
                        // access to the published value in this slot.
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq.store(
                            tail.wrapping_add(self.mask).wrapping_add(1),
                            Ordering::Release,
                        );
                        return Some(value);
                    }
                    Err(current) => tail = current,
                }
            } else if dif < 0 {
                return None;
            } else {
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // Drain any undelivered items so their destructors run.
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn push_pop_fifo_single_producer() {
        let q = BoundedQueue::new(8);
        for i in 0..8 {
            q.push(i).unwrap();
        }
        assert!(q.push(99).is_err());
        for i in 0..8 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn refusal_returns_the_item() {
        let q: BoundedQueue<String> = BoundedQueue::new(1);
        q.push("a".to_string()).unwrap();
        let QueueFull(rejected) = q.push("b".to_string()).unwrap_err();
        assert_eq!(rejected, "b");
    }

    #[test]
    fn wraps_around_many_laps() {
        let q = BoundedQueue::new(4);
        for lap in 0..1000u64 {
            for i in 0..4 {
                q.push(lap * 4 + i).unwrap();
            }
            for i in 0..4 {
                assert_eq!(q.pop(), Some(lap * 4 + i));
            }
        }
    }

    #[test]
    fn drop_releases_undrained_items() {
        let item = Arc::new(());
        {
            let q = BoundedQueue::new(4);
            q.push(Arc::clone(&item)).unwrap();
            q.push(Arc::clone(&item)).unwrap();
            assert_eq!(Arc::strong_count(&item), 3);
        }
        assert_eq!(Arc::strong_count(&item), 1);
    }

    #[test]
    fn concurrent_producers_and_consumers_lose_nothing() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: u64 = 10_000;

        let q = Arc::new(BoundedQueue::new(1024));
        let total = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let popped = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let mut handles = Vec::new();
        for p in 0..PRODUCERS as u64 {
            let q = Arc::clone(&q);
            handles.push(std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut item = p * PER_PRODUCER + i;
                    loop {
                        match q.push(item) {
                            Ok(()) => break,
                            Err(QueueFull(back)) => {
                                item = back;
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }
        for _ in 0..CONSUMERS {
            let q = Arc::clone(&q);
            let total = Arc::clone(&total);
            let popped = Arc::clone(&popped);
            handles.push(std::thread::spawn(move || loop {
                match q.pop() {
                    Some(v) => {
                        total.fetch_add(v, std::sync::atomic::Ordering::Relaxed);
                        if popped.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1
                            == PRODUCERS as u64 * PER_PRODUCER
                        {
                            break;
                        }
                    }
                    None => {
                        if popped.load(std::sync::atomic::Ordering::Relaxed)
                            == PRODUCERS as u64 * PER_PRODUCER
                        {
                            break;
                        }
                        std::thread::yield_now();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let n = PRODUCERS as u64 * PER_PRODUCER;
        assert_eq!(popped.load(std::sync::atomic::Ordering::Relaxed), n);
        // Sum of 0..n is invariant under any interleaving: nothing lost,
        // nothing duplicated.
        assert_eq!(
            total.load(std::sync::atomic::Ordering::Relaxed),
            n * (n - 1) / 2
        );
    }
}
