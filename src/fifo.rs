//! Fixed-capacity single-producer / single-consumer queue.
//!
//! The producer side is handed to the audio thread, the consumer side to the
//! analyzer. Slots are allocated up front and payloads are copied in and out
//! with `clone_from`, so a push into a slot that already has enough capacity
//! never allocates.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Slots per queue. At a 60 Hz refresh this holds half a second of backlog for
/// blocks arriving every 16 ms; anything beyond that is dropped and counted.
pub const FIFO_CAPACITY: usize = 30;

struct Shared<T> {
    slots: Box<[UnsafeCell<T>]>,
    /// Total number of items ever published by the producer.
    write: CachePadded<AtomicUsize>,
    /// Total number of items ever released by the consumer.
    read: CachePadded<AtomicUsize>,
    dropped: AtomicUsize,
}

// SAFETY: a slot is only touched by the producer while it lies outside
// `read..write` and only by the consumer while it lies inside it. The cursors
// are published with Release after the slot access and loaded with Acquire
// before it, so the two sides never alias the same slot.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, position: usize) -> *mut T {
        self.slots[position % self.slots.len()].get()
    }

    #[inline]
    fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

/// Writing half. Owned by exactly one thread at a time.
pub struct FifoProducer<T> {
    shared: Arc<Shared<T>>,
}

/// Reading half. Owned by exactly one thread at a time.
pub struct FifoConsumer<T> {
    shared: Arc<Shared<T>>,
}

/// Creates a queue with [`FIFO_CAPACITY`] slots, each initialised from `prototype`.
pub fn fifo<T: Clone + Send>(prototype: T) -> (FifoProducer<T>, FifoConsumer<T>) {
    fifo_with_capacity(FIFO_CAPACITY, prototype)
}

/// Creates a queue with `capacity` slots, each initialised from `prototype`.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn fifo_with_capacity<T: Clone + Send>(
    capacity: usize,
    prototype: T,
) -> (FifoProducer<T>, FifoConsumer<T>) {
    assert!(capacity > 0, "fifo capacity must be non-zero");

    let slots: Box<[UnsafeCell<T>]> = (0..capacity)
        .map(|_| UnsafeCell::new(prototype.clone()))
        .collect();
    let shared = Arc::new(Shared {
        slots,
        write: CachePadded::new(AtomicUsize::new(0)),
        read: CachePadded::new(AtomicUsize::new(0)),
        dropped: AtomicUsize::new(0),
    });

    (
        FifoProducer {
            shared: Arc::clone(&shared),
        },
        FifoConsumer { shared },
    )
}

impl<T: Clone> FifoProducer<T> {
    /// Copies `item` into the next free slot.
    ///
    /// Returns `false` and leaves the queue untouched when it is full.
    pub fn push(&mut self, item: &T) -> bool {
        let shared = &*self.shared;
        let write = shared.write.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);

        if write.wrapping_sub(read) >= shared.capacity() {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: the slot at `write` is free, the consumer cannot see it until
        // the store below.
        unsafe {
            (*shared.slot(write)).clone_from(item);
        }
        shared.write.store(write.wrapping_add(1), Ordering::Release);
        true
    }
}

impl<T> FifoProducer<T> {
    /// Runs `f` on every slot that is currently free.
    ///
    /// Used to resize the payloads ahead of time so later pushes stay
    /// allocation-free. Slots still waiting to be pulled are left alone.
    pub fn prepare_free_slots<F: FnMut(&mut T)>(&mut self, mut f: F) {
        let shared = &*self.shared;
        let write = shared.write.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);
        let free = shared.capacity() - write.wrapping_sub(read);

        for offset in 0..free {
            // SAFETY: positions `write..read + capacity` are not readable by the
            // consumer, and only this producer writes them.
            unsafe {
                f(&mut *shared.slot(write.wrapping_add(offset)));
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    pub fn num_free(&self) -> usize {
        self.shared.capacity() - self.shared.len()
    }
}

impl<T: Clone> FifoConsumer<T> {
    /// Copies the oldest item into `out`. Returns `false` when the queue is empty.
    pub fn pull(&mut self, out: &mut T) -> bool {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::Relaxed);
        let write = shared.write.load(Ordering::Acquire);

        if write == read {
            return false;
        }

        // SAFETY: `read < write`, so the producer has finished this slot and
        // will not touch it until the store below.
        unsafe {
            out.clone_from(&*shared.slot(read));
        }
        shared.read.store(read.wrapping_add(1), Ordering::Release);
        true
    }
}

impl<T> FifoConsumer<T> {
    /// Items ready to be pulled.
    pub fn num_available(&self) -> usize {
        self.shared.len()
    }

    /// Discards everything currently queued without copying it out.
    pub fn clear(&mut self) -> usize {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::Relaxed);
        let write = shared.write.load(Ordering::Acquire);
        shared.read.store(write, Ordering::Release);
        write.wrapping_sub(read)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Pushes rejected because the queue was full, since creation.
    pub fn dropped(&self) -> usize {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn thirty_first_push_fails_and_order_is_kept() {
        let (mut tx, mut rx) = fifo(0_u32);
        for i in 0..30 {
            assert!(tx.push(&i), "push {} should succeed", i);
        }
        assert!(!tx.push(&30));
        assert_eq!(rx.dropped(), 1);
        assert_eq!(rx.num_available(), 30);

        let mut out = 0;
        for i in 0..30 {
            assert!(rx.pull(&mut out));
            assert_eq!(out, i);
        }
        assert!(!rx.pull(&mut out));
    }

    #[test]
    fn pull_from_empty_leaves_output_alone() {
        let (_tx, mut rx) = fifo(String::new());
        let mut out = String::from("untouched");
        assert!(!rx.pull(&mut out));
        assert_eq!(out, "untouched");
    }

    #[test]
    fn wraps_around_many_times() {
        let (mut tx, mut rx) = fifo_with_capacity(3, 0_usize);
        let mut out = 0;
        for i in 0..100 {
            assert!(tx.push(&i));
            assert!(tx.push(&(i + 1000)));
            assert!(rx.pull(&mut out));
            assert_eq!(out, i);
            assert!(rx.pull(&mut out));
            assert_eq!(out, i + 1000);
        }
        assert_eq!(rx.num_available(), 0);
    }

    #[test]
    fn payload_copies_do_not_alias() {
        let (mut tx, mut rx) = fifo(vec![0.0_f32; 4]);
        let mut block = vec![1.0, 2.0, 3.0, 4.0];
        assert!(tx.push(&block));
        block[0] = 99.0;

        let mut out = Vec::new();
        assert!(rx.pull(&mut out));
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn prepare_free_slots_skips_queued_items() {
        let (mut tx, mut rx) = fifo_with_capacity(4, vec![0.0_f32; 2]);
        assert!(tx.push(&vec![7.0, 7.0]));
        tx.prepare_free_slots(|slot| slot.resize(8, 0.0));

        let mut out = Vec::new();
        assert!(rx.pull(&mut out));
        assert_eq!(out, vec![7.0, 7.0]);
        assert_eq!(tx.num_free(), 4);
    }

    #[test]
    fn clear_discards_backlog() {
        let (mut tx, mut rx) = fifo(0_u8);
        for i in 0..5 {
            tx.push(&i);
        }
        assert_eq!(rx.clear(), 5);
        assert_eq!(rx.num_available(), 0);
        assert_eq!(tx.num_free(), FIFO_CAPACITY);
    }

    #[test]
    #[should_panic(expected = "fifo capacity must be non-zero")]
    fn zero_capacity_is_rejected() {
        let _ = fifo_with_capacity(0, 0_u8);
    }

    #[test]
    fn concurrent_producer_and_consumer_see_every_item_in_order() {
        const COUNT: u64 = 20_000;
        let (mut tx, mut rx) = fifo_with_capacity(8, 0_u64);

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                while !tx.push(&i) {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        let mut out = 0;
        while expected < COUNT {
            if rx.pull(&mut out) {
                assert_eq!(out, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
