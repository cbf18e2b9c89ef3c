//! Lock-free single-producer single-consumer ring queue.
//!
//! The only inter-process transport in the system. One process pushes, one
//! process pops; `head` and `tail` live on their own cache lines so the two
//! sides never contend on the same line. Capacity must be a power of two;
//! one slot is sacrificed to distinguish full from empty.
//!
//! # Memory ordering
//!
//! The producer loads `tail` with `Acquire` before writing a slot and
//! publishes with a `Release` store of `head`; the consumer mirrors this.
//! A consumer that observes the new `head` therefore also observes the
//! slot contents written before it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// SPSC ring of `C` slots (usable capacity `C - 1`).
///
/// `T` must be bitwise-copyable: elements cross the process boundary as raw
/// bytes. The struct layout is part of the shared-memory protocol.
#[repr(C, align(64))]
pub struct SpscQueue<T: Copy, const C: usize> {
    head: AtomicUsize,
    _pad0: [u8; 56],
    tail: AtomicUsize,
    _pad1: [u8; 56],
    buffer: [UnsafeCell<T>; C],
}

// SAFETY: slot access is serialized by the head/tail protocol; each slot is
// written by exactly one side before the other reads it.
unsafe impl<T: Copy + Send, const C: usize> Send for SpscQueue<T, C> {}
unsafe impl<T: Copy + Send, const C: usize> Sync for SpscQueue<T, C> {}

impl<T: Copy, const C: usize> SpscQueue<T, C> {
    const MASK: usize = {
        assert!(C.is_power_of_two(), "capacity must be a power of 2");
        C - 1
    };

    /// Reset to empty. Valid only while no peer is attached; freshly
    /// created (zeroed) segments are already in this state.
    pub fn init(&self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Release);
    }

    /// Producer side: append `item`, failing when the ring is full.
    pub fn try_push(&self, item: &T) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let next = (head + 1) & Self::MASK;
        if next == tail {
            return false;
        }
        // SAFETY: only the single producer writes this slot, and the
        // consumer will not read it until the Release store below.
        unsafe {
            *self.buffer[head & Self::MASK].get() = *item;
        }
        self.head.store(next, Ordering::Release);
        true
    }

    /// Consumer side: remove the oldest element.
    pub fn try_pop(&self, out: &mut T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return false;
        }
        // SAFETY: the Acquire load of head guarantees the producer's write
        // to this slot is visible; only the single consumer advances tail.
        unsafe {
            *out = *self.buffer[tail & Self::MASK].get();
        }
        self.tail.store((tail + 1) & Self::MASK, Ordering::Release);
        true
    }

    /// Consumer side: read the oldest element without removing it.
    pub fn try_peek(&self, out: &mut T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail == head {
            return false;
        }
        // SAFETY: as in try_pop; tail is not advanced.
        unsafe {
            *out = *self.buffer[tail & Self::MASK].get();
        }
        true
    }

    /// Approximate number of queued elements.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & Self::MASK
    }

    /// Whether the queue is (approximately) empty.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Usable capacity (`C - 1`).
    pub const fn capacity() -> usize {
        C - 1
    }
}
