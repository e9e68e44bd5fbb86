/*
 * The baseline without any lock: every operation is a read of some index,
 * then a write of the index back, as two separate steps.
 * Two threads reading the same index both write the same "next" value => one of the updates is lost.
 *
 * The data itself is in atomics, so the losses are just wrong numbers, not UB:
 * - two pushes into the same slot => one of the items disappears
 * - two pops of the same head => one item comes out twice
 *
 * A yield between the read and the write widens the window,
 * so the lost updates show up even on a single core.
 */

use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering::Relaxed},
    thread,
};

use crate::queue::Queue;

/// A fixed-capacity FIFO of u64 with racy indices
pub struct UnguardedQueue {
    slots: Box<[AtomicU64]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl UnguardedQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// # Panics
    /// - if the tail went past the capacity, slots aren't reused
    pub fn push(&self, value: u64) {
        let tail = self.tail.load(Relaxed);
        let Some(slot) = self.slots.get(tail) else {
            panic!("unguarded queue is full, {} slots", self.slots.len());
        };
        slot.store(value, Relaxed);
        thread::yield_now();
        self.tail.store(tail + 1, Relaxed);
    }

    pub fn try_pop(&self) -> Option<u64> {
        let head = self.head.load(Relaxed);
        if head >= self.tail.load(Relaxed) {
            return None;
        }
        let value = self.slots[head].load(Relaxed);
        thread::yield_now();
        self.head.store(head + 1, Relaxed);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.tail
            .load(Relaxed)
            .saturating_sub(self.head.load(Relaxed))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Queue<u64> for UnguardedQueue {
    fn push(&self, value: u64) {
        UnguardedQueue::push(self, value)
    }

    fn try_pop(&self) -> Option<u64> {
        UnguardedQueue::try_pop(self)
    }

    fn len(&self) -> usize {
        UnguardedQueue::len(self)
    }
}

/// A shared counter incremented as load + store
#[derive(Default)]
pub struct UnguardedCounter {
    value: AtomicU64,
}

impl UnguardedCounter {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        let v = self.value.load(Relaxed);
        thread::yield_now();
        self.value.store(v + 1, Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Relaxed)
    }
}
