//! # Queues with a race left open
//!
//! Both queues below lock their items properly, so pushes and pops alone are fine.
//! The problem is a consumer that's already been let through while the items are taken away
//! by somebody else before it locks them.
//!
//! ## Semaphore as "items available"
//!
//! [SemaphoreQueue] counts items with a [Semaphore]: push releases a unit, pop acquires one then locks the items.
//! The acquire and the lock are two steps:
//! 1. a consumer acquires the unit of the pushed item
//! 2. [SemaphoreQueue::flush] locks the items, clears them, unlocks
//! 3. the consumer locks the items and takes the head of an empty queue
//!
//! Draining the semaphore in flush doesn't help, the unit is already gone in step 1.
//! It even makes things worse the other way around:
//! 1. a push releases a unit and wakes the sleeping consumer
//! 2. flush clears the item and drains the unit before the woken consumer locks the counter back
//! 3. the consumer sees no units and falls asleep again, it's no longer in the wait set
//!    of the push that woke it, so only a later push gets it out
//!
//! ## A single `if` around the condvar's wait
//!
//! [SingleCheckQueue] is [ConcurrentQueue](super::ConcurrentQueue) with `if` instead of `while`.
//! After the wake-up it locks the mutex back and takes the head without looking,
//! but the item may be gone by then (see Mesa semantics in [crate::locks::condvar]).
//!
//! In both cases the pop reports [Error::PoppedEmpty] where a C-style queue would read out of bounds.

use std::collections::VecDeque;

use crate::{
    error::Error,
    locks::{Condvar, Mutex, Semaphore},
    queue::Queue,
};

pub struct SemaphoreQueue<Y> {
    items: Mutex<VecDeque<Y>>,
    available: Semaphore,
}

impl<Y> SemaphoreQueue<Y> {
    pub const fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    pub fn push(&self, value: Y) {
        self.items.lock().push_back(value);
        self.available.release();
    }

    pub fn pop(&self) -> Result<Y, Error> {
        self.available.acquire();
        // <- the gap: the unit is ours, the item isn't yet
        self.items.lock().pop_front().ok_or(Error::PoppedEmpty)
    }

    pub fn try_pop(&self) -> Option<Y> {
        if !self.available.try_acquire() {
            return None;
        }
        self.items.lock().pop_front()
    }

    /// Clears the items and takes back as many units as it can, which can't be enough
    /// if some consumer is between its acquire and its lock.
    /// A consumer woken for a unit the drain takes sleeps till the next push.
    pub fn flush(&self) -> usize {
        let flushed = {
            let mut items = self.items.lock();
            let flushed = items.len();
            items.clear();
            flushed
        };
        let drained = (0..flushed).take_while(|_| self.available.try_acquire()).count();
        if drained < flushed {
            log::debug!("flush drained {drained} of {flushed} units, some are in flight");
        }
        flushed
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<Y> Default for SemaphoreQueue<Y> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Y: Send> Queue<Y> for SemaphoreQueue<Y> {
    fn push(&self, value: Y) {
        SemaphoreQueue::push(self, value)
    }

    fn try_pop(&self) -> Option<Y> {
        SemaphoreQueue::try_pop(self)
    }

    fn len(&self) -> usize {
        SemaphoreQueue::len(self)
    }
}

pub struct SingleCheckQueue<Y> {
    items: Mutex<VecDeque<Y>>,
    not_empty: Condvar,
}

impl<Y> SingleCheckQueue<Y> {
    pub const fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    pub fn push(&self, value: Y) {
        self.items.lock().push_back(value);
        self.not_empty.notify_one();
    }

    pub fn pop(&self) -> Result<Y, Error> {
        let mut items = self.items.lock();
        if items.is_empty() {
            items = self.not_empty.wait(items);
        }
        items.pop_front().ok_or(Error::PoppedEmpty)
    }

    pub fn try_pop(&self) -> Option<Y> {
        self.items.lock().pop_front()
    }

    pub fn flush(&self) -> usize {
        let mut items = self.items.lock();
        let flushed = items.len();
        items.clear();
        flushed
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<Y> Default for SingleCheckQueue<Y> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Y: Send> Queue<Y> for SingleCheckQueue<Y> {
    fn push(&self, value: Y) {
        SingleCheckQueue::push(self, value)
    }

    fn try_pop(&self) -> Option<Y> {
        SingleCheckQueue::try_pop(self)
    }

    fn len(&self) -> usize {
        SingleCheckQueue::len(self)
    }
}

#[cfg(test)]
mod test {
    use std::{
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;

    fn eventually(f: impl Fn() -> bool) {
        while !f() {
            sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_fine_without_flush() {
        let q = SemaphoreQueue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.pop(), Ok(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);

        let q = SingleCheckQueue::new();
        scope(|s| {
            let consumer = s.spawn(|| q.pop());
            eventually(|| q.not_empty.waiters() == 1);
            q.push(3);
            assert_eq!(consumer.join().unwrap(), Ok(3));
        });
    }

    #[test]
    fn test_semaphore_queue_flush_race() {
        let q = SemaphoreQueue::new();
        scope(|s| {
            let consumer = s.spawn(|| q.pop());
            eventually(|| q.available.waiters() == 1);

            // a push that stops half-way: the item is in, the unit is out, the items are still locked
            let mut items = q.items.lock();
            items.push_back(1);
            q.available.release();
            // the consumer took the unit and is now stuck on our lock
            eventually(|| q.available.available() == 0);

            // flush runs in-between
            items.clear();
            drop(items);

            assert_eq!(consumer.join().unwrap(), Err(Error::PoppedEmpty));
        });
    }

    #[test]
    fn test_semaphore_queue_flush_strands_woken_consumer() {
        let q = SemaphoreQueue::new();
        scope(|s| {
            let consumer = s.spawn(|| q.pop());
            eventually(|| q.available.waiters() == 1);

            // push + flush with the counter locked all along, the woken consumer can't take the unit back
            let mut items = q.items.lock();
            let mut permits = q.available.permits.lock();
            items.push_back(1);
            *permits += 1;
            q.available.available.notify_one();
            items.clear();
            *permits -= 1;
            drop(permits);
            drop(items);

            // it woke up, found nothing and went back to sleep
            eventually(|| q.available.waiters() == 1);
            assert!(!consumer.is_finished());
            assert_eq!(q.available.available(), 0);

            // only the next push gets it out
            q.push(2);
            assert_eq!(consumer.join().unwrap(), Ok(2));
        });
    }

    #[test]
    fn test_semaphore_queue_flush_leaves_units_behind() {
        // the drain can't catch up with a unit that's in flight => the count and the items disagree
        let q = SemaphoreQueue::new();
        q.push(1);
        assert!(q.available.try_acquire()); // a consumer between its acquire and its lock
        assert_eq!(q.flush(), 1);
        assert_eq!(q.available.available(), 0);
        assert_eq!(q.items.lock().pop_front(), None);
    }

    #[test]
    fn test_single_check_flush_race() {
        let q = SingleCheckQueue::new();
        scope(|s| {
            let consumer = s.spawn(|| q.pop());
            eventually(|| q.not_empty.waiters() == 1);

            // push, then flush before the consumer gets the lock back
            let mut items = q.items.lock();
            items.push_back(1);
            q.not_empty.notify_one();
            items.clear();
            drop(items);

            // it didn't look again after the wake-up
            assert_eq!(consumer.join().unwrap(), Err(Error::PoppedEmpty));
        });
    }
}
