/*
 * A blocking FIFO queue of VecDeque + Mutex + Condvar.
 * - push appends and notifies one waiting consumer
 * - pop sleeps while the queue is empty, re-checking it on every wake-up
 * - flush drops everything in one go
 *
 * The items are only ever touched with the mutex locked, and the emptiness check
 * of a woken consumer happens under the same mutex flush uses.
 * => a consumer can't be woken by a push, lose the item to a flush, and then take a head that isn't there:
 *    it sees the empty queue and goes back to sleep.
 *
 * There's no counter next to the VecDeque to keep in sync (unlike the semaphore flavour in super::flawed),
 * its len() is the only source of truth.
 *
 * Flaws, still:
 * - receivers compete for the lock though they pull different items
 * - which of several sleeping consumers gets an item is up to the Condvar (FIFO here)
 *   and to whoever locks the mutex first after the wake-up
 */

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use crate::{
    locks::{Condvar, Mutex},
    queue::Queue,
};

pub struct ConcurrentQueue<Y> {
    items: Mutex<VecDeque<Y>>,
    not_empty: Condvar,
    // only used by the bounded flavour
    not_full: Condvar,
    capacity: Option<usize>,
}

impl<Y> ConcurrentQueue<Y> {
    /// The unbounded flavour, push never waits
    pub const fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: None,
        }
    }

    /// The bounded flavour, push waits while there're `capacity` items
    ///
    /// # Panics
    /// - if `capacity` is 0, nothing could ever be pushed
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "a bounded queue needs room for at least 1 item");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    // push message to the end of the queue
    pub fn push(&self, value: Y) {
        let mut items = self.items.lock();
        if let Some(capacity) = self.capacity {
            items = self.not_full.wait_while(items, |items| items.len() >= capacity);
        }
        items.push_back(value);
        self.not_empty.notify_one();
    }

    /// Pushes only if there's room right now, the value is handed back otherwise.
    /// The unbounded queue always has room.
    pub fn try_push(&self, value: Y) -> Result<(), Y> {
        let mut items = self.items.lock();
        if self.is_full(&items) {
            return Err(value);
        }
        items.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    // take one message from the queue, sleep until there's one
    pub fn pop(&self) -> Y {
        let mut items = self.items.lock();
        loop {
            if let Some(value) = items.pop_front() {
                self.popped();
                return value;
            }
            // a wake-up is a hint => back to the check above
            items = self.not_empty.wait(items);
        }
    }

    pub fn try_pop(&self) -> Option<Y> {
        let value = self.items.lock().pop_front();
        if value.is_some() {
            self.popped();
        }
        value
    }

    /// Same as [ConcurrentQueue::pop], but gives up after `timeout`.
    ///
    /// The timeout is one more wake-up: the queue is checked again with the mutex locked,
    /// and it's only `None` if it's still empty.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Y> {
        let deadline = Instant::now().checked_add(timeout);
        let mut items = self.items.lock();
        loop {
            if let Some(value) = items.pop_front() {
                self.popped();
                return Some(value);
            }
            match deadline {
                None => items = self.not_empty.wait(items),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::trace!("pop timed out after {timeout:?}");
                        return None;
                    }
                    items = self.not_empty.wait_timeout(items, deadline - now).0;
                }
            }
        }
    }

    /// Drops everything queued, returns how many items there were.
    /// Sleeping consumers aren't woken, there's nothing for them.
    pub fn flush(&self) -> usize {
        let flushed = {
            let mut items = self.items.lock();
            let flushed = items.len();
            items.clear();
            if self.capacity.is_some() && flushed > 0 {
                // room for everybody waiting to push
                self.not_full.notify_all();
            }
            flushed
        };
        log::trace!("flushed {flushed} items");
        flushed
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Consumers sleeping in pop right now
    pub fn waiters(&self) -> usize {
        self.not_empty.waiters()
    }

    fn is_full(&self, items: &VecDeque<Y>) -> bool {
        self.capacity.is_some_and(|capacity| items.len() >= capacity)
    }

    // there's room for one more push now
    fn popped(&self) {
        if self.capacity.is_some() {
            self.not_full.notify_one();
        }
    }
}

impl<Y> Default for ConcurrentQueue<Y> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Y: Send> Queue<Y> for ConcurrentQueue<Y> {
    fn push(&self, value: Y) {
        ConcurrentQueue::push(self, value)
    }

    fn try_pop(&self) -> Option<Y> {
        ConcurrentQueue::try_pop(self)
    }

    fn len(&self) -> usize {
        ConcurrentQueue::len(self)
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed},
        thread::{scope, sleep},
    };

    use super::*;

    fn eventually(f: impl Fn() -> bool) {
        while !f() {
            sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_fifo() {
        let q = ConcurrentQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), 1);
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Some(3));
        assert_eq!(q.try_pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_pop_waits_for_push() {
        let q = ConcurrentQueue::new();
        scope(|s| {
            let consumer = s.spawn(|| q.pop());
            eventually(|| q.waiters() == 1);
            q.push("hey!");
            assert_eq!(consumer.join().unwrap(), "hey!");
        });
    }

    #[test]
    fn test_conservation() {
        const PRODUCERS: usize = 8;
        const CONSUMERS: usize = 4;
        const ITEMS: usize = 2_000;

        let q = ConcurrentQueue::new();
        let mut popped: Vec<usize> = scope(|s| {
            for p in 0..PRODUCERS {
                let q = &q;
                s.spawn(move || {
                    for i in 0..ITEMS {
                        q.push(p * ITEMS + i);
                    }
                });
            }
            let mut consumers = Vec::new();
            for _ in 0..CONSUMERS {
                consumers.push(s.spawn(|| {
                    (0..PRODUCERS * ITEMS / CONSUMERS)
                        .map(|_| q.pop())
                        .collect::<Vec<_>>()
                }));
            }
            consumers
                .into_iter()
                .flat_map(|c| c.join().unwrap())
                .collect()
        });

        // every item exactly once
        popped.sort_unstable();
        assert_eq!(popped, (0..PRODUCERS * ITEMS).collect::<Vec<_>>());
        assert!(q.is_empty());
    }

    #[test]
    fn test_woken_consumer_survives_flush() {
        let q = ConcurrentQueue::new();
        let done = AtomicBool::new(false);
        scope(|s| {
            let consumer = s.spawn(|| {
                let value = q.pop();
                done.store(true, Relaxed);
                value
            });
            eventually(|| q.waiters() == 1);

            // push and flush without letting go of the lock in-between:
            // the consumer is woken up, but it can only look at the queue after the flush
            let mut items = q.items.lock();
            items.push_back(1);
            q.not_empty.notify_one();
            assert_eq!(q.waiters(), 0);
            items.clear();
            drop(items);

            // it found nothing and went back to sleep
            eventually(|| q.waiters() == 1);
            assert!(!done.load(Relaxed));

            q.push(2);
            assert_eq!(consumer.join().unwrap(), 2);
        });
    }

    #[test]
    fn test_flush_under_load() {
        // items either come out of a pop or are counted by a flush, nothing else
        const PRODUCERS: usize = 4;
        const ITEMS: usize = 5_000;

        let q = ConcurrentQueue::new();
        let popped = AtomicUsize::new(0);
        let flushed = AtomicUsize::new(0);
        let producing = AtomicUsize::new(PRODUCERS);

        scope(|s| {
            for _ in 0..PRODUCERS {
                s.spawn(|| {
                    for i in 0..ITEMS {
                        q.push(i);
                    }
                    producing.fetch_sub(1, Relaxed);
                });
            }
            for _ in 0..4 {
                s.spawn(|| {
                    while producing.load(Relaxed) > 0 || !q.is_empty() {
                        if q.pop_timeout(Duration::from_millis(5)).is_some() {
                            popped.fetch_add(1, Relaxed);
                        }
                    }
                });
            }
            s.spawn(|| {
                while producing.load(Relaxed) > 0 {
                    flushed.fetch_add(q.flush(), Relaxed);
                    sleep(Duration::from_micros(100));
                }
            });
        });

        flushed.fetch_add(q.flush(), Relaxed);
        assert_eq!(
            popped.load(Relaxed) + flushed.load(Relaxed),
            PRODUCERS * ITEMS
        );
    }

    #[test]
    fn test_pop_timeout_on_empty_queue() {
        let q = ConcurrentQueue::<u32>::new();
        let start = Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(100)), None);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(q.is_empty());
        assert_eq!(q.waiters(), 0);
    }

    #[test]
    fn test_pop_timeout_gets_late_push() {
        let q = ConcurrentQueue::new();
        scope(|s| {
            s.spawn(|| {
                eventually(|| q.waiters() == 1);
                q.push(42);
            });
            assert_eq!(q.pop_timeout(Duration::from_secs(10)), Some(42));
        });
    }

    #[test]
    fn test_bounded() {
        let q = ConcurrentQueue::bounded(2);
        assert_eq!(q.capacity(), Some(2));
        q.push(1);
        assert_eq!(q.try_push(2), Ok(()));
        assert_eq!(q.try_push(3), Err(3));

        scope(|s| {
            let producer = s.spawn(|| q.push(3));
            // it's full => the producer has to wait for the pop
            sleep(Duration::from_millis(50));
            assert!(!producer.is_finished());
            assert_eq!(q.pop(), 1);
            producer.join().unwrap();
        });
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), 2);
        assert_eq!(q.pop(), 3);
    }

    #[test]
    fn test_flush_makes_room_in_bounded_queue() {
        let q = ConcurrentQueue::bounded(1);
        q.push(0);
        scope(|s| {
            let first = s.spawn(|| q.push(1));
            let second = s.spawn(|| q.push(2));
            eventually(|| q.not_full.waiters() == 2);
            assert_eq!(q.flush(), 1);
            // one of them gets in, the other one waits for the pop
            assert!(q.pop() > 0);
            first.join().unwrap();
            second.join().unwrap();
        });
        assert_eq!(q.len(), 1);
    }

    #[test]
    #[should_panic(expected = "at least 1 item")]
    fn test_zero_capacity_panics() {
        let _ = ConcurrentQueue::<()>::bounded(0);
    }
}
