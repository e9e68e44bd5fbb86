//! # Scenarios
//!
//! Workloads thrown at the primitives by the demo binary and the tests.
//! The shared state is always passed in explicitly, there're no globals.

use std::{
    thread::{scope, sleep},
    time::{Duration, Instant},
};

use crate::{
    locks::Mutex,
    queue::{flawed::SemaphoreQueue, ConcurrentQueue, Queue, UnguardedCounter},
    spin_lock::SpinLock,
    Error,
};

/// How many threads and how much work each of them does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub threads: usize,
    pub iterations: usize,
}

impl Workload {
    /// What all the threads do together, overflows are on the caller
    pub fn total(&self) -> usize {
        self.threads * self.iterations
    }
}

/// 100 threads x 500 items
impl Default for Workload {
    fn default() -> Self {
        Self {
            threads: 100,
            iterations: 500,
        }
    }
}

/// Every thread increments the counter through `increment` `iterations` times
fn count_with(workload: Workload, increment: impl Fn() + Sync) {
    scope(|s| {
        for _ in 0..workload.threads {
            s.spawn(|| {
                for _ in 0..workload.iterations {
                    increment();
                }
            });
        }
    });
}

/// Load + store, expect lost updates
pub fn count_unguarded(workload: Workload) -> u64 {
    let counter = UnguardedCounter::new();
    count_with(workload, || counter.increment());
    counter.get()
}

pub fn count_with_spin_lock(workload: Workload) -> u64 {
    let counter = SpinLock::new(0u64);
    count_with(workload, || *counter.lock() += 1);
    counter.into_inner()
}

pub fn count_with_mutex(workload: Workload) -> u64 {
    let counter = Mutex::new(0u64);
    count_with(workload, || *counter.lock() += 1);
    counter.into_inner()
}

/// Every thread pushes `0..iterations` into the queue, returns its length afterwards
pub fn fill(queue: &impl Queue<u64>, workload: Workload) -> usize {
    scope(|s| {
        for _ in 0..workload.threads {
            s.spawn(|| {
                for i in 0..workload.iterations {
                    queue.push(i as u64);
                }
            });
        }
    });
    queue.len()
}

/// `workload.threads` producers push through the queue to `consumers` blocking consumers.
/// Returns everything the consumers got, in no particular order.
///
/// # Panics
/// - if there're no consumers
/// - if the total can't be split between the consumers evenly
pub fn transfer(queue: &ConcurrentQueue<u64>, workload: Workload, consumers: usize) -> Vec<u64> {
    assert!(consumers > 0, "no consumers to transfer items to");
    assert_eq!(
        workload.total() % consumers,
        0,
        "items can't be split between consumers evenly"
    );
    let share = workload.total() / consumers;
    scope(|s| {
        for p in 0..workload.threads {
            s.spawn(move || {
                for i in 0..workload.iterations {
                    queue.push((p * workload.iterations + i) as u64);
                }
            });
        }
        let mut handles = Vec::with_capacity(consumers);
        for _ in 0..consumers {
            handles.push(s.spawn(move || (0..share).map(|_| queue.pop()).collect::<Vec<_>>()));
        }
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    })
}

/// One consumer blocks on the semaphore queue, then a push and a flush race for it,
/// one more push follows the flush. Returns what the consumer got:
/// - `Ok(1)` - it was faster than the flush
/// - [Error::PoppedEmpty] - it took the unit, the flush took the item
/// - `Ok(2)` - the flush drained the unit before the consumer woke up, it'd sleep forever without the 2nd push
pub fn semaphore_flush_race() -> Result<u64, Error> {
    let queue = SemaphoreQueue::new();
    scope(|s| {
        let consumer = s.spawn(|| queue.pop());
        // let it fall asleep
        sleep(Duration::from_millis(50));
        queue.push(1);
        queue.flush();
        sleep(Duration::from_millis(50));
        queue.push(2);
        consumer.join().unwrap()
    })
}

/// Same as [semaphore_flush_race] with the condvar queue, plus one more push after the flush.
/// The consumer gets either the 1st item (it was faster than the flush) or the 2nd one (it slept through
/// the flush), never nothing. Returns the item and how long it took.
pub fn concurrent_flush_race() -> (u64, Duration) {
    let queue = ConcurrentQueue::new();
    let start = Instant::now();
    scope(|s| {
        let consumer = s.spawn(|| queue.pop());
        sleep(Duration::from_millis(50));
        queue.push(1);
        queue.flush();
        sleep(Duration::from_millis(50));
        queue.push(2);
        (consumer.join().unwrap(), start.elapsed())
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::queue::UnguardedQueue;

    const TRIALS: usize = 10;

    #[test]
    fn test_lost_updates() {
        let workload = Workload {
            threads: 16,
            iterations: 1_000,
        };
        // the guarded ones never lose an update
        for _ in 0..3 {
            assert_eq!(count_with_mutex(workload), 16_000);
            assert_eq!(count_with_spin_lock(workload), 16_000);
        }
        // the unguarded one loses some at least once
        assert!((0..TRIALS).any(|_| count_unguarded(workload) < 16_000));
    }

    #[test]
    fn test_exact_count_for_any_shape() {
        for (threads, iterations) in [(1, 1), (1, 100), (7, 13), (32, 1)] {
            let workload = Workload {
                threads,
                iterations,
            };
            assert_eq!(count_with_mutex(workload), workload.total() as u64);
        }
    }

    #[test]
    fn test_hundred_producers() {
        let workload = Workload::default();
        assert_eq!(workload.total(), 50_000);

        for _ in 0..TRIALS {
            let queue = ConcurrentQueue::new();
            assert_eq!(fill(&queue, workload), 50_000);
        }

        let lost = (0..TRIALS)
            .map(|_| fill(&UnguardedQueue::with_capacity(workload.total()), workload))
            .filter(|len| *len < 50_000)
            .count();
        assert!(lost > 0);
    }

    #[test]
    fn test_transfer_conservation() {
        let workload = Workload {
            threads: 10,
            iterations: 1_000,
        };
        let queue = ConcurrentQueue::new();
        let mut items = transfer(&queue, workload, 5);
        items.sort_unstable();
        assert_eq!(items, (0..10_000).collect::<Vec<u64>>());
        assert!(queue.is_empty());
    }

    #[test]
    #[should_panic(expected = "no consumers")]
    fn test_transfer_without_consumers() {
        transfer(&ConcurrentQueue::new(), Workload::default(), 0);
    }

    #[test]
    fn test_flush_races() {
        // who wins is up to the scheduler, but the outcomes are limited
        for _ in 0..TRIALS {
            let got = semaphore_flush_race();
            assert!(
                got == Ok(1) || got == Err(Error::PoppedEmpty) || got == Ok(2),
                "{got:?}"
            );

            let (value, elapsed) = concurrent_flush_race();
            assert!(value == 1 || value == 2);
            assert!(elapsed >= Duration::from_millis(100));
        }
    }
}
