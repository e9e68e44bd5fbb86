//! # Condition variable
//!
//! The condvar's interface consists of the wait method that unlocks mutex, waits for a signal then locks the mutex.
//! There're usually 2 notification modes:
//! - "notify one" / signal
//! - "notify all" / broadcast
//!
//! ## Mesa semantics
//!
//! A notification is a hint that the condition _may_ hold now, nothing more.
//! Between the notification and the moment the waiter locks the mutex back any other thread may lock it first
//! and change the data (e.g. take the very item the waiter was woken up for).
//! So the waiter has to check its condition again every time [Condvar::wait] returns:
//!
//! ```ignore
//! let mut g = mutex.lock();
//! while !ready(&g) {  // `while`, never `if`
//!     g = condvar.wait(g);
//! }
//! ```
//!
//! [Condvar::wait_while] is the same loop, packaged.
//!
//! The other school (Hoare) hands the lock over to the woken thread directly, in one atomic step.
//! It's a stronger guarantee, but a lot harder to build and it's not what's done here.
//!
//! ## Wait set
//!
//! Every waiter puts a small node with its [Thread] handle into a FIFO queue guarded by a [SpinLock],
//! then unlocks the mutex and parks until a notifier flips the node's flag.
//! - [Condvar::notify_one] pops the oldest node => waiters are woken in the order they started waiting
//! - [Condvar::notify_all] drains the whole queue
//! - nobody waits => notifications are no-ops, nothing is remembered
//!
//! The spin lock is fine here: it's held for a push or a pop, never across the sleep.
//!
//! ## Missed notifications
//!
//! The node is queued while the mutex is still held, so a notifier that changed the data under the mutex
//! finds the node. If the flag is set before we even park, [std::thread::park] returns immediately,
//! as unpark leaves a token for the thread.
//!
//! ## Timeouts
//!
//! On timeout the waiter takes its node out of the queue by itself. If the node isn't there anymore,
//! a notifier was faster and the wake-up counts as a notification.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{Acquire, Release},
        },
        Arc,
    },
    thread::{self, Thread},
    time::{Duration, Instant},
};

use crate::{
    locks::mutex::{Mutex, MutexGuard},
    spin_lock::SpinLock,
};

struct Waiter {
    thread: Thread,
    notified: AtomicBool,
}

struct WaitSet {
    queue: VecDeque<Arc<Waiter>>,
    /// address of the mutex the current waiters came with
    mutex: usize,
}

pub struct Condvar {
    waiters: SpinLock<WaitSet>,
}

/// Whether [Condvar::wait_timeout] gave up waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeoutResult(bool);

impl WaitTimeoutResult {
    pub fn timed_out(&self) -> bool {
        self.0
    }
}

impl Condvar {
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(WaitSet {
                queue: VecDeque::new(),
                mutex: 0,
            }),
        }
    }

    /// Wakes the longest waiting thread, if any
    pub fn notify_one(&self) {
        let waiter = {
            let mut waiters = self.waiters.lock();
            let waiter = waiters.queue.pop_front();
            if let Some(w) = &waiter {
                w.notified.store(true, Release);
            }
            waiter
        };
        // unpark outside of the spin lock, it may be a syscall
        if let Some(w) = waiter {
            w.thread.unpark();
        }
    }

    /// Wakes every thread waiting right now. They all compete for the mutex afterwards.
    pub fn notify_all(&self) {
        let woken: Vec<_> = {
            let mut waiters = self.waiters.lock();
            waiters
                .queue
                .drain(..)
                .inspect(|w| w.notified.store(true, Release))
                .collect()
        };
        for w in woken {
            w.thread.unpark();
        }
    }

    /// - takes and returns a Guard as a proof that the mutex is locked
    /// - the mutex is unlocked while waiting and locked again before returning
    ///
    /// # Panics
    /// - if other threads are waiting on the condvar with another mutex
    pub fn wait<'a, Y>(&self, guard: MutexGuard<'a, Y>) -> MutexGuard<'a, Y> {
        self.wait_until(guard, None).0
    }

    /// Same as [Condvar::wait], but gives up once `timeout` passes.
    /// The mutex is locked again in both cases, and the condition still has to be checked.
    pub fn wait_timeout<'a, Y>(
        &self,
        guard: MutexGuard<'a, Y>,
        timeout: Duration,
    ) -> (MutexGuard<'a, Y>, WaitTimeoutResult) {
        // an unrepresentable deadline is as good as none
        self.wait_until(guard, Instant::now().checked_add(timeout))
    }

    /// Waits for as long as `condition` holds, re-checking it after every wake-up
    pub fn wait_while<'a, Y, F>(
        &self,
        mut guard: MutexGuard<'a, Y>,
        mut condition: F,
    ) -> MutexGuard<'a, Y>
    where
        F: FnMut(&mut Y) -> bool,
    {
        while condition(&mut *guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// How many threads are waiting right now. It may be outdated by the time it's returned.
    pub fn waiters(&self) -> usize {
        self.waiters.lock().queue.len()
    }

    fn wait_until<'a, Y>(
        &self,
        guard: MutexGuard<'a, Y>,
        deadline: Option<Instant>,
    ) -> (MutexGuard<'a, Y>, WaitTimeoutResult) {
        let mutex = guard.mutex;
        let waiter = Arc::new(Waiter {
            thread: thread::current(),
            notified: AtomicBool::new(false),
        });
        // queue up while the mutex is still ours
        self.join(mutex, Arc::clone(&waiter));
        drop(guard);

        let timed_out = loop {
            // park may return spuriously => the flag is the source of truth
            if waiter.notified.load(Acquire) {
                break false;
            }
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now < deadline {
                        thread::park_timeout(deadline - now);
                    } else if self.leave(&waiter) {
                        break true;
                    }
                    // else a notifier popped us already and set the flag under the same spin lock
                }
            }
        };

        if timed_out {
            log::trace!("condvar wait timed out");
        }
        (mutex.lock(), WaitTimeoutResult(timed_out))
    }

    /// Takes the waiter out of the queue, false if a notifier did it already
    fn leave(&self, waiter: &Arc<Waiter>) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.queue.iter().position(|w| Arc::ptr_eq(w, waiter)) {
            Some(i) => {
                waiters.queue.remove(i);
                true
            }
            None => false,
        }
    }

    /// Queues the waiter up, making sure everybody in the queue waits with the same mutex
    fn join<Y>(&self, mutex: &Mutex<Y>, waiter: Arc<Waiter>) {
        let addr = mutex as *const Mutex<Y> as usize;
        let mut waiters = self.waiters.lock();
        if waiters.queue.is_empty() {
            waiters.mutex = addr;
        } else {
            assert_eq!(waiters.mutex, addr, "Condvar used with more than one Mutex");
        }
        waiters.queue.push_back(waiter);
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
