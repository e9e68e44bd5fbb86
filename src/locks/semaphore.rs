//! # Counting semaphore
//!
//! A counter of free units of some resource:
//! - acquire (wait / P) - take a unit, sleep while there's none
//! - release (signal / V) - give a unit back, wake one sleeper
//!
//! The check "is there a unit?" and the decrement have to be one step.
//! Polling the counter and decrementing it afterwards lets another acquirer squeeze in-between,
//! and it burns the CPU while polling. So the counter lives in a [Mutex] and sleepers wait on a [Condvar].
//! The counter is unsigned and is only ever decremented when it's positive => it can't go below 0.
//!
//! A binary semaphore is the one limited to {0, 1}. It's a mutex with inverted polarity
//! (1 = free, 0 = held), see [Semaphore::binary] and [Semaphore::access].
//!
//! ## Overflow
//! Releasing more than the semaphore may hold means somebody lost count.
//! It's never wrapped or saturated silently: [Semaphore::try_release] reports [Error::SemaphoreOverflow]
//! and [Semaphore::release] panics with it.

use std::time::{Duration, Instant};

use crate::{
    error::Error,
    locks::{condvar::Condvar, mutex::Mutex},
};

pub struct Semaphore {
    pub(crate) permits: Mutex<usize>,
    pub(crate) available: Condvar,
    limit: usize,
}

impl Semaphore {
    /// Starts with `permits` free units and no limit but the integer's own
    pub const fn new(permits: usize) -> Self {
        Self::with_limit(permits, usize::MAX)
    }

    /// # Panics
    /// - if `permits` is over the `limit`
    pub const fn with_limit(permits: usize, limit: usize) -> Self {
        assert!(permits <= limit, "more permits than the limit allows");
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
            limit,
        }
    }

    /// The {0, 1} flavour, `available` says whether the single unit is free from the start
    pub const fn binary(available: bool) -> Self {
        Self::with_limit(available as usize, 1)
    }

    /// Sleeps until there's a free unit and takes it
    pub fn acquire(&self) {
        let mut permits = self.available.wait_while(self.permits.lock(), |p| *p == 0);
        *permits -= 1;
    }

    /// Takes a unit only if there's one right now
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Same as [Semaphore::acquire], but gives up after `timeout`.
    /// The counter is checked once more after the time is out, so a late unit is still taken.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut permits = self.permits.lock();
        while *permits == 0 {
            let left = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) if !left.is_zero() => left,
                    _ => return false,
                },
                None => {
                    permits = self.available.wait(permits);
                    continue;
                }
            };
            permits = self.available.wait_timeout(permits, left).0;
        }
        *permits -= 1;
        true
    }

    /// Gives a unit back and wakes one of the sleepers, never blocks for long
    ///
    /// # Panics
    /// - if the semaphore is already full, see [Semaphore::try_release]
    pub fn release(&self) {
        if let Err(e) = self.try_release() {
            panic!("{e}");
        }
    }

    pub fn try_release(&self) -> Result<(), Error> {
        let mut permits = self.permits.lock();
        if *permits >= self.limit {
            log::warn!("semaphore is full, {} permits", self.limit);
            return Err(Error::SemaphoreOverflow { limit: self.limit });
        }
        *permits += 1;
        self.available.notify_one();
        Ok(())
    }

    /// Acquires a unit and hands out a permit that releases it on drop
    pub fn access(&self) -> Permit<'_> {
        self.acquire();
        Permit { semaphore: self }
    }

    /// Free units right now, it's outdated as soon as it's returned
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }

    /// Threads sleeping in acquire right now
    pub fn waiters(&self) -> usize {
        self.available.waiters()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// An acquired unit of a [Semaphore]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // the unit was taken by this permit => there's always room for it
        self.semaphore.release();
    }
}
