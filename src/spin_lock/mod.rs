/*
 * It's not practical to send thread to sleep on lock if
 * the lock is held for brief moments of time.
 * It's better to spin on the lock and leave the thread awake in this case.
 *
 * The flip side: nobody is in the queue, so a thread may spin forever
 * while luckier threads grab the lock over and over (no fairness).
 * It's the baseline to compare the blocking primitives in crate::locks to.
 */

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
};

const FREE: u32 = 0;
const HELD: u32 = 1;

// our spinlock implementation
pub struct SpinLock<Y> {
    state: AtomicU32, // FREE or HELD, nobody tracks who's holding it
    value: UnsafeCell<Y>,
}
// UnsafeCell makes the above definition !Sync => we can't share it between threads
// We promise to the compiler that our type is Sync as long as Y is Send
unsafe impl<Y> Sync for SpinLock<Y> where Y: Send {}

impl<Y> SpinLock<Y> {
    pub const fn new(value: Y) -> Self {
        Self {
            state: AtomicU32::new(FREE),
            value: UnsafeCell::new(value),
        }
    }

    /// Spins until the state flips from FREE to HELD by our hands.
    ///
    /// Calling it again from the holder never returns.
    pub fn lock(&self) -> Guard<'_, Y> {
        // Acquire makes sure the previous lock owner has happens-before with the current one
        while self
            .state
            .compare_exchange_weak(FREE, HELD, Acquire, Relaxed)
            .is_err()
        {
            // only read while it's held, CAS-ing all the time hammers the cache line
            while self.state.load(Relaxed) == HELD {
                std::hint::spin_loop(); // give a hint to CPU that this loop is waiting
            }
        }
        Guard { lock: self } // it can't be made by any other means
    }

    /// One attempt, no spinning
    pub fn try_lock(&self) -> Option<Guard<'_, Y>> {
        self.state
            .compare_exchange(FREE, HELD, Acquire, Relaxed)
            .ok()
            .map(|_| Guard { lock: self })
    }

    /// # Safety
    /// The lock must be held and every reference obtained through its guard must be gone,
    /// which in practice means the guard was [std::mem::forget]-ed.
    /// Dropping the guard is the safe way to do the same.
    pub unsafe fn unlock(&self) {
        self.state.store(FREE, Release);
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed) == HELD
    }

    // &mut self is the proof nobody else can lock
    pub fn get_mut(&mut self) -> &mut Y {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

impl<Y: Default> Default for SpinLock<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

// a guard to Deref like &mut and Drop like .unlock()
pub struct Guard<'a, Y> {
    lock: &'a SpinLock<Y>,
}

impl<Y> Deref for Guard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: existence of the guard is caused by locking its lock
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y> DerefMut for Guard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: existence of the guard is caused by locking its lock
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<Y> Drop for Guard<'_, Y> {
    fn drop(&mut self) {
        self.lock.state.store(FREE, Release);
    }
}
