//! # Mutex
//! It's starting at [`SpinLock<Y>`](crate::spin_lock::SpinLock).
//!
//! There's u32 in the state so it works with the wait & wake.
//!
//! Note that wait and wake don't take any part in memory consistency or correctness of the Mutex.
//! They just spare us from wasting processor cycles.
//!
//! ## Avoiding syscalls
//! The wait and wake syscalls are slow (as all syscalls) => the implementation avoids them if possible.
//!
//! `wake_one` is skipped if we know there are no other threads waiting. That's what value `2` of the state is for.
//! If there're no races for the lock, neither syscall is called.
//!
//! The spinlock version is more efficient comparing to syscalls if the time in the waiting loop is short.
//! It's actually a common use-case for Mutex-es, so [Mutex::lock] spins for a bit before going to sleep.
//!
//! ## Reentrancy
//! Locking the mutex again from the thread that holds it would sleep forever.
//! It's a programmer's error, so the mutex remembers its holder and panics instead.

use std::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32, AtomicUsize,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use atomic_wait::{wait, wake_one};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

pub struct Mutex<Y> {
    /// 0 - unlocked
    /// 1 - locked, no other threads
    /// 2 - locked, other threads are waiting
    state: AtomicU32,
    /// token of the holding thread, 0 when unlocked
    owner: AtomicUsize,
    value: UnsafeCell<Y>,
}

/// promise to the compiler that it's safe to share if the underlying value is safe to send
unsafe impl<Y> Sync for Mutex<Y> where Y: Send {}

impl<Y> Mutex<Y> {
    pub const fn new(value: Y) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED), // it's unlocked from the start
            owner: AtomicUsize::new(0),
            value: UnsafeCell::new(value),
        }
    }

    /// # Panics
    /// - if the calling thread already holds the lock
    pub fn lock(&self) -> MutexGuard<'_, Y> {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            // The lock was already locked T_T
            // => do the logic to wait
            self.lock_contended();
        }
        MutexGuard::new(self)
    }

    /// Takes the lock only if it's free right now
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Y>> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .ok()
            .map(|_| MutexGuard::new(self))
    }

    /// The function contains the logic for waiting for the Mutex to unlock:
    /// - spinlock for some cycles
    /// - engage wait syscall if still locked
    #[cold] // means that the function is a fallback of the algo
    fn lock_contended(&self) {
        // only we could have stored our own token, so a stale read can't fool us here
        assert_ne!(
            self.owner.load(Relaxed),
            thread_token(),
            "reentrant Mutex::lock from the thread holding the lock"
        );

        let mut spin_count = 0;

        // spinlock for a hundred cycles
        // use load here, as compare_and_exchange has impact on cache perf
        // only check for 1, as 2 means that the other thread already gave up here
        while self.state.load(Relaxed) == LOCKED && spin_count < 100 {
            spin_count += 1;
            std::hint::spin_loop();
        }

        // try to lock the Mutex
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }

        log::trace!("mutex is contended, going to sleep");
        // the last resort - wait syscall
        // Note that this lock leaves the state as 2 to not lose other potential waiters.
        while self.state.swap(CONTENDED, Acquire) != UNLOCKED {
            wait(&self.state, CONTENDED);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed) != UNLOCKED
    }

    // &mut self is the proof nobody else holds the lock
    pub fn get_mut(&mut self) -> &mut Y {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

impl<Y: Default> Default for Mutex<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

/// Some address unique to the calling thread while it's alive.
/// It's never 0, so 0 stays "nobody".
fn thread_token() -> usize {
    thread_local! {
        static TOKEN: u8 = const { 0 };
    }
    TOKEN.with(|t| t as *const u8 as usize)
}

/// Guard structure to ease ownership and usage
pub struct MutexGuard<'a, Y> {
    pub(crate) mutex: &'a Mutex<Y>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, Y> MutexGuard<'a, Y> {
    // the only way in, so the owner is always recorded
    fn new(mutex: &'a Mutex<Y>) -> Self {
        mutex.owner.store(thread_token(), Relaxed);
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }

    /// Same as dropping the guard, just reads better at the call site
    pub fn unlock(self) {
        drop(self);
    }
}

/// This drop unlocks the mutex. It runs on every way out of the scope, panics included.
/// There're no guarantees that the lock will be obtained by the thread we wake up.
/// Any other thread may be faster.
impl<Y> Drop for MutexGuard<'_, Y> {
    fn drop(&mut self) {
        self.mutex.owner.store(0, Relaxed);
        // wake the thread only if someone switched the state to 2
        if self.mutex.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.mutex.state);
        }
    }
}

/// The guard is only Sync if the underlying data is.
/// It's !Send on purpose: the futex word doesn't care, but the owner token would go stale.
unsafe impl<Y> Sync for MutexGuard<'_, Y> where Y: Sync {}

impl<Y> Deref for MutexGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<Y> DerefMut for MutexGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.value.get() }
    }
}
