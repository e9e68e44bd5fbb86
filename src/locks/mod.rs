//! # Blocking locks
//!
//! The target: mutex, condvar, semaphore that put waiting threads to sleep instead of spinning.
//! As the OS-specific tools vary OS to OS, we rely on the most common futex's wait and wake
//! through the [atomic-wait](https://crates.io/crates/atomic-wait) crate. There're just 3 functions:
//! - `wait(&AtomicU32, u32)` - waits until woken up, blocks only if the atomic variable has the specified value, may wake up spuriously
//! - `wake_one(&AtomicU32)` - wakes a single thread that waits on the same atomic variable
//! - `wake_all(&AtomicU32)` - wakes all the threads waiting on the atomic variable
//!
//! Futex-es don't do timeouts through that crate, so the [Condvar] parks its waiters with
//! [std::thread::park_timeout] instead and keeps them in a queue of its own.
//!
//! The pieces build on each other:
//! - [Mutex] - the futex word plus the data
//! - [Condvar] - a FIFO wait set coupled to a [Mutex]
//! - [Semaphore] - a [Mutex]-guarded counter plus a [Condvar] to sleep on while it's 0

pub mod condvar;
pub mod mutex;
pub mod semaphore;

pub use condvar::{Condvar, WaitTimeoutResult};
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{Permit, Semaphore};
