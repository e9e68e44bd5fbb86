pub mod error;
pub mod locks;
pub mod queue;
pub mod scenarios;
pub mod spin_lock;

pub use error::Error;
pub use locks::{Condvar, Mutex, MutexGuard, Semaphore};
pub use queue::{ConcurrentQueue, Queue};
pub use spin_lock::SpinLock;
