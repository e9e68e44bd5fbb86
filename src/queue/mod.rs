//! # Queues
//!
//! A FIFO queue shared between producers and consumers. All the flavours here implement [Queue],
//! so the same workload can be thrown at each of them and the results compared:
//! - [ConcurrentQueue] - the real deal: [Mutex](crate::locks::Mutex) + [Condvar](crate::locks::Condvar)
//! - [UnguardedQueue] - no lock at all, loses items under concurrent pushes
//! - [flawed::SemaphoreQueue] and [flawed::SingleCheckQueue] - locked, but with a race left open between
//!   a woken consumer and [ConcurrentQueue::flush]-like operations
//!
//! The blocking pop isn't part of [Queue], as the unguarded baseline has nothing to sleep on.

pub mod concurrent;
pub mod flawed;
pub mod unguarded;

pub use concurrent::ConcurrentQueue;
pub use unguarded::{UnguardedCounter, UnguardedQueue};

/// The shared part of all the queues
pub trait Queue<Y>: Sync {
    /// Appends to the tail
    fn push(&self, value: Y);

    /// Takes the head if there's one, never blocks
    fn try_pop(&self) -> Option<Y>;

    /// A snapshot, the queue may change right after
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
