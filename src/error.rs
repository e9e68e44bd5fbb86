//! Errors of the library.
//!
//! Only faults live here. Finding nothing in a queue or running out of time is an ordinary outcome
//! and is reported as `None` / `false` by the respective methods.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// More permits were released than the semaphore may hold
    #[error("semaphore released past its limit of {limit} permits")]
    SemaphoreOverflow { limit: usize },
    /// A consumer was let through but the backing sequence was already empty
    #[error("popped from an empty backing sequence")]
    PoppedEmpty,
}
