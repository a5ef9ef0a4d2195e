//! Lock-free sequence counter for frame numbering.
//!
//! Every frame a publisher emits carries a sequence number.  Consumers use it
//! to spot frames the transport shed (gaps) and to discard replays
//! (duplicates).  A publisher must therefore never hand out the same number
//! twice, even when a frame is dropped after its number was assigned.
//!
//! The counter is an `AtomicU64`, so the capture path and any diagnostic
//! reader can share it without a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter.
///
/// Starts at the value given to [`SequenceCounter::starting_at`] (0 by
/// default) and wraps at `u64::MAX` without panicking.
///
/// # Examples
///
/// ```rust
/// use framelink_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first [`next`](Self::next) returns `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            inner: AtomicU64::new(first),
        }
    }

    /// Returns the next sequence number and advances the counter.
    ///
    /// `Relaxed` is enough: the value orders frames, it does not publish
    /// memory to other threads.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`next`](Self::next) will yield.
    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
