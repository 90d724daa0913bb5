//! Process-wide monotonic timestamp source.
//!
//! Every transaction timestamp in a [`SharedContext`](crate::SharedContext)
//! comes from one `Clock`. Issued values are unique and strictly increasing,
//! including across restarts, so a restarted transaction is always younger
//! than every transaction that started before its restart.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use ordo_common::Timestamp;

/// A monotonic logical clock.
pub struct Clock {
    next: AtomicU64,
}

impl Clock {
    /// Creates a clock whose first timestamp is zero.
    pub fn new() -> Self {
        Self::starting_at(Timestamp::ZERO)
    }

    /// Creates a clock whose first timestamp is `start`.
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            next: AtomicU64::new(start.as_u64()),
        }
    }

    /// Issues a new timestamp, greater than every previously issued one.
    pub fn now(&self) -> Timestamp {
        Timestamp::new(self.next.fetch_add(1, AtomicOrdering::SeqCst))
    }

    /// Returns the timestamp the next call to [`now`](Self::now) would issue.
    pub fn peek(&self) -> Timestamp {
        Timestamp::new(self.next.load(AtomicOrdering::SeqCst))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock").field("next", &self.peek()).finish()
    }
}
