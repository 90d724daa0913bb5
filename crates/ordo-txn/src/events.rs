//! Structured protocol events.
//!
//! The core reports what it does through an [`EventSink`] rather than by
//! formatting log lines itself. [`TracingSink`] forwards events to `tracing`;
//! [`RecordingSink`] keeps them in memory for tests and reports.

use std::fmt;

use ordo_common::{Timestamp, TxnId};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

/// Who initiated an abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortKind {
    /// The transaction gave up on its own: wait-die "die", wait timeout,
    /// lost lock, or a holder that kept vanishing.
    SelfInitiated,
    /// The deadlock detector chose it as victim.
    Forced,
}

impl fmt::Display for AbortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortKind::SelfInitiated => write!(f, "self"),
            AbortKind::Forced => write!(f, "forced"),
        }
    }
}

/// An event emitted by a transaction or the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnEvent {
    /// A transaction started an attempt.
    Started {
        /// The transaction.
        txn: TxnId,
        /// 1-based attempt number.
        attempt: u32,
        /// Timestamp for this attempt.
        timestamp: Timestamp,
    },
    /// A low-level acquisition is about to be tried.
    LockAttempted {
        /// The requester.
        txn: TxnId,
        /// The resource.
        resource: String,
    },
    /// The resource is now held.
    LockAcquired {
        /// The new holder.
        txn: TxnId,
        /// The resource.
        resource: String,
        /// True if it was acquired by polling while `Waiting`.
        after_wait: bool,
    },
    /// Older requester started waiting for a younger holder.
    EnteredWaiting {
        /// The waiter.
        txn: TxnId,
        /// The resource.
        resource: String,
        /// The holder being waited for.
        holder: TxnId,
    },
    /// Younger (or equal) requester aborted itself.
    Died {
        /// The requester.
        txn: TxnId,
        /// The resource.
        resource: String,
        /// The older holder.
        holder: TxnId,
    },
    /// The wait budget ran out.
    TimedOut {
        /// The waiter.
        txn: TxnId,
        /// The resource.
        resource: String,
    },
    /// The current attempt was abandoned.
    Aborted {
        /// The transaction.
        txn: TxnId,
        /// Who initiated it.
        kind: AbortKind,
    },
    /// A new attempt is scheduled with a fresh timestamp.
    Retried {
        /// The transaction.
        txn: TxnId,
        /// The upcoming attempt number.
        attempt: u32,
        /// Its new timestamp.
        timestamp: Timestamp,
    },
    /// Terminal success.
    Committed {
        /// The transaction.
        txn: TxnId,
        /// Attempts used.
        attempts: u32,
    },
    /// Terminal failure.
    Failed {
        /// The transaction.
        txn: TxnId,
        /// Attempts used.
        attempts: u32,
    },
    /// The detector broke a cycle.
    DeadlockResolved {
        /// Cycle members, sorted.
        members: Vec<TxnId>,
        /// The aborted victim.
        victim: TxnId,
    },
}

impl TxnEvent {
    /// Returns the transaction the event is about (the victim, for
    /// [`TxnEvent::DeadlockResolved`]).
    pub fn txn(&self) -> TxnId {
        match self {
            TxnEvent::Started { txn, .. }
            | TxnEvent::LockAttempted { txn, .. }
            | TxnEvent::LockAcquired { txn, .. }
            | TxnEvent::EnteredWaiting { txn, .. }
            | TxnEvent::Died { txn, .. }
            | TxnEvent::TimedOut { txn, .. }
            | TxnEvent::Aborted { txn, .. }
            | TxnEvent::Retried { txn, .. }
            | TxnEvent::Committed { txn, .. }
            | TxnEvent::Failed { txn, .. } => *txn,
            TxnEvent::DeadlockResolved { victim, .. } => *victim,
        }
    }
}

/// Receives protocol events. Implementations must be cheap and non-blocking;
/// they are called from inside transaction threads.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn emit(&self, event: TxnEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: TxnEvent) {}
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TxnEvent) {
        match event {
            TxnEvent::Started {
                txn,
                attempt,
                timestamp,
            } => info!(%txn, attempt, ts = %timestamp, "starting"),
            TxnEvent::LockAttempted { txn, resource } => {
                trace!(%txn, %resource, "trying lock")
            }
            TxnEvent::LockAcquired {
                txn,
                resource,
                after_wait,
            } => debug!(%txn, %resource, after_wait, "acquired"),
            TxnEvent::EnteredWaiting {
                txn,
                resource,
                holder,
            } => info!(%txn, %resource, %holder, "waiting"),
            TxnEvent::Died {
                txn,
                resource,
                holder,
            } => info!(%txn, %resource, %holder, "died"),
            TxnEvent::TimedOut { txn, resource } => warn!(%txn, %resource, "wait timed out"),
            TxnEvent::Aborted { txn, kind } => info!(%txn, %kind, "aborted"),
            TxnEvent::Retried {
                txn,
                attempt,
                timestamp,
            } => info!(%txn, attempt, ts = %timestamp, "restarting"),
            TxnEvent::Committed { txn, attempts } => info!(%txn, attempts, "committed"),
            TxnEvent::Failed { txn, attempts } => warn!(%txn, attempts, "failed"),
            TxnEvent::DeadlockResolved { members, victim } => {
                warn!(?members, %victim, "deadlock resolved")
            }
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TxnEvent>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    pub fn events(&self) -> Vec<TxnEvent> {
        self.events.lock().clone()
    }

    /// Returns the events concerning `txn`.
    pub fn events_for(&self, txn: TxnId) -> Vec<TxnEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.txn() == txn)
            .cloned()
            .collect()
    }

    /// Counts the recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&TxnEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Drops every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: TxnEvent) {
        self.events.lock().push(event);
    }
}
