//! Pure protocol logic.
//!
//! Nothing here touches threads, locks, or clocks, so every rule can be
//! tested directly:
//!
//! - [`wait_die`]: the contention decision
//! - [`TxnMachine`]: the lifecycle state machine with its attempt budget
//! - [`select_victim`]: the detector's choice of whom to abort

use std::fmt;

use ordo_common::{OrdoError, OrdoResult, Timestamp, TxnId, TxnStatus};

/// Outcome of the wait-die rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Requester is strictly older: wait for the holder.
    Wait,
    /// Requester is the same age or younger: abort itself.
    Die,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Wait => write!(f, "wait"),
            Decision::Die => write!(f, "die"),
        }
    }
}

/// Decides how a requester reacts to a resource held by someone else.
///
/// Older transactions wait for younger ones; younger (or equal) ones die.
/// Waits therefore only ever point from older to younger, which is what
/// keeps wait-die free of cycles when every decision sees fresh timestamps.
pub fn wait_die(requester: Timestamp, holder: Timestamp) -> Decision {
    if requester.is_older_than(holder) {
        Decision::Wait
    } else {
        Decision::Die
    }
}

/// Picks the youngest cycle member (greatest timestamp) as the victim.
///
/// Ties cannot happen with a single clock; if they do, the larger id wins so
/// the choice is still deterministic.
pub fn select_victim(candidates: impl IntoIterator<Item = (TxnId, Timestamp)>) -> Option<TxnId> {
    candidates
        .into_iter()
        .max_by_key(|&(id, ts)| (ts, id))
        .map(|(id, _)| id)
}

/// What to do after an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempts remain.
    Restart,
    /// The budget is spent.
    GiveUp,
}

/// The transaction lifecycle with its attempt counter.
///
/// Every mutation goes through [`TxnStatus::can_transition_to`]; an illegal
/// move is reported as [`OrdoError::InvalidTransition`] and leaves the state
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnMachine {
    status: TxnStatus,
    attempts: u32,
    max_attempts: u32,
}

impl TxnMachine {
    /// Creates an `Active` machine that has not started an attempt.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            status: TxnStatus::Active,
            attempts: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Current status.
    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true if another attempt may be started after this one fails.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    fn transition(&mut self, to: TxnStatus) -> OrdoResult<TxnStatus> {
        if !self.status.can_transition_to(to) {
            return Err(OrdoError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(to)
    }

    /// Starts the next attempt. The machine must be `Active`.
    pub fn begin_attempt(&mut self) -> OrdoResult<u32> {
        if self.status != TxnStatus::Active {
            return Err(OrdoError::InvalidTransition {
                from: self.status,
                to: TxnStatus::Active,
            });
        }
        if self.attempts >= self.max_attempts {
            return Err(OrdoError::internal("attempt budget already spent"));
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    /// `Active -> Waiting`.
    pub fn wait(&mut self) -> OrdoResult<TxnStatus> {
        self.transition(TxnStatus::Waiting)
    }

    /// `Waiting -> Active`, after polling acquired the resource.
    pub fn resume(&mut self) -> OrdoResult<TxnStatus> {
        self.transition(TxnStatus::Active)
    }

    /// `Active | Waiting -> Aborted`. Idempotent once aborted.
    pub fn abort(&mut self) -> OrdoResult<TxnStatus> {
        if self.status == TxnStatus::Aborted {
            return Ok(self.status);
        }
        self.transition(TxnStatus::Aborted)
    }

    /// `Active -> Committed`.
    pub fn commit(&mut self) -> OrdoResult<TxnStatus> {
        self.transition(TxnStatus::Committed)
    }

    /// Aborts the current attempt and reports whether to try again.
    pub fn attempt_failed(&mut self) -> OrdoResult<RetryDecision> {
        self.abort()?;
        if self.has_attempts_left() {
            Ok(RetryDecision::Restart)
        } else {
            Ok(RetryDecision::GiveUp)
        }
    }

    /// `Aborted -> Active`, for the next attempt.
    pub fn restart(&mut self) -> OrdoResult<TxnStatus> {
        if !self.has_attempts_left() {
            return Err(OrdoError::InvalidTransition {
                from: self.status,
                to: TxnStatus::Active,
            });
        }
        self.transition(TxnStatus::Active)
    }

    /// `Aborted -> Failed`.
    pub fn fail(&mut self) -> OrdoResult<TxnStatus> {
        self.transition(TxnStatus::Failed)
    }
}
