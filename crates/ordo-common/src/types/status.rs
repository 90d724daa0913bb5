//! Transaction lifecycle states.
//!
//! ```text
//!            wait              poll succeeds
//!   Active ─────────▶ Waiting ─────────────▶ Active
//!     │                  │
//!     │ die / forced     │ timeout / abort signal
//!     ▼                  ▼
//!   Aborted ◀────────────┘
//!     │
//!     ├── attempts left ─────▶ Active (new timestamp)
//!     └── attempts exhausted ─▶ Failed
//!
//!   Active ── all steps done ──▶ Committed
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxnStatus {
    /// Running its operation sequence.
    Active = 0,
    /// Polling for a resource held by a younger transaction.
    Waiting = 1,
    /// Current attempt was abandoned (self-die, timeout, or forced abort).
    Aborted = 2,
    /// Completed and released everything. Terminal.
    Committed = 3,
    /// Gave up after exhausting its attempt budget. Terminal.
    Failed = 4,
}

impl TxnStatus {
    /// Returns true for `Committed` and `Failed`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    /// Returns true if the lifecycle allows moving from `self` to `next`.
    ///
    /// `Waiting -> Aborted` covers the timeout case; the attempt is then
    /// retried through `Aborted -> Active`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use TxnStatus::{Aborted, Active, Committed, Failed, Waiting};
        matches!(
            (self, next),
            (Active, Committed | Waiting | Aborted)
                | (Waiting, Active | Aborted)
                | (Aborted, Active | Failed)
        )
    }

    /// Decodes the `repr(u8)` discriminant.
    #[must_use]
    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Active),
            1 => Some(Self::Waiting),
            2 => Some(Self::Aborted),
            3 => Some(Self::Committed),
            4 => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Waiting => write!(f, "Waiting"),
            Self::Aborted => write!(f, "Aborted"),
            Self::Committed => write!(f, "Committed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}
