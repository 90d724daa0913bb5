//! Engine error types.
//!
//! Most variants describe why a single transaction attempt failed. Those are
//! recovered by the transaction's own restart loop; only
//! [`OrdoError::ResourceUnknown`], [`OrdoError::AttemptsExhausted`], and
//! configuration errors ever reach a driver.

use std::fmt;
use thiserror::Error;

use crate::types::{TxnId, TxnStatus};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid configuration or argument.
    InvalidArgument = 0x0003,
    /// General I/O error.
    Io = 0x0100,

    // Resource errors (0x0200 - 0x02FF)
    /// Referenced resource does not exist.
    ResourceUnknown = 0x0200,
    /// Resource lock is held by another transaction.
    LockContended = 0x0201,
    /// Holder terminated between contention and lookup.
    HolderVanished = 0x0202,
    /// Resource was released out from under its holder.
    LockLost = 0x0203,

    // Transaction errors (0x0300 - 0x03FF)
    /// Bounded wait expired.
    WaitTimeout = 0x0300,
    /// Wait-die chose "die".
    SelfDie = 0x0301,
    /// Deadlock detector chose this transaction as victim.
    ForcedAbort = 0x0302,
    /// Attempt budget exhausted.
    AttemptsExhausted = 0x0303,
    /// Illegal lifecycle transition.
    InvalidTransition = 0x0304,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Resource",
            0x03 => "Transaction",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Ordo.
///
/// # Example
///
/// ```rust
/// use ordo_common::error::{OrdoError, OrdoResult};
///
/// fn lookup(name: &str) -> OrdoResult<()> {
///     Err(OrdoError::ResourceUnknown { resource: name.to_string() })
/// }
///
/// let err = lookup("Z").unwrap_err();
/// assert!(err.is_fatal());
/// ```
#[derive(Debug, Error)]
pub enum OrdoError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    // ==========================================================================
    // Resource Errors
    // ==========================================================================
    /// Referenced resource does not exist. This is a misconfiguration.
    #[error("resource '{resource}' does not exist")]
    ResourceUnknown {
        /// The missing resource name.
        resource: String,
    },

    /// Resource is held by another transaction.
    ///
    /// Classification only: the lock registry reports contention as a
    /// `Busy` acquisition result, which the wait-die rule turns into a wait
    /// or a [`OrdoError::SelfDie`]. Callers that surface contention as an
    /// error of their own use this variant so it stays retryable.
    #[error("resource '{resource}' is held by {holder}")]
    LockContended {
        /// The contended resource.
        resource: String,
        /// The current holder.
        holder: TxnId,
    },

    /// The reported holder was no longer registered when looked up.
    #[error("holder {holder} of '{resource}' vanished before it could be inspected")]
    HolderVanished {
        /// The resource whose holder vanished.
        resource: String,
        /// The holder that was reported.
        holder: TxnId,
    },

    /// The resource was released before its holder finished with it.
    #[error("lock on '{resource}' was lost")]
    LockLost {
        /// The resource that was lost.
        resource: String,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Bounded wait expired without acquiring the resource.
    #[error("timed out after {waited_ms}ms waiting for '{resource}'")]
    WaitTimeout {
        /// The resource being waited for.
        resource: String,
        /// How long the transaction waited, in milliseconds.
        waited_ms: u64,
    },

    /// Wait-die decided the requester must abort.
    #[error("died contending for '{resource}' held by older {holder}")]
    SelfDie {
        /// The contended resource.
        resource: String,
        /// The older (or equal) holder.
        holder: TxnId,
    },

    /// The deadlock detector chose this transaction as victim.
    #[error("transaction {txn_id} was aborted to break a deadlock")]
    ForcedAbort {
        /// The victim.
        txn_id: TxnId,
    },

    /// Every attempt failed.
    #[error("transaction {txn_id} failed after {attempts} attempts: {last}")]
    AttemptsExhausted {
        /// The failed transaction.
        txn_id: TxnId,
        /// Number of attempts made.
        attempts: u32,
        /// The failure of the final attempt.
        #[source]
        last: Box<OrdoError>,
    },

    /// Illegal lifecycle transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// The current state.
        from: TxnStatus,
        /// The requested state.
        to: TxnStatus,
    },
}

impl OrdoError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidConfig { .. } => ErrorCode::InvalidArgument,
            Self::Io { .. } => ErrorCode::Io,
            Self::ResourceUnknown { .. } => ErrorCode::ResourceUnknown,
            Self::LockContended { .. } => ErrorCode::LockContended,
            Self::HolderVanished { .. } => ErrorCode::HolderVanished,
            Self::LockLost { .. } => ErrorCode::LockLost,
            Self::WaitTimeout { .. } => ErrorCode::WaitTimeout,
            Self::SelfDie { .. } => ErrorCode::SelfDie,
            Self::ForcedAbort { .. } => ErrorCode::ForcedAbort,
            Self::AttemptsExhausted { .. } => ErrorCode::AttemptsExhausted,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
        }
    }

    /// Returns true if the failure only ends the current attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockContended { .. }
                | Self::HolderVanished { .. }
                | Self::LockLost { .. }
                | Self::WaitTimeout { .. }
                | Self::SelfDie { .. }
                | Self::ForcedAbort { .. }
        )
    }

    /// Returns true if the error must be surfaced to the driver.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a resource-unknown error.
    #[must_use]
    pub fn unknown_resource(resource: impl Into<String>) -> Self {
        Self::ResourceUnknown {
            resource: resource.into(),
        }
    }
}
