//! Error handling for Ordo.
//!
//! This module provides a unified error type and result alias used
//! across all Ordo components.

mod engine;

pub use engine::{ErrorCode, OrdoError};

/// Result type alias for Ordo operations.
pub type OrdoResult<T> = std::result::Result<T, OrdoError>;
