//! # ordo-common
//!
//! Common types, errors, and configuration for Ordo.
//!
//! This crate provides the vocabulary shared by the concurrency core and its
//! drivers:
//!
//! - **Types**: Transaction identifiers (`TxnId`), logical timestamps
//!   (`Timestamp`), and the transaction lifecycle (`TxnStatus`)
//! - **Errors**: Unified error handling with `OrdoError`
//! - **Config**: Engine timing and retry configuration
//!
//! ## Example
//!
//! ```rust
//! use ordo_common::types::{Timestamp, TxnId};
//! use ordo_common::error::OrdoResult;
//!
//! fn example() -> OrdoResult<()> {
//!     let txn = TxnId::new(1);
//!     let ts = Timestamp::new(0);
//!     assert!(txn.is_valid());
//!     assert!(ts < ts.next());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{ErrorCode, OrdoError, OrdoResult};
pub use types::{Timestamp, TxnId, TxnStatus};
