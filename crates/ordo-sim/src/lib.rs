//! # ordo-sim
//!
//! Simulation driver for the Ordo wait-die core.
//!
//! This crate provides:
//!
//! - **Configuration**: [`SimConfig`], loaded from TOML, describing resources,
//!   transaction scripts, think time, launch stagger, and engine settings.
//! - **Workload**: [`RandomWorkload`], random think time and payloads.
//! - **Driver**: [`Simulation`], which runs every transaction to completion
//!   alongside the deadlock detector and produces a [`SimReport`].
//!
//! # Example Usage
//!
//! ```no_run
//! use ordo_sim::{SimConfig, Simulation};
//!
//! let report = Simulation::new(SimConfig::default())?.run()?;
//! println!("{report}");
//! # Ok::<(), anyhow::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod driver;
pub mod workload;

pub use config::{OpKind, RangeMs, ResourceSpec, SimConfig, StepSpec, ThinkConfig};
pub use driver::{SimReport, Simulation, TxnResult};
pub use workload::RandomWorkload;
