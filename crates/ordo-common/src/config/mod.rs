//! Configuration for Ordo.
//!
//! This module provides the timing and retry knobs of the concurrency core.

mod engine;

pub use engine::{EngineConfig, EngineConfigBuilder};
