//! # ordo-txn
//!
//! Wait-die concurrency control for Ordo.
//!
//! This crate provides the concurrency-control core:
//!
//! - **Resource Registry**: Named resources guarded by exclusive, bounded-wait
//!   locks with a recorded holder.
//!
//! - **Wait-Die Protocol**: Timestamp-ordered contention resolution. An older
//!   requester waits for a younger holder; a younger (or equal) requester
//!   aborts itself and retries later with a fresh timestamp.
//!
//! - **Deadlock Detection**: A wait-for graph plus a periodic detector that
//!   force-aborts the youngest member of any cycle it finds.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        SharedContext                           │
//! │                                                                │
//! │  ┌──────────┐  ┌──────────────────┐  ┌───────────────────────┐ │
//! │  │  Clock   │  │ ResourceRegistry │  │ TransactionDirectory  │ │
//! │  └──────────┘  └──────────────────┘  └───────────────────────┘ │
//! │                ┌──────────────────┐  ┌───────────────────────┐ │
//! │                │   WaitForGraph   │  │      EventSink        │ │
//! │                └──────────────────┘  └───────────────────────┘ │
//! └────────────────────────────────────────────────────────────────┘
//!          ▲                                         ▲
//!          │ Arc                                     │ Arc
//!   ┌──────────────┐ ┌──────────────┐       ┌──────────────────┐
//!   │ Transaction  │ │ Transaction  │  ...  │ DeadlockDetector │
//!   │  (thread)    │ │  (thread)    │       │    (thread)      │
//!   └──────────────┘ └──────────────┘       └──────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::thread;
//!
//! use ordo_common::EngineConfig;
//! use ordo_txn::{
//!     DeadlockDetector, FixedWorkload, Script, SharedContext, Transaction, TxnId, Workload,
//! };
//!
//! let ctx = Arc::new(SharedContext::new(
//!     EngineConfig::default(),
//!     [("X".to_string(), 10_i64), ("Y".to_string(), 20_i64)],
//! ));
//! let detector = DeadlockDetector::spawn(Arc::clone(&ctx)).unwrap();
//!
//! let script = Script::read_then_write(["X", "Y"]);
//! let workload: Arc<dyn Workload<i64>> = Arc::new(FixedWorkload::new(42));
//! let workers: Vec<_> = (1..=4)
//!     .map(|i| {
//!         let txn = Transaction::new(
//!             Arc::clone(&ctx),
//!             TxnId::new(i),
//!             script.clone(),
//!             Arc::clone(&workload),
//!         );
//!         thread::spawn(move || txn.run())
//!     })
//!     .collect();
//!
//! for worker in workers {
//!     let _ = worker.join();
//! }
//! detector.stop();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Process-wide timestamp source.
pub mod clock;

/// Shared execution context.
///
/// This module provides:
/// - [`context::SharedContext`]: Registry, graph, directory, clock, and sink
///   bundled behind one `Arc`
pub mod context;

/// Deadlock detection.
///
/// This module provides:
/// - [`detector::DeadlockDetector`]: Periodic cycle search and victim abort
/// - [`detector::DetectorHandle`]: Stops and joins the background thread
/// - [`detector::DeadlockInfo`]: Information about a resolved deadlock
pub mod detector;

/// Registry of live transactions.
pub mod directory;

/// Structured protocol events.
pub mod events;

/// Wait-for graph.
pub mod graph;

/// Pure protocol logic: the wait-die decision, the lifecycle state machine,
/// and victim selection.
pub mod protocol;

/// Resource lock registry.
///
/// This module provides:
/// - [`registry::ResourceRegistry`]: Named resources with exclusive locks
/// - [`registry::LockResult`]: Outcome of a bounded acquisition
pub mod registry;

/// Transaction execution.
///
/// This module provides:
/// - [`transaction::Transaction`]: The runnable unit driving one script
/// - [`transaction::Script`]: Ordered read/write steps
/// - [`transaction::Workload`]: Think time and payload generation hooks
pub mod transaction;

// Re-export commonly used types

pub use ordo_common::{EngineConfig, OrdoError, OrdoResult, Timestamp, TxnId, TxnStatus};

pub use clock::Clock;
pub use context::SharedContext;
pub use detector::{DeadlockDetector, DeadlockInfo, DetectorHandle, DetectorStats};
pub use directory::{TransactionDirectory, TxnHandle};
pub use events::{AbortKind, EventSink, NoopSink, RecordingSink, TracingSink, TxnEvent};
pub use graph::WaitForGraph;
pub use protocol::{select_victim, wait_die, Decision, RetryDecision, TxnMachine};
pub use registry::{LockResult, RegistryStats, ResourceRegistry, ResourceSnapshot};
pub use transaction::{FixedWorkload, Op, Script, Step, Transaction, TxnOutcome, Workload};
