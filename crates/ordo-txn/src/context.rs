//! Shared execution context.
//!
//! One [`SharedContext`] is built per run and handed to every transaction and
//! to the detector behind an `Arc`. There is no global state.

use std::fmt;
use std::sync::Arc;

use ordo_common::{EngineConfig, TxnId};
use tracing::trace;

use crate::clock::Clock;
use crate::directory::{TransactionDirectory, TxnHandle};
use crate::events::{EventSink, NoopSink, TxnEvent};
use crate::graph::WaitForGraph;
use crate::registry::ResourceRegistry;

/// Everything transactions and the detector share.
pub struct SharedContext<V = i64> {
    config: EngineConfig,
    clock: Clock,
    registry: ResourceRegistry<V>,
    graph: WaitForGraph,
    directory: TransactionDirectory,
    events: Arc<dyn EventSink>,
}

impl<V: Clone> SharedContext<V> {
    /// Creates a context over the given resources with events discarded.
    pub fn new(config: EngineConfig, resources: impl IntoIterator<Item = (String, V)>) -> Self {
        Self::with_sink(config, resources, Arc::new(NoopSink))
    }

    /// Creates a context that reports events to `events`.
    pub fn with_sink(
        config: EngineConfig,
        resources: impl IntoIterator<Item = (String, V)>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            clock: Clock::new(),
            registry: ResourceRegistry::new(resources),
            graph: WaitForGraph::new(),
            directory: TransactionDirectory::new(),
            events,
        }
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the resource registry.
    pub fn registry(&self) -> &ResourceRegistry<V> {
        &self.registry
    }

    /// Returns the wait-for graph.
    pub fn graph(&self) -> &WaitForGraph {
        &self.graph
    }

    /// Returns the transaction directory.
    pub fn directory(&self) -> &TransactionDirectory {
        &self.directory
    }

    /// Reports an event.
    pub fn emit(&self, event: TxnEvent) {
        self.events.emit(event);
    }

    /// Releases every resource in `handle`'s held-set.
    ///
    /// Safe to call from any thread and any number of times; the held-set is
    /// drained atomically, so each resource is released once.
    pub fn release_all(&self, handle: &TxnHandle) -> usize {
        let txn = handle.id();
        handle
            .take_held()
            .into_iter()
            .filter(|name| self.release_one(txn, name))
            .count()
    }

    fn release_one(&self, txn: TxnId, name: &str) -> bool {
        match self.registry.release(txn, name) {
            Ok(released) => {
                trace!(%txn, resource = name, released, "release");
                released
            }
            // Held-sets only ever contain registered names.
            Err(_) => false,
        }
    }
}

impl<V> fmt::Debug for SharedContext<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("clock", &self.clock)
            .field("registry", &self.registry)
            .field("graph", &self.graph)
            .field("directory", &self.directory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_common::Timestamp;
    use std::time::Duration;

    #[test]
    fn test_release_all_drains_once() {
        let ctx = SharedContext::new(
            EngineConfig::for_testing(),
            [("X".to_string(), 0_i64), ("Y".to_string(), 0_i64)],
        );
        let handle = TxnHandle::new(TxnId::new(1), Timestamp::ZERO);
        let timeout = Duration::from_millis(5);

        for name in ["X", "Y"] {
            ctx.registry().try_acquire(handle.id(), name, timeout).unwrap();
            handle.hold(name);
        }

        assert_eq!(ctx.release_all(&handle), 2);
        assert_eq!(ctx.release_all(&handle), 0);
        assert_eq!(ctx.registry().holder("X").unwrap(), None);
        assert_eq!(ctx.registry().holder("Y").unwrap(), None);
    }

    #[test]
    fn test_release_all_skips_resources_taken_over() {
        let ctx = SharedContext::new(EngineConfig::for_testing(), [("X".to_string(), 0_i64)]);
        let stale = TxnHandle::new(TxnId::new(1), Timestamp::ZERO);
        stale.hold("X");

        // Someone else holds X; the stale entry must not release it
        ctx.registry()
            .try_acquire(TxnId::new(2), "X", Duration::from_millis(5))
            .unwrap();
        assert_eq!(ctx.release_all(&stale), 0);
        assert_eq!(ctx.registry().holder("X").unwrap(), Some(TxnId::new(2)));
    }
}
