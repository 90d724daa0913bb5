//! Periodic deadlock detection.
//!
//! Under wait-die a waiter is always older than the transaction it waits
//! for, so in principle the wait-for graph stays acyclic. The detector is the
//! backstop: every interval it searches the whole graph and, if it finds
//! cycle members, aborts the youngest one.
//!
//! ```text
//!   sleep(interval) ──▶ cycle_members() ──▶ empty? ──▶ sleep again
//!                              │
//!                              ▼
//!                  drop members no longer registered
//!                              │
//!                              ▼
//!           victim = max timestamp ──▶ raise abort flag,
//!                                      drop its edges,
//!                                      release its resources
//! ```
//!
//! The victim's thread notices the flag at its next check, abandons the
//! attempt, and restarts like any other aborted transaction.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ordo_common::{OrdoResult, Timestamp, TxnId};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::context::SharedContext;
use crate::directory::TxnHandle;
use crate::events::TxnEvent;
use crate::protocol::select_victim;

/// Information about a resolved deadlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockInfo {
    /// Registered cycle members, sorted.
    pub members: Vec<TxnId>,
    /// The aborted transaction.
    pub victim: TxnId,
    /// The victim's timestamp when it was chosen.
    pub victim_ts: Timestamp,
}

/// Statistics about deadlock detection.
#[derive(Debug, Default)]
pub struct DetectorStats {
    /// Detection passes run.
    pub passes: AtomicU64,
    /// Passes that found a cycle with registered members.
    pub deadlocks_found: AtomicU64,
    /// Members dropped from the graph because they were no longer registered.
    pub stale_members: AtomicU64,
    /// Victims left alone because they restarted or stopped waiting after
    /// being chosen.
    pub victims_skipped: AtomicU64,
}

impl DetectorStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// Finds wait-for cycles and aborts their youngest member.
pub struct DeadlockDetector<V = i64> {
    ctx: Arc<SharedContext<V>>,
    stats: DetectorStats,
}

impl<V> DeadlockDetector<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a detector over `ctx`.
    pub fn new(ctx: Arc<SharedContext<V>>) -> Self {
        Self {
            ctx,
            stats: DetectorStats::new(),
        }
    }

    /// Starts a detector thread using the context's configured interval.
    pub fn spawn(ctx: Arc<SharedContext<V>>) -> OrdoResult<DetectorHandle<V>> {
        let interval = ctx.config().detector_interval();
        Self::new(ctx).start(interval)
    }

    /// Moves the detector onto a background thread running a pass every
    /// `interval` until the returned handle is stopped.
    pub fn start(self, interval: Duration) -> OrdoResult<DetectorHandle<V>> {
        let detector = Arc::new(self);
        let signal = Arc::new(StopSignal::default());

        let thread = {
            let detector = Arc::clone(&detector);
            let signal = Arc::clone(&signal);
            thread::Builder::new()
                .name("ordo-deadlock".to_string())
                .spawn(move || {
                    debug!(?interval, "deadlock detector started");
                    while !signal.wait(interval) {
                        detector.run_once();
                    }
                    debug!("deadlock detector stopped");
                })?
        };

        Ok(DetectorHandle {
            detector,
            signal,
            thread: Some(thread),
        })
    }

    /// Runs a single detection pass.
    ///
    /// Returns the resolved deadlock, or `None` if there was nothing to do.
    pub fn run_once(&self) -> Option<DeadlockInfo> {
        DetectorStats::record(&self.stats.passes);

        let members = self.ctx.graph().cycle_members();
        if members.is_empty() {
            return None;
        }

        let mut candidates = Vec::with_capacity(members.len());
        for txn in members {
            match self.ctx.directory().get(txn) {
                Some(handle) => {
                    let ts = handle.timestamp();
                    candidates.push((handle, ts));
                }
                None => {
                    // Terminated without cleaning up after itself.
                    debug!(%txn, "dropping unregistered cycle member");
                    DetectorStats::record(&self.stats.stale_members);
                    self.ctx.graph().remove_all_for(txn);
                }
            }
        }

        let victim = select_victim(candidates.iter().map(|(h, ts)| (h.id(), *ts)))?;
        let (handle, victim_ts) = candidates.iter().find(|(h, _)| h.id() == victim)?;
        let victim_ts = *victim_ts;
        let released = self.abort_victim(handle, victim_ts)?;
        DetectorStats::record(&self.stats.deadlocks_found);

        let mut members: Vec<TxnId> = candidates.iter().map(|(h, _)| h.id()).collect();
        members.sort_unstable();

        warn!(
            %victim,
            %victim_ts,
            ?members,
            released,
            "deadlock detected, aborting youngest member"
        );
        self.ctx.emit(TxnEvent::DeadlockResolved {
            members: members.clone(),
            victim,
        });

        Some(DeadlockInfo {
            members,
            victim,
            victim_ts,
        })
    }

    /// Aborts `handle` if it is still the attempt that was chosen: same
    /// timestamp, still waiting. Returns how many resources were released.
    fn abort_victim(&self, handle: &TxnHandle, victim_ts: Timestamp) -> Option<usize> {
        let victim = handle.id();
        if handle.timestamp() != victim_ts || !self.ctx.graph().is_waiting(victim) {
            debug!(%victim, %victim_ts, "victim moved on, skipping");
            DetectorStats::record(&self.stats.victims_skipped);
            return None;
        }

        handle.request_abort();
        self.ctx.graph().remove_all_for(victim);
        Some(self.ctx.release_all(handle))
    }

    /// Returns the detector's statistics.
    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }
}

impl<V> fmt::Debug for DeadlockDetector<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlockDetector")
            .field("passes", &self.stats.passes.load(AtomicOrdering::Relaxed))
            .field(
                "deadlocks_found",
                &self.stats.deadlocks_found.load(AtomicOrdering::Relaxed),
            )
            .finish()
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    /// Sleeps up to `timeout`. Returns true once a stop has been requested.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cond.wait_for(&mut stopped, timeout);
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }
}

/// Owns a running detector thread. Dropping the handle stops the thread.
pub struct DetectorHandle<V = i64> {
    detector: Arc<DeadlockDetector<V>>,
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl<V> DetectorHandle<V> {
    /// Returns the running detector.
    pub fn detector(&self) -> &DeadlockDetector<V> {
        &self.detector
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.signal.stop();
        if thread.join().is_err() {
            warn!("deadlock detector thread panicked");
        } else {
            info!(
                passes = self.detector.stats.passes.load(AtomicOrdering::Relaxed),
                deadlocks = self.detector.stats.deadlocks_found.load(AtomicOrdering::Relaxed),
                "deadlock detector shut down"
            );
        }
    }
}

impl<V> Drop for DetectorHandle<V> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<V> fmt::Debug for DetectorHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorHandle")
            .field("detector", &self.detector)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use ordo_common::EngineConfig;
    use std::time::Instant;

    fn context(sink: Arc<RecordingSink>) -> Arc<SharedContext<i64>> {
        Arc::new(SharedContext::with_sink(
            EngineConfig::for_testing(),
            [
                ("A".to_string(), 0),
                ("B".to_string(), 0),
                ("C".to_string(), 0),
            ],
            sink,
        ))
    }

    fn holding(ctx: &SharedContext<i64>, id: u64, ts: u64, resource: &str) -> Arc<TxnHandle> {
        let handle = Arc::new(TxnHandle::new(TxnId::new(id), Timestamp::new(ts)));
        ctx.directory().register(Arc::clone(&handle));
        ctx.registry()
            .try_acquire(handle.id(), resource, Duration::from_millis(5))
            .unwrap();
        handle.hold(resource);
        handle
    }

    #[test]
    fn test_no_deadlock() {
        let ctx = context(Arc::new(RecordingSink::new()));
        holding(&ctx, 1, 0, "A");
        holding(&ctx, 2, 1, "B");
        ctx.graph().add_edge(TxnId::new(1), TxnId::new(2));

        let detector = DeadlockDetector::new(Arc::clone(&ctx));
        assert_eq!(detector.run_once(), None);
        assert_eq!(detector.stats().passes.load(AtomicOrdering::Relaxed), 1);
        assert_eq!(ctx.graph().edge_count(), 1);
    }

    #[test]
    fn test_simple_deadlock() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Arc::clone(&sink));
        let t1 = holding(&ctx, 1, 0, "A");
        let t2 = holding(&ctx, 2, 1, "B");
        ctx.graph().add_edge(t1.id(), t2.id());
        ctx.graph().add_edge(t2.id(), t1.id());

        let info = DeadlockDetector::new(Arc::clone(&ctx)).run_once().unwrap();
        assert_eq!(info.victim, t2.id());
        assert_eq!(info.victim_ts, Timestamp::new(1));
        assert_eq!(info.members, vec![t1.id(), t2.id()]);

        assert!(t2.abort_requested());
        assert!(!t1.abort_requested());
        assert!(t2.held().is_empty());
        assert_eq!(ctx.registry().holder("B").unwrap(), None);
        assert_eq!(ctx.registry().holder("A").unwrap(), Some(t1.id()));
        assert!(!ctx.graph().has_cycle());
        assert!(sink.events().contains(&TxnEvent::DeadlockResolved {
            members: vec![t1.id(), t2.id()],
            victim: t2.id(),
        }));
    }

    #[test]
    fn test_victim_is_youngest_member() {
        let ctx = context(Arc::new(RecordingSink::new()));
        let a = holding(&ctx, 1, 5, "A");
        let b = holding(&ctx, 2, 2, "B");
        let c = holding(&ctx, 3, 9, "C");
        ctx.graph().add_edge(a.id(), b.id());
        ctx.graph().add_edge(b.id(), c.id());
        ctx.graph().add_edge(c.id(), a.id());

        let info = DeadlockDetector::new(Arc::clone(&ctx)).run_once().unwrap();
        assert_eq!(info.victim, c.id());
        assert!(c.abort_requested());
        assert!(!a.abort_requested() && !b.abort_requested());
    }

    #[test]
    fn test_unregistered_members_are_dropped() {
        let ctx = context(Arc::new(RecordingSink::new()));
        ctx.graph().add_edge(TxnId::new(7), TxnId::new(8));
        ctx.graph().add_edge(TxnId::new(8), TxnId::new(7));

        let detector = DeadlockDetector::new(Arc::clone(&ctx));
        assert_eq!(detector.run_once(), None);
        assert!(ctx.graph().is_empty());
        assert_eq!(detector.stats().stale_members.load(AtomicOrdering::Relaxed), 2);
        assert_eq!(detector.stats().deadlocks_found.load(AtomicOrdering::Relaxed), 0);
    }

    #[test]
    fn test_victim_that_moved_on_is_left_alone() {
        let ctx = context(Arc::new(RecordingSink::new()));
        let t1 = holding(&ctx, 1, 0, "A");
        let t2 = holding(&ctx, 2, 1, "B");
        ctx.graph().add_edge(t1.id(), t2.id());
        ctx.graph().add_edge(t2.id(), t1.id());
        let detector = DeadlockDetector::new(Arc::clone(&ctx));

        // Restarted with a new timestamp since it was chosen
        t2.set_timestamp(Timestamp::new(5));
        assert_eq!(detector.abort_victim(&t2, Timestamp::new(1)), None);
        assert!(!t2.abort_requested());
        assert_eq!(ctx.registry().holder("B").unwrap(), Some(t2.id()));

        // Same attempt, but no longer waiting
        ctx.graph().remove_edge(t2.id(), t1.id());
        assert_eq!(detector.abort_victim(&t2, Timestamp::new(5)), None);
        assert!(!t2.abort_requested());
        assert_eq!(
            detector.stats().victims_skipped.load(AtomicOrdering::Relaxed),
            2
        );

        // Still the chosen attempt and still waiting
        ctx.graph().add_edge(t2.id(), t1.id());
        assert_eq!(detector.abort_victim(&t2, Timestamp::new(5)), Some(1));
        assert!(t2.abort_requested());
        assert_eq!(ctx.registry().holder("B").unwrap(), None);
    }

    #[test]
    fn test_background_thread_resolves_and_stops() {
        let ctx = context(Arc::new(RecordingSink::new()));
        let t1 = holding(&ctx, 1, 0, "A");
        let t2 = holding(&ctx, 2, 1, "B");

        let handle = DeadlockDetector::spawn(Arc::clone(&ctx)).unwrap();
        ctx.graph().add_edge(t1.id(), t2.id());
        ctx.graph().add_edge(t2.id(), t1.id());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !t2.abort_requested() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(t2.abort_requested());
        assert!(handle.detector().stats().passes.load(AtomicOrdering::Relaxed) >= 1);
        handle.stop();
    }

    #[test]
    fn test_stop_is_prompt() {
        let ctx = context(Arc::new(RecordingSink::new()));
        let handle = DeadlockDetector::new(ctx)
            .start(Duration::from_secs(60))
            .unwrap();

        let started = Instant::now();
        drop(handle);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
