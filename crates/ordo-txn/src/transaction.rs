//! Transaction execution.
//!
//! A [`Transaction`] runs one [`Script`] against a [`SharedContext`] until it
//! commits or runs out of attempts. Each attempt has two phases:
//!
//! 1. **Growing**: for every step in order, acquire the step's resource
//!    through the wait-die protocol and, for reads, read it.
//! 2. **Commit**: apply every write atomically, release everything, commit.
//!
//! Any failure abandons the attempt: wait-for edges are dropped, every held
//! resource is released, and the transaction restarts with a new (younger)
//! timestamp after a randomized backoff, or fails once its budget is spent.
//!
//! # Contention
//!
//! ```text
//!   try_acquire ──▶ Acquired ───────────────────────────▶ continue
//!        │
//!        ▼ Busy(holder)
//!   holder registered? ── no ──▶ retry immediately (bounded)
//!        │ yes
//!        ▼
//!   ts(me) < ts(holder) ── yes ──▶ Waiting: poll until acquired,
//!        │                         timed out, or abort requested
//!        │ no
//!        ▼
//!   die (Aborted)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ordo_common::{OrdoError, OrdoResult, Timestamp, TxnId, TxnStatus};
use rand::Rng;
use tracing::{debug, trace};

use crate::context::SharedContext;
use crate::directory::TxnHandle;
use crate::events::{AbortKind, TxnEvent};
use crate::protocol::{wait_die, Decision, RetryDecision, TxnMachine};
use crate::registry::LockResult;

/// Consecutive "holder is gone" observations tolerated before an attempt
/// gives up on a resource.
const MAX_VANISHED_RETRIES: u32 = 8;

/// What a step does with its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Acquire and read.
    Read,
    /// Acquire, then write during the commit phase.
    Write,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Read => write!(f, "read"),
            Op::Write => write!(f, "write"),
        }
    }
}

/// One step of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// The resource name.
    pub resource: String,
    /// The operation.
    pub op: Op,
}

impl Step {
    /// Creates a read step.
    pub fn read(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            op: Op::Read,
        }
    }

    /// Creates a write step.
    pub fn write(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            op: Op::Write,
        }
    }
}

/// An ordered list of steps. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    steps: Arc<[Step]>,
}

impl Script {
    /// Creates a script from steps.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Reads every resource in order, then writes every resource in order.
    pub fn read_then_write<S: Into<String>>(resources: impl IntoIterator<Item = S>) -> Self {
        let names: Vec<String> = resources.into_iter().map(Into::into).collect();
        let reads: Vec<Step> = names.iter().cloned().map(Step::read).collect();
        Self::new(reads.into_iter().chain(names.into_iter().map(Step::write)))
    }

    /// Returns the steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Returns the distinct resources in order of first use.
    pub fn resources(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for step in self.steps.iter() {
            if !seen.contains(&step.resource.as_str()) {
                seen.push(step.resource.as_str());
            }
        }
        seen
    }

    /// Returns true if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Hooks for the parts of a transaction the core does not decide.
pub trait Workload<V>: Send + Sync {
    /// Simulated think time before `script.steps()[index]`.
    fn think(&self, _txn: TxnId, _script: &Script, _index: usize) {}

    /// The value to write to `resource`, given what this attempt read from
    /// it (if the script read it).
    fn produce(&self, txn: TxnId, resource: &str, read: Option<&V>) -> V;
}

/// Writes the same value everywhere, without think time.
#[derive(Debug, Clone)]
pub struct FixedWorkload<V>(V);

impl<V> FixedWorkload<V> {
    /// Creates a workload writing `value`.
    pub fn new(value: V) -> Self {
        Self(value)
    }
}

impl<V: Clone + Send + Sync> Workload<V> for FixedWorkload<V> {
    fn produce(&self, _txn: TxnId, _resource: &str, _read: Option<&V>) -> V {
        self.0.clone()
    }
}

/// Result of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnOutcome {
    /// The transaction.
    pub txn_id: TxnId,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Timestamp of the successful attempt.
    pub timestamp: Timestamp,
}

/// A runnable transaction.
pub struct Transaction<V = i64> {
    ctx: Arc<SharedContext<V>>,
    handle: Arc<TxnHandle>,
    script: Script,
    workload: Arc<dyn Workload<V>>,
    machine: TxnMachine,
}

impl<V> Transaction<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a transaction with a fresh timestamp from the context's clock.
    ///
    /// The transaction becomes visible in the directory once it runs.
    pub fn new(
        ctx: Arc<SharedContext<V>>,
        id: TxnId,
        script: Script,
        workload: Arc<dyn Workload<V>>,
    ) -> Self {
        let timestamp = ctx.clock().now();
        let machine = TxnMachine::new(ctx.config().max_attempts);
        Self {
            handle: Arc::new(TxnHandle::new(id, timestamp)),
            ctx,
            script,
            workload,
            machine,
        }
    }

    /// Overrides the attempt budget from the engine configuration.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.machine = TxnMachine::new(max_attempts);
        self
    }

    /// Returns the transaction ID.
    pub fn id(&self) -> TxnId {
        self.handle.id()
    }

    /// Returns the current timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.handle.timestamp()
    }

    /// Returns the shared handle, for observing the transaction while it runs.
    pub fn handle(&self) -> Arc<TxnHandle> {
        Arc::clone(&self.handle)
    }

    /// Runs the transaction on a dedicated thread.
    pub fn spawn(self) -> OrdoResult<JoinHandle<OrdoResult<TxnOutcome>>> {
        let handle = thread::Builder::new()
            .name(format!("ordo-{}", self.id()))
            .spawn(move || self.run())?;
        Ok(handle)
    }

    /// Runs attempts until the transaction commits or fails.
    ///
    /// Transient failures are retried internally; only
    /// [`OrdoError::AttemptsExhausted`] and [`OrdoError::ResourceUnknown`]
    /// are returned.
    pub fn run(mut self) -> OrdoResult<TxnOutcome> {
        let id = self.id();
        self.ctx.directory().register(Arc::clone(&self.handle));

        let result = self.run_attempts();

        self.ctx.graph().remove_all_for(id);
        self.ctx.release_all(&self.handle);
        self.ctx.directory().deregister(id);
        result
    }

    fn run_attempts(&mut self) -> OrdoResult<TxnOutcome> {
        let id = self.id();

        loop {
            let attempt = self.machine.begin_attempt()?;
            self.handle.publish_attempts(attempt);
            self.ctx.emit(TxnEvent::Started {
                txn: id,
                attempt,
                timestamp: self.timestamp(),
            });

            let err = match self.execute() {
                Ok(()) => return self.commit(),
                Err(err) => err,
            };

            let decision = self.abandon_attempt(&err)?;
            if err.is_fatal() || decision == RetryDecision::GiveUp {
                self.machine.fail()?;
                self.set_status(TxnStatus::Failed);
                self.ctx.emit(TxnEvent::Failed {
                    txn: id,
                    attempts: self.machine.attempts(),
                });

                if err.is_fatal() {
                    return Err(err);
                }
                return Err(OrdoError::AttemptsExhausted {
                    txn_id: id,
                    attempts: self.machine.attempts(),
                    last: Box::new(err),
                });
            }

            self.restart()?;
        }
    }

    /// One pass over the script.
    fn execute(&mut self) -> OrdoResult<()> {
        let id = self.id();
        let script = self.script.clone();
        let mut reads: HashMap<&str, V> = HashMap::new();

        for (index, step) in script.steps().iter().enumerate() {
            self.check_abort()?;
            self.workload.think(id, &script, index);
            self.check_abort()?;

            self.acquire(&step.resource)?;

            if step.op == Op::Read {
                let value = self.ctx.registry().read(&step.resource)?;
                trace!(txn = %id, resource = %step.resource, "read");
                reads.insert(&step.resource, value);
            }
        }

        self.check_abort()?;

        let writes: BTreeMap<String, V> = script
            .steps()
            .iter()
            .filter(|step| step.op == Op::Write)
            .map(|step| {
                let value = self
                    .workload
                    .produce(id, &step.resource, reads.get(step.resource.as_str()));
                (step.resource.clone(), value)
            })
            .collect();

        if !writes.is_empty() {
            self.ctx
                .registry()
                .apply_writes(id, writes, self.ctx.config().lock_timeout())?;
        }

        self.ctx.release_all(&self.handle);
        Ok(())
    }

    /// Acquires `resource` under wait-die.
    fn acquire(&mut self, resource: &str) -> OrdoResult<()> {
        let id = self.id();
        let timeout = self.ctx.config().lock_timeout();
        let mut vanished = 0;

        loop {
            self.ctx.emit(TxnEvent::LockAttempted {
                txn: id,
                resource: resource.to_string(),
            });

            let reported = match self.ctx.registry().try_acquire(id, resource, timeout)? {
                LockResult::Acquired => {
                    self.handle.hold(resource);
                    self.ctx.emit(TxnEvent::LockAcquired {
                        txn: id,
                        resource: resource.to_string(),
                        after_wait: false,
                    });
                    return Ok(());
                }
                LockResult::AlreadyHeld => {
                    self.handle.hold(resource);
                    return Ok(());
                }
                LockResult::Busy { holder } => holder,
            };

            let contender = reported
                .filter(|&holder| holder != id)
                .and_then(|holder| {
                    self.ctx
                        .directory()
                        .timestamp_of(holder)
                        .map(|ts| (holder, ts))
                });

            let Some((holder, holder_ts)) = contender else {
                // Holder already terminated (or released mid-check): the
                // resource is most likely free, so try again right away.
                vanished += 1;
                trace!(txn = %id, resource, ?reported, vanished, "holder vanished");
                if vanished >= MAX_VANISHED_RETRIES {
                    return Err(OrdoError::HolderVanished {
                        resource: resource.to_string(),
                        holder: reported.unwrap_or(TxnId::INVALID),
                    });
                }
                self.check_abort()?;
                continue;
            };

            let decision = wait_die(self.timestamp(), holder_ts);
            debug!(
                txn = %id,
                ts = %self.timestamp(),
                resource,
                %holder,
                holder_ts = %holder_ts,
                %decision,
                "contention"
            );

            return match decision {
                Decision::Wait => self.wait_for(resource, holder),
                Decision::Die => {
                    self.machine.abort()?;
                    self.set_status(TxnStatus::Aborted);
                    self.ctx.emit(TxnEvent::Died {
                        txn: id,
                        resource: resource.to_string(),
                        holder,
                    });
                    Err(OrdoError::SelfDie {
                        resource: resource.to_string(),
                        holder,
                    })
                }
            };
        }
    }

    /// Waits for a younger `holder` to release `resource`.
    fn wait_for(&mut self, resource: &str, holder: TxnId) -> OrdoResult<()> {
        let id = self.id();

        self.machine.wait()?;
        self.set_status(TxnStatus::Waiting);
        self.ctx.graph().add_edge(id, holder);
        self.ctx.emit(TxnEvent::EnteredWaiting {
            txn: id,
            resource: resource.to_string(),
            holder,
        });

        let result = self.poll(resource);
        self.ctx.graph().remove_edge(id, holder);
        result?;

        self.machine.resume()?;
        self.set_status(TxnStatus::Active);
        self.ctx.emit(TxnEvent::LockAcquired {
            txn: id,
            resource: resource.to_string(),
            after_wait: true,
        });
        Ok(())
    }

    /// Retries the low-level acquire at the polling interval until it
    /// succeeds, the wait budget runs out, or an abort is requested.
    fn poll(&self, resource: &str) -> OrdoResult<()> {
        let id = self.id();
        let config = self.ctx.config();
        let started = Instant::now();
        let deadline = started + config.max_wait();

        loop {
            self.check_abort()?;

            let result = self
                .ctx
                .registry()
                .try_acquire(id, resource, config.lock_timeout())?;
            if result.is_success() {
                self.handle.hold(resource);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                self.ctx.emit(TxnEvent::TimedOut {
                    txn: id,
                    resource: resource.to_string(),
                });
                return Err(OrdoError::WaitTimeout {
                    resource: resource.to_string(),
                    waited_ms: millis(started.elapsed()),
                });
            }
            thread::sleep(config.poll_interval().min(deadline - now));
        }
    }

    fn check_abort(&self) -> OrdoResult<()> {
        if self.handle.abort_requested() {
            return Err(OrdoError::ForcedAbort { txn_id: self.id() });
        }
        Ok(())
    }

    fn commit(&mut self) -> OrdoResult<TxnOutcome> {
        self.machine.commit()?;
        self.set_status(TxnStatus::Committed);

        let outcome = TxnOutcome {
            txn_id: self.id(),
            attempts: self.machine.attempts(),
            timestamp: self.timestamp(),
        };
        self.ctx.emit(TxnEvent::Committed {
            txn: outcome.txn_id,
            attempts: outcome.attempts,
        });
        Ok(outcome)
    }

    /// Moves to `Aborted` and undoes everything the attempt left behind.
    fn abandon_attempt(&mut self, err: &OrdoError) -> OrdoResult<RetryDecision> {
        let id = self.id();
        let decision = self.machine.attempt_failed()?;
        self.set_status(TxnStatus::Aborted);

        self.ctx.graph().remove_all_for(id);
        let released = self.ctx.release_all(&self.handle);

        // The flag also covers a detector release that surfaced as some
        // other failure, e.g. LockLost in the write phase.
        let forced = matches!(err, OrdoError::ForcedAbort { .. });
        let kind = if forced || self.handle.abort_requested() {
            AbortKind::Forced
        } else {
            AbortKind::SelfInitiated
        };
        debug!(txn = %id, error = %err, released, "attempt abandoned");
        self.ctx.emit(TxnEvent::Aborted { txn: id, kind });
        Ok(decision)
    }

    /// Prepares the next attempt: new timestamp, cleared signal, backoff.
    fn restart(&mut self) -> OrdoResult<()> {
        self.machine.restart()?;
        self.handle.clear_abort();

        let timestamp = self.ctx.clock().now();
        self.handle.set_timestamp(timestamp);
        self.set_status(TxnStatus::Active);
        self.ctx.emit(TxnEvent::Retried {
            txn: self.id(),
            attempt: self.machine.attempts() + 1,
            timestamp,
        });

        thread::sleep(self.backoff());
        Ok(())
    }

    fn backoff(&self) -> Duration {
        let (min, max) = self.ctx.config().backoff_range_ms();
        Duration::from_millis(rand::thread_rng().gen_range(min..=max.max(min)))
    }

    fn set_status(&self, status: TxnStatus) {
        self.handle.publish_status(status);
    }
}

impl<V> fmt::Debug for Transaction<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle)
            .field("status", &self.machine.status())
            .field("steps", &self.script.steps().len())
            .finish()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSink, RecordingSink};
    use ordo_common::EngineConfig;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Weak;

    fn context(sink: Arc<RecordingSink>) -> Arc<SharedContext<i64>> {
        Arc::new(SharedContext::with_sink(
            EngineConfig::for_testing(),
            [("X".to_string(), 1), ("Y".to_string(), 2)],
            sink,
        ))
    }

    fn fixed(value: i64) -> Arc<dyn Workload<i64>> {
        Arc::new(FixedWorkload::new(value))
    }

    struct Increment;

    impl Workload<i64> for Increment {
        fn produce(&self, _txn: TxnId, _resource: &str, read: Option<&i64>) -> i64 {
            read.copied().unwrap_or_default() + 1
        }
    }

    #[test]
    fn test_script_builders() {
        let script = Script::read_then_write(["X", "Y"]);
        assert_eq!(
            script.steps(),
            &[
                Step::read("X"),
                Step::read("Y"),
                Step::write("X"),
                Step::write("Y")
            ]
        );
        assert_eq!(script.resources(), vec!["X", "Y"]);
        assert!(Script::new(Vec::new()).is_empty());
    }

    #[test]
    fn test_uncontended_commit() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Arc::clone(&sink));

        let txn = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(1),
            Script::read_then_write(["X", "Y"]),
            Arc::new(Increment),
        );
        let handle = txn.handle();
        let outcome = txn.run().unwrap();

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.timestamp, Timestamp::ZERO);
        assert_eq!(handle.status(), TxnStatus::Committed);
        assert!(handle.held().is_empty());
        assert!(ctx.directory().is_empty());
        assert_eq!(ctx.registry().read("X").unwrap(), 2);
        assert_eq!(ctx.registry().read("Y").unwrap(), 3);
        assert_eq!(ctx.registry().holder("X").unwrap(), None);
        assert!(sink
            .events()
            .contains(&TxnEvent::Committed {
                txn: TxnId::new(1),
                attempts: 1
            }));
    }

    #[test]
    fn test_repeated_resource_is_already_held() {
        let ctx = context(Arc::new(RecordingSink::new()));
        let script = Script::new([Step::read("X"), Step::write("X"), Step::read("X")]);

        let outcome = Transaction::new(Arc::clone(&ctx), TxnId::new(1), script, fixed(9))
            .run()
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(ctx.registry().read("X").unwrap(), 9);
    }

    #[test]
    fn test_unknown_resource_is_fatal() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Arc::clone(&sink));

        let err = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(1),
            Script::new([Step::read("X"), Step::read("Nope")]),
            fixed(0),
        )
        .run()
        .unwrap_err();

        assert!(matches!(err, OrdoError::ResourceUnknown { .. }));
        // Not retried, and X was released
        assert_eq!(sink.count(|e| matches!(e, TxnEvent::Retried { .. })), 0);
        assert_eq!(ctx.registry().holder("X").unwrap(), None);
        assert!(ctx.directory().is_empty());
    }

    #[test]
    fn test_younger_requester_dies_without_waiting() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Arc::clone(&sink));

        // Older holder, ts 0
        let holder = Arc::new(TxnHandle::new(TxnId::new(1), ctx.clock().now()));
        ctx.directory().register(Arc::clone(&holder));
        ctx.registry()
            .try_acquire(holder.id(), "X", Duration::from_millis(5))
            .unwrap();
        holder.hold("X");

        // Younger requester, ts 1
        let requester = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(2),
            Script::read_then_write(["X"]),
            fixed(5),
        )
        .with_max_attempts(1);
        assert_eq!(requester.timestamp(), Timestamp::new(1));

        let err = requester.run().unwrap_err();
        match err {
            OrdoError::AttemptsExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 1);
                assert!(matches!(*last, OrdoError::SelfDie { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        let events = sink.events_for(TxnId::new(2));
        assert!(events.iter().any(|e| matches!(e, TxnEvent::Died { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, TxnEvent::EnteredWaiting { .. })));
        assert!(events.contains(&TxnEvent::Aborted {
            txn: TxnId::new(2),
            kind: AbortKind::SelfInitiated
        }));
        // The holder is untouched
        assert_eq!(ctx.registry().holder("X").unwrap(), Some(TxnId::new(1)));
        assert_eq!(ctx.registry().read("X").unwrap(), 1);
    }

    #[test]
    fn test_restart_issues_younger_timestamp() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Arc::clone(&sink));

        let holder = Arc::new(TxnHandle::new(TxnId::new(1), ctx.clock().now()));
        ctx.directory().register(Arc::clone(&holder));
        ctx.registry()
            .try_acquire(holder.id(), "X", Duration::from_millis(5))
            .unwrap();

        let err = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(2),
            Script::read_then_write(["X"]),
            fixed(5),
        )
        .run()
        .unwrap_err();
        assert!(matches!(err, OrdoError::AttemptsExhausted { attempts: 3, .. }));

        let retries: Vec<Timestamp> = sink
            .events_for(TxnId::new(2))
            .into_iter()
            .filter_map(|e| match e {
                TxnEvent::Retried { timestamp, .. } => Some(timestamp),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![Timestamp::new(2), Timestamp::new(3)]);
        assert!(sink
            .events_for(TxnId::new(2))
            .contains(&TxnEvent::Failed {
                txn: TxnId::new(2),
                attempts: 3
            }));
    }

    #[test]
    fn test_wait_times_out_and_fails() {
        let sink = Arc::new(RecordingSink::new());
        let config = EngineConfig {
            max_wait_ms: 30,
            ..EngineConfig::for_testing()
        };
        let ctx = Arc::new(SharedContext::with_sink(
            config,
            [("X".to_string(), 0_i64)],
            Arc::clone(&sink) as Arc<dyn crate::events::EventSink>,
        ));

        // Requester first (ts 0), younger holder registered afterwards (ts 1)
        let requester = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(1),
            Script::read_then_write(["X"]),
            fixed(5),
        )
        .with_max_attempts(1);
        let holder = Arc::new(TxnHandle::new(TxnId::new(2), ctx.clock().now()));
        ctx.directory().register(Arc::clone(&holder));
        ctx.registry()
            .try_acquire(holder.id(), "X", Duration::from_millis(5))
            .unwrap();

        let err = requester.run().unwrap_err();
        match err {
            OrdoError::AttemptsExhausted { last, .. } => {
                assert!(matches!(*last, OrdoError::WaitTimeout { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        let events = sink.events_for(TxnId::new(1));
        assert!(events
            .iter()
            .any(|e| matches!(e, TxnEvent::EnteredWaiting { holder, .. } if *holder == TxnId::new(2))));
        assert!(events.iter().any(|e| matches!(e, TxnEvent::TimedOut { .. })));
        assert!(ctx.graph().is_empty());
    }

    #[test]
    fn test_pending_abort_is_observed_before_first_step() {
        let ctx = context(Arc::new(RecordingSink::new()));
        let txn = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(1),
            Script::read_then_write(["X"]),
            fixed(5),
        )
        .with_max_attempts(1);
        txn.handle().request_abort();

        let err = txn.run().unwrap_err();
        match err {
            OrdoError::AttemptsExhausted { last, .. } => {
                assert!(matches!(*last, OrdoError::ForcedAbort { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctx.registry().read("X").unwrap(), 1);
    }

    /// Does to the writer what the detector does to a victim, once, right
    /// before the write phase.
    struct ReleasedBeforeWrite {
        ctx: Arc<SharedContext<i64>>,
        fired: AtomicBool,
    }

    impl Workload<i64> for ReleasedBeforeWrite {
        fn produce(&self, txn: TxnId, _resource: &str, _read: Option<&i64>) -> i64 {
            if !self.fired.swap(true, Ordering::SeqCst) {
                let handle = self.ctx.directory().get(txn).unwrap();
                handle.request_abort();
                self.ctx.graph().remove_all_for(txn);
                self.ctx.release_all(&handle);
            }
            3
        }
    }

    #[test]
    fn test_release_before_write_counts_as_forced_abort() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Arc::clone(&sink));
        let workload = Arc::new(ReleasedBeforeWrite {
            ctx: Arc::clone(&ctx),
            fired: AtomicBool::new(false),
        });

        let outcome = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(1),
            Script::read_then_write(["X"]),
            workload,
        )
        .run()
        .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(ctx.registry().read("X").unwrap(), 3);

        let aborts: Vec<AbortKind> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                TxnEvent::Aborted { kind, .. } => Some(kind),
                _ => None,
            })
            .collect();
        assert_eq!(aborts, vec![AbortKind::Forced]);
    }

    #[test]
    fn test_unregistered_holder_is_retried_then_vanishes() {
        let sink = Arc::new(RecordingSink::new());
        let ctx = context(Arc::clone(&sink));

        // Holds X in the registry but is not a live transaction
        ctx.registry()
            .try_acquire(TxnId::new(9), "X", Duration::from_millis(5))
            .unwrap();

        let err = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(1),
            Script::read_then_write(["X"]),
            fixed(5),
        )
        .with_max_attempts(1)
        .run()
        .unwrap_err();

        match err {
            OrdoError::AttemptsExhausted { last, .. } => match *last {
                OrdoError::HolderVanished { resource, holder } => {
                    assert_eq!(resource, "X");
                    assert_eq!(holder, TxnId::new(9));
                }
                other => panic!("unexpected last error: {other}"),
            },
            other => panic!("unexpected error: {other}"),
        }

        let events = sink.events_for(TxnId::new(1));
        let attempted = events
            .iter()
            .filter(|e| matches!(e, TxnEvent::LockAttempted { .. }))
            .count();
        assert_eq!(attempted, MAX_VANISHED_RETRIES as usize);
        assert!(!events.iter().any(|e| matches!(
            e,
            TxnEvent::Died { .. } | TxnEvent::EnteredWaiting { .. }
        )));
        assert!(ctx.graph().is_empty());
    }

    /// Records events and lets the terminated holder T9 release X as soon as
    /// T1 comes back for a second try.
    #[derive(Default)]
    struct ReleaseOnRetry {
        ctx: Mutex<Weak<SharedContext<i64>>>,
        attempts: AtomicUsize,
        recorded: RecordingSink,
    }

    impl EventSink for ReleaseOnRetry {
        fn emit(&self, event: TxnEvent) {
            if matches!(&event, TxnEvent::LockAttempted { txn, .. } if *txn == TxnId::new(1))
                && self.attempts.fetch_add(1, Ordering::SeqCst) == 1
            {
                if let Some(ctx) = self.ctx.lock().upgrade() {
                    ctx.registry().release(TxnId::new(9), "X").unwrap();
                }
            }
            self.recorded.emit(event);
        }
    }

    #[test]
    fn test_vanished_holder_release_is_acquired_immediately() {
        let sink = Arc::new(ReleaseOnRetry::default());
        let ctx = Arc::new(SharedContext::with_sink(
            EngineConfig::for_testing(),
            [("X".to_string(), 1_i64)],
            Arc::clone(&sink) as Arc<dyn EventSink>,
        ));
        *sink.ctx.lock() = Arc::downgrade(&ctx);

        ctx.registry()
            .try_acquire(TxnId::new(9), "X", Duration::from_millis(5))
            .unwrap();

        let outcome = Transaction::new(
            Arc::clone(&ctx),
            TxnId::new(1),
            Script::read_then_write(["X"]),
            fixed(5),
        )
        .with_max_attempts(1)
        .run()
        .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(ctx.registry().read("X").unwrap(), 5);

        let events = sink.recorded.events_for(TxnId::new(1));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, TxnEvent::LockAttempted { .. }))
                .count(),
            2
        );
        assert!(events.contains(&TxnEvent::LockAcquired {
            txn: TxnId::new(1),
            resource: "X".to_string(),
            after_wait: false,
        }));
        assert!(!events.iter().any(|e| matches!(
            e,
            TxnEvent::Died { .. } | TxnEvent::EnteredWaiting { .. }
        )));
    }
}
