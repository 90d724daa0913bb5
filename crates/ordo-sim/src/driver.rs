//! The simulation driver.
//!
//! Builds one shared context, starts the deadlock detector, launches the
//! configured transactions with staggered starts, waits for every one of them
//! to commit or fail, stops the detector, and reports the final state.

use std::fmt;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use ordo_common::{OrdoError, TxnId};
use ordo_txn::{
    DeadlockDetector, EventSink, ResourceSnapshot, SharedContext, TracingSink, Transaction,
    TxnOutcome, Workload,
};
use rand::Rng;
use tracing::{debug, info};

use crate::config::SimConfig;
use crate::workload::{RandomWorkload, VALUE_RANGE};

/// How a single transaction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnResult {
    /// Committed.
    Committed(TxnOutcome),
    /// Gave up; carries the error message.
    Failed {
        /// The transaction.
        txn_id: TxnId,
        /// Why it failed.
        reason: String,
    },
}

impl TxnResult {
    fn from_run(txn_id: TxnId, result: Result<TxnOutcome, OrdoError>) -> Self {
        match result {
            Ok(outcome) => TxnResult::Committed(outcome),
            Err(err) => TxnResult::Failed {
                txn_id,
                reason: err.to_string(),
            },
        }
    }

    /// Returns the transaction.
    pub fn txn_id(&self) -> TxnId {
        match self {
            TxnResult::Committed(outcome) => outcome.txn_id,
            TxnResult::Failed { txn_id, .. } => *txn_id,
        }
    }

    /// Returns true if the transaction committed.
    pub fn is_committed(&self) -> bool {
        matches!(self, TxnResult::Committed(_))
    }
}

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct SimReport {
    /// Per-transaction results, by id.
    pub transactions: Vec<TxnResult>,
    /// Final resource values and holders.
    pub resources: Vec<ResourceSnapshot<i64>>,
    /// Successful low-level acquisitions.
    pub acquisitions: u64,
    /// Acquisitions that found the resource held.
    pub contentions: u64,
    /// Detector passes run.
    pub detector_passes: u64,
    /// Deadlocks the detector resolved.
    pub deadlocks_resolved: u64,
}

impl SimReport {
    /// Number of committed transactions.
    pub fn committed(&self) -> usize {
        self.transactions.iter().filter(|t| t.is_committed()).count()
    }

    /// Number of failed transactions.
    pub fn failed(&self) -> usize {
        self.transactions.len() - self.committed()
    }

    /// Returns true if no resource is left with a holder.
    pub fn is_clean(&self) -> bool {
        self.resources.iter().all(|r| r.holder.is_none())
    }
}

impl fmt::Display for SimReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Transactions:")?;
        for result in &self.transactions {
            match result {
                TxnResult::Committed(outcome) => writeln!(
                    f,
                    "  {:<6} committed  attempts={} ts={}",
                    outcome.txn_id.to_string(),
                    outcome.attempts,
                    outcome.timestamp
                )?,
                TxnResult::Failed { txn_id, reason } => {
                    writeln!(f, "  {:<6} failed     {}", txn_id.to_string(), reason)?
                }
            }
        }

        writeln!(f, "Resources:")?;
        for resource in &self.resources {
            let holder = resource
                .holder
                .map_or_else(|| "-".to_string(), |h| h.to_string());
            writeln!(
                f,
                "  {:<6} value={:<5} holder={}",
                resource.name, resource.value, holder
            )?;
        }

        write!(
            f,
            "Summary: committed={} failed={} acquisitions={} contentions={} \
             detector_passes={} deadlocks_resolved={}",
            self.committed(),
            self.failed(),
            self.acquisitions,
            self.contentions,
            self.detector_passes,
            self.deadlocks_resolved
        )
    }
}

/// Runs simulations described by a [`SimConfig`].
#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimConfig,
}

impl Simulation {
    /// Creates a simulation after validating `config`.
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Runs with protocol events forwarded to `tracing`.
    pub fn run(&self) -> Result<SimReport> {
        self.run_with_sink(Arc::new(TracingSink))
    }

    /// Runs with protocol events sent to `sink`.
    pub fn run_with_sink(&self, sink: Arc<dyn EventSink>) -> Result<SimReport> {
        let ctx = Arc::new(SharedContext::with_sink(
            self.config.engine.clone(),
            self.initial_resources(),
            sink,
        ));
        for resource in ctx.registry().snapshot() {
            info!(resource = %resource.name, value = resource.value, "initial value");
        }

        let detector = DeadlockDetector::spawn(Arc::clone(&ctx))
            .context("failed to start deadlock detector")?;
        let workload: Arc<dyn Workload<i64>> = Arc::new(RandomWorkload::new(self.config.think));

        let mut workers = Vec::with_capacity(self.config.transactions);
        for index in 1..=self.config.transactions {
            let pause = self.config.stagger.sample();
            if !pause.is_zero() {
                thread::sleep(pause);
            }

            let txn_id = TxnId::new(index as u64);
            let txn = Transaction::new(
                Arc::clone(&ctx),
                txn_id,
                self.config.script_for(index),
                Arc::clone(&workload),
            );
            debug!(txn = %txn_id, ts = %txn.timestamp(), "launching");
            let worker = txn
                .spawn()
                .with_context(|| format!("failed to launch {txn_id}"))?;
            workers.push((txn_id, worker));
        }

        let mut transactions = Vec::with_capacity(workers.len());
        for (txn_id, worker) in workers {
            let result = worker
                .join()
                .map_err(|_| anyhow!("transaction {txn_id} panicked"))?;
            transactions.push(TxnResult::from_run(txn_id, result));
        }

        let detector_stats = detector.detector().stats();
        let detector_passes = detector_stats.passes.load(AtomicOrdering::Relaxed);
        let deadlocks_resolved = detector_stats.deadlocks_found.load(AtomicOrdering::Relaxed);
        detector.stop();

        let registry_stats = ctx.registry().stats();
        let report = SimReport {
            transactions,
            resources: ctx.registry().snapshot(),
            acquisitions: registry_stats.acquisitions.load(AtomicOrdering::Relaxed),
            contentions: registry_stats.contentions.load(AtomicOrdering::Relaxed),
            detector_passes,
            deadlocks_resolved,
        };
        info!(
            committed = report.committed(),
            failed = report.failed(),
            deadlocks = report.deadlocks_resolved,
            "simulation finished"
        );
        Ok(report)
    }

    fn initial_resources(&self) -> Vec<(String, i64)> {
        let mut rng = rand::thread_rng();
        self.config
            .resources
            .iter()
            .map(|spec| {
                let value = spec.initial.unwrap_or_else(|| rng.gen_range(VALUE_RANGE));
                (spec.name.clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OpKind, ResourceSpec, StepSpec};
    use ordo_txn::{RecordingSink, TxnEvent};

    #[test]
    fn test_rejects_invalid_config() {
        let config = SimConfig {
            transactions: 0,
            ..SimConfig::for_testing()
        };
        assert!(Simulation::new(config).is_err());
    }

    #[test]
    fn test_run_terminates_cleanly() {
        let sink = Arc::new(RecordingSink::new());
        let simulation = Simulation::new(SimConfig::for_testing()).unwrap();
        let report = simulation
            .run_with_sink(Arc::clone(&sink) as Arc<dyn EventSink>)
            .unwrap();

        assert_eq!(report.transactions.len(), 4);
        assert_eq!(report.committed() + report.failed(), 4);
        assert!(report.committed() >= 1);
        assert!(report.is_clean());

        let terminal = sink.count(|e| {
            matches!(e, TxnEvent::Committed { .. } | TxnEvent::Failed { .. })
        });
        assert_eq!(terminal, 4);

        for resource in &report.resources {
            assert!(VALUE_RANGE.contains(&resource.value));
        }
    }

    #[test]
    fn test_initial_values() {
        let config = SimConfig {
            resources: vec![
                ResourceSpec {
                    name: "A".to_string(),
                    initial: Some(500),
                },
                ResourceSpec::named("B"),
            ],
            script: vec![StepSpec {
                resource: "A".to_string(),
                op: OpKind::Read,
            }],
            transactions: 2,
            ..SimConfig::for_testing()
        };
        let report = Simulation::new(config).unwrap().run().unwrap();

        // Read-only scripts leave values untouched
        assert!(report.is_clean());
        assert_eq!(report.resources[0].value, 500);
        assert!(VALUE_RANGE.contains(&report.resources[1].value));
    }

    #[test]
    fn test_report_display() {
        let report = Simulation::new(SimConfig {
            transactions: 1,
            ..SimConfig::for_testing()
        })
        .unwrap()
        .run()
        .unwrap();

        let text = report.to_string();
        assert!(text.contains("T1"));
        assert!(text.contains("committed"));
        assert!(text.contains("Summary: committed=1 failed=0"));
    }
}
