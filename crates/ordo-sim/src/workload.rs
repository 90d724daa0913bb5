//! Random think time and payloads.

use std::ops::RangeInclusive;
use std::thread;

use ordo_common::TxnId;
use ordo_txn::{Op, Script, Workload};
use rand::Rng;
use tracing::trace;

use crate::config::ThinkConfig;

/// Payloads written by [`RandomWorkload`] are drawn from this range.
pub const VALUE_RANGE: RangeInclusive<i64> = 1..=100;

/// Sleeps a random think time before each step and writes random values.
#[derive(Debug, Clone)]
pub struct RandomWorkload {
    think: ThinkConfig,
}

impl RandomWorkload {
    /// Creates a workload with the given think times.
    pub fn new(think: ThinkConfig) -> Self {
        Self { think }
    }
}

impl Workload<i64> for RandomWorkload {
    /// `think.first` before the first step, `think.step` before every later
    /// one, except that a run of writes shares a single pause.
    fn think(&self, txn: TxnId, script: &Script, index: usize) {
        let steps = script.steps();
        let op = |i: usize| steps.get(i).map(|step| step.op);
        let range = match (index.checked_sub(1).and_then(op), op(index)) {
            (None, _) => self.think.first,
            (Some(Op::Write), Some(Op::Write)) => return,
            _ => self.think.step,
        };
        let pause = range.sample();
        if !pause.is_zero() {
            trace!(%txn, step = index, ?pause, "thinking");
            thread::sleep(pause);
        }
    }

    fn produce(&self, txn: TxnId, resource: &str, read: Option<&i64>) -> i64 {
        let value = rand::thread_rng().gen_range(VALUE_RANGE);
        trace!(%txn, resource, ?read, value, "produced");
        value
    }
}
