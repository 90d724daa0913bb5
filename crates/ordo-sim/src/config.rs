//! Simulation configuration.
//!
//! A [`SimConfig`] describes one run: the resources, how many transactions
//! compete for them and with which scripts, how long they "think" between
//! steps, how launches are staggered, and the engine settings.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration that reproduces the classic two-resource, four-transaction
//! run:
//!
//! ```toml
//! transactions = 4
//!
//! [[resources]]
//! name = "X"
//!
//! [[resources]]
//! name = "Y"
//! initial = 42
//!
//! [think.first]
//! min_ms = 100
//! max_ms = 500
//!
//! [engine]
//! max_attempts = 3
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ordo_common::EngineConfig;
use ordo_txn::{Op, Script, Step};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A named resource and its optional starting value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource name.
    pub name: String,

    /// Initial payload. Drawn from `1..=100` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<i64>,
}

impl ResourceSpec {
    /// Creates a resource with a random initial value.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: None,
        }
    }
}

/// Operation kind as written in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Read the resource.
    Read,
    /// Write the resource at commit.
    Write,
}

impl From<OpKind> for Op {
    fn from(kind: OpKind) -> Self {
        match kind {
            OpKind::Read => Op::Read,
            OpKind::Write => Op::Write,
        }
    }
}

/// One step of a configured script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Resource name.
    pub resource: String,
    /// Operation.
    pub op: OpKind,
}

impl StepSpec {
    fn new(resource: &str, op: OpKind) -> Self {
        Self {
            resource: resource.to_string(),
            op,
        }
    }
}

/// An inclusive range of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeMs {
    /// Lower bound.
    pub min_ms: u64,
    /// Upper bound.
    pub max_ms: u64,
}

impl RangeMs {
    /// Creates a range.
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// A range that always yields zero.
    pub const fn zero() -> Self {
        Self::new(0, 0)
    }

    /// Draws a duration uniformly from the range.
    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.min_ms..=self.max_ms))
    }
}

/// Simulated think time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkConfig {
    /// Before the first step.
    #[serde(default = "default_first_think")]
    pub first: RangeMs,

    /// Before every later step.
    #[serde(default = "default_step_think")]
    pub step: RangeMs,
}

impl ThinkConfig {
    /// No think time at all.
    pub const fn none() -> Self {
        Self {
            first: RangeMs::zero(),
            step: RangeMs::zero(),
        }
    }
}

impl Default for ThinkConfig {
    fn default() -> Self {
        Self {
            first: default_first_think(),
            step: default_step_think(),
        }
    }
}

/// Simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of transactions to launch.
    #[serde(default = "default_transactions")]
    pub transactions: usize,

    /// Shared resources.
    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceSpec>,

    /// Script used by every transaction without its own entry in `scripts`.
    #[serde(default = "default_script")]
    pub script: Vec<StepSpec>,

    /// Per-transaction scripts; transaction `i` (1-based) uses entry
    /// `(i - 1) % len`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<Vec<StepSpec>>,

    /// Think time.
    #[serde(default)]
    pub think: ThinkConfig,

    /// Delay before each launch.
    #[serde(default = "default_stagger")]
    pub stagger: RangeMs,

    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_transactions() -> usize {
    4
}

fn default_resources() -> Vec<ResourceSpec> {
    vec![ResourceSpec::named("X"), ResourceSpec::named("Y")]
}

fn default_script() -> Vec<StepSpec> {
    vec![
        StepSpec::new("X", OpKind::Read),
        StepSpec::new("Y", OpKind::Read),
        StepSpec::new("X", OpKind::Write),
        StepSpec::new("Y", OpKind::Write),
    ]
}

fn default_first_think() -> RangeMs {
    RangeMs::new(100, 500)
}

fn default_step_think() -> RangeMs {
    RangeMs::new(100, 300)
}

fn default_stagger() -> RangeMs {
    RangeMs::new(100, 300)
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            transactions: default_transactions(),
            resources: default_resources(),
            script: default_script(),
            scripts: Vec::new(),
            think: ThinkConfig::default(),
            stagger: default_stagger(),
            engine: EngineConfig::default(),
        }
    }
}

impl SimConfig {
    /// Fast configuration for tests: no think time, no stagger, short
    /// engine timings.
    pub fn for_testing() -> Self {
        Self {
            think: ThinkConfig::none(),
            stagger: RangeMs::zero(),
            engine: EngineConfig::for_testing(),
            ..Self::default()
        }
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serializes configuration to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Returns the script for transaction `index` (1-based).
    pub fn script_for(&self, index: usize) -> Script {
        let steps = if self.scripts.is_empty() {
            &self.script
        } else {
            &self.scripts[index.saturating_sub(1) % self.scripts.len()]
        };
        Script::new(steps.iter().map(|step| Step {
            resource: step.resource.clone(),
            op: step.op.into(),
        }))
    }

    /// Checks the configuration for mistakes that would make every
    /// transaction fail.
    pub fn validate(&self) -> Result<()> {
        if self.transactions == 0 {
            bail!("transactions must be at least 1");
        }
        if self.resources.is_empty() {
            bail!("at least one resource is required");
        }

        let mut names = HashSet::new();
        for resource in &self.resources {
            if !names.insert(resource.name.as_str()) {
                bail!("duplicate resource '{}'", resource.name);
            }
        }

        let scripts = if self.scripts.is_empty() {
            std::slice::from_ref(&self.script)
        } else {
            self.scripts.as_slice()
        };
        for steps in scripts {
            if steps.is_empty() {
                bail!("scripts must have at least one step");
            }
            if let Some(step) = steps.iter().find(|s| !names.contains(s.resource.as_str())) {
                bail!("script references unknown resource '{}'", step.resource);
            }
        }

        for (label, range) in [
            ("think.first", self.think.first),
            ("think.step", self.think.step),
            ("stagger", self.stagger),
        ] {
            if range.min_ms > range.max_ms {
                bail!("{label}: min_ms {} exceeds max_ms {}", range.min_ms, range.max_ms);
            }
        }

        self.engine.validate()?;
        Ok(())
    }
}
