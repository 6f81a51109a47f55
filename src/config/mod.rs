//! Configuration module
//!
//! Runner settings are layered: config file, then `GRID_RUNNER_*` environment
//! variables, then command-line flags.

pub mod env;
pub mod file;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::{CommandConfig, TargetSlots, WorkerPoolConfig};
use crate::results::ResultsStorage;
use crate::scheduler::{SchedulerConfig, SchedulerError, Strategy};

pub use env::EnvConfig;
pub use file::ConfigFile;

/// Runner configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Distribution strategy
    pub strategy: Strategy,

    /// Targets and their worker counts
    pub targets: Vec<TargetSlots>,

    /// Additional attempts for retryable failures
    pub max_retries: u32,

    /// Stop starting new items after the first failure
    pub bail: bool,

    /// Per-worker spawn timeout in milliseconds
    pub spawn_timeout_ms: u64,

    /// Title substring filter
    pub grep: Option<String>,

    /// Tag expression filter
    pub tags: Option<String>,

    /// Shell command templates
    pub command: CommandConfig,

    /// Where runs are stored; platform data dir when unset
    pub results_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Parallel,
            targets: vec![TargetSlots::new("default", 1)],
            max_retries: 0,
            bail: false,
            spawn_timeout_ms: 30_000,
            grep: None,
            tags: None,
            command: CommandConfig::default(),
            results_dir: None,
        }
    }
}

impl RunnerConfig {
    /// Build the validated scheduler configuration
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, SchedulerError> {
        let pool = WorkerPoolConfig {
            targets: self.targets.clone(),
            max_retries: self.max_retries,
            bail: self.bail,
            spawn_timeout: Duration::from_millis(self.spawn_timeout_ms),
        };

        let config = SchedulerConfig {
            strategy: self.strategy,
            grep: self.grep.clone(),
            tags: self.tags.clone(),
            pool,
        };
        config.validate()?;
        Ok(config)
    }

    /// Storage for saved runs
    pub fn results_storage(&self) -> ResultsStorage {
        match &self.results_dir {
            Some(dir) => ResultsStorage::new(dir),
            None => ResultsStorage::default_dir(),
        }
    }

    /// Replace the target list from `NAME[:N]` specs
    pub fn set_targets<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<()> {
        self.targets = specs
            .iter()
            .map(|s| parse_target(s.as_ref()))
            .collect::<Result<_>>()?;
        Ok(())
    }
}

/// Parse `NAME` or `NAME:WORKERS`; a bare name gets one worker
pub fn parse_target(spec: &str) -> Result<TargetSlots> {
    let spec = spec.trim();
    let (name, workers) = match spec.rsplit_once(':') {
        Some((name, count)) => {
            let workers = count
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid worker count in target '{spec}'"))?;
            (name.trim(), workers)
        }
        None => (spec, 1),
    };

    if name.is_empty() {
        anyhow::bail!("Target '{spec}' has no name");
    }
    Ok(TargetSlots::new(name, workers))
}
