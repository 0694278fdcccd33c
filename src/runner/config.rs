//! Run configuration.

use crate::bcd::BcdConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Budgets and global switches of a run.
///
/// Strategy parameters live in the flow; this struct only controls how
/// long the flow runs and how it is seeded.
///
/// # Defaults
///
/// ```
/// use u_metaflow::runner::RunConfig;
///
/// let config = RunConfig::default();
/// assert_eq!(config.max_generations, 500);
/// assert!(config.time_limit_ms.is_none());
/// assert!(config.bcd.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum number of generations.
    pub max_generations: usize,

    /// Optional wall-clock limit in milliseconds.
    ///
    /// Checked between generations, so a run may exceed it by one
    /// generation. In distributed runs it is checked at round boundaries.
    pub time_limit_ms: Option<u64>,

    /// Random seed; `None` draws one.
    pub seed: Option<u64>,

    /// Evaluate candidates (and step tribes) in parallel with rayon.
    /// Has no effect without the `parallel` feature.
    pub parallel: bool,

    /// Block-coordinate descent; `None` optimizes all coordinates at once.
    pub bcd: Option<BcdConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_generations: 500,
            time_limit_ms: None,
            seed: None,
            parallel: false,
            bcd: None,
        }
    }
}

impl RunConfig {
    pub fn with_max_generations(mut self, n: usize) -> Self {
        self.max_generations = n;
        self
    }

    pub fn with_time_limit_ms(mut self, ms: u64) -> Self {
        self.time_limit_ms = Some(ms);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_bcd(mut self, bcd: BcdConfig) -> Self {
        self.bcd = Some(bcd);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_generations == 0 {
            return Err(ConfigError::ZeroGenerations);
        }
        if self.time_limit_ms == Some(0) {
            return Err(ConfigError::ZeroTimeLimit);
        }
        if let Some(bcd) = &self.bcd {
            bcd.validate()?;
        }
        Ok(())
    }
}

/// Settings of multi-rank runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedConfig {
    /// Generations between propagation rounds.
    pub steps_per_round: usize,

    /// Tribes per rank (tribes variant only).
    pub n_tribes: usize,

    /// How long a collective may wait for a peer, in milliseconds.
    pub comm_timeout_ms: u64,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            steps_per_round: 10,
            n_tribes: 1,
            comm_timeout_ms: 30_000,
        }
    }
}

impl DistributedConfig {
    pub fn with_steps_per_round(mut self, steps: usize) -> Self {
        self.steps_per_round = steps;
        self
    }

    pub fn with_n_tribes(mut self, n: usize) -> Self {
        self.n_tribes = n;
        self
    }

    pub fn with_comm_timeout_ms(mut self, ms: u64) -> Self {
        self.comm_timeout_ms = ms.max(1);
        self
    }

    pub fn comm_timeout(&self) -> Duration {
        Duration::from_millis(self.comm_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps_per_round == 0 {
            return Err(ConfigError::ZeroRoundLength);
        }
        if self.n_tribes == 0 {
            return Err(ConfigError::ZeroTribes);
        }
        Ok(())
    }
}
