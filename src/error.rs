//! Error taxonomy.
//!
//! Three kinds of failure exist at this layer:
//!
//! - [`ConfigError`]: detected while compiling a flow, never during a run.
//! - Communication failures: a collective exchange could not complete.
//!   Fatal for every rank of the run.
//! - Strategy failures: a strategy reported an unrecoverable condition.
//!
//! Numeric degeneracies (singular covariance, non-finite fitness) are not
//! errors; the owning strategy recovers locally and emits a `log::warn!`.
//! Reaching a generation or time budget is not an error either; see
//! [`StopReason`](crate::runner::StopReason).

/// Invalid configuration detected at compile time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("dimension must be at least 1")]
    ZeroDimension,

    #[error("block size must be at least 1")]
    ZeroBlockSize,

    #[error("container `{0}` must hold at least one candidate")]
    EmptyContainer(String),

    #[error("container `{0}` must have a group size of at least 1")]
    ZeroGroupSize(String),

    #[error("container `{0}` is defined more than once")]
    DuplicateContainer(String),

    #[error("container `{0}` does not exist")]
    UnknownContainer(String),

    #[error("PSO memory `{0}` does not exist")]
    UnknownMemory(String),

    #[error("PSO memory `{0}` is defined more than once")]
    DuplicateMemory(String),

    #[error("{strategy} needs at least {required} candidates in `{container}`, found {found}")]
    PopulationTooSmall {
        strategy: &'static str,
        container: String,
        required: usize,
        found: usize,
    },

    #[error("probability must lie in [0, 1], got {0}")]
    InvalidProbability(f64),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("max_generations must be at least 1")]
    ZeroGenerations,

    #[error("time_limit_ms must be positive or None")]
    ZeroTimeLimit,

    #[error("steps_per_round must be at least 1")]
    ZeroRoundLength,

    #[error("n_tribes must be at least 1")]
    ZeroTribes,

    #[error("generation flow is empty")]
    EmptyGenerationFlow,

    #[error("`{step}` exchanges with other ranks and cannot run under `{control}`, which decides per rank")]
    CollectiveUnderLocalControl { step: String, control: &'static str },
}

/// Fatal error surfaced by the runtime.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetaflowError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("communication failure: {0}")]
    Communication(String),

    #[error("strategy `{strategy}` failed: {reason}")]
    Strategy {
        strategy: String,
        reason: String,
    },

    #[error("illegal tribe transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: crate::distributed::TribePhase,
        to: crate::distributed::TribePhase,
    },
}

impl MetaflowError {
    /// Builds a [`MetaflowError::Communication`] from any displayable cause.
    pub fn comm(cause: impl std::fmt::Display) -> Self {
        MetaflowError::Communication(cause.to_string())
    }

    /// Returns `true` for failures that must abort every rank.
    pub fn is_communication(&self) -> bool {
        matches!(self, MetaflowError::Communication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: MetaflowError = ConfigError::ZeroBlockSize.into();
        assert_eq!(
            err.to_string(),
            "configuration error: block size must be at least 1"
        );
        assert!(!err.is_communication());
    }

    #[test]
    fn test_comm_helper() {
        let err = MetaflowError::comm("rank 2 left");
        assert!(err.is_communication());
        assert_eq!(err.to_string(), "communication failure: rank 2 left");
    }
}
