//! Block-coordinate descent configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// How the next active block is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockSelection {
    /// Contiguous blocks in order; one cycle covers every index once.
    RoundRobin,
    /// A uniformly random contiguous block per sweep.
    UniformBlock,
    /// `block_dim` distinct indices drawn uniformly from `0..dim`.
    RandomSubset,
}

/// Which participants share a block selection.
///
/// | scope     | selector seed          | coordination                 |
/// |-----------|------------------------|------------------------------|
/// | `Cluster` | run seed               | rank 0 selects and broadcasts |
/// | `Rank`    | run seed, rank         | tribes of a rank agree       |
/// | `Tribe`   | run seed, rank, tribe  | every tribe is independent   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskScope {
    Cluster,
    Rank,
    Tribe,
}

/// Configuration for block-coordinate descent.
///
/// Has no `Default`: the mask scope changes what propagated candidates
/// mean and must be chosen by the caller.
///
/// # Examples
///
/// ```
/// use u_metaflow::bcd::{BcdConfig, BlockSelection, MaskScope};
///
/// let config = BcdConfig::new(100, BlockSelection::RoundRobin, MaskScope::Cluster);
/// assert!(config.is_active(1000));
/// assert!(!config.is_active(100));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BcdConfig {
    /// Width of the active block.
    pub block_dim: usize,

    pub selection: BlockSelection,

    pub scope: MaskScope,
}

impl BcdConfig {
    pub fn new(block_dim: usize, selection: BlockSelection, scope: MaskScope) -> Self {
        Self {
            block_dim,
            selection,
            scope,
        }
    }

    pub fn with_block_dim(mut self, block_dim: usize) -> Self {
        self.block_dim = block_dim;
        self
    }

    pub fn with_selection(mut self, selection: BlockSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_scope(mut self, scope: MaskScope) -> Self {
        self.scope = scope;
        self
    }

    /// Whether a problem of dimension `dim` is actually partitioned.
    pub fn is_active(&self, dim: usize) -> bool {
        self.block_dim < dim
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_dim == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        Ok(())
    }
}
