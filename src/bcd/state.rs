//! Full-dimension state of a block-coordinate run.

use super::config::BcdConfig;
use super::types::{BlockMask, BlockSchedule, BlockSelector};
use crate::container::Candidate;
use crate::objective::{sanitize_fitness, BlockView, Objective};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::Arc;

/// The full solution, its fitness and the active block.
///
/// Strategies never see the full vector. They work on candidates of the
/// active block's width, and the runtime folds their best back in through
/// [`fold_partial`](Self::fold_partial).
#[derive(Debug, Clone)]
pub struct BcdState {
    config: BcdConfig,
    selector: BlockSelector,
    state: Vec<f64>,
    fitness: f64,
    view: Arc<BlockView>,
}

impl BcdState {
    /// Samples an initial state uniformly within bounds, evaluates it and
    /// selects the first block.
    ///
    /// `selector_rng` must already be seeded for the configured scope.
    pub fn new(
        config: BcdConfig,
        objective: &dyn Objective,
        selector_rng: StdRng,
        rng: &mut StdRng,
    ) -> Self {
        let dim = objective.dim();
        let state: Vec<f64> = (0..dim)
            .map(|i| {
                let (lo, hi) = (objective.lower_bound(i), objective.upper_bound(i));
                if hi > lo {
                    rng.random_range(lo..hi)
                } else {
                    lo
                }
            })
            .collect();
        let (fitness, clamped) = sanitize_fitness(objective.evaluate(&state));
        if clamped {
            log::warn!("initial BCD state produced a non-finite fitness");
        }

        let schedule = BlockSchedule::new(dim, config.block_dim);
        let mut selector = BlockSelector::new(schedule, config.selection, selector_rng);
        let mask = selector.next_mask().into_indices();
        let view = Arc::new(BlockView {
            state: state.clone(),
            mask,
        });

        Self {
            config,
            selector,
            state,
            fitness,
            view,
        }
    }

    pub fn config(&self) -> &BcdConfig {
        &self.config
    }

    pub fn state(&self) -> &[f64] {
        &self.state
    }

    pub fn fitness(&self) -> f64 {
        self.fitness
    }

    pub fn mask(&self) -> &[usize] {
        &self.view.mask
    }

    /// Width of the active block.
    pub fn active_dim(&self) -> usize {
        self.view.mask.len()
    }

    /// Number of masks selected so far, including the first.
    pub fn sweeps(&self) -> usize {
        self.selector.sweeps()
    }

    /// Snapshot handed to the blocked objective.
    pub fn view(&self) -> Arc<BlockView> {
        Arc::clone(&self.view)
    }

    /// Full vector obtained by writing `partial` into the state.
    pub fn expand(&self, partial: &[f64]) -> Vec<f64> {
        self.view.expand(partial)
    }

    /// Projects the state onto the active block.
    pub fn projection(&self) -> Vec<f64> {
        self.view.project(&self.state)
    }

    /// Scatters a partial solution into the state if strictly better.
    ///
    /// Indices outside the active block are left untouched.
    pub fn fold_partial(&mut self, partial: &Candidate) -> bool {
        if partial.fitness() >= self.fitness {
            return false;
        }
        for (&index, &value) in self.view.mask.iter().zip(partial.position()) {
            self.state[index] = value;
        }
        self.fitness = partial.fitness();
        self.refresh_view();
        true
    }

    /// Replaces the state by a full vector if strictly better.
    pub fn adopt(&mut self, full: &[f64], fitness: f64) -> bool {
        if fitness >= self.fitness || full.len() != self.state.len() {
            return false;
        }
        self.state.copy_from_slice(full);
        self.fitness = fitness;
        self.refresh_view();
        true
    }

    /// Advances the selector and activates the next block.
    pub fn advance(&mut self) -> &[usize] {
        let mask = self.selector.next_mask();
        self.set_mask(mask);
        &self.view.mask
    }

    /// Activates a mask chosen elsewhere (e.g. broadcast by rank 0).
    pub fn set_mask(&mut self, mask: BlockMask) {
        self.view = Arc::new(BlockView {
            state: self.state.clone(),
            mask: mask.into_indices(),
        });
    }

    fn refresh_view(&mut self) {
        self.view = Arc::new(BlockView {
            state: self.state.clone(),
            mask: self.view.mask.clone(),
        });
    }
}
