//! Strategy library.
//!
//! A [`Strategy`] is a small-state transformation over the containers of a
//! runtime. Strategies are bound to flow-graph leaves at compile time and
//! invoked once per visit through [`Strategy::apply`].
//!
//! | Strategy               | Effect                                              |
//! |------------------------|-----------------------------------------------------|
//! | [`InitUniform`]        | uniform sampling within bounds, then evaluation     |
//! | [`InitNormal`]         | normal around the bound midpoint, clamped           |
//! | [`GaussianMutation`]   | greedy additive noise on `k` dims per group         |
//! | [`Crossover`]          | multipoint or segment, children replace group worst |
//! | [`Eda`]                | fit elites, sample, merge                           |
//! | [`DifferentialEvolution`] | DE/rand/1/bin with strict replacement            |
//! | [`Pso`]                | one particle swarm step on a PSO memory             |
//! | [`TakeBest`]           | replace worst of one container with best of another |
//! | [`Evaluate`]           | evaluate a container                                |
//! | [`PropagateBest`]      | exchange bests across ranks                         |
//! | [`LogBest`]            | append a record to the optimization log             |
//!
//! All strategies minimize and draw randomness only from the context RNG,
//! so a run is reproducible from its seed.

mod comm;
mod config;
mod container_ops;
pub(crate) mod de;
mod eda;
mod genetic;
mod init;
mod logging;
mod pso;

pub use comm::PropagateBest;
pub use config::{CrossoverKind, DeConfig, EdaConfig, EdaModel, MutationConfig, PsoConfig, Topology};
pub use container_ops::{Evaluate, TakeBest};
pub use de::DifferentialEvolution;
pub use eda::Eda;
pub use genetic::{Crossover, GaussianMutation};
pub use init::{InitNormal, InitUniform};
pub use logging::LogBest;
pub use pso::Pso;

use crate::bcd::BcdState;
use crate::container::Candidate;
use crate::distributed::Transport;
use crate::error::MetaflowError;
use crate::flow::{ContainerId, RuntimeStorage};
use crate::objective::Objective;
use crate::runner::OptimizationLog;
use rand::rngs::StdRng;
use rand::Rng;
use std::ops::Range;

/// Everything a strategy may touch during one application.
pub struct StrategyContext<'a> {
    pub storage: &'a mut RuntimeStorage,
    /// The objective at the current working width (blocked under BCD).
    pub objective: &'a dyn Objective,
    /// Full-dimension state when BCD is active.
    pub bcd: Option<&'a BcdState>,
    pub rng: &'a mut StdRng,
    pub transport: &'a mut dyn Transport,
    pub log: &'a mut OptimizationLog,
    /// Index of the current generation; 0 during setup.
    pub generation: usize,
    pub parallel: bool,
}

impl StrategyContext<'_> {
    /// Evaluates `range` of a container. Returns the number of clamped values.
    pub fn evaluate(&mut self, id: ContainerId, range: Range<usize>) -> usize {
        self.storage
            .get_mut(id)
            .evaluate_range(self.objective, range, self.parallel)
    }

    /// Evaluates a whole container.
    pub fn evaluate_all(&mut self, id: ContainerId) -> usize {
        let len = self.storage.get(id).len();
        self.evaluate(id, 0..len)
    }

    /// Evaluates a free vector at the working width.
    pub fn evaluate_vector(&self, x: &[f64]) -> f64 {
        evaluate_point(self.objective, x)
    }

    /// Expands a working-width vector to the full dimension.
    pub fn full_vector(&self, partial: &[f64]) -> Vec<f64> {
        match self.bcd {
            Some(bcd) => bcd.expand(partial),
            None => partial.to_vec(),
        }
    }

    /// Maps a full-dimension candidate onto the working width.
    pub fn localize(&self, full: &Candidate) -> Candidate {
        localize(self.objective, self.bcd, full)
    }

    /// Best full-dimension solution known to this runtime.
    pub fn best_full(&self, container: Option<ContainerId>) -> Option<Candidate> {
        best_full(&*self.storage, self.bcd, container)
    }
}

/// Maps a full-dimension candidate onto the working width.
///
/// Under BCD the projection is re-evaluated with `objective` (the blocked
/// objective), since its fitness depends on the state outside the block.
/// Candidates of the wrong length are returned unchanged.
pub(crate) fn localize(objective: &dyn Objective, bcd: Option<&BcdState>, full: &Candidate) -> Candidate {
    match bcd {
        Some(bcd) if full.dim() == bcd.state().len() => {
            let partial = bcd.view().project(full.position());
            let fitness = evaluate_point(objective, &partial);
            Candidate::new(partial, fitness)
        }
        _ => full.clone(),
    }
}

/// Best full-dimension solution in `storage` (or one container of it).
///
/// Under BCD this is the better of the full state and the expanded best
/// partial candidate.
pub(crate) fn best_full(
    storage: &RuntimeStorage,
    bcd: Option<&BcdState>,
    container: Option<ContainerId>,
) -> Option<Candidate> {
    let partial = match container {
        Some(id) => storage.get(id).best_candidate().filter(|c| c.is_evaluated()),
        None => storage.best(),
    };
    match (bcd, partial) {
        (Some(bcd), Some(c)) if c.fitness() < bcd.fitness() => {
            Some(Candidate::new(bcd.expand(c.position()), c.fitness()))
        }
        (Some(bcd), _) => Some(Candidate::new(bcd.state().to_vec(), bcd.fitness())),
        (None, c) => c.cloned(),
    }
}

/// A transformation over the containers of a runtime.
///
/// # Examples
///
/// ```
/// use u_metaflow::error::MetaflowError;
/// use u_metaflow::strategy::{Strategy, StrategyContext};
///
/// /// Shrinks every candidate of container 0 toward the origin.
/// struct Shrink;
///
/// impl Strategy for Shrink {
///     fn name(&self) -> &str {
///         "shrink"
///     }
///
///     fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
///         for c in ctx.storage.get_mut(0).candidates_mut() {
///             c.position_mut().iter_mut().for_each(|v| *v *= 0.5);
///             c.set_fitness(f64::INFINITY);
///         }
///         ctx.evaluate_all(0);
///         Ok(())
///     }
/// }
/// ```
pub trait Strategy: Send {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Applies the strategy once.
    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError>;

    /// Clears internal state after the working layout changed.
    fn reset(&mut self) {}
}

/// Evaluates one vector and sanitizes the result.
pub(crate) fn evaluate_point(objective: &dyn Objective, x: &[f64]) -> f64 {
    let (fitness, clamped) = crate::objective::sanitize_fitness(objective.evaluate(x));
    if clamped {
        log::warn!("non-finite fitness clamped");
    }
    fitness
}

/// Samples `U[lo, hi)`, or returns `lo` for an empty interval.
pub(crate) fn sample_in<R: Rng>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        rng.random_range(lo..hi)
    } else {
        lo
    }
}

/// Writes a uniform sample within the objective bounds into `x`.
pub(crate) fn sample_position<R: Rng>(rng: &mut R, objective: &dyn Objective, x: &mut [f64]) {
    for (i, v) in x.iter_mut().enumerate() {
        *v = sample_in(rng, objective.lower_bound(i), objective.upper_bound(i));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for strategy tests.

    use super::*;
    use crate::container::SolutionContainer;
    use crate::distributed::SingleRank;
    use crate::flow::ContainerRole;
    use crate::random::create_rng;

    pub struct Sphere(pub usize);

    impl Objective for Sphere {
        fn dim(&self) -> usize {
            self.0
        }
        fn evaluate(&self, x: &[f64]) -> f64 {
            x.iter().map(|v| v * v).sum()
        }
        fn lower_bound(&self, _index: usize) -> f64 {
            -5.12
        }
        fn upper_bound(&self, _index: usize) -> f64 {
            5.12
        }
    }

    /// Storage, RNG, transport and log for driving a strategy by hand.
    pub struct Harness {
        pub storage: RuntimeStorage,
        pub rng: StdRng,
        pub transport: SingleRank,
        pub log: OptimizationLog,
    }

    impl Harness {
        pub fn new(seed: u64) -> Self {
            Self {
                storage: RuntimeStorage::new(),
                rng: create_rng(seed),
                transport: SingleRank::new(),
                log: OptimizationLog::new(),
            }
        }

        pub fn population(&mut self, name: &str, n: usize, dim: usize, group: usize) -> ContainerId {
            self.storage
                .insert(name, ContainerRole::Population, SolutionContainer::new(n, dim, group))
                .unwrap()
        }

        pub fn apply(&mut self, strategy: &mut dyn Strategy, objective: &dyn Objective) {
            let mut ctx = StrategyContext {
                storage: &mut self.storage,
                objective,
                bcd: None,
                rng: &mut self.rng,
                transport: &mut self.transport,
                log: &mut self.log,
                generation: 1,
                parallel: false,
            };
            strategy.apply(&mut ctx).unwrap();
        }
    }
}
