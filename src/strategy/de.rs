//! Differential evolution, DE/rand/1/bin.
//!
//! For every target `x_i` three distinct other members `a`, `b`, `c` are
//! drawn uniformly and a mutant `a + F (b - c)` is formed. Binomial
//! crossover takes each coordinate from the mutant with probability `CR`;
//! one random coordinate is always taken so the trial differs from the
//! target. The trial replaces the target only if strictly better.
//!
//! Trials are built from the population as it was at the start of the
//! step and replacements are applied afterwards, so every target sees the
//! same donors regardless of iteration order.
//!
//! # References
//!
//! - Storn & Price (1997), "Differential Evolution - A Simple and Efficient
//!   Heuristic for global Optimization over Continuous Spaces"

use super::config::DeConfig;
use super::{Strategy, StrategyContext};
use crate::container::SolutionContainer;
use crate::error::{ConfigError, MetaflowError};
use crate::flow::ContainerId;
use rand::Rng;

/// Minimum population for DE/rand/1 (target plus three donors).
pub const MIN_POPULATION: usize = 4;

/// DE/rand/1/bin over one population.
#[derive(Debug, Clone)]
pub struct DifferentialEvolution {
    target: ContainerId,
    config: DeConfig,
    trials: SolutionContainer,
}

impl DifferentialEvolution {
    pub fn new(target: ContainerId, config: DeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            target,
            config,
            trials: SolutionContainer::default(),
        })
    }
}

/// Draws three distinct indices in `0..n`, all different from `exclude`.
fn pick_donors<R: Rng>(n: usize, exclude: usize, rng: &mut R) -> [usize; 3] {
    let mut picked = [usize::MAX; 3];
    let mut count = 0;
    while count < 3 {
        let idx = rng.random_range(0..n);
        if idx != exclude && !picked[..count].contains(&idx) {
            picked[count] = idx;
            count += 1;
        }
    }
    picked
}

impl Strategy for DifferentialEvolution {
    fn name(&self) -> &str {
        "differential_evolution"
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        let pop = ctx.storage.get(self.target);
        let (n, dim) = (pop.len(), pop.dim());
        if n < MIN_POPULATION {
            return Err(MetaflowError::Strategy {
                strategy: self.name().to_string(),
                reason: format!("population of {n} is smaller than {MIN_POPULATION}"),
            });
        }
        if dim == 0 {
            return Ok(());
        }

        if self.trials.len() != n || self.trials.dim() != dim {
            self.trials = SolutionContainer::new(n, dim, n);
        }
        let rng = &mut *ctx.rng;
        for i in 0..n {
            let [a, b, c] = pick_donors(n, i, rng);
            let forced = rng.random_range(0..dim);
            let (x, xa, xb, xc) = (pop.position(i), pop.position(a), pop.position(b), pop.position(c));
            let trial = self.trials.candidate_mut(i).position_mut();
            for d in 0..dim {
                trial[d] = if d == forced || rng.random_bool(self.config.cr) {
                    xa[d] + self.config.f * (xb[d] - xc[d])
                } else {
                    x[d]
                };
            }
        }

        self.trials.evaluate_all(ctx.objective, ctx.parallel);

        let pop = ctx.storage.get_mut(self.target);
        let mut replaced = 0;
        for (i, trial) in self.trials.candidates().iter().enumerate() {
            if trial.fitness() < pop.fitness(i) {
                pop.set(i, trial.position(), trial.fitness());
                replaced += 1;
            }
        }
        log::trace!("de: {replaced}/{n} trials accepted");
        Ok(())
    }

    fn reset(&mut self) {
        self.trials = SolutionContainer::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::Objective;
    use crate::random::create_rng;
    use crate::strategy::testing::{Harness, Sphere};
    use crate::strategy::InitUniform;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Constant;

    impl Objective for Constant {
        fn dim(&self) -> usize {
            3
        }
        fn evaluate(&self, _x: &[f64]) -> f64 {
            1.0
        }
    }

    /// Every call returns a smaller value than the one before.
    struct Decreasing(AtomicUsize);

    impl Objective for Decreasing {
        fn dim(&self) -> usize {
            3
        }
        fn evaluate(&self, _x: &[f64]) -> f64 {
            -(self.0.fetch_add(1, Ordering::SeqCst) as f64)
        }
    }

    fn seeded(h: &mut Harness, id: ContainerId, fitness: f64) {
        for i in 0..8 {
            let x = [i as f64, -(i as f64), 0.5 * i as f64];
            h.storage.get_mut(id).set(i, &x, fitness);
        }
    }

    #[test]
    fn test_equal_trials_never_replace() {
        let mut h = Harness::new(1);
        let id = h.population("main", 8, 3, 8);
        seeded(&mut h, id, 1.0);
        let before = h.storage.get(id).candidates().to_vec();
        let mut de = DifferentialEvolution::new(id, DeConfig::default()).unwrap();
        h.apply(&mut de, &Constant);
        assert_eq!(h.storage.get(id).candidates(), &before[..]);
    }

    #[test]
    fn test_better_trials_always_replace() {
        let mut h = Harness::new(1);
        let id = h.population("main", 8, 3, 8);
        seeded(&mut h, id, 1.0);
        let before = h.storage.get(id).candidates().to_vec();
        let mut de = DifferentialEvolution::new(id, DeConfig::default().with_cr(1.0)).unwrap();
        h.apply(&mut de, &Decreasing(AtomicUsize::new(0)));
        for (now, old) in h.storage.get(id).candidates().iter().zip(&before) {
            assert!(now.fitness() < old.fitness());
        }
    }

    #[test]
    fn test_donors_distinct() {
        let mut rng = create_rng(3);
        for target in 0..4 {
            let donors = pick_donors(4, target, &mut rng);
            assert!(!donors.contains(&target));
            assert!(donors[0] != donors[1] && donors[1] != donors[2] && donors[0] != donors[2]);
        }
    }

    #[test]
    fn test_too_small_population_errors() {
        let mut h = Harness::new(1);
        let id = h.population("main", 3, 2, 3);
        let mut de = DifferentialEvolution::new(id, DeConfig::default()).unwrap();
        let mut ctx = StrategyContext {
            storage: &mut h.storage,
            objective: &Sphere(2),
            bcd: None,
            rng: &mut h.rng,
            transport: &mut h.transport,
            log: &mut h.log,
            generation: 1,
            parallel: false,
        };
        assert!(matches!(de.apply(&mut ctx), Err(MetaflowError::Strategy { .. })));
    }

    #[test]
    fn test_converges_on_sphere() {
        let mut h = Harness::new(7);
        let id = h.population("main", 20, 3, 20);
        h.apply(&mut InitUniform::new(id), &Sphere(3));
        let mut de = DifferentialEvolution::new(id, DeConfig::default().with_f(0.5).with_cr(0.9)).unwrap();
        for _ in 0..200 {
            h.apply(&mut de, &Sphere(3));
        }
        let best = h.storage.get(id).best().unwrap().1;
        assert!(best < 1e-4, "best {best}");
    }
}
