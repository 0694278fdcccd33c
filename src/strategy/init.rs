//! Population initializers.

use super::{sample_position, Strategy, StrategyContext};
use crate::error::MetaflowError;
use crate::flow::ContainerId;
use rand_distr::{Distribution, Normal};

/// Samples every candidate uniformly within bounds and evaluates it.
#[derive(Debug, Clone)]
pub struct InitUniform {
    target: ContainerId,
}

impl InitUniform {
    pub fn new(target: ContainerId) -> Self {
        Self { target }
    }
}

impl Strategy for InitUniform {
    fn name(&self) -> &str {
        "init_uniform"
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        let objective = ctx.objective;
        for c in ctx.storage.get_mut(self.target).candidates_mut() {
            sample_position(ctx.rng, objective, c.position_mut());
        }
        ctx.evaluate_all(self.target);
        Ok(())
    }
}

/// Samples `N(mid, (width / 6)^2)` per coordinate, clamped to bounds, and
/// evaluates.
///
/// Roughly 99.7% of the mass falls inside the bounds before clamping.
#[derive(Debug, Clone)]
pub struct InitNormal {
    target: ContainerId,
}

impl InitNormal {
    pub fn new(target: ContainerId) -> Self {
        Self { target }
    }
}

impl Strategy for InitNormal {
    fn name(&self) -> &str {
        "init_normal"
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        let objective = ctx.objective;
        let dim = ctx.storage.get(self.target).dim();
        let distributions: Vec<(Option<Normal<f64>>, f64, f64)> = (0..dim)
            .map(|i| {
                let (lo, hi) = (objective.lower_bound(i), objective.upper_bound(i));
                let normal = Normal::new((lo + hi) / 2.0, (hi - lo) / 6.0)
                    .ok()
                    .filter(|_| hi > lo);
                (normal, lo, hi)
            })
            .collect();

        for c in ctx.storage.get_mut(self.target).candidates_mut() {
            for (v, (normal, lo, hi)) in c.position_mut().iter_mut().zip(&distributions) {
                *v = match normal {
                    Some(n) => n.sample(ctx.rng).clamp(*lo, *hi),
                    None => *lo,
                };
            }
        }
        ctx.evaluate_all(self.target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::Objective;
    use crate::strategy::testing::{Harness, Sphere};

    #[test]
    fn test_uniform_within_bounds_and_evaluated() {
        let mut h = Harness::new(1);
        let id = h.population("main", 20, 3, 5);
        h.apply(&mut InitUniform::new(id), &Sphere(3));
        let pop = h.storage.get(id);
        for c in pop.candidates() {
            assert!(c.position().iter().all(|v| (-5.12..5.12).contains(v)));
            assert!(c.is_evaluated());
            assert_eq!(c.fitness(), Sphere(3).evaluate(c.position()));
        }
    }

    #[test]
    fn test_normal_clamped_and_centered() {
        let mut h = Harness::new(2);
        let id = h.population("main", 500, 2, 500);
        h.apply(&mut InitNormal::new(id), &Sphere(2));
        let pop = h.storage.get(id);
        let mut mean = 0.0;
        for c in pop.candidates() {
            assert!(c.position().iter().all(|v| (-5.12..=5.12).contains(v)));
            assert!(c.is_evaluated());
            mean += c.position()[0];
        }
        mean /= 500.0;
        assert!(mean.abs() < 0.3, "mean {mean}");
    }

    #[test]
    fn test_same_seed_same_population() {
        let run = |seed| {
            let mut h = Harness::new(seed);
            let id = h.population("main", 5, 4, 5);
            h.apply(&mut InitUniform::new(id), &Sphere(4));
            h.storage.get(id).candidates().to_vec()
        };
        assert_eq!(run(9), run(9));
        assert_ne!(run(9), run(10));
    }
}
