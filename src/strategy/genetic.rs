//! Real-valued genetic operators.
//!
//! # Mutation
//!
//! - [`GaussianMutation`]: per group, one random candidate receives additive
//!   normal noise on `k` distinct dimensions; kept only on strict improvement.
//!
//! # Crossover
//!
//! - [`multipoint_crossover`]: `k` distinct cut points, parents alternate per
//!   segment
//! - [`segment_crossover`]: one random contiguous span is swapped
//!
//! Children of [`Crossover`] replace the worst member of their parents'
//! group only when strictly better.
//!
//! # References
//!
//! - De Jong (1975), "An Analysis of the Behavior of a Class of Genetic
//!   Adaptive Systems" (multipoint crossover)

use super::config::{CrossoverKind, MutationConfig};
use super::{evaluate_point, Strategy, StrategyContext};
use crate::error::{ConfigError, MetaflowError};
use crate::flow::ContainerId;
use rand::Rng;
use rand_distr::{Distribution, Normal};

// ============================================================================
// Operators
// ============================================================================

/// Multipoint crossover of two equal-length parents.
///
/// `cuts` is clamped to `len - 1`. Cut `c` means the source parent switches
/// before index `c`.
///
/// # Panics
/// Panics if the parents have different lengths.
pub fn multipoint_crossover<R: Rng>(
    parent1: &[f64],
    parent2: &[f64],
    cuts: usize,
    rng: &mut R,
) -> (Vec<f64>, Vec<f64>) {
    let n = parent1.len();
    assert_eq!(n, parent2.len(), "parents must have equal length");
    if n < 2 || cuts == 0 {
        return (parent1.to_vec(), parent2.to_vec());
    }

    let mut points: Vec<usize> = rand::seq::index::sample(rng, n - 1, cuts.min(n - 1))
        .into_iter()
        .map(|p| p + 1)
        .collect();
    points.sort_unstable();

    let mut child1 = Vec::with_capacity(n);
    let mut child2 = Vec::with_capacity(n);
    let mut swapped = false;
    let mut next = points.iter().peekable();
    for i in 0..n {
        if next.peek() == Some(&&i) {
            swapped = !swapped;
            next.next();
        }
        let (a, b) = if swapped {
            (parent2[i], parent1[i])
        } else {
            (parent1[i], parent2[i])
        };
        child1.push(a);
        child2.push(b);
    }
    (child1, child2)
}

/// Swaps one random non-empty span `[start, end)` between the parents.
///
/// # Panics
/// Panics if the parents have different lengths.
pub fn segment_crossover<R: Rng>(
    parent1: &[f64],
    parent2: &[f64],
    rng: &mut R,
) -> (Vec<f64>, Vec<f64>) {
    let n = parent1.len();
    assert_eq!(n, parent2.len(), "parents must have equal length");
    let mut child1 = parent1.to_vec();
    let mut child2 = parent2.to_vec();
    if n == 0 {
        return (child1, child2);
    }
    let start = rng.random_range(0..n);
    let end = rng.random_range(start + 1..=n);
    child1[start..end].copy_from_slice(&parent2[start..end]);
    child2[start..end].copy_from_slice(&parent1[start..end]);
    (child1, child2)
}

// ============================================================================
// Strategies
// ============================================================================

/// Greedy gaussian dimension tweak.
#[derive(Debug, Clone)]
pub struct GaussianMutation {
    target: ContainerId,
    dims: usize,
    noise: Normal<f64>,
}

impl GaussianMutation {
    pub fn new(target: ContainerId, config: &MutationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let noise = Normal::new(config.mean, config.sigma).map_err(|e| {
            ConfigError::InvalidParameter {
                name: "sigma",
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            target,
            dims: config.dims,
            noise,
        })
    }
}

impl Strategy for GaussianMutation {
    fn name(&self) -> &str {
        "gaussian_mutation"
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        let objective = ctx.objective;
        let rng = &mut *ctx.rng;
        let pop = ctx.storage.get_mut(self.target);
        let dim = pop.dim();
        if dim == 0 {
            return Ok(());
        }
        let k = self.dims.min(dim);

        for group in 0..pop.n_groups() {
            let index = rng.random_range(pop.group_range(group));
            let mut trial = pop.position(index).to_vec();
            for d in rand::seq::index::sample(rng, dim, k) {
                trial[d] += self.noise.sample(rng);
            }
            let fitness = evaluate_point(objective, &trial);
            if fitness < pop.fitness(index) {
                pop.set(index, &trial, fitness);
            }
        }
        Ok(())
    }
}

/// Group-local crossover with fitness-weighted parent selection.
#[derive(Debug, Clone)]
pub struct Crossover {
    target: ContainerId,
    kind: CrossoverKind,
}

impl Crossover {
    pub fn new(target: ContainerId, kind: CrossoverKind) -> Result<Self, ConfigError> {
        kind.validate()?;
        Ok(Self { target, kind })
    }
}

impl Strategy for Crossover {
    fn name(&self) -> &str {
        match self.kind {
            CrossoverKind::Multipoint { .. } => "multipoint_crossover",
            CrossoverKind::Segment => "segment_crossover",
        }
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        let objective = ctx.objective;
        let rng = &mut *ctx.rng;
        let pop = ctx.storage.get_mut(self.target);

        for group in 0..pop.n_groups() {
            let range = pop.group_range(group);
            if range.len() < 2 {
                continue;
            }
            let parents = pop.sample_weighted(range.clone(), 2, rng);
            let (p1, p2) = (pop.position(parents[0]), pop.position(parents[1]));
            let (c1, c2) = match self.kind {
                CrossoverKind::Multipoint { cuts } => multipoint_crossover(p1, p2, cuts, rng),
                CrossoverKind::Segment => segment_crossover(p1, p2, rng),
            };

            for child in [c1, c2] {
                let fitness = evaluate_point(objective, &child);
                if let Some(worst) = pop.worst_in(range.clone()) {
                    if fitness < pop.fitness(worst) {
                        pop.set(worst, &child, fitness);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::create_rng;
    use crate::objective::Objective;
    use crate::strategy::testing::{Harness, Sphere};
    use crate::strategy::InitUniform;

    #[test]
    fn test_multipoint_genes_come_from_parents() {
        let a: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..10).map(|i| -(i as f64) - 1.0).collect();
        let mut rng = create_rng(4);
        for cuts in 1..12 {
            let (c1, c2) = multipoint_crossover(&a, &b, cuts, &mut rng);
            for i in 0..10 {
                assert!(c1[i] == a[i] || c1[i] == b[i]);
                // children are complementary
                assert_eq!(c1[i] + c2[i], a[i] + b[i]);
            }
        }
    }

    #[test]
    fn test_multipoint_one_cut_is_prefix_suffix() {
        let a = [1.0; 6];
        let b = [2.0; 6];
        let (c1, _) = multipoint_crossover(&a, &b, 1, &mut create_rng(0));
        let switch = c1.iter().position(|&v| v == 2.0).unwrap();
        assert!(switch >= 1);
        assert!(c1[switch..].iter().all(|&v| v == 2.0));
        assert!(c1[..switch].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_segment_swaps_contiguous_span() {
        let a = [0.0; 8];
        let b = [1.0; 8];
        let mut rng = create_rng(11);
        for _ in 0..30 {
            let (c1, c2) = segment_crossover(&a, &b, &mut rng);
            let swapped: Vec<usize> = (0..8).filter(|&i| c1[i] == 1.0).collect();
            assert!(!swapped.is_empty());
            assert!(swapped.windows(2).all(|w| w[1] == w[0] + 1));
            assert!(swapped.iter().all(|&i| c2[i] == 0.0));
        }
    }

    #[test]
    fn test_mutation_never_worsens() {
        let mut h = Harness::new(5);
        let id = h.population("main", 12, 4, 3);
        h.apply(&mut InitUniform::new(id), &Sphere(4));
        let mut mutation = GaussianMutation::new(id, &MutationConfig::default().with_dims(2)).unwrap();

        let mut previous: Vec<f64> = h.storage.get(id).candidates().iter().map(|c| c.fitness()).collect();
        for _ in 0..50 {
            h.apply(&mut mutation, &Sphere(4));
            let current: Vec<f64> = h.storage.get(id).candidates().iter().map(|c| c.fitness()).collect();
            for (now, before) in current.iter().zip(&previous) {
                assert!(now <= before);
            }
            previous = current;
        }
        for c in h.storage.get(id).candidates() {
            assert_eq!(c.fitness(), Sphere(4).evaluate(c.position()));
        }
    }

    #[test]
    fn test_crossover_improves_group_worst_only_when_better() {
        let mut h = Harness::new(8);
        let id = h.population("main", 10, 5, 5);
        for i in 0..10 {
            h.storage.get_mut(id).set(i, &[1.0; 5], 5.0);
        }
        let mut crossover = Crossover::new(id, CrossoverKind::Multipoint { cuts: 2 }).unwrap();
        h.apply(&mut crossover, &Sphere(5));
        // identical parents produce equal children, which never replace
        assert!(h.storage.get(id).candidates().iter().all(|c| c.fitness() == 5.0));

        h.apply(&mut InitUniform::new(id), &Sphere(5));
        let best_before = h.storage.get(id).best().unwrap().1;
        for _ in 0..20 {
            h.apply(&mut crossover, &Sphere(5));
        }
        assert!(h.storage.get(id).best().unwrap().1 <= best_before);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(GaussianMutation::new(0, &MutationConfig::default().with_sigma(-1.0)).is_err());
        assert!(Crossover::new(0, CrossoverKind::Multipoint { cuts: 0 }).is_err());
    }
}
