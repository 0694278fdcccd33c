//! Estimation of distribution.
//!
//! Fits a normal distribution to the elites of a population, samples new
//! candidates from it and merges them back (replace worst while better).
//!
//! # Degenerate covariance
//!
//! The full-covariance model factors the covariance with Cholesky. When the
//! factorization fails or a pivot falls below `sqrt(min_variance)` (e.g.
//! fewer distinct elites than dimensions), the strategy samples from the
//! diagonal model instead and emits a warning.
//!
//! # References
//!
//! - Larrañaga & Lozano (2002), "Estimation of Distribution Algorithms"

use super::config::{EdaConfig, EdaModel};
use super::{Strategy, StrategyContext};
use crate::container::SolutionContainer;
use crate::error::{ConfigError, MetaflowError};
use crate::flow::ContainerId;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

/// Fitted sampling model.
enum Model {
    Diagonal { std: DVector<f64> },
    Full { factor: DMatrix<f64> },
}

/// EDA over a single population.
#[derive(Debug, Clone)]
pub struct Eda {
    target: ContainerId,
    config: EdaConfig,
    samples: SolutionContainer,
}

impl Eda {
    pub fn new(target: ContainerId, config: EdaConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            target,
            config,
            samples: SolutionContainer::default(),
        })
    }

    fn fit(&self, elites: &DMatrix<f64>, mean: &DVector<f64>) -> Model {
        let n = elites.nrows() as f64;
        let centered = DMatrix::from_fn(elites.nrows(), elites.ncols(), |r, c| {
            elites[(r, c)] - mean[c]
        });

        let diagonal = || {
            let std = DVector::from_iterator(
                centered.ncols(),
                centered.column_iter().map(|col| {
                    let var = col.norm_squared() / (n - 1.0);
                    var.max(self.config.min_variance).sqrt()
                }),
            );
            Model::Diagonal { std }
        };

        match self.config.model {
            EdaModel::Diagonal => diagonal(),
            EdaModel::FullCovariance => {
                let cov = centered.transpose() * &centered / (n - 1.0);
                let pivot_floor = self.config.min_variance.sqrt();
                match cov.cholesky() {
                    Some(chol) => {
                        let factor = chol.l();
                        let min_pivot = factor
                            .diagonal()
                            .iter()
                            .copied()
                            .fold(f64::INFINITY, f64::min);
                        if min_pivot > pivot_floor {
                            Model::Full { factor }
                        } else {
                            log::warn!("eda: Cholesky pivot {min_pivot:e} too small, sampling diagonal");
                            diagonal()
                        }
                    }
                    None => {
                        log::warn!("eda: covariance is not positive definite, sampling diagonal");
                        diagonal()
                    }
                }
            }
        }
    }
}

impl Strategy for Eda {
    fn name(&self) -> &str {
        match self.config.model {
            EdaModel::Diagonal => "eda_diagonal",
            EdaModel::FullCovariance => "eda_full_covariance",
        }
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        let pop = ctx.storage.get(self.target);
        let dim = pop.dim();
        let elite_ids: Vec<usize> = pop
            .best_k(self.config.elites)
            .into_iter()
            .filter(|&i| pop.candidate(i).is_evaluated())
            .collect();
        if elite_ids.len() < 2 || dim == 0 {
            log::debug!("eda: fewer than two evaluated elites, skipping");
            return Ok(());
        }

        let elites = DMatrix::from_fn(elite_ids.len(), dim, |r, c| pop.position(elite_ids[r])[c]);
        let mean = DVector::from_fn(dim, |c, _| elites.column(c).mean());
        let model = self.fit(&elites, &mean);

        if self.samples.len() != self.config.samples || self.samples.dim() != dim {
            self.samples = SolutionContainer::new(self.config.samples, dim, self.config.samples);
        }
        let rng = &mut *ctx.rng;
        for candidate in self.samples.candidates_mut() {
            let z = DVector::from_fn(dim, |_, _| rng.sample::<f64, _>(StandardNormal));
            let x = match &model {
                Model::Diagonal { std } => &mean + std.component_mul(&z),
                Model::Full { factor } => &mean + factor * z,
            };
            candidate.position_mut().copy_from_slice(x.as_slice());
        }

        self.samples.evaluate_all(ctx.objective, ctx.parallel);
        ctx.storage.get_mut(self.target).replace_with(&self.samples);
        Ok(())
    }

    fn reset(&mut self) {
        self.samples = SolutionContainer::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::{Harness, Sphere};
    use crate::strategy::InitUniform;

    fn run(model: EdaModel, steps: usize) -> (f64, f64) {
        let mut h = Harness::new(3);
        let id = h.population("main", 30, 3, 30);
        h.apply(&mut InitUniform::new(id), &Sphere(3));
        let before = h.storage.get(id).best().unwrap().1;
        let mut eda = Eda::new(id, EdaConfig::default().with_model(model)).unwrap();
        for _ in 0..steps {
            h.apply(&mut eda, &Sphere(3));
        }
        (before, h.storage.get(id).best().unwrap().1)
    }

    #[test]
    fn test_full_covariance_improves() {
        let (before, after) = run(EdaModel::FullCovariance, 30);
        assert!(after <= before);
        assert!(after < 0.5, "after {after}");
    }

    #[test]
    fn test_diagonal_improves() {
        let (before, after) = run(EdaModel::Diagonal, 30);
        assert!(after <= before);
        assert!(after < 0.5, "after {after}");
    }

    #[test]
    fn test_identical_elites_fall_back_to_diagonal() {
        let mut h = Harness::new(1);
        let id = h.population("main", 10, 4, 10);
        for i in 0..10 {
            h.storage.get_mut(id).set(i, &[1.0; 4], 4.0);
        }
        let mut eda = Eda::new(id, EdaConfig::default()).unwrap();
        h.apply(&mut eda, &Sphere(4));

        // Diagonal floor std is sqrt(min_variance) = 1e-6.
        let floor = EdaConfig::default().min_variance.sqrt();
        let samples: Vec<f64> = eda
            .samples
            .candidates()
            .iter()
            .flat_map(|c| c.position().iter().copied())
            .collect();
        assert_eq!(samples.len(), 20 * 4);
        assert!(samples.iter().any(|&v| v != 1.0), "samples did not move");
        assert!(samples.iter().all(|v| (v - 1.0).abs() < 100.0 * floor));
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
        assert!(var.sqrt() > 0.1 * floor && var.sqrt() < 10.0 * floor, "std {}", var.sqrt());

        let pop = h.storage.get(id);
        assert!(pop.candidates().iter().any(|c| c.position() != [1.0; 4]));
        for c in pop.candidates() {
            assert!(c.position().iter().all(|v| (v - 1.0).abs() < 100.0 * floor));
            assert!(c.fitness() <= 4.0);
        }
    }

    #[test]
    fn test_unevaluated_population_is_skipped() {
        let mut h = Harness::new(1);
        let id = h.population("main", 10, 2, 10);
        let mut eda = Eda::new(id, EdaConfig::default()).unwrap();
        h.apply(&mut eda, &Sphere(2));
        assert!(h.storage.get(id).best().unwrap().1.is_infinite());
    }

    #[test]
    fn test_merge_keeps_population_size() {
        let mut h = Harness::new(2);
        let id = h.population("main", 12, 2, 12);
        h.apply(&mut InitUniform::new(id), &Sphere(2));
        let mut eda = Eda::new(id, EdaConfig::default().with_samples(50)).unwrap();
        h.apply(&mut eda, &Sphere(2));
        assert_eq!(h.storage.get(id).len(), 12);
    }
}
