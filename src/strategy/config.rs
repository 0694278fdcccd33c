//! Strategy parameters.
//!
//! Each search strategy takes a small parameter struct with defaults,
//! consuming `with_*` builders and a `validate()` that is called when the
//! flow is compiled.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

// ============================================================================
// Mutation
// ============================================================================

/// Parameters of the gaussian dimension-tweak mutation.
///
/// # Defaults
///
/// ```
/// use u_metaflow::strategy::MutationConfig;
///
/// let config = MutationConfig::default();
/// assert_eq!(config.dims, 1);
/// assert_eq!(config.sigma, 0.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationConfig {
    /// Number of dimensions perturbed per mutated candidate.
    pub dims: usize,

    /// Mean of the additive noise.
    pub mean: f64,

    /// Standard deviation of the additive noise.
    pub sigma: f64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            dims: 1,
            mean: 0.0,
            sigma: 0.5,
        }
    }
}

impl MutationConfig {
    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = dims;
        self
    }

    pub fn with_mean(mut self, mean: f64) -> Self {
        self.mean = mean;
        self
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dims == 0 {
            return Err(invalid("dims", "must be at least 1"));
        }
        if !self.mean.is_finite() {
            return Err(invalid("mean", "must be finite"));
        }
        if !(self.sigma.is_finite() && self.sigma > 0.0) {
            return Err(invalid("sigma", format!("must be positive, got {}", self.sigma)));
        }
        Ok(())
    }
}

// ============================================================================
// Crossover
// ============================================================================

/// Crossover operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossoverKind {
    /// `cuts` distinct cut points; parents alternate per segment.
    Multipoint { cuts: usize },
    /// One random contiguous span is swapped between the parents.
    Segment,
}

impl CrossoverKind {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CrossoverKind::Multipoint { cuts: 0 } => Err(invalid("cuts", "must be at least 1")),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// EDA
// ============================================================================

/// Distribution fitted to the elites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdaModel {
    /// Independent normal per coordinate.
    Diagonal,
    /// Multivariate normal with full covariance (Cholesky sampling).
    FullCovariance,
}

/// Parameters of the estimation-of-distribution strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdaConfig {
    pub model: EdaModel,

    /// Number of best candidates the distribution is fitted to.
    pub elites: usize,

    /// Number of candidates sampled per application.
    pub samples: usize,

    /// Variance floor; smaller variances or Cholesky pivots count as
    /// degenerate.
    pub min_variance: f64,
}

impl Default for EdaConfig {
    fn default() -> Self {
        Self {
            model: EdaModel::FullCovariance,
            elites: 10,
            samples: 20,
            min_variance: 1e-12,
        }
    }
}

impl EdaConfig {
    pub fn with_model(mut self, model: EdaModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_elites(mut self, elites: usize) -> Self {
        self.elites = elites;
        self
    }

    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_min_variance(mut self, min_variance: f64) -> Self {
        self.min_variance = min_variance.max(0.0);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.elites < 2 {
            return Err(invalid("elites", "at least 2 are needed to estimate a variance"));
        }
        if self.samples == 0 {
            return Err(invalid("samples", "must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Differential evolution
// ============================================================================

/// Parameters of DE/rand/1/bin.
///
/// # References
///
/// - Storn & Price (1997), "Differential Evolution - A Simple and Efficient
///   Heuristic for global Optimization over Continuous Spaces"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeConfig {
    /// Differential weight `F`.
    pub f: f64,

    /// Crossover probability `CR` (0.0-1.0).
    pub cr: f64,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self { f: 1.0, cr: 0.5 }
    }
}

impl DeConfig {
    pub fn with_f(mut self, f: f64) -> Self {
        self.f = f;
        self
    }

    pub fn with_cr(mut self, cr: f64) -> Self {
        self.cr = cr.clamp(0.0, 1.0);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.f.is_finite() && self.f > 0.0 && self.f <= 2.0) {
            return Err(invalid("f", format!("must lie in (0, 2], got {}", self.f)));
        }
        if !(0.0..=1.0).contains(&self.cr) {
            return Err(ConfigError::InvalidProbability(self.cr));
        }
        Ok(())
    }
}

// ============================================================================
// PSO
// ============================================================================

/// Which best solution pulls a particle besides its personal best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Best of the particle's group ("L1").
    Neighborhood,
    /// Group leaders follow the rank best, other particles their group
    /// ("L2").
    Rank,
    /// The best propagated across the cluster ("L3"); falls back to the
    /// rank best before the first propagation.
    Global,
}

/// Parameters of particle swarm optimization.
///
/// Defaults are the constriction-equivalent values of Clerc & Kennedy.
///
/// # References
///
/// - Clerc & Kennedy (2002), "The particle swarm - explosion, stability,
///   and convergence in a multidimensional complex space"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsoConfig {
    /// Inertia weight `w`.
    pub inertia: f64,

    /// Personal-best coefficient `c1`.
    pub cognitive: f64,

    /// Reference-best coefficient `c2`.
    pub social: f64,

    /// Per-coordinate velocity clamp. `None` disables clamping.
    pub max_velocity: Option<f64>,

    /// Draw `w ~ U[0, 1)` once per step instead of using `inertia`.
    pub random_inertia: bool,

    pub topology: Topology,
}

impl Default for PsoConfig {
    fn default() -> Self {
        Self {
            inertia: 0.7298,
            cognitive: 1.49618,
            social: 1.49618,
            max_velocity: None,
            random_inertia: false,
            topology: Topology::Neighborhood,
        }
    }
}

impl PsoConfig {
    pub fn with_inertia(mut self, w: f64) -> Self {
        self.inertia = w;
        self
    }

    pub fn with_cognitive(mut self, c1: f64) -> Self {
        self.cognitive = c1;
        self
    }

    pub fn with_social(mut self, c2: f64) -> Self {
        self.social = c2;
        self
    }

    pub fn with_max_velocity(mut self, v: f64) -> Self {
        self.max_velocity = Some(v.abs());
        self
    }

    pub fn with_random_inertia(mut self, enabled: bool) -> Self {
        self.random_inertia = enabled;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("inertia", self.inertia),
            ("cognitive", self.cognitive),
            ("social", self.social),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(name, format!("must be finite and non-negative, got {value}")));
            }
        }
        if self.max_velocity == Some(0.0) {
            return Err(invalid("max_velocity", "must be positive or None"));
        }
        Ok(())
    }
}
