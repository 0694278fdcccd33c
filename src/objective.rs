//! Objective systems.
//!
//! [`Objective`] is the external collaborator every strategy evaluates
//! against. [`BlockedObjective`] wraps a full objective so that strategies
//! operating on a narrowed block only ever see `block_dim` coordinates.

use std::sync::Arc;

/// A minimization problem over real vectors.
///
/// Implementations must be safe for concurrent invocation: with the
/// `parallel` feature, candidates of one container are evaluated across
/// rayon worker threads.
///
/// # Examples
///
/// ```
/// use u_metaflow::objective::Objective;
///
/// struct Sphere(usize);
///
/// impl Objective for Sphere {
///     fn dim(&self) -> usize { self.0 }
///     fn evaluate(&self, x: &[f64]) -> f64 { x.iter().map(|v| v * v).sum() }
///     fn lower_bound(&self, _index: usize) -> f64 { -5.12 }
///     fn upper_bound(&self, _index: usize) -> f64 { 5.12 }
/// }
///
/// let f = Sphere(3);
/// assert_eq!(f.evaluate(&[1.0, 2.0, 0.0]), 5.0);
/// ```
pub trait Objective: Send + Sync {
    /// Number of decision variables.
    fn dim(&self) -> usize;

    /// Evaluates a candidate. Lower is better.
    fn evaluate(&self, x: &[f64]) -> f64;

    /// Lower bound of variable `index`. Defaults to `-1.0`.
    fn lower_bound(&self, _index: usize) -> f64 {
        -1.0
    }

    /// Upper bound of variable `index`. Defaults to `1.0`.
    fn upper_bound(&self, _index: usize) -> f64 {
        1.0
    }

    /// Human-readable description for logs.
    fn describe(&self) -> String {
        "optimization problem".to_string()
    }
}

/// Immutable snapshot of the block-coordinate state.
///
/// `state` is the full-dimension solution; `mask[i]` maps working
/// coordinate `i` to its index in `state`.
#[derive(Debug, Clone)]
pub struct BlockView {
    pub state: Vec<f64>,
    pub mask: Vec<usize>,
}

impl BlockView {
    /// Writes a partial solution into a copy of the state.
    pub fn expand(&self, partial: &[f64]) -> Vec<f64> {
        let mut full = self.state.clone();
        for (&index, &value) in self.mask.iter().zip(partial) {
            full[index] = value;
        }
        full
    }

    /// Projects a full solution onto the active block.
    pub fn project(&self, full: &[f64]) -> Vec<f64> {
        self.mask.iter().map(|&i| full[i]).collect()
    }
}

/// An objective restricted to the active block.
///
/// Coordinates outside the block are taken from the shared state, so every
/// evaluation during a sweep is measured against the same context.
pub struct BlockedObjective {
    inner: Arc<dyn Objective>,
    view: Arc<BlockView>,
}

impl BlockedObjective {
    pub fn new(inner: Arc<dyn Objective>, view: Arc<BlockView>) -> Self {
        Self { inner, view }
    }
}

impl Objective for BlockedObjective {
    fn dim(&self) -> usize {
        self.view.mask.len()
    }

    fn evaluate(&self, partial: &[f64]) -> f64 {
        let full = self.view.expand(partial);
        self.inner.evaluate(&full)
    }

    fn lower_bound(&self, index: usize) -> f64 {
        self.inner.lower_bound(self.view.mask[index])
    }

    fn upper_bound(&self, index: usize) -> f64 {
        self.inner.upper_bound(self.view.mask[index])
    }

    fn describe(&self) -> String {
        format!(
            "{} (block of {} / {})",
            self.inner.describe(),
            self.view.mask.len(),
            self.view.state.len()
        )
    }
}

/// Clamps a raw objective value to a comparable fitness.
///
/// `NaN` becomes `+inf` (worst) and `-inf` becomes `f64::MIN`. Returns the
/// sanitized value and whether clamping happened.
pub fn sanitize_fitness(raw: f64) -> (f64, bool) {
    if raw.is_nan() {
        (f64::INFINITY, true)
    } else if raw == f64::NEG_INFINITY {
        (f64::MIN, true)
    } else {
        (raw, false)
    }
}
