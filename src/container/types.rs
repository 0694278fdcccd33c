//! The candidate type.

use crate::objective::{sanitize_fitness, Objective};
use serde::{Deserialize, Serialize};

/// One point of the search space together with its fitness.
///
/// The position length is fixed at construction: only slice access is
/// handed out, so no strategy can grow or shrink a candidate. A fitness of
/// `+inf` marks a candidate that has not been evaluated since it last moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    position: Vec<f64>,
    fitness: f64,
}

impl Candidate {
    /// Creates a candidate from a position and a known fitness.
    pub fn new(position: Vec<f64>, fitness: f64) -> Self {
        Self { position, fitness }
    }

    /// Creates a zero vector of length `dim` with worst fitness.
    pub fn unevaluated(dim: usize) -> Self {
        Self {
            position: vec![0.0; dim],
            fitness: f64::INFINITY,
        }
    }

    pub fn dim(&self) -> usize {
        self.position.len()
    }

    pub fn position(&self) -> &[f64] {
        &self.position
    }

    pub fn position_mut(&mut self) -> &mut [f64] {
        &mut self.position
    }

    pub fn fitness(&self) -> f64 {
        self.fitness
    }

    pub fn set_fitness(&mut self, fitness: f64) {
        self.fitness = fitness;
    }

    /// Whether the fitness reflects the current position.
    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_finite()
    }

    /// Copies `position` and `fitness` from another vector of equal length.
    ///
    /// # Panics
    /// Panics if the lengths differ.
    pub fn assign(&mut self, position: &[f64], fitness: f64) {
        self.position.copy_from_slice(position);
        self.fitness = fitness;
    }

    /// Evaluates the candidate and stores the sanitized fitness.
    ///
    /// Returns `true` when the raw value was non-finite and got clamped.
    pub fn evaluate(&mut self, objective: &dyn Objective) -> bool {
        let (fitness, clamped) = sanitize_fitness(objective.evaluate(&self.position));
        self.fitness = fitness;
        clamped
    }

    pub fn into_position(self) -> Vec<f64> {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NanAtOrigin;

    impl Objective for NanAtOrigin {
        fn dim(&self) -> usize {
            2
        }
        fn evaluate(&self, x: &[f64]) -> f64 {
            if x.iter().all(|v| *v == 0.0) {
                f64::NAN
            } else {
                x.iter().map(|v| v.abs()).sum()
            }
        }
    }

    #[test]
    fn test_unevaluated() {
        let c = Candidate::unevaluated(3);
        assert_eq!(c.dim(), 3);
        assert!(!c.is_evaluated());
        assert_eq!(c.position(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_evaluate_clamps_nan() {
        let mut c = Candidate::unevaluated(2);
        assert!(c.evaluate(&NanAtOrigin));
        assert_eq!(c.fitness(), f64::INFINITY);

        c.position_mut()[0] = -2.0;
        assert!(!c.evaluate(&NanAtOrigin));
        assert_eq!(c.fitness(), 2.0);
    }

    #[test]
    #[should_panic]
    fn test_assign_rejects_other_length() {
        let mut c = Candidate::unevaluated(2);
        c.assign(&[1.0, 2.0, 3.0], 0.0);
    }
}
