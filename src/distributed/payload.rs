//! Wire format of exchanged candidates.

use crate::container::Candidate;
use crate::error::MetaflowError;
use serde::{Deserialize, Serialize};

/// A candidate as exchanged between ranks.
///
/// Non-finite fitness values (unevaluated candidates) travel as `None`
/// since JSON has no infinity. An empty vector with `None` fitness means
/// the sender had no candidate to offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub rank: usize,
    pub fitness: Option<f64>,
    pub vector: Vec<f64>,
}

impl Payload {
    pub fn new(rank: usize, candidate: Option<&Candidate>) -> Self {
        match candidate {
            Some(c) => Self {
                rank,
                fitness: c.fitness().is_finite().then_some(c.fitness()),
                vector: c.position().to_vec(),
            },
            None => Self {
                rank,
                fitness: None,
                vector: Vec::new(),
            },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MetaflowError> {
        serde_json::to_vec(self).map_err(MetaflowError::comm)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MetaflowError> {
        serde_json::from_slice(bytes).map_err(MetaflowError::comm)
    }

    /// Fitness for comparisons; a missing value is `+inf`.
    pub fn fitness_or_worst(&self) -> f64 {
        self.fitness.unwrap_or(f64::INFINITY)
    }

    pub fn into_candidate(self) -> Candidate {
        let fitness = self.fitness_or_worst();
        Candidate::new(self.vector, fitness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let c = Candidate::new(vec![0.5, -1.25], 3.0);
        let bytes = Payload::new(2, Some(&c)).encode().unwrap();
        let back = Payload::decode(&bytes).unwrap();
        assert_eq!(back.rank, 2);
        assert_eq!(back.into_candidate(), c);
    }

    #[test]
    fn test_unevaluated_travels_as_none() {
        let c = Candidate::unevaluated(2);
        let payload = Payload::new(0, Some(&c));
        assert_eq!(payload.fitness, None);
        let back = Payload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(back.fitness_or_worst(), f64::INFINITY);
    }

    #[test]
    fn test_garbage_is_communication_error() {
        assert!(Payload::decode(b"not json").unwrap_err().is_communication());
    }
}
