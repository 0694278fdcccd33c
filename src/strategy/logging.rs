//! Log strategy.

use super::{Strategy, StrategyContext};
use crate::error::MetaflowError;
use crate::flow::ContainerId;
use crate::runner::LogRecord;

/// Appends the current best full-dimension solution to the log.
#[derive(Debug, Clone)]
pub struct LogBest {
    source: Option<ContainerId>,
}

impl LogBest {
    /// `source = None` logs the best across all containers.
    pub fn new(source: Option<ContainerId>) -> Self {
        Self { source }
    }
}

impl Strategy for LogBest {
    fn name(&self) -> &str {
        "log_best"
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        if let Some(best) = ctx.best_full(self.source) {
            ctx.log.push(LogRecord {
                generation: ctx.generation,
                best_fitness: best.fitness(),
                best_vector: best.into_position(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::{Harness, Sphere};

    #[test]
    fn test_logs_best() {
        let mut h = Harness::new(0);
        let id = h.population("main", 2, 2, 2);
        h.apply(&mut LogBest::new(Some(id)), &Sphere(2));
        assert!(h.log.is_empty());

        h.storage.get_mut(id).set(1, &[0.5, 0.5], 0.5);
        h.apply(&mut LogBest::new(None), &Sphere(2));
        let record = h.log.last().unwrap();
        assert_eq!(record.generation, 1);
        assert_eq!(record.best_fitness, 0.5);
        assert_eq!(record.best_vector, vec![0.5, 0.5]);
    }
}
