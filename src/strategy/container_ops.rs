//! Container manipulation.

use super::{Strategy, StrategyContext};
use crate::error::MetaflowError;
use crate::flow::ContainerId;

/// Replaces the worst candidates of `destination` with the best of
/// `source` while the incoming candidate is strictly better.
#[derive(Debug, Clone)]
pub struct TakeBest {
    destination: ContainerId,
    source: ContainerId,
}

impl TakeBest {
    pub fn new(destination: ContainerId, source: ContainerId) -> Self {
        Self {
            destination,
            source,
        }
    }
}

impl Strategy for TakeBest {
    fn name(&self) -> &str {
        "take_best"
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        if self.destination == self.source {
            return Ok(());
        }
        let [destination, source] = ctx.storage.get_many_mut([self.destination, self.source]);
        let replaced = destination.replace_with(source);
        log::trace!("take_best: {replaced} candidates replaced");
        Ok(())
    }
}

/// Evaluates every candidate of a container.
#[derive(Debug, Clone)]
pub struct Evaluate {
    target: ContainerId,
}

impl Evaluate {
    pub fn new(target: ContainerId) -> Self {
        Self { target }
    }
}

impl Strategy for Evaluate {
    fn name(&self) -> &str {
        "evaluate"
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        ctx.evaluate_all(self.target);
        Ok(())
    }
}
