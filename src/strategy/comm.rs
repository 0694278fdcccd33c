//! Cross-rank exchange of best candidates.

use super::{Strategy, StrategyContext};
use crate::distributed::propagate_best;
use crate::error::MetaflowError;
use crate::flow::ContainerId;

/// Exchanges the best solution with every rank and adopts the cluster
/// minimum.
///
/// Full-dimension vectors are exchanged, so ranks may hold different block
/// masks. The winner becomes the cluster reference of the PSO `Global`
/// topology and is offered to `target` (replacing its worst member if
/// strictly better).
#[derive(Debug, Clone)]
pub struct PropagateBest {
    source: Option<ContainerId>,
    target: ContainerId,
}

impl PropagateBest {
    /// `source = None` contributes the best across all containers.
    pub fn new(source: Option<ContainerId>, target: ContainerId) -> Self {
        Self { source, target }
    }
}

impl Strategy for PropagateBest {
    fn name(&self) -> &str {
        "propagate_best"
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        let mine = ctx.best_full(self.source);
        let Some((rank, winner)) = propagate_best(ctx.transport, mine.as_ref())? else {
            return Ok(());
        };

        let local = ctx.localize(&winner);
        let expected = ctx.storage.get(self.target).dim();
        if local.dim() != expected {
            log::warn!(
                "propagate_best: rank {rank} sent {} values, expected {expected}",
                winner.dim()
            );
            return Ok(());
        }
        ctx.storage.get_mut(self.target).offer(&local);
        ctx.storage.references.cluster = Some(local);
        Ok(())
    }
}
