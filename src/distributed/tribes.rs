//! Several independent tribes per rank with two-level propagation.

use super::optimizer::Optimizer;
use super::propagation::{best_of, propagate_best, vote_stop};
use super::transport::{SingleRank, Transport};
use super::tribe::{TribePhase, TribeState};
use crate::container::Candidate;
use crate::error::{ConfigError, MetaflowError};
use crate::flow::{Program, ReferenceLevel, Runtime, RuntimeOptions};
use crate::objective::Objective;
use crate::random::resolve_seed;
use crate::runner::{DistributedConfig, LogRecord, RunConfig};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Tribes variant: `n_tribes` runtimes per rank, each on its own RNG
/// substream `(seed, rank, tribe)`.
///
/// Propagation has two levels. The best tribe of the rank becomes the
/// rank reference of every tribe; then the ranks exchange their bests and
/// the cluster minimum becomes the global reference and is injected into
/// every tribe's first population.
///
/// Tribes never use the rank transport themselves; only propagation and
/// stop votes go through it. Under BCD each tribe keeps its own state and
/// learns about foreign states through adoption.
pub struct TribesOptimizer {
    tribes: Vec<Runtime>,
    transport: Box<dyn Transport>,
    state: TribeState,
    best: Option<Candidate>,
    parallel: bool,
}

impl TribesOptimizer {
    /// Compiles one runtime per tribe; `make_program` is called once per
    /// tribe.
    pub fn new(
        make_program: impl Fn() -> Program,
        objective: Arc<dyn Objective>,
        config: &RunConfig,
        distributed: &DistributedConfig,
        mut transport: Box<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        distributed.validate()?;
        transport.set_timeout(distributed.comm_timeout());

        let seed = resolve_seed(config.seed);
        let rank = transport.rank();
        let mut tribes = Vec::with_capacity(distributed.n_tribes);
        for tribe in 0..distributed.n_tribes {
            let mut options = RuntimeOptions::new(seed)
                .with_rank(rank)
                .with_tribe(tribe)
                .with_parallel(config.parallel);
            if let Some(bcd) = &config.bcd {
                options = options.with_bcd(bcd.clone());
            }
            tribes.push(Runtime::compile(
                make_program(),
                Arc::clone(&objective),
                options,
                Box::new(SingleRank::new()),
            )?);
        }
        log::info!("rank {rank}: {} tribes compiled", tribes.len());

        Ok(Self {
            tribes,
            transport,
            state: TribeState::new(),
            best: None,
            parallel: config.parallel,
        })
    }

    pub fn tribes(&self) -> &[Runtime] {
        &self.tribes
    }

    pub fn tribes_mut(&mut self) -> &mut [Runtime] {
        &mut self.tribes
    }

    pub fn state(&self) -> &TribeState {
        &self.state
    }

    fn refresh_best(&mut self) {
        let tribe_best = best_of(self.tribes.iter().filter_map(|t| t.best())).map(|(_, c)| c);
        if let Some(c) = tribe_best {
            if self.best.as_ref().is_none_or(|b| c.fitness() < b.fitness()) {
                self.best = Some(c.clone());
            }
        }
    }

    fn step_tribes(&mut self) -> Result<(), MetaflowError> {
        #[cfg(feature = "parallel")]
        if self.parallel {
            return self.tribes.par_iter_mut().try_for_each(|t| t.step());
        }
        let _ = self.parallel;
        self.tribes.iter_mut().try_for_each(|t| t.step())
    }
}

impl Optimizer for TribesOptimizer {
    fn rank(&self) -> usize {
        self.transport.rank()
    }

    fn size(&self) -> usize {
        self.transport.size()
    }

    fn phase(&self) -> TribePhase {
        self.state.phase()
    }

    fn set_comm_timeout(&mut self, timeout: Duration) {
        self.transport.set_timeout(timeout);
    }

    fn setup(&mut self) -> Result<(), MetaflowError> {
        for tribe in &mut self.tribes {
            tribe.setup()?;
        }
        self.refresh_best();
        self.state.advance(TribePhase::LocalOptimize)
    }

    fn step(&mut self) -> Result<(), MetaflowError> {
        if self.state.phase() != TribePhase::LocalOptimize {
            return Err(MetaflowError::IllegalTransition {
                from: self.state.phase(),
                to: TribePhase::LocalOptimize,
            });
        }
        self.step_tribes()?;
        self.refresh_best();
        Ok(())
    }

    fn propagate(&mut self) -> Result<(), MetaflowError> {
        self.state.advance(TribePhase::SyncBarrier)?;

        // intra-rank
        let rank_best = best_of(self.tribes.iter().filter_map(|t| t.best())).map(|(_, c)| c.clone());
        if let Some(winner) = &rank_best {
            log::debug!(
                "rank {}: best tribe at {:.6e}",
                self.transport.rank(),
                winner.fitness()
            );
            for tribe in &mut self.tribes {
                tribe.adopt(winner, ReferenceLevel::Rank, false);
            }
        }

        // inter-rank
        self.state.advance(TribePhase::Propagate)?;
        if let Some((_, winner)) = propagate_best(self.transport.as_mut(), rank_best.as_ref())? {
            for tribe in &mut self.tribes {
                tribe.adopt(&winner, ReferenceLevel::Cluster, true);
            }
        }
        self.refresh_best();
        self.state.advance(TribePhase::LocalOptimize)
    }

    fn vote_stop(&mut self, stop: bool) -> Result<bool, MetaflowError> {
        vote_stop(self.transport.as_mut(), stop)
    }

    fn terminate(&mut self) {
        if !self.state.is_terminated() {
            let _ = self.state.advance(TribePhase::Terminated);
        }
    }

    fn generation(&self) -> usize {
        self.tribes.first().map_or(0, |t| t.generation())
    }

    fn best(&self) -> Option<&Candidate> {
        self.best.as_ref()
    }

    /// Records of all tribes, ordered by generation and then by tribe.
    fn take_records(&mut self) -> Vec<LogRecord> {
        let mut records: Vec<LogRecord> = self
            .tribes
            .iter_mut()
            .flat_map(|t| t.log_mut().take_records())
            .collect();
        records.sort_by_key(|r| r.generation);
        records
    }
}
