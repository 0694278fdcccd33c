//! One runtime per rank with periodic best propagation.

use super::optimizer::Optimizer;
use super::propagation::{propagate_best, vote_stop};
use super::transport::Transport;
use super::tribe::{TribePhase, TribeState};
use crate::container::Candidate;
use crate::error::{ConfigError, MetaflowError};
use crate::flow::{Program, ReferenceLevel, Runtime, RuntimeOptions};
use crate::objective::Objective;
use crate::random::resolve_seed;
use crate::runner::{LogRecord, RunConfig};
use std::sync::Arc;
use std::time::Duration;

/// Swarm variant: each rank runs a single runtime; at every propagation
/// the cluster minimum becomes the global reference of every rank and is
/// injected into its first population.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use u_metaflow::distributed::{LocalCluster, Optimizer, SwarmOptimizer};
/// use u_metaflow::flow::{Flow, Program};
/// use u_metaflow::objective::Objective;
/// use u_metaflow::runner::RunConfig;
/// use u_metaflow::strategy::DeConfig;
///
/// struct Sphere;
/// impl Objective for Sphere {
///     fn dim(&self) -> usize { 3 }
///     fn evaluate(&self, x: &[f64]) -> f64 { x.iter().map(|v| v * v).sum() }
/// }
///
/// let config = RunConfig::default().with_seed(7);
/// let bests: Vec<f64> = std::thread::scope(|s| {
///     let handles: Vec<_> = LocalCluster::new(2)
///         .into_transports()
///         .into_iter()
///         .map(|t| {
///             let config = config.clone();
///             s.spawn(move || {
///                 let program = Program::new(
///                     Flow::create("main", 10, 10) >> Flow::init_uniform("main"),
///                     Flow::de("main", DeConfig::default()),
///                 );
///                 let mut swarm =
///                     SwarmOptimizer::new(program, Arc::new(Sphere), &config, Box::new(t)).unwrap();
///                 swarm.setup().unwrap();
///                 for _ in 0..5 {
///                     swarm.step().unwrap();
///                 }
///                 swarm.propagate().unwrap();
///                 swarm.best().unwrap().fitness()
///             })
///         })
///         .collect();
///     handles.into_iter().map(|h| h.join().unwrap()).collect()
/// });
/// assert_eq!(bests[0], bests[1]);
/// ```
pub struct SwarmOptimizer {
    runtime: Runtime,
    state: TribeState,
}

impl SwarmOptimizer {
    pub fn new(
        program: Program,
        objective: Arc<dyn Objective>,
        config: &RunConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut options = RuntimeOptions::new(resolve_seed(config.seed)).with_parallel(config.parallel);
        if let Some(bcd) = &config.bcd {
            options = options.with_bcd(bcd.clone());
        }
        let runtime = Runtime::compile(program, objective, options, transport)?;
        Ok(Self {
            runtime,
            state: TribeState::new(),
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn state(&self) -> &TribeState {
        &self.state
    }
}

impl Optimizer for SwarmOptimizer {
    fn rank(&self) -> usize {
        self.runtime.rank()
    }

    fn size(&self) -> usize {
        self.runtime.size()
    }

    fn phase(&self) -> TribePhase {
        self.state.phase()
    }

    fn set_comm_timeout(&mut self, timeout: Duration) {
        self.runtime.transport_mut().set_timeout(timeout);
    }

    fn setup(&mut self) -> Result<(), MetaflowError> {
        self.runtime.setup()?;
        self.state.advance(TribePhase::LocalOptimize)
    }

    fn step(&mut self) -> Result<(), MetaflowError> {
        if self.state.phase() != TribePhase::LocalOptimize {
            return Err(MetaflowError::IllegalTransition {
                from: self.state.phase(),
                to: TribePhase::LocalOptimize,
            });
        }
        self.runtime.step()
    }

    fn propagate(&mut self) -> Result<(), MetaflowError> {
        self.state.advance(TribePhase::Propagate)?;
        let mine = self.runtime.best().cloned();
        if let Some((_, winner)) = propagate_best(self.runtime.transport_mut(), mine.as_ref())? {
            self.runtime.adopt(&winner, ReferenceLevel::Cluster, true);
        }
        self.state.advance(TribePhase::LocalOptimize)
    }

    fn vote_stop(&mut self, stop: bool) -> Result<bool, MetaflowError> {
        vote_stop(self.runtime.transport_mut(), stop)
    }

    fn terminate(&mut self) {
        if !self.state.is_terminated() {
            // every phase but Terminated may terminate
            let _ = self.state.advance(TribePhase::Terminated);
        }
    }

    fn generation(&self) -> usize {
        self.runtime.generation()
    }

    fn best(&self) -> Option<&Candidate> {
        self.runtime.best()
    }

    fn take_records(&mut self) -> Vec<LogRecord> {
        self.runtime.log_mut().take_records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{LocalCluster, SingleRank};
    use crate::flow::Flow;
    use crate::strategy::testing::Sphere;
    use crate::strategy::{DeConfig, PsoConfig, Topology};

    fn de_program() -> Program {
        Program::new(
            Flow::create("main", 10, 10) >> Flow::init_uniform("main"),
            Flow::de("main", DeConfig::default()) >> Flow::log_best(),
        )
    }

    #[test]
    fn test_phases_follow_the_cycle() {
        let config = RunConfig::default().with_seed(1);
        let mut swarm =
            SwarmOptimizer::new(de_program(), Arc::new(Sphere(2)), &config, Box::new(SingleRank::new())).unwrap();
        assert_eq!(swarm.phase(), TribePhase::Init);
        assert!(swarm.step().is_err());
        swarm.setup().unwrap();
        swarm.step().unwrap();
        swarm.propagate().unwrap();
        assert_eq!(swarm.phase(), TribePhase::LocalOptimize);
        assert_eq!(swarm.state().rounds(), 1);
        swarm.terminate();
        swarm.terminate();
        assert_eq!(swarm.phase(), TribePhase::Terminated);
        assert!(swarm.step().is_err());
        assert_eq!(swarm.take_records().len(), 1);
    }

    #[test]
    fn test_ranks_share_global_reference() {
        let config = RunConfig::default().with_seed(3);
        let results: Vec<(f64, f64)> = std::thread::scope(|s| {
            let handles: Vec<_> = LocalCluster::new(3)
                .into_transports()
                .into_iter()
                .map(|t| {
                    let config = config.clone();
                    s.spawn(move || {
                        let program = Program::new(
                            Flow::create("p", 12, 6) >> Flow::pso_memory("M", "p") >> Flow::init_uniform("p"),
                            Flow::pso("M", PsoConfig::default().with_topology(Topology::Global)),
                        );
                        let mut swarm =
                            SwarmOptimizer::new(program, Arc::new(Sphere(4)), &config, Box::new(t)).unwrap();
                        swarm.setup().unwrap();
                        for _ in 0..5 {
                            swarm.step().unwrap();
                        }
                        swarm.propagate().unwrap();
                        let reference = swarm.runtime().storage().references.cluster.clone().unwrap();
                        (reference.fitness(), swarm.best().unwrap().fitness())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let minimum = results.iter().map(|r| r.0).fold(f64::INFINITY, f64::min);
        for (reference, best) in results {
            assert_eq!(reference, minimum);
            assert_eq!(best, minimum);
        }
    }
}
