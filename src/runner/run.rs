//! Run driver.
//!
//! [`Runner`] owns the generation loop: setup, then one traversal of the
//! generation flow per generation until a [`StopReason`] applies.
//! Termination is checked between generations only.

use super::config::{DistributedConfig, RunConfig};
use super::history::LogRecord;
use super::termination::{StopReason, Termination};
use crate::distributed::{vote_stop, Optimizer, SingleRank, Transport};
use crate::error::{ConfigError, MetaflowError};
use crate::flow::{Program, Runtime, RuntimeOptions};
use crate::objective::Objective;
use crate::random::resolve_seed;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Best full-dimension solution; empty if nothing was ever evaluated.
    pub best: Vec<f64>,

    /// Fitness of `best`, `+inf` if nothing was ever evaluated.
    pub best_fitness: f64,

    /// Generations executed.
    pub generations: usize,

    pub stop_reason: StopReason,

    /// Records pushed by `LogBest` steps.
    pub log: Vec<LogRecord>,

    /// Best fitness after setup and after each generation.
    pub fitness_history: Vec<f64>,
}

/// A run that aborted, with everything gathered before the failure.
#[derive(Debug, thiserror::Error)]
#[error("run failed after {generations} generations: {error}")]
pub struct RunFailure {
    #[source]
    pub error: MetaflowError,

    /// Records pushed before the failure.
    pub log: Vec<LogRecord>,

    /// Generations completed before the failure.
    pub generations: usize,
}

impl From<ConfigError> for RunFailure {
    fn from(error: ConfigError) -> Self {
        Self {
            error: error.into(),
            log: Vec::new(),
            generations: 0,
        }
    }
}

/// Executes programs.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use u_metaflow::flow::{Flow, Program};
/// use u_metaflow::objective::Objective;
/// use u_metaflow::runner::{RunConfig, Runner, StopReason};
/// use u_metaflow::strategy::{PsoConfig, Topology};
///
/// struct Sphere;
/// impl Objective for Sphere {
///     fn dim(&self) -> usize { 2 }
///     fn evaluate(&self, x: &[f64]) -> f64 { x.iter().map(|v| v * v).sum() }
/// }
///
/// let program = Program::new(
///     Flow::create("swarm", 30, 10)
///         >> Flow::pso_memory("M", "swarm")
///         >> Flow::init_uniform("swarm"),
///     Flow::pso("M", PsoConfig::default().with_topology(Topology::Neighborhood))
///         >> Flow::every_k(10, Flow::log_best()),
/// );
/// let config = RunConfig::default().with_max_generations(100).with_seed(42);
/// let result = Runner::run(program, Arc::new(Sphere), &config).unwrap();
///
/// assert_eq!(result.stop_reason, StopReason::MaxGenerations);
/// assert_eq!(result.generations, 100);
/// assert_eq!(result.log.len(), 10);
/// assert!(result.best_fitness < 1e-3);
/// ```
pub struct Runner;

impl Runner {
    /// Runs `program` on a single rank.
    pub fn run(
        program: Program,
        objective: Arc<dyn Objective>,
        config: &RunConfig,
    ) -> Result<RunResult, RunFailure> {
        Self::run_with_cancel(program, objective, config, None)
    }

    /// Runs `program` on a single rank with an optional cancellation token.
    ///
    /// When the flag is set the run stops after the current generation and
    /// returns the best solution found so far.
    pub fn run_with_cancel(
        program: Program,
        objective: Arc<dyn Objective>,
        config: &RunConfig,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<RunResult, RunFailure> {
        let runtime = Self::compile(program, objective, config, Box::new(SingleRank::new()))?;
        Self::drive(runtime, config, cancel)
    }

    /// Compiles `program` with the seed and BCD settings of `config`.
    ///
    /// Use this to attach log sinks to the runtime before
    /// [`drive`](Self::drive).
    pub fn compile(
        program: Program,
        objective: Arc<dyn Objective>,
        config: &RunConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Runtime, ConfigError> {
        config.validate()?;
        let mut options = RuntimeOptions::new(resolve_seed(config.seed)).with_parallel(config.parallel);
        if let Some(bcd) = &config.bcd {
            options = options.with_bcd(bcd.clone());
        }
        Runtime::compile(program, objective, options, transport)
    }

    /// Runs a compiled runtime until a stop condition applies.
    ///
    /// With more than one rank (flows exchanging through `propagate_best`),
    /// cancellation and the deadline are agreed on by a stop vote after
    /// every generation.
    pub fn drive(
        mut runtime: Runtime,
        config: &RunConfig,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<RunResult, RunFailure> {
        let termination = Termination::new(config.max_generations, config.time_limit_ms, cancel);
        let mut history = Vec::with_capacity(config.max_generations + 1);

        if let Err(error) = runtime.setup() {
            return Err(Self::runtime_failure(&mut runtime, error, 0));
        }
        history.push(runtime.best_fitness());

        let stop_reason = loop {
            let completed = runtime.generation();
            let external = if runtime.size() > 1 {
                let local = termination.external();
                match vote_stop(runtime.transport_mut(), local.is_some()) {
                    Ok(true) => Some(local.unwrap_or(StopReason::PeerStopped)),
                    Ok(false) => None,
                    Err(error) => return Err(Self::runtime_failure(&mut runtime, error, completed)),
                }
            } else {
                termination.external()
            };
            if let Some(reason) = external {
                break reason;
            }
            if termination.budget_reached(completed) {
                break StopReason::MaxGenerations;
            }

            if let Err(error) = runtime.step() {
                return Err(Self::runtime_failure(&mut runtime, error, completed));
            }
            history.push(runtime.best_fitness());
        };

        log::info!(
            "run stopped ({stop_reason:?}) after {} generations, best {:.6e}",
            runtime.generation(),
            runtime.best_fitness()
        );
        let (best, best_fitness) = match runtime.best() {
            Some(c) => (c.position().to_vec(), c.fitness()),
            None => (Vec::new(), f64::INFINITY),
        };
        Ok(RunResult {
            best,
            best_fitness,
            generations: runtime.generation(),
            stop_reason,
            log: runtime.log_mut().take_records(),
            fitness_history: history,
        })
    }

    /// Runs a rank of a distributed run.
    ///
    /// Each round runs `steps_per_round` generations (fewer if the budget
    /// ends first) and then a propagation. Collectives wait at most
    /// `comm_timeout_ms` for a peer. Cancellation and the deadline
    /// are voted on at round boundaries so every rank stops after the same
    /// round.
    pub fn run_distributed(
        optimizer: &mut dyn Optimizer,
        config: &RunConfig,
        distributed: &DistributedConfig,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<RunResult, RunFailure> {
        config.validate()?;
        distributed.validate()?;
        optimizer.set_comm_timeout(distributed.comm_timeout());
        let termination = Termination::new(config.max_generations, config.time_limit_ms, cancel);
        let mut history = Vec::with_capacity(config.max_generations + 1);

        if let Err(error) = optimizer.setup() {
            return Err(Self::optimizer_failure(optimizer, error));
        }
        history.push(Self::best_fitness(optimizer));

        let stop_reason = loop {
            let remaining = termination.remaining(optimizer.generation());
            if remaining == 0 {
                break StopReason::MaxGenerations;
            }

            for _ in 0..remaining.min(distributed.steps_per_round) {
                if let Err(error) = optimizer.step() {
                    return Err(Self::optimizer_failure(optimizer, error));
                }
                history.push(Self::best_fitness(optimizer));
            }
            if let Err(error) = optimizer.propagate() {
                return Err(Self::optimizer_failure(optimizer, error));
            }
            if let Some(last) = history.last_mut() {
                *last = Self::best_fitness(optimizer);
            }

            let local = termination.external();
            match optimizer.vote_stop(local.is_some()) {
                Ok(true) => break local.unwrap_or(StopReason::PeerStopped),
                Ok(false) => {}
                Err(error) => return Err(Self::optimizer_failure(optimizer, error)),
            }
        };

        optimizer.terminate();
        log::info!(
            "rank {}: stopped ({stop_reason:?}) after {} generations, best {:.6e}",
            optimizer.rank(),
            optimizer.generation(),
            Self::best_fitness(optimizer)
        );
        let (best, fitness) = match optimizer.best() {
            Some(c) => (c.position().to_vec(), c.fitness()),
            None => (Vec::new(), f64::INFINITY),
        };
        Ok(RunResult {
            best,
            best_fitness: fitness,
            generations: optimizer.generation(),
            stop_reason,
            log: optimizer.take_records(),
            fitness_history: history,
        })
    }

    fn best_fitness(optimizer: &dyn Optimizer) -> f64 {
        optimizer.best().map_or(f64::INFINITY, |c| c.fitness())
    }

    fn runtime_failure(runtime: &mut Runtime, error: MetaflowError, completed: usize) -> RunFailure {
        log::error!("rank {}: {error}", runtime.rank());
        RunFailure {
            error,
            log: runtime.log_mut().take_records(),
            generations: completed,
        }
    }

    fn optimizer_failure(optimizer: &mut dyn Optimizer, error: MetaflowError) -> RunFailure {
        log::error!("rank {}: {error}", optimizer.rank());
        optimizer.terminate();
        RunFailure {
            error,
            log: optimizer.take_records(),
            generations: optimizer.generation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::{LocalCluster, SwarmOptimizer, TribesOptimizer};
    use crate::flow::Flow;
    use crate::strategy::testing::Sphere;
    use crate::strategy::{DeConfig, Strategy, StrategyContext};
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    fn de_program() -> Program {
        Program::new(
            Flow::create("main", 16, 16) >> Flow::init_uniform("main"),
            Flow::de("main", DeConfig::default()) >> Flow::log_best(),
        )
    }

    #[test]
    fn test_generation_budget() {
        let config = RunConfig::default().with_max_generations(25).with_seed(1);
        let result = Runner::run(de_program(), Arc::new(Sphere(3)), &config).unwrap();
        assert_eq!(result.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.generations, 25);
        assert_eq!(result.fitness_history.len(), 26);
        assert_eq!(result.log.len(), 25);
        assert_eq!(result.best.len(), 3);
        assert!(result.fitness_history.windows(2).all(|w| w[1] <= w[0]));
        assert_eq!(result.best_fitness, *result.fitness_history.last().unwrap());
    }

    #[test]
    fn test_deterministic_with_seed() {
        let config = RunConfig::default().with_max_generations(40).with_seed(77);
        let a = Runner::run(de_program(), Arc::new(Sphere(4)), &config).unwrap();
        let b = Runner::run(de_program(), Arc::new(Sphere(4)), &config).unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.fitness_history, b.fitness_history);
    }

    #[test]
    fn test_cancel_before_first_generation() {
        let cancel = Arc::new(AtomicBool::new(true));
        let config = RunConfig::default().with_seed(0);
        let result =
            Runner::run_with_cancel(de_program(), Arc::new(Sphere(2)), &config, Some(cancel)).unwrap();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.generations, 0);
        assert!(result.best_fitness.is_finite());
    }

    #[test]
    fn test_cancel_from_strategy() {
        struct Cancel(Arc<AtomicBool>);
        impl Strategy for Cancel {
            fn name(&self) -> &str {
                "cancel"
            }
            fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
                if ctx.generation == 7 {
                    self.0.store(true, Ordering::Relaxed);
                }
                Ok(())
            }
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let program = Program::new(
            Flow::create("main", 8, 8) >> Flow::init_uniform("main"),
            Flow::de("main", DeConfig::default()) >> Flow::custom(Cancel(Arc::clone(&cancel))),
        );
        let config = RunConfig::default().with_seed(0);
        let result = Runner::run_with_cancel(program, Arc::new(Sphere(2)), &config, Some(cancel)).unwrap();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.generations, 7);
    }

    #[test]
    fn test_strategy_error_keeps_partial_log() {
        struct FailAt(usize);
        impl Strategy for FailAt {
            fn name(&self) -> &str {
                "fail_at"
            }
            fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
                if ctx.generation == self.0 {
                    return Err(MetaflowError::Strategy {
                        strategy: "fail_at".into(),
                        reason: "boom".into(),
                    });
                }
                Ok(())
            }
        }

        let program = Program::new(
            Flow::create("main", 8, 8) >> Flow::init_uniform("main"),
            Flow::log_best() >> Flow::custom(FailAt(4)),
        );
        let config = RunConfig::default().with_seed(0);
        let failure = Runner::run(program, Arc::new(Sphere(2)), &config).unwrap_err();
        assert_eq!(failure.generations, 3);
        assert_eq!(failure.log.len(), 4);
        assert!(matches!(failure.error, MetaflowError::Strategy { .. }));
        assert!(failure.to_string().contains("boom"));
    }

    #[test]
    fn test_config_error_surfaces() {
        let config = RunConfig::default().with_max_generations(0);
        let failure = Runner::run(de_program(), Arc::new(Sphere(2)), &config).unwrap_err();
        assert_eq!(failure.error, MetaflowError::Config(ConfigError::ZeroGenerations));
    }

    /// Runs a swarm of `ranks` in-process ranks for 25 generations in
    /// rounds of 10.
    fn swarm_cluster(ranks: usize, seed: u64) -> Vec<RunResult> {
        let config = RunConfig::default().with_max_generations(25).with_seed(seed);
        let distributed = DistributedConfig::default().with_steps_per_round(10);
        std::thread::scope(|s| {
            let handles: Vec<_> = LocalCluster::from_config(ranks, &distributed)
                .into_transports()
                .into_iter()
                .map(|t| {
                    let (config, distributed) = (config.clone(), distributed.clone());
                    s.spawn(move || {
                        let mut swarm =
                            SwarmOptimizer::new(de_program(), Arc::new(Sphere(3)), &config, Box::new(t)).unwrap();
                        Runner::run_distributed(&mut swarm, &config, &distributed, None).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_distributed_swarm_rounds() {
        let results = swarm_cluster(3, 5);
        for r in &results {
            assert_eq!(r.generations, 25);
            assert_eq!(r.stop_reason, StopReason::MaxGenerations);
            assert_eq!(r.fitness_history.len(), 26);
            // the last propagation leaves every rank on the cluster minimum
            assert_eq!(r.best_fitness, results[0].best_fitness);
            assert_eq!(r.best, results[0].best);
        }
    }

    #[test]
    fn test_distributed_cancel_is_voted() {
        let config = RunConfig::default().with_max_generations(1000).with_seed(5);
        let distributed = DistributedConfig::default().with_steps_per_round(5);
        let results: Vec<RunResult> = std::thread::scope(|s| {
            let handles: Vec<_> = LocalCluster::new(2)
                .into_transports()
                .into_iter()
                .map(|t| {
                    let (config, distributed) = (config.clone(), distributed.clone());
                    s.spawn(move || {
                        let cancel = Arc::new(AtomicBool::new(t.rank() == 1));
                        let mut tribes = TribesOptimizer::new(
                            de_program,
                            Arc::new(Sphere(2)),
                            &config,
                            &distributed.clone().with_n_tribes(2),
                            Box::new(t),
                        )
                        .unwrap();
                        Runner::run_distributed(&mut tribes, &config, &distributed, Some(cancel)).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0].stop_reason, StopReason::PeerStopped);
        assert_eq!(results[1].stop_reason, StopReason::Cancelled);
        assert_eq!(results[0].generations, 5);
        assert_eq!(results[1].generations, 5);
        // two tribes, one record per generation each
        assert_eq!(results[0].log.len(), 10);
    }

    #[test]
    fn test_distributed_deterministic_with_seed() {
        let bits = |r: &RunResult| r.best.iter().map(|v| v.to_bits()).collect::<Vec<u64>>();
        let a = swarm_cluster(3, 5);
        let b = swarm_cluster(3, 5);
        assert_eq!(a.len(), 3);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(bits(x), bits(y));
            assert_eq!(x.best_fitness.to_bits(), y.best_fitness.to_bits());
            assert_eq!(x.fitness_history, y.fitness_history);
        }
        let c = swarm_cluster(3, 6);
        assert_ne!(bits(&a[0]), bits(&c[0]));
    }

    #[test]
    fn test_comm_timeout_fails_stalled_peer() {
        let mut transports = LocalCluster::new(2).into_transports();
        let _stalled = transports.pop().unwrap();
        let t = transports.pop().unwrap();

        let config = RunConfig::default().with_max_generations(10).with_seed(1);
        let distributed = DistributedConfig::default()
            .with_steps_per_round(2)
            .with_comm_timeout_ms(20);
        let mut swarm = SwarmOptimizer::new(de_program(), Arc::new(Sphere(2)), &config, Box::new(t)).unwrap();

        let started = Instant::now();
        let failure = Runner::run_distributed(&mut swarm, &config, &distributed, None).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(failure.error.is_communication());
        assert!(failure.error.to_string().contains("timed out"));
        assert_eq!(failure.generations, 2);
        assert_eq!(failure.log.len(), 2);
        assert_eq!(swarm.phase(), crate::distributed::TribePhase::Terminated);
    }
}
