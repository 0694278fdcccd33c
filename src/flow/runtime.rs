//! Flow-graph interpreter.

use super::compiler;
use super::dsl::Program;
use super::graph::{FlowGraph, NodeId, NodeKind};
use super::storage::{ContainerRole, RuntimeStorage};
use crate::bcd::{BcdConfig, BcdState, BlockMask, MaskScope};
use crate::container::Candidate;
use crate::distributed::{broadcast_mask, propagate_best, Transport};
use crate::error::{ConfigError, MetaflowError};
use crate::objective::{BlockedObjective, Objective};
use crate::random::{create_rng, derive_seed};
use crate::runner::OptimizationLog;
use crate::strategy::{self, StrategyContext};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::Arc;

/// Substream tag of block-mask selectors.
const MASK_STREAM: u64 = 0x4d41_534b;

/// Options fixed at compile time.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Run seed; the runtime's stream is derived from `(seed, rank, tribe)`.
    pub seed: u64,
    /// Index of the tribe this runtime hosts on its rank.
    pub tribe: usize,
    /// Rank used for seeding. Defaults to the transport's rank; set it when
    /// a tribe of a multi-rank run is driven on a private transport.
    pub rank: Option<usize>,
    /// Parallel objective evaluation (requires the `parallel` feature).
    pub parallel: bool,
    pub bcd: Option<BcdConfig>,
}

impl RuntimeOptions {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    pub fn with_tribe(mut self, tribe: usize) -> Self {
        self.tribe = tribe;
        self
    }

    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_bcd(mut self, bcd: BcdConfig) -> Self {
        self.bcd = Some(bcd);
        self
    }
}

/// Where an externally supplied best candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceLevel {
    /// Best among the tribes of this rank.
    Rank,
    /// Best of the whole cluster.
    Cluster,
}

/// What a visit to a node does, read before any mutable work starts.
enum Visit {
    Leaf,
    Bcd,
    Times(usize),
    UntilNoImprove {
        patience: usize,
        max_iters: Option<usize>,
    },
    Chance(f64),
}

/// A compiled program bound to its containers, objective and transport.
///
/// The setup flow runs once (lazily before the first generation); each
/// call to [`step`](Self::step) is one traversal of the generation flow.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use u_metaflow::distributed::SingleRank;
/// use u_metaflow::flow::{Flow, Program, Runtime, RuntimeOptions};
/// use u_metaflow::objective::Objective;
/// use u_metaflow::strategy::DeConfig;
///
/// struct Sphere;
///
/// impl Objective for Sphere {
///     fn dim(&self) -> usize {
///         4
///     }
///     fn evaluate(&self, x: &[f64]) -> f64 {
///         x.iter().map(|v| v * v).sum()
///     }
/// }
///
/// let program = Program::new(
///     Flow::create("main", 20, 20) >> Flow::init_uniform("main"),
///     Flow::de("main", DeConfig::default()),
/// );
/// let mut runtime = Runtime::compile(
///     program,
///     Arc::new(Sphere),
///     RuntimeOptions::new(42),
///     Box::new(SingleRank::new()),
/// )
/// .unwrap();
///
/// for _ in 0..50 {
///     runtime.step().unwrap();
/// }
/// assert!(runtime.best_fitness() < 1.0);
/// ```
pub struct Runtime {
    graph: FlowGraph,
    setup_root: NodeId,
    generation_root: NodeId,
    storage: RuntimeStorage,
    objective: Arc<dyn Objective>,
    bcd: Option<BcdState>,
    rng: StdRng,
    transport: Box<dyn Transport>,
    log: OptimizationLog,
    parallel: bool,
    generation: usize,
    setup_done: bool,
    best: Option<Candidate>,
    pending: Option<Candidate>,
}

impl Runtime {
    /// Validates `program`, allocates its containers and builds the node
    /// arena.
    pub fn compile(
        program: Program,
        objective: Arc<dyn Objective>,
        options: RuntimeOptions,
        transport: Box<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let dim = objective.dim();
        if dim == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        if program.generation.is_empty() {
            return Err(ConfigError::EmptyGenerationFlow);
        }

        let rank = options.rank.unwrap_or_else(|| transport.rank()) as u64;
        let tribe = options.tribe as u64;
        let mut rng = create_rng(derive_seed(options.seed, &[rank, tribe]));

        let bcd = match options.bcd {
            Some(config) => {
                config.validate()?;
                if config.is_active(dim) {
                    let path = match config.scope {
                        MaskScope::Cluster => vec![MASK_STREAM],
                        MaskScope::Rank => vec![MASK_STREAM, rank],
                        MaskScope::Tribe => vec![MASK_STREAM, rank, tribe],
                    };
                    let selector_rng = create_rng(derive_seed(options.seed, &path));
                    Some(BcdState::new(config, objective.as_ref(), selector_rng, &mut rng))
                } else {
                    log::info!(
                        "block size {} covers all {dim} coordinates, BCD disabled",
                        config.block_dim
                    );
                    None
                }
            }
            None => None,
        };

        let width = bcd.as_ref().map_or(dim, |b| b.active_dim());
        let exchange = compiler::Exchange {
            multi_rank: transport.size() > 1,
            bcd: bcd.is_some(),
        };
        let compiled = compiler::compile(program, width, exchange)?;

        log::info!(
            "rank {rank} tribe {tribe}: compiled {} nodes ({} strategies), {} containers, {} bytes",
            compiled.graph.len(),
            compiled.graph.count_leaves(),
            compiled.storage.len(),
            compiled.storage.space()
        );

        Ok(Self {
            graph: compiled.graph,
            setup_root: compiled.setup,
            generation_root: compiled.generation,
            storage: compiled.storage,
            objective,
            bcd,
            rng,
            transport,
            log: OptimizationLog::new(),
            parallel: options.parallel,
            generation: 0,
            setup_done: false,
            best: None,
            pending: None,
        })
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Runs the setup flow. Called automatically by the first [`step`](Self::step).
    pub fn setup(&mut self) -> Result<(), MetaflowError> {
        if self.setup_done {
            return Ok(());
        }
        self.setup_done = true;

        if self.bcd.is_some() && self.transport.size() > 1 {
            let width = self.working_dim();
            self.sync_bcd_state()?;
            self.sync_bcd_mask()?;
            let synced = self.working_dim();
            if synced != width {
                self.storage.reshape_all(synced);
            }
        }
        self.execute(self.setup_root)?;
        self.track_best();
        Ok(())
    }

    /// Runs one generation.
    pub fn step(&mut self) -> Result<(), MetaflowError> {
        self.setup()?;
        self.generation += 1;
        self.execute(self.generation_root)
    }

    /// Accepts a best candidate found elsewhere.
    ///
    /// The candidate is localized to the working width and stored as the
    /// reference of `level`. With `inject` it is also offered to the first
    /// population. Under BCD the full vector is folded into the state at
    /// the next BCD step.
    pub fn adopt(&mut self, full: &Candidate, level: ReferenceLevel, inject: bool) {
        if !full.is_evaluated() {
            return;
        }
        let local = self.localize(full);
        if local.dim() != self.working_dim() {
            log::warn!(
                "ignoring candidate of {} values, expected {}",
                full.dim(),
                self.working_dim()
            );
            return;
        }

        if inject {
            if let Some(primary) = self.storage.primary() {
                self.storage.get_mut(primary).offer(&local);
            }
        }
        match level {
            ReferenceLevel::Rank => self.storage.references.rank = Some(local),
            ReferenceLevel::Cluster => self.storage.references.cluster = Some(local),
        }

        if self.bcd.is_some() && self.pending.as_ref().is_none_or(|p| full.fitness() < p.fitness()) {
            self.pending = Some(full.clone());
        }
        if full.fitness() < self.best_fitness() {
            self.best = Some(full.clone());
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Best full-dimension solution seen so far.
    pub fn best(&self) -> Option<&Candidate> {
        self.best.as_ref()
    }

    /// Fitness of [`best`](Self::best), `+inf` before any evaluation.
    pub fn best_fitness(&self) -> f64 {
        self.best.as_ref().map_or(f64::INFINITY, |c| c.fitness())
    }

    /// Best full-dimension solution currently held in storage.
    pub fn current_best(&self) -> Option<Candidate> {
        strategy::best_full(&self.storage, self.bcd.as_ref(), None)
    }

    /// Generations completed.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn storage(&self) -> &RuntimeStorage {
        &self.storage
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn bcd(&self) -> Option<&BcdState> {
        self.bcd.as_ref()
    }

    pub fn log(&self) -> &OptimizationLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut OptimizationLog {
        &mut self.log
    }

    /// Moves the log out, leaving an empty one with no sinks.
    pub fn take_log(&mut self) -> OptimizationLog {
        std::mem::take(&mut self.log)
    }

    /// Width of the working containers.
    pub fn working_dim(&self) -> usize {
        self.bcd
            .as_ref()
            .map_or_else(|| self.objective.dim(), |b| b.active_dim())
    }

    /// Bytes allocated for candidate data.
    pub fn container_space(&self) -> usize {
        self.storage.space()
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    fn execute(&mut self, id: NodeId) -> Result<(), MetaflowError> {
        let visit = match &mut self.graph.node_mut(id).kind {
            NodeKind::Leaf(_) => Visit::Leaf,
            NodeKind::Bcd => Visit::Bcd,
            NodeKind::Sequence => Visit::Times(1),
            NodeKind::Repeat { n } => Visit::Times(*n),
            NodeKind::UntilNoImprove {
                patience,
                max_iters,
            } => Visit::UntilNoImprove {
                patience: *patience,
                max_iters: *max_iters,
            },
            NodeKind::WithProbability { p } => Visit::Chance(*p),
            NodeKind::EveryK { k, visits } => {
                *visits += 1;
                Visit::Times(usize::from(*visits % *k as u64 == 0))
            }
        };

        match visit {
            Visit::Leaf => self.run_leaf(id),
            Visit::Bcd => self.bcd_step(),
            Visit::Times(n) => {
                for _ in 0..n {
                    self.run_children(id)?;
                }
                Ok(())
            }
            Visit::UntilNoImprove {
                patience,
                max_iters,
            } => self.run_until_no_improve(id, patience, max_iters),
            Visit::Chance(p) => {
                if self.rng.random::<f64>() < p {
                    self.run_children(id)?;
                }
                Ok(())
            }
        }
    }

    fn run_children(&mut self, id: NodeId) -> Result<(), MetaflowError> {
        for i in 0..self.graph.node(id).children.len() {
            let child = self.graph.node(id).children[i];
            self.execute(child)?;
        }
        Ok(())
    }

    fn run_until_no_improve(
        &mut self,
        id: NodeId,
        patience: usize,
        max_iters: Option<usize>,
    ) -> Result<(), MetaflowError> {
        let mut stale = 0;
        let mut iters = 0;
        while max_iters.is_none_or(|m| iters < m) {
            let before = self.best_fitness();
            self.run_children(id)?;
            iters += 1;
            if self.best_fitness() < before {
                stale = 0;
            } else {
                stale += 1;
                if stale >= patience {
                    break;
                }
            }
        }
        Ok(())
    }

    fn run_leaf(&mut self, id: NodeId) -> Result<(), MetaflowError> {
        let Self {
            graph,
            storage,
            objective,
            bcd,
            rng,
            transport,
            log,
            parallel,
            generation,
            ..
        } = &mut *self;

        let NodeKind::Leaf(strategy) = &mut graph.node_mut(id).kind else {
            return Ok(());
        };
        let blocked;
        let objective: &dyn Objective = match bcd.as_ref() {
            Some(state) => {
                blocked = BlockedObjective::new(Arc::clone(objective), state.view());
                &blocked
            }
            None => &**objective,
        };

        let mut ctx = StrategyContext {
            storage,
            objective,
            bcd: bcd.as_ref(),
            rng,
            transport: &mut **transport,
            log,
            generation: *generation,
            parallel: *parallel,
        };
        strategy.apply(&mut ctx)?;
        self.track_best();
        Ok(())
    }

    fn track_best(&mut self) {
        let partial = self.storage.best().map_or(f64::INFINITY, |c| c.fitness());
        let state = self.bcd.as_ref().map_or(f64::INFINITY, |b| b.fitness());
        if partial.min(state) < self.best_fitness() {
            self.best = strategy::best_full(&self.storage, self.bcd.as_ref(), None);
        }
    }

    fn localize(&self, full: &Candidate) -> Candidate {
        match &self.bcd {
            Some(bcd) => {
                let blocked = BlockedObjective::new(Arc::clone(&self.objective), bcd.view());
                strategy::localize(&blocked, Some(bcd), full)
            }
            None => full.clone(),
        }
    }

    // ========================================================================
    // Block-coordinate sweep
    // ========================================================================

    fn bcd_step(&mut self) -> Result<(), MetaflowError> {
        let Some(bcd) = self.bcd.as_mut() else {
            return Ok(());
        };

        if let Some(partial) = self.storage.best() {
            bcd.fold_partial(partial);
        }
        if let Some(p) = self.pending.take() {
            bcd.adopt(p.position(), p.fitness());
        }
        self.sync_bcd_state()?;

        if let Some(bcd) = self.bcd.as_mut() {
            bcd.advance();
        }
        self.sync_bcd_mask()?;
        self.reallocate();

        self.storage.references.clear();
        self.graph.reset_strategies();
        if let Some(bcd) = &self.bcd {
            log::debug!(
                "rank {}: BCD sweep {} block {:?} fitness {:.6e}",
                self.transport.rank(),
                bcd.sweeps(),
                bcd.mask(),
                bcd.fitness()
            );
        }
        self.track_best();
        Ok(())
    }

    /// All ranks adopt the best full state.
    fn sync_bcd_state(&mut self) -> Result<(), MetaflowError> {
        if self.transport.size() == 1 {
            return Ok(());
        }
        let Some(bcd) = self.bcd.as_mut() else {
            return Ok(());
        };
        let mine = Candidate::new(bcd.state().to_vec(), bcd.fitness());
        if let Some((_, winner)) = propagate_best(self.transport.as_mut(), Some(&mine))? {
            bcd.adopt(winner.position(), winner.fitness());
        }
        Ok(())
    }

    /// Under cluster scope, every rank takes the mask of rank 0.
    fn sync_bcd_mask(&mut self) -> Result<(), MetaflowError> {
        if self.transport.size() == 1 {
            return Ok(());
        }
        let Some(bcd) = self.bcd.as_mut() else {
            return Ok(());
        };
        if bcd.config().scope != MaskScope::Cluster {
            return Ok(());
        }
        let mask = broadcast_mask(self.transport.as_mut(), 0, bcd.mask(), bcd.state().len())?;
        if mask != bcd.mask() {
            bcd.set_mask(BlockMask::new(mask));
        }
        Ok(())
    }

    /// Resizes every container to the active block and reseeds populations:
    /// candidate 0 holds the projection of the state, the rest are uniform.
    fn reallocate(&mut self) {
        let Some(bcd) = &self.bcd else {
            return;
        };
        self.storage.reshape_all(bcd.active_dim());

        let projection = bcd.projection();
        let fitness = bcd.fitness();
        let blocked = BlockedObjective::new(Arc::clone(&self.objective), bcd.view());
        for id in self.storage.ids_with_role(ContainerRole::Population) {
            let pop = self.storage.get_mut(id);
            for (i, c) in pop.candidates_mut().iter_mut().enumerate() {
                if i == 0 {
                    c.assign(&projection, fitness);
                } else {
                    strategy::sample_position(&mut self.rng, &blocked, c.position_mut());
                }
            }
            let len = pop.len();
            if len > 1 {
                pop.evaluate_range(&blocked, 1..len, self.parallel);
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("rank", &self.transport.rank())
            .field("generation", &self.generation)
            .field("nodes", &self.graph.len())
            .field("containers", &self.storage.len())
            .field("best_fitness", &self.best_fitness())
            .finish()
    }
}
