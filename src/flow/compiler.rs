//! Flow compiler.
//!
//! Compilation runs two passes over the setup and generation flows:
//!
//! 1. **Allocation**: every `CreateContainer` and `PsoMemory` step, at any
//!    nesting depth, allocates its containers at the working width.
//! 2. **Assignment**: every other step becomes a node of the arena, with
//!    container names resolved to ids and strategy parameters validated.
//!
//! Every configuration problem surfaces here as a [`ConfigError`]; a
//! compiled graph never fails on a name or a parameter at run time.
//!
//! # Collectives
//!
//! With more than one rank, `propagate_best` and an active BCD step are
//! collective: every rank must reach them in the same order.
//! `with_probability` and `until_no_improve` decide per rank, so a
//! collective anywhere in their body is rejected. `repeat` and `every_k`
//! count visits identically on every rank and may contain collectives.
//! Custom strategies are opaque and must not exchange under those nodes.

use super::dsl::{Flow, Program, Step};
use super::graph::{FlowGraph, NodeId, NodeKind};
use super::storage::{ContainerId, ContainerRole, RuntimeStorage};
use crate::container::SolutionContainer;
use crate::error::ConfigError;
use crate::strategy::{
    de, Crossover, DifferentialEvolution, Eda, Evaluate, GaussianMutation, InitNormal,
    InitUniform, LogBest, PropagateBest, Pso, Strategy, TakeBest,
};

/// Output of compilation.
pub(crate) struct Compiled {
    pub graph: FlowGraph,
    pub storage: RuntimeStorage,
    pub setup: NodeId,
    pub generation: NodeId,
}

/// Which steps exchange with other ranks once compiled.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Exchange {
    /// The transport has more than one rank.
    pub multi_rank: bool,
    /// BCD is active, so `bcd_step` synchronizes state.
    pub bcd: bool,
}

impl Exchange {
    fn is_collective(&self, step: &Step) -> bool {
        self.multi_rank
            && match step {
                Step::PropagateBest { .. } => true,
                Step::BcdStep => self.bcd,
                _ => false,
            }
    }
}

/// Compiles a program for a working width of `dim`.
pub(crate) fn compile(program: Program, dim: usize, exchange: Exchange) -> Result<Compiled, ConfigError> {
    if program.generation.is_empty() {
        return Err(ConfigError::EmptyGenerationFlow);
    }

    let mut storage = RuntimeStorage::new();
    allocate(&program.setup, dim, &mut storage)?;
    allocate(&program.generation, dim, &mut storage)?;

    let mut graph = FlowGraph::new();
    let setup = graph.add(NodeKind::Sequence);
    let scope = Scope {
        storage: &storage,
        exchange,
    };
    assign(program.setup, setup, &mut graph, &scope, None)?;
    let generation = graph.add(NodeKind::Sequence);
    assign(program.generation, generation, &mut graph, &scope, None)?;

    Ok(Compiled {
        graph,
        storage,
        setup,
        generation,
    })
}

fn allocate(flow: &Flow, dim: usize, storage: &mut RuntimeStorage) -> Result<(), ConfigError> {
    for step in flow.steps() {
        match step {
            Step::CreateContainer {
                name,
                size,
                group_size,
            } => {
                if *size == 0 {
                    return Err(ConfigError::EmptyContainer(name.clone()));
                }
                if *group_size == 0 {
                    return Err(ConfigError::ZeroGroupSize(name.clone()));
                }
                storage.insert(
                    name,
                    ContainerRole::Population,
                    SolutionContainer::new(*size, dim, *group_size),
                )?;
            }
            Step::PsoMemory { name, population } => {
                storage.insert_pso_memory(name, population)?;
            }
            other => {
                if let Some(body) = other.body() {
                    allocate(body, dim, storage)?;
                }
            }
        }
    }
    Ok(())
}

fn require_size(
    storage: &RuntimeStorage,
    strategy: &'static str,
    id: ContainerId,
    required: usize,
) -> Result<(), ConfigError> {
    let found = storage.get(id).len();
    if found < required {
        return Err(ConfigError::PopulationTooSmall {
            strategy,
            container: storage.name(id).to_string(),
            required,
            found,
        });
    }
    Ok(())
}

fn leaf(strategy: impl Strategy + 'static) -> NodeKind {
    NodeKind::Leaf(Box::new(strategy))
}

fn positive(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidParameter {
            name,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Read-only inputs of the assignment pass.
struct Scope<'a> {
    storage: &'a RuntimeStorage,
    exchange: Exchange,
}

/// `local` names the innermost enclosing node that decides per rank.
fn assign(
    flow: Flow,
    parent: NodeId,
    graph: &mut FlowGraph,
    scope: &Scope<'_>,
    local: Option<&'static str>,
) -> Result<(), ConfigError> {
    let storage = scope.storage;
    for step in flow {
        if let Some(control) = local {
            if scope.exchange.is_collective(&step) {
                return Err(ConfigError::CollectiveUnderLocalControl {
                    step: step.label(),
                    control,
                });
            }
        }
        let inner = match &step {
            Step::WithProbability { .. } => Some("with_probability"),
            Step::UntilNoImprove { .. } => Some("until_no_improve"),
            _ => local,
        };
        let (kind, body) = match step {
            Step::CreateContainer { .. } | Step::PsoMemory { .. } => continue,
            Step::InitUniform(target) => (leaf(InitUniform::new(storage.require(&target)?)), None),
            Step::InitNormal(target) => (leaf(InitNormal::new(storage.require(&target)?)), None),
            Step::Mutation { target, config } => {
                let id = storage.require(&target)?;
                (leaf(GaussianMutation::new(id, &config)?), None)
            }
            Step::Crossover { target, kind } => {
                let id = storage.require(&target)?;
                (leaf(Crossover::new(id, kind)?), None)
            }
            Step::Eda { target, config } => {
                let id = storage.require(&target)?;
                config.validate()?;
                require_size(storage, "eda", id, config.elites)?;
                (leaf(Eda::new(id, config)?), None)
            }
            Step::DifferentialEvolution { target, config } => {
                let id = storage.require(&target)?;
                require_size(storage, "differential_evolution", id, de::MIN_POPULATION)?;
                (leaf(DifferentialEvolution::new(id, config)?), None)
            }
            Step::Pso { memory, config } => {
                let ids = storage.require_memory(&memory)?;
                (leaf(Pso::new(ids, config)?), None)
            }
            Step::TakeBest {
                destination,
                source,
            } => {
                let d = storage.require(&destination)?;
                let s = storage.require(&source)?;
                (leaf(TakeBest::new(d, s)), None)
            }
            Step::Evaluate(target) => (leaf(Evaluate::new(storage.require(&target)?)), None),
            Step::PropagateBest { source, target } => {
                let source = source.map(|s| storage.require(&s)).transpose()?;
                let target = match target {
                    Some(t) => storage.require(&t)?,
                    None => storage
                        .primary()
                        .ok_or_else(|| ConfigError::UnknownContainer("<population>".to_string()))?,
                };
                (leaf(PropagateBest::new(source, target)), None)
            }
            Step::LogBest(source) => {
                let source = source.map(|s| storage.require(&s)).transpose()?;
                (leaf(LogBest::new(source)), None)
            }
            Step::BcdStep => (NodeKind::Bcd, None),
            Step::Custom(strategy) => (NodeKind::Leaf(strategy), None),
            Step::Repeat { n, body } => {
                positive("n", n)?;
                (NodeKind::Repeat { n }, Some(body))
            }
            Step::UntilNoImprove {
                patience,
                max_iters,
                body,
            } => {
                positive("patience", patience)?;
                if let Some(m) = max_iters {
                    positive("max_iters", m)?;
                }
                (
                    NodeKind::UntilNoImprove {
                        patience,
                        max_iters,
                    },
                    Some(body),
                )
            }
            Step::WithProbability { p, body } => {
                if !(0.0..=1.0).contains(&p) {
                    return Err(ConfigError::InvalidProbability(p));
                }
                (NodeKind::WithProbability { p }, Some(body))
            }
            Step::EveryK { k, body } => {
                positive("k", k)?;
                (NodeKind::EveryK { k, visits: 0 }, Some(body))
            }
        };

        let node = graph.add(kind);
        graph.add_child(parent, node);
        if let Some(body) = body {
            assign(body, node, graph, scope, inner)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{DeConfig, EdaConfig, PsoConfig};

    fn program(setup: Flow, generation: Flow) -> Program {
        Program::new(setup, generation)
    }

    fn compile_err(setup: Flow, generation: Flow) -> ConfigError {
        match compile(program(setup, generation), 3, Exchange::default()) {
            Ok(_) => panic!("expected a configuration error"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_allocation_includes_nested_containers() {
        let setup = Flow::create("a", 10, 5) >> Flow::init_uniform("a");
        let generation = Flow::repeat(2, Flow::create("b", 4, 4) >> Flow::take_best("a", "b"));
        let compiled = compile(program(setup, generation), 3, Exchange::default()).unwrap();
        assert_eq!(compiled.storage.len(), 2);
        assert_eq!(compiled.storage.by_name("b").map(|c| c.dim()), Some(3));
        // setup root, init leaf, generation root, repeat, take_best leaf
        assert_eq!(compiled.graph.len(), 5);
        assert_eq!(compiled.graph.count_leaves(), 2);
    }

    #[test]
    fn test_unknown_container() {
        let err = compile_err(Flow::empty(), Flow::init_uniform("nope"));
        assert_eq!(err, ConfigError::UnknownContainer("nope".into()));
    }

    #[test]
    fn test_empty_container_and_group() {
        assert_eq!(
            compile_err(Flow::create("a", 0, 1), Flow::log_best()),
            ConfigError::EmptyContainer("a".into())
        );
        assert_eq!(
            compile_err(Flow::create("a", 3, 0), Flow::log_best()),
            ConfigError::ZeroGroupSize("a".into())
        );
    }

    #[test]
    fn test_invalid_probability() {
        let err = compile_err(Flow::empty(), Flow::with_probability(1.5, Flow::log_best()));
        assert_eq!(err, ConfigError::InvalidProbability(1.5));
        let err = compile_err(Flow::empty(), Flow::with_probability(f64::NAN, Flow::log_best()));
        assert!(matches!(err, ConfigError::InvalidProbability(_)));
    }

    #[test]
    fn test_de_population_too_small() {
        let err = compile_err(Flow::create("a", 3, 3), Flow::de("a", DeConfig::default()));
        assert_eq!(
            err,
            ConfigError::PopulationTooSmall {
                strategy: "differential_evolution",
                container: "a".into(),
                required: 4,
                found: 3
            }
        );
    }

    #[test]
    fn test_eda_elites_exceed_population() {
        let err = compile_err(
            Flow::create("a", 5, 5),
            Flow::eda("a", EdaConfig::default().with_elites(6)),
        );
        assert!(matches!(err, ConfigError::PopulationTooSmall { required: 6, found: 5, .. }));
    }

    #[test]
    fn test_unknown_memory_and_duplicates() {
        assert_eq!(
            compile_err(Flow::create("a", 5, 5), Flow::pso("M", PsoConfig::default())),
            ConfigError::UnknownMemory("M".into())
        );
        assert_eq!(
            compile_err(Flow::create("a", 5, 5) >> Flow::create("a", 2, 2), Flow::log_best()),
            ConfigError::DuplicateContainer("a".into())
        );
    }

    #[test]
    fn test_empty_generation_and_zero_counts() {
        assert_eq!(compile_err(Flow::empty(), Flow::empty()), ConfigError::EmptyGenerationFlow);
        assert!(matches!(
            compile_err(Flow::empty(), Flow::every_k(0, Flow::log_best())),
            ConfigError::InvalidParameter { name: "k", .. }
        ));
        assert!(matches!(
            compile_err(Flow::empty(), Flow::until_no_improve(0, Flow::log_best())),
            ConfigError::InvalidParameter { name: "patience", .. }
        ));
    }

    #[test]
    fn test_propagate_needs_a_population() {
        let err = compile_err(Flow::empty(), Flow::propagate_best());
        assert!(matches!(err, ConfigError::UnknownContainer(_)));
    }

    fn multi_rank(bcd: bool) -> Exchange {
        Exchange {
            multi_rank: true,
            bcd,
        }
    }

    fn compile_with(generation: Flow, exchange: Exchange) -> Result<Compiled, ConfigError> {
        compile(
            program(Flow::create("a", 4, 4), generation),
            3,
            exchange,
        )
    }

    #[test]
    fn test_collective_under_probability_rejected() {
        let err = compile_with(
            Flow::with_probability(0.5, Flow::propagate_best()),
            multi_rank(false),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            ConfigError::CollectiveUnderLocalControl {
                step: "propagate_best".into(),
                control: "with_probability",
            }
        );
    }

    #[test]
    fn test_collective_nested_under_until_no_improve_rejected() {
        let generation = Flow::until_no_improve(3, Flow::repeat(2, Flow::every_k(2, Flow::bcd_step())));
        let err = compile_with(generation, multi_rank(true)).err().unwrap();
        assert!(matches!(
            err,
            ConfigError::CollectiveUnderLocalControl {
                control: "until_no_improve",
                ..
            }
        ));
    }

    #[test]
    fn test_collectives_allowed_where_ranks_agree() {
        let generation = Flow::repeat(2, Flow::propagate_best())
            >> Flow::every_k(3, Flow::bcd_step())
            >> Flow::with_probability(0.5, Flow::log_best());
        assert!(compile_with(generation, multi_rank(true)).is_ok());

        // single rank, or BCD inactive, exchanges nothing
        let generation = Flow::with_probability(0.5, Flow::propagate_best());
        assert!(compile_with(generation, Exchange::default()).is_ok());
        let generation = Flow::with_probability(0.5, Flow::bcd_step());
        assert!(compile_with(generation, multi_rank(false)).is_ok());
    }
}
