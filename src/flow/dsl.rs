//! Flow description.
//!
//! A [`Flow`] is an ordered list of [`Step`]s that refer to containers by
//! name. Flows are plain data until [`Runtime::compile`] resolves names,
//! allocates containers and builds the node arena.
//!
//! Flows compose with `>>`:
//!
//! ```
//! use u_metaflow::flow::Flow;
//! use u_metaflow::strategy::DeConfig;
//!
//! let setup = Flow::create("main", 40, 10) >> Flow::init_uniform("main");
//! let generation = Flow::repeat(5, Flow::de("main", DeConfig::default()))
//!     >> Flow::every_k(10, Flow::log_best());
//! assert_eq!(setup.len(), 2);
//! assert_eq!(generation.len(), 2);
//! ```
//!
//! [`Runtime::compile`]: super::Runtime::compile

use crate::strategy::{CrossoverKind, DeConfig, EdaConfig, MutationConfig, PsoConfig, Strategy};
use std::fmt;
use std::ops::Shr;

/// One element of a flow.
pub enum Step {
    /// Allocates a population of `size` candidates in groups of `group_size`.
    CreateContainer {
        name: String,
        size: usize,
        group_size: usize,
    },
    /// Allocates velocity and best memories for a population.
    PsoMemory { name: String, population: String },
    InitUniform(String),
    InitNormal(String),
    Mutation {
        target: String,
        config: MutationConfig,
    },
    Crossover {
        target: String,
        kind: CrossoverKind,
    },
    Eda {
        target: String,
        config: EdaConfig,
    },
    DifferentialEvolution {
        target: String,
        config: DeConfig,
    },
    Pso {
        memory: String,
        config: PsoConfig,
    },
    TakeBest {
        destination: String,
        source: String,
    },
    Evaluate(String),
    /// `target = None` injects into the first population.
    PropagateBest {
        source: Option<String>,
        target: Option<String>,
    },
    LogBest(Option<String>),
    /// Block-coordinate sweep; a no-op without BCD.
    BcdStep,
    /// A user strategy; it resolves container names itself.
    Custom(Box<dyn Strategy>),
    Repeat {
        n: usize,
        body: Flow,
    },
    UntilNoImprove {
        patience: usize,
        max_iters: Option<usize>,
        body: Flow,
    },
    WithProbability {
        p: f64,
        body: Flow,
    },
    EveryK {
        k: usize,
        body: Flow,
    },
}

impl Step {
    /// Short name for diagnostics.
    pub fn label(&self) -> String {
        match self {
            Step::CreateContainer { name, .. } => format!("create({name})"),
            Step::PsoMemory { name, .. } => format!("pso_memory({name})"),
            Step::InitUniform(t) => format!("init_uniform({t})"),
            Step::InitNormal(t) => format!("init_normal({t})"),
            Step::Mutation { target, .. } => format!("mutation({target})"),
            Step::Crossover { target, .. } => format!("crossover({target})"),
            Step::Eda { target, .. } => format!("eda({target})"),
            Step::DifferentialEvolution { target, .. } => format!("de({target})"),
            Step::Pso { memory, .. } => format!("pso({memory})"),
            Step::TakeBest {
                destination,
                source,
            } => format!("take_best({destination} <- {source})"),
            Step::Evaluate(t) => format!("evaluate({t})"),
            Step::PropagateBest { .. } => "propagate_best".to_string(),
            Step::LogBest(_) => "log_best".to_string(),
            Step::BcdStep => "bcd_step".to_string(),
            Step::Custom(s) => s.name().to_string(),
            Step::Repeat { n, .. } => format!("repeat({n})"),
            Step::UntilNoImprove { patience, .. } => format!("until_no_improve({patience})"),
            Step::WithProbability { p, .. } => format!("with_probability({p})"),
            Step::EveryK { k, .. } => format!("every_k({k})"),
        }
    }

    /// Nested flow of a control step.
    pub fn body(&self) -> Option<&Flow> {
        match self {
            Step::Repeat { body, .. }
            | Step::UntilNoImprove { body, .. }
            | Step::WithProbability { body, .. }
            | Step::EveryK { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body() {
            Some(body) => write!(f, "{} {:?}", self.label(), body),
            None => f.write_str(&self.label()),
        }
    }
}

/// An ordered sequence of steps.
#[derive(Debug, Default)]
pub struct Flow {
    steps: Vec<Step>,
}

impl From<Step> for Flow {
    fn from(step: Step) -> Self {
        Self { steps: vec![step] }
    }
}

impl Shr for Flow {
    type Output = Flow;

    fn shr(self, rhs: Flow) -> Flow {
        self.then(rhs)
    }
}

impl IntoIterator for Flow {
    type Item = Step;
    type IntoIter = std::vec::IntoIter<Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

impl Flow {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Appends the steps of `next`.
    pub fn then(mut self, next: impl Into<Flow>) -> Self {
        self.steps.extend(next.into().steps);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    // ---- containers ----

    pub fn create(name: &str, size: usize, group_size: usize) -> Self {
        Step::CreateContainer {
            name: name.to_string(),
            size,
            group_size,
        }
        .into()
    }

    pub fn pso_memory(name: &str, population: &str) -> Self {
        Step::PsoMemory {
            name: name.to_string(),
            population: population.to_string(),
        }
        .into()
    }

    pub fn take_best(destination: &str, source: &str) -> Self {
        Step::TakeBest {
            destination: destination.to_string(),
            source: source.to_string(),
        }
        .into()
    }

    pub fn evaluate(target: &str) -> Self {
        Step::Evaluate(target.to_string()).into()
    }

    // ---- strategies ----

    pub fn init_uniform(target: &str) -> Self {
        Step::InitUniform(target.to_string()).into()
    }

    pub fn init_normal(target: &str) -> Self {
        Step::InitNormal(target.to_string()).into()
    }

    pub fn mutation(target: &str, config: MutationConfig) -> Self {
        Step::Mutation {
            target: target.to_string(),
            config,
        }
        .into()
    }

    pub fn crossover(target: &str, kind: CrossoverKind) -> Self {
        Step::Crossover {
            target: target.to_string(),
            kind,
        }
        .into()
    }

    pub fn eda(target: &str, config: EdaConfig) -> Self {
        Step::Eda {
            target: target.to_string(),
            config,
        }
        .into()
    }

    pub fn de(target: &str, config: DeConfig) -> Self {
        Step::DifferentialEvolution {
            target: target.to_string(),
            config,
        }
        .into()
    }

    pub fn pso(memory: &str, config: PsoConfig) -> Self {
        Step::Pso {
            memory: memory.to_string(),
            config,
        }
        .into()
    }

    /// Exchanges the storage-wide best and injects the winner into the
    /// first population.
    pub fn propagate_best() -> Self {
        Step::PropagateBest {
            source: None,
            target: None,
        }
        .into()
    }

    pub fn propagate_best_between(source: &str, target: &str) -> Self {
        Step::PropagateBest {
            source: Some(source.to_string()),
            target: Some(target.to_string()),
        }
        .into()
    }

    pub fn log_best() -> Self {
        Step::LogBest(None).into()
    }

    pub fn log_best_of(container: &str) -> Self {
        Step::LogBest(Some(container.to_string())).into()
    }

    pub fn bcd_step() -> Self {
        Step::BcdStep.into()
    }

    pub fn custom(strategy: impl Strategy + 'static) -> Self {
        Step::Custom(Box::new(strategy)).into()
    }

    // ---- control ----

    pub fn repeat(n: usize, body: impl Into<Flow>) -> Self {
        Step::Repeat {
            n,
            body: body.into(),
        }
        .into()
    }

    pub fn until_no_improve(patience: usize, body: impl Into<Flow>) -> Self {
        Step::UntilNoImprove {
            patience,
            max_iters: None,
            body: body.into(),
        }
        .into()
    }

    /// Like [`until_no_improve`](Self::until_no_improve) with an upper bound
    /// on executions.
    pub fn until_no_improve_capped(patience: usize, max_iters: usize, body: impl Into<Flow>) -> Self {
        Step::UntilNoImprove {
            patience,
            max_iters: Some(max_iters),
            body: body.into(),
        }
        .into()
    }

    pub fn with_probability(p: f64, body: impl Into<Flow>) -> Self {
        Step::WithProbability {
            p,
            body: body.into(),
        }
        .into()
    }

    pub fn every_k(k: usize, body: impl Into<Flow>) -> Self {
        Step::EveryK {
            k,
            body: body.into(),
        }
        .into()
    }
}

/// The two flows of a run.
#[derive(Debug, Default)]
pub struct Program {
    /// Executed once before the first generation.
    pub setup: Flow,
    /// One traversal per generation.
    pub generation: Flow,
}

impl Program {
    pub fn new(setup: Flow, generation: Flow) -> Self {
        Self { setup, generation }
    }
}
