//! Composable metaheuristic optimization runtime.
//!
//! Optimizers are assembled from small strategies arranged in a flow graph
//! rather than written as monolithic loops:
//!
//! - **Strategies**: uniform and normal initialization, Gaussian mutation,
//!   multipoint and segment crossover, EDA (diagonal or full covariance),
//!   differential evolution and particle swarm, plus container operations
//!   and best propagation.
//! - **Flow graph**: strategies compose under control nodes (repeat,
//!   repeat-until-no-improve, run-with-probability, run-every-k) into a
//!   setup flow and a generation flow.
//! - **Block-coordinate descent (BCD)**: very high-dimensional objectives
//!   are optimized one block of coordinates at a time.
//! - **Distributed tribes**: ranks (and tribes within a rank) evolve
//!   independently and periodically exchange their best solutions.
//!
//! All algorithms minimize. Every stochastic decision draws from a seeded
//! [`StdRng`](rand::rngs::StdRng), so runs are reproducible.
//!
//! # Architecture
//!
//! `objective` and `container` hold the data model, `strategy` the
//! transformations over it, and `flow` the compiler and interpreter.
//! `bcd` and `distributed` extend the runtime; `runner` drives it.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use u_metaflow::flow::{Flow, Program};
//! use u_metaflow::objective::Objective;
//! use u_metaflow::runner::{RunConfig, Runner};
//! use u_metaflow::strategy::{DeConfig, MutationConfig};
//!
//! struct Rastrigin(usize);
//!
//! impl Objective for Rastrigin {
//!     fn dim(&self) -> usize {
//!         self.0
//!     }
//!     fn evaluate(&self, x: &[f64]) -> f64 {
//!         let tau = std::f64::consts::TAU;
//!         10.0 * x.len() as f64
//!             + x.iter().map(|v| v * v - 10.0 * (tau * v).cos()).sum::<f64>()
//!     }
//!     fn lower_bound(&self, _index: usize) -> f64 {
//!         -5.12
//!     }
//!     fn upper_bound(&self, _index: usize) -> f64 {
//!         5.12
//!     }
//! }
//!
//! let program = Program::new(
//!     Flow::create("main", 40, 10) >> Flow::init_uniform("main"),
//!     Flow::de("main", DeConfig::default())
//!         >> Flow::with_probability(0.2, Flow::mutation("main", MutationConfig::default()))
//!         >> Flow::every_k(25, Flow::log_best()),
//! );
//! let config = RunConfig::default().with_max_generations(200).with_seed(7);
//! let result = Runner::run(program, Arc::new(Rastrigin(5)), &config).unwrap();
//! assert_eq!(result.log.len(), 8);
//! assert!(result.best_fitness < result.fitness_history[0]);
//! ```

pub mod bcd;
pub mod container;
pub mod distributed;
pub mod error;
pub mod flow;
pub mod objective;
pub mod random;
pub mod runner;
pub mod strategy;
