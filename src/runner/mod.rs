//! Run driver, budgets and optimization log.
//!
//! - [`Runner::run`] / [`Runner::run_with_cancel`] execute a program on
//!   one rank.
//! - [`Runner::run_distributed`] drives a rank of a multi-rank run through
//!   an [`Optimizer`](crate::distributed::Optimizer).
//! - [`OptimizationLog`] collects the records pushed by `LogBest` steps and
//!   forwards them to [`LogSink`]s such as [`CsvSink`]. Attach sinks via
//!   [`Runner::compile`] and `Runtime::log_mut` before [`Runner::drive`].

mod config;
mod history;
mod run;
mod termination;

pub use config::{DistributedConfig, RunConfig};
pub use history::{CsvSink, LogRecord, LogSink, MemorySink, OptimizationLog};
pub use run::{RunFailure, RunResult, Runner};
pub use termination::{StopReason, Termination};
