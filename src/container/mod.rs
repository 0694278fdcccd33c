//! Solution containers.
//!
//! A [`SolutionContainer`] owns a fixed number of [`Candidate`]s that share
//! one dimension. Strategies mutate containers in place; the runtime keeps
//! every container of a run in its storage and tracks the best candidate
//! across all of them.

mod population;
mod types;

pub use population::SolutionContainer;
pub use types::Candidate;
