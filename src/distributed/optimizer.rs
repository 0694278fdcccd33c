//! Rank-level optimizer abstraction.

use super::tribe::TribePhase;
use crate::container::Candidate;
use crate::error::MetaflowError;
use crate::runner::LogRecord;
use std::time::Duration;

/// One rank of a distributed run.
///
/// An optimizer owns the rank's transport and its tribe runtimes. The
/// driver calls [`setup`](Self::setup) once, then alternates blocks of
/// [`step`](Self::step) with [`propagate`](Self::propagate). Every rank must
/// perform the same sequence of collective calls.
pub trait Optimizer: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn phase(&self) -> TribePhase;

    /// Sets how long collectives wait for a peer before failing.
    fn set_comm_timeout(&mut self, timeout: Duration);

    /// Runs the setup flow of every tribe and enters local optimization.
    fn setup(&mut self) -> Result<(), MetaflowError>;

    /// Runs one generation on every tribe.
    fn step(&mut self) -> Result<(), MetaflowError>;

    /// Exchanges bests across tribes and ranks and adopts the winners.
    fn propagate(&mut self) -> Result<(), MetaflowError>;

    /// Returns `true` on every rank if any rank asks to stop.
    fn vote_stop(&mut self, stop: bool) -> Result<bool, MetaflowError>;

    /// Moves to `Terminated`. Idempotent.
    fn terminate(&mut self);

    /// Generations completed by each tribe.
    fn generation(&self) -> usize;

    /// Best full-dimension solution held by this rank.
    fn best(&self) -> Option<&Candidate>;

    /// Drains the log records gathered so far.
    fn take_records(&mut self) -> Vec<LogRecord>;
}
