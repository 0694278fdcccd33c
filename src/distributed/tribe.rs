//! Per-rank coordination state machine.

use crate::error::MetaflowError;
use serde::{Deserialize, Serialize};

/// Phase of a rank in a distributed run.
///
/// ```text
/// Init -> LocalOptimize -> (SyncBarrier) -> Propagate -> LocalOptimize -> ...
///                                                     \-> Terminated
/// ```
///
/// Any phase except `Terminated` may move to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TribePhase {
    Init,
    LocalOptimize,
    SyncBarrier,
    Propagate,
    Terminated,
}

impl TribePhase {
    /// Whether `self -> to` is a legal transition.
    pub fn can_advance(self, to: TribePhase) -> bool {
        use TribePhase::*;
        matches!(
            (self, to),
            (Init, LocalOptimize)
                | (LocalOptimize, SyncBarrier)
                | (LocalOptimize, Propagate)
                | (SyncBarrier, Propagate)
                | (Propagate, LocalOptimize)
                | (Init | LocalOptimize | SyncBarrier | Propagate, Terminated)
        )
    }
}

/// Tracks the phase of one rank and rejects illegal transitions.
#[derive(Debug, Clone)]
pub struct TribeState {
    phase: TribePhase,
    rounds: usize,
}

impl Default for TribeState {
    fn default() -> Self {
        Self::new()
    }
}

impl TribeState {
    pub fn new() -> Self {
        Self {
            phase: TribePhase::Init,
            rounds: 0,
        }
    }

    pub fn phase(&self) -> TribePhase {
        self.phase
    }

    /// Number of completed propagation rounds.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn advance(&mut self, to: TribePhase) -> Result<(), MetaflowError> {
        if !self.phase.can_advance(to) {
            return Err(MetaflowError::IllegalTransition {
                from: self.phase,
                to,
            });
        }
        if self.phase == TribePhase::Propagate && to == TribePhase::LocalOptimize {
            self.rounds += 1;
        }
        log::debug!("tribe phase {:?} -> {:?}", self.phase, to);
        self.phase = to;
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == TribePhase::Terminated
    }
}
