//! Stop conditions checked between generations.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The generation budget was used up.
    MaxGenerations,
    /// The wall-clock limit passed.
    TimeLimit,
    /// The cancellation flag was set.
    Cancelled,
    /// Another rank reached its time limit or was cancelled.
    PeerStopped,
}

/// Generation budget, deadline and cancellation flag of one run.
#[derive(Debug, Clone)]
pub struct Termination {
    max_generations: usize,
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Termination {
    pub fn new(max_generations: usize, time_limit_ms: Option<u64>, cancel: Option<Arc<AtomicBool>>) -> Self {
        Self {
            max_generations,
            deadline: time_limit_ms.map(|ms| Instant::now() + Duration::from_millis(ms)),
            cancel,
        }
    }

    /// Whether `generation` completed generations exhaust the budget.
    pub fn budget_reached(&self, generation: usize) -> bool {
        generation >= self.max_generations
    }

    /// Generations left in the budget.
    pub fn remaining(&self, generation: usize) -> usize {
        self.max_generations.saturating_sub(generation)
    }

    /// Stop conditions that may differ between ranks: cancellation first,
    /// then the deadline.
    pub fn external(&self) -> Option<StopReason> {
        if self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Some(StopReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(StopReason::TimeLimit);
        }
        None
    }

    /// All stop conditions after `generation` completed generations.
    pub fn check(&self, generation: usize) -> Option<StopReason> {
        self.external().or_else(|| {
            self.budget_reached(generation)
                .then_some(StopReason::MaxGenerations)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget() {
        let t = Termination::new(3, None, None);
        assert_eq!(t.check(2), None);
        assert_eq!(t.check(3), Some(StopReason::MaxGenerations));
        assert_eq!(t.remaining(1), 2);
        assert_eq!(t.remaining(5), 0);
    }

    #[test]
    fn test_cancel_wins() {
        let flag = Arc::new(AtomicBool::new(false));
        let t = Termination::new(3, Some(60_000), Some(Arc::clone(&flag)));
        assert_eq!(t.external(), None);
        flag.store(true, Ordering::Relaxed);
        assert_eq!(t.check(3), Some(StopReason::Cancelled));
    }

    #[test]
    fn test_deadline() {
        let t = Termination::new(1000, Some(1), None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(t.external(), Some(StopReason::TimeLimit));
    }
}
