//! Distributed coordination.
//!
//! Ranks run their runtimes independently and meet only at propagation
//! rounds, where every rank contributes its best solution through a
//! blocking all-gather and adopts the cluster minimum (ties go to the
//! lowest rank).
//!
//! - [`Transport`] abstracts message passing; [`SingleRank`] serves
//!   single-process runs and [`LocalCluster`] simulates `n` ranks on
//!   threads.
//! - [`SwarmOptimizer`] runs one runtime per rank.
//! - [`TribesOptimizer`] runs several tribes per rank with a two-level
//!   (tribe, then rank) propagation.
//! - [`TribeState`] enforces the phase cycle of each rank.
//!
//! A failed collective is fatal for every rank: the in-process transport
//! shares a failure flag, and waits time out after [`DEFAULT_TIMEOUT`].

mod local;
mod optimizer;
mod payload;
mod propagation;
mod swarm;
mod transport;
mod tribe;
mod tribes;

pub use local::{LocalCluster, LocalTransport, DEFAULT_TIMEOUT};
pub use optimizer::Optimizer;
pub use payload::Payload;
pub use propagation::{best_of, broadcast_mask, propagate_best, vote_stop};
pub use swarm::SwarmOptimizer;
pub use transport::{SingleRank, Transport};
pub use tribe::{TribePhase, TribeState};
pub use tribes::TribesOptimizer;
