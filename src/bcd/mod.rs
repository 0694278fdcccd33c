//! Block-coordinate descent (BCD).
//!
//! Very high-dimensional problems are optimized one block of coordinates
//! at a time. While a block is active, every container of the run is
//! narrowed to the block's width and strategies evaluate through a
//! [`BlockedObjective`](crate::objective::BlockedObjective) that fills the
//! remaining coordinates from the shared full state.
//!
//! # Sweep
//!
//! 1. Fold the best partial solution into the full state.
//! 2. Synchronize the state across ranks (and the mask, per [`MaskScope`]).
//! 3. Select the next block ([`BlockSelection`]).
//! 4. Reallocate containers at the new width and reseed them from the
//!    projection of the state.
//!
//! With `block_dim >= dim` BCD is inactive and the BCD flow step is a no-op.
//!
//! # References
//!
//! - Wright (2015), "Coordinate descent algorithms",
//!   Mathematical Programming 151(1)

mod config;
mod state;
mod types;

pub use config::{BcdConfig, BlockSelection, MaskScope};
pub use state::BcdState;
pub use types::{BlockMask, BlockSchedule, BlockSelector};
