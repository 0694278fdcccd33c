//! Block layout and selection.

use super::config::BlockSelection;
use rand::rngs::StdRng;
use rand::Rng;
use std::ops::Range;

/// Contiguous partition of `0..dim` into blocks of `block_dim`.
///
/// The last block is shorter when `dim` is not a multiple of `block_dim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSchedule {
    dim: usize,
    block_dim: usize,
}

impl BlockSchedule {
    /// Creates a schedule; `block_dim` is clamped to `1..=dim`.
    pub fn new(dim: usize, block_dim: usize) -> Self {
        Self {
            dim,
            block_dim: block_dim.clamp(1, dim.max(1)),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn block_dim(&self) -> usize {
        self.block_dim
    }

    /// `ceil(dim / block_dim)`.
    pub fn n_blocks(&self) -> usize {
        self.dim.div_ceil(self.block_dim)
    }

    /// Index range of block `block`.
    pub fn block(&self, block: usize) -> Range<usize> {
        let start = block * self.block_dim;
        start..(start + self.block_dim).min(self.dim)
    }
}

/// The active dimension indices of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMask {
    indices: Vec<usize>,
}

impl BlockMask {
    /// # Panics
    /// Panics (debug) if `indices` is not strictly increasing.
    pub fn new(indices: Vec<usize>) -> Self {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        Self { indices }
    }

    pub fn from_range(range: Range<usize>) -> Self {
        Self {
            indices: range.collect(),
        }
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn into_indices(self) -> Vec<usize> {
        self.indices
    }
}

/// Produces the mask of each sweep.
#[derive(Debug, Clone)]
pub struct BlockSelector {
    schedule: BlockSchedule,
    selection: BlockSelection,
    cursor: usize,
    rng: StdRng,
}

impl BlockSelector {
    pub fn new(schedule: BlockSchedule, selection: BlockSelection, rng: StdRng) -> Self {
        Self {
            schedule,
            selection,
            cursor: 0,
            rng,
        }
    }

    pub fn schedule(&self) -> &BlockSchedule {
        &self.schedule
    }

    /// Number of masks produced so far.
    pub fn sweeps(&self) -> usize {
        self.cursor
    }

    /// Advances to the next mask.
    pub fn next_mask(&mut self) -> BlockMask {
        let n_blocks = self.schedule.n_blocks();
        let mask = match self.selection {
            BlockSelection::RoundRobin => BlockMask::from_range(self.schedule.block(self.cursor % n_blocks)),
            BlockSelection::UniformBlock => {
                let block = self.rng.random_range(0..n_blocks);
                BlockMask::from_range(self.schedule.block(block))
            }
            BlockSelection::RandomSubset => {
                let mut indices = rand::seq::index::sample(
                    &mut self.rng,
                    self.schedule.dim(),
                    self.schedule.block_dim(),
                )
                .into_vec();
                indices.sort_unstable();
                BlockMask::new(indices)
            }
        };
        self.cursor += 1;
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::create_rng;
    use proptest::prelude::*;

    #[test]
    fn test_schedule_last_block_shorter() {
        let s = BlockSchedule::new(10, 4);
        assert_eq!(s.n_blocks(), 3);
        assert_eq!(s.block(0), 0..4);
        assert_eq!(s.block(2), 8..10);
    }

    #[test]
    fn test_schedule_clamps_block() {
        let s = BlockSchedule::new(5, 50);
        assert_eq!(s.block_dim(), 5);
        assert_eq!(s.n_blocks(), 1);
    }

    #[test]
    fn test_uniform_block_is_a_schedule_block() {
        let schedule = BlockSchedule::new(23, 5);
        let mut sel = BlockSelector::new(schedule, BlockSelection::UniformBlock, create_rng(1));
        for _ in 0..20 {
            let mask = sel.next_mask();
            let first = mask.indices()[0];
            assert_eq!(first % 5, 0);
            assert_eq!(mask.indices(), &schedule.block(first / 5).collect::<Vec<_>>()[..]);
        }
    }

    #[test]
    fn test_random_subset_distinct_sorted() {
        let schedule = BlockSchedule::new(50, 7);
        let mut sel = BlockSelector::new(schedule, BlockSelection::RandomSubset, create_rng(3));
        for _ in 0..20 {
            let mask = sel.next_mask();
            assert_eq!(mask.len(), 7);
            assert!(mask.indices().windows(2).all(|w| w[0] < w[1]));
            assert!(mask.indices().iter().all(|&i| i < 50));
        }
    }

    #[test]
    fn test_same_seed_same_masks() {
        let schedule = BlockSchedule::new(40, 6);
        let mut a = BlockSelector::new(schedule, BlockSelection::RandomSubset, create_rng(9));
        let mut b = BlockSelector::new(schedule, BlockSelection::RandomSubset, create_rng(9));
        for _ in 0..5 {
            assert_eq!(a.next_mask(), b.next_mask());
        }
    }

    proptest! {
        #[test]
        fn test_round_robin_cycle_covers_each_index_once(
            dim in 1usize..300,
            block_dim in 1usize..64,
            offset in 0usize..10,
        ) {
            let schedule = BlockSchedule::new(dim, block_dim);
            let mut sel = BlockSelector::new(schedule, BlockSelection::RoundRobin, create_rng(0));
            for _ in 0..offset {
                sel.next_mask();
            }
            let mut visits = vec![0usize; dim];
            for _ in 0..schedule.n_blocks() {
                for &i in sel.next_mask().indices() {
                    visits[i] += 1;
                }
            }
            prop_assert!(visits.iter().all(|&v| v == 1));
        }
    }
}
