//! Fixed-capacity solution container.

use super::types::Candidate;
use crate::objective::Objective;
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use std::ops::Range;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// An ordered, fixed-capacity population of equal-length candidates.
///
/// Candidates are split into groups of `group_size`; the last group absorbs
/// the remainder when the capacity is not a multiple of the group size.
/// Groups are the neighborhoods of the PSO neighborhood topology and the
/// unit of work for mutation and crossover.
///
/// All ordering queries assume **minimization** and break ties by the
/// lowest index, which keeps every selection reproducible.
///
/// # Examples
///
/// ```
/// use u_metaflow::container::SolutionContainer;
///
/// let mut pop = SolutionContainer::new(10, 3, 4);
/// assert_eq!(pop.n_groups(), 2);
/// assert_eq!(pop.group_range(1), 4..10);
///
/// pop.set(7, &[1.0, 2.0, 3.0], 0.5);
/// assert_eq!(pop.best(), Some((7, 0.5)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SolutionContainer {
    dim: usize,
    group_size: usize,
    candidates: Vec<Candidate>,
}

impl SolutionContainer {
    /// Allocates `capacity` unevaluated candidates of length `dim`.
    pub fn new(capacity: usize, dim: usize, group_size: usize) -> Self {
        Self {
            dim,
            group_size: group_size.max(1),
            candidates: (0..capacity).map(|_| Candidate::unevaluated(dim)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Number of groups (at least one for a non-empty container).
    pub fn n_groups(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.len() / self.group_size).max(1)
        }
    }

    /// The group that candidate `index` belongs to.
    pub fn group_of(&self, index: usize) -> usize {
        (index / self.group_size).min(self.n_groups().saturating_sub(1))
    }

    /// Index range of group `group`.
    pub fn group_range(&self, group: usize) -> Range<usize> {
        let start = group * self.group_size;
        let end = if group + 1 == self.n_groups() {
            self.len()
        } else {
            start + self.group_size
        };
        start..end
    }

    pub fn candidate(&self, index: usize) -> &Candidate {
        &self.candidates[index]
    }

    pub fn candidate_mut(&mut self, index: usize) -> &mut Candidate {
        &mut self.candidates[index]
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn candidates_mut(&mut self) -> &mut [Candidate] {
        &mut self.candidates
    }

    pub fn position(&self, index: usize) -> &[f64] {
        self.candidates[index].position()
    }

    pub fn fitness(&self, index: usize) -> f64 {
        self.candidates[index].fitness()
    }

    /// Overwrites candidate `index`.
    pub fn set(&mut self, index: usize, position: &[f64], fitness: f64) {
        self.candidates[index].assign(position, fitness);
    }

    /// Best candidate index and fitness.
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best_in(0..self.len())
            .map(|i| (i, self.candidates[i].fitness()))
    }

    pub fn best_candidate(&self) -> Option<&Candidate> {
        self.best().map(|(i, _)| &self.candidates[i])
    }

    /// Index of the best candidate within `range`.
    pub fn best_in(&self, range: Range<usize>) -> Option<usize> {
        let mut best: Option<usize> = None;
        for i in range {
            match best {
                Some(b) if self.candidates[i].fitness() >= self.candidates[b].fitness() => {}
                _ => best = Some(i),
            }
        }
        best
    }

    /// Index of the worst candidate within `range`.
    pub fn worst_in(&self, range: Range<usize>) -> Option<usize> {
        let mut worst: Option<usize> = None;
        for i in range {
            match worst {
                Some(w) if self.candidates[i].fitness() <= self.candidates[w].fitness() => {}
                _ => worst = Some(i),
            }
        }
        worst
    }

    /// Indices of the `k` best candidates, best first.
    pub fn best_k(&self, k: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            self.candidates[a]
                .fitness()
                .total_cmp(&self.candidates[b].fitness())
                .then(a.cmp(&b))
        });
        order.truncate(k);
        order
    }

    /// Indices of the `k` worst candidates, worst first.
    pub fn worst_k(&self, k: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| {
            self.candidates[b]
                .fitness()
                .total_cmp(&self.candidates[a].fitness())
                .then(a.cmp(&b))
        });
        order.truncate(k);
        order
    }

    /// Marks every candidate as unevaluated.
    pub fn reset_fitness(&mut self) {
        for c in &mut self.candidates {
            c.set_fitness(f64::INFINITY);
        }
    }

    /// Fills every position and fitness with constants.
    pub fn fill(&mut self, value: f64, fitness: f64) {
        for c in &mut self.candidates {
            c.position_mut().fill(value);
            c.set_fitness(fitness);
        }
    }

    /// Replaces every candidate with a fresh one of length `dim`.
    ///
    /// Used when the active block changes width; the old candidates end
    /// their lifetime here.
    pub fn reshape(&mut self, dim: usize) {
        let capacity = self.len();
        self.dim = dim;
        self.candidates = (0..capacity).map(|_| Candidate::unevaluated(dim)).collect();
    }

    /// Replaces the worst candidates with the best of `source` while the
    /// source candidate is strictly better. Returns the number replaced.
    pub fn replace_with(&mut self, source: &SolutionContainer) -> usize {
        let src = source.best_k(source.len());
        let dst = self.worst_k(self.len());
        let mut replaced = 0;
        for (&s, &d) in src.iter().zip(dst.iter()) {
            let incoming = &source.candidates[s];
            if incoming.fitness() >= self.candidates[d].fitness() {
                break;
            }
            self.candidates[d].assign(incoming.position(), incoming.fitness());
            replaced += 1;
        }
        replaced
    }

    /// Inserts `candidate` over the worst member if strictly better.
    pub fn offer(&mut self, candidate: &Candidate) -> bool {
        match self.worst_in(0..self.len()) {
            Some(w) if candidate.fitness() < self.candidates[w].fitness() => {
                self.candidates[w].assign(candidate.position(), candidate.fitness());
                true
            }
            _ => false,
        }
    }

    /// Evaluates every candidate. Returns the number of clamped values.
    pub fn evaluate_all(&mut self, objective: &dyn Objective, parallel: bool) -> usize {
        self.evaluate_range(objective, 0..self.len(), parallel)
    }

    /// Evaluates the candidates in `range`.
    ///
    /// With the `parallel` feature and `parallel == true`, each rayon worker
    /// writes only its own candidates; the call returns after the join.
    pub fn evaluate_range(
        &mut self,
        objective: &dyn Objective,
        range: Range<usize>,
        parallel: bool,
    ) -> usize {
        let slice = &mut self.candidates[range];

        #[cfg(feature = "parallel")]
        let clamped = if parallel {
            slice
                .par_iter_mut()
                .map(|c| usize::from(c.evaluate(objective)))
                .sum()
        } else {
            slice.iter_mut().map(|c| usize::from(c.evaluate(objective))).sum()
        };

        #[cfg(not(feature = "parallel"))]
        let clamped = {
            let _ = parallel;
            slice
                .iter_mut()
                .map(|c| usize::from(c.evaluate(objective)))
                .sum::<usize>()
        };

        if clamped > 0 {
            log::warn!("{clamped} non-finite fitness value(s) clamped");
        }
        clamped
    }

    /// Samples `k` distinct indices from `range`, favouring fitter candidates.
    ///
    /// Weights are `max - fitness` (shifted for negative values). When no
    /// candidate is evaluated, or weighted sampling cannot find enough
    /// distinct indices within `10 * k` draws, the remainder is drawn
    /// uniformly.
    ///
    /// # Panics
    /// Panics if `k` exceeds the length of `range`.
    pub fn sample_weighted<R: Rng>(&self, range: Range<usize>, k: usize, rng: &mut R) -> Vec<usize> {
        let n = range.len();
        assert!(k <= n, "cannot sample {k} distinct candidates from {n}");

        let mut picked: Vec<usize> = Vec::with_capacity(k);
        if let Some(dist) = self.weights(range.clone()) {
            let mut draws = 0;
            while picked.len() < k && draws < 10 * k {
                let idx = range.start + dist.sample(rng);
                if !picked.contains(&idx) {
                    picked.push(idx);
                }
                draws += 1;
            }
        }
        while picked.len() < k {
            let idx = rng.random_range(range.clone());
            if !picked.contains(&idx) {
                picked.push(idx);
            }
        }
        picked
    }

    fn weights(&self, range: Range<usize>) -> Option<WeightedIndex<f64>> {
        let values: Vec<f64> = self.candidates[range].iter().map(|c| c.fitness()).collect();
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let shift = if min < 0.0 { -min + 1e-4 } else { 0.0 };
        let weights = values.iter().map(|v| (max + shift) - (v + shift));
        WeightedIndex::new(weights).ok()
    }

    /// Bytes held by positions and fitness values.
    pub fn space(&self) -> usize {
        std::mem::size_of::<f64>() * self.len() * (self.dim + 1)
    }
}
