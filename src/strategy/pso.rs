//! Particle swarm optimization over a PSO memory.
//!
//! One application performs a full swarm step:
//!
//! 1. evaluate the population at its current positions,
//! 2. update personal bests, then group bests, then the node best,
//! 3. update velocities `v <- w v + c1 r1 (pbest - x) + c2 r2 (ref - x)`,
//! 4. move `x <- x + v` and invalidate the population fitness.
//!
//! The personal-best memory therefore always carries evaluated truth,
//! while the population holds positions that have not been evaluated yet.
//!
//! # Topologies
//!
//! `ref` depends on [`Topology`]:
//!
//! - `Neighborhood`: the best of the particle's group.
//! - `Rank`: group leaders (particles whose personal best is their group's
//!   best) follow the rank reference; every other particle its group best.
//! - `Global`: the cluster reference for every particle.
//!
//! Missing references fall back one level: cluster to rank, rank to the
//! node best of this runtime.
//!
//! # References
//!
//! - Kennedy & Eberhart (1995), "Particle Swarm Optimization"
//! - Clerc & Kennedy (2002), "The particle swarm - explosion, stability,
//!   and convergence in a multidimensional complex space"

use super::config::{PsoConfig, Topology};
use super::{Strategy, StrategyContext};
use crate::container::Candidate;
use crate::error::{ConfigError, MetaflowError};
use crate::flow::PsoMemoryIds;
use rand::Rng;

/// One swarm step per application.
#[derive(Debug, Clone)]
pub struct Pso {
    memory: PsoMemoryIds,
    config: PsoConfig,
}

impl Pso {
    pub fn new(memory: PsoMemoryIds, config: PsoConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { memory, config })
    }
}

/// Keeps an external reference only if it matches the working width.
fn usable(reference: Option<Candidate>, dim: usize) -> Option<Candidate> {
    reference.filter(|c| c.dim() == dim && c.is_evaluated())
}

impl Strategy for Pso {
    fn name(&self) -> &str {
        match self.config.topology {
            Topology::Neighborhood => "pso_neighborhood",
            Topology::Rank => "pso_rank",
            Topology::Global => "pso_global",
        }
    }

    fn apply(&mut self, ctx: &mut StrategyContext<'_>) -> Result<(), MetaflowError> {
        let ids = self.memory;
        ctx.evaluate_all(ids.population);

        let dim = ctx.storage.get(ids.population).dim();
        let rank_ref = usable(ctx.storage.references.rank.clone(), dim);
        let cluster_ref = usable(ctx.storage.references.cluster.clone(), dim);

        let rng = &mut *ctx.rng;
        let [pop, vel, pbest, gbest, nbest] = ctx.storage.get_many_mut([
            ids.population,
            ids.velocity,
            ids.particle_best,
            ids.group_best,
            ids.node_best,
        ]);

        // personal bests
        for i in 0..pop.len() {
            if pop.fitness(i) < pbest.fitness(i) {
                pbest.set(i, pop.position(i), pop.fitness(i));
            }
        }

        // group bests
        for g in 0..pop.n_groups() {
            if let Some(b) = pbest.best_in(pop.group_range(g)) {
                if pbest.fitness(b) < gbest.fitness(g) {
                    gbest.set(g, pbest.position(b), pbest.fitness(b));
                }
            }
        }

        // node best
        if let Some((b, fitness)) = gbest.best() {
            if fitness < nbest.fitness(0) {
                nbest.set(0, gbest.position(b), fitness);
            }
        }

        let node_ref = nbest.candidate(0);
        let rank_ref = rank_ref.as_ref().unwrap_or(node_ref);
        let cluster_ref = cluster_ref.as_ref().unwrap_or(rank_ref);

        let w = if self.config.random_inertia {
            rng.random::<f64>()
        } else {
            self.config.inertia
        };
        let (c1, c2) = (self.config.cognitive, self.config.social);

        for i in 0..pop.len() {
            let g = pop.group_of(i);
            let reference = match self.config.topology {
                Topology::Neighborhood => gbest.position(g),
                Topology::Rank if pbest.fitness(i) == gbest.fitness(g) => rank_ref.position(),
                Topology::Rank => gbest.position(g),
                Topology::Global => cluster_ref.position(),
            };
            let personal = pbest.position(i);
            let x = pop.candidate_mut(i).position_mut();
            let v = vel.candidate_mut(i).position_mut();
            for d in 0..dim {
                let r1: f64 = rng.random();
                let r2: f64 = rng.random();
                let mut vd = w * v[d] + c1 * r1 * (personal[d] - x[d]) + c2 * r2 * (reference[d] - x[d]);
                if let Some(vmax) = self.config.max_velocity {
                    vd = vd.clamp(-vmax, vmax);
                }
                v[d] = vd;
                x[d] += vd;
            }
        }

        pop.reset_fitness();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::Objective;
    use crate::strategy::testing::{Harness, Sphere};
    use crate::strategy::InitUniform;

    fn swarm(h: &mut Harness, n: usize, dim: usize, group: usize) -> PsoMemoryIds {
        h.population("main", n, dim, group);
        let ids = h.storage.insert_pso_memory("M", "main").unwrap();
        h.apply(&mut InitUniform::new(ids.population), &Sphere(dim));
        ids
    }

    #[test]
    fn test_sphere_2d_monotone_and_converges() {
        let mut h = Harness::new(42);
        let ids = swarm(&mut h, 30, 2, 10);
        let mut pso = Pso::new(ids, PsoConfig::default()).unwrap();

        let mut previous = f64::INFINITY;
        for _ in 0..200 {
            h.apply(&mut pso, &Sphere(2));
            let best = h.storage.best().unwrap().fitness();
            assert!(best <= previous);
            previous = best;
        }
        assert!(previous < 1e-3, "best {previous}");
    }

    #[test]
    fn test_population_invalidated_after_move() {
        let mut h = Harness::new(1);
        let ids = swarm(&mut h, 8, 3, 4);
        let mut pso = Pso::new(ids, PsoConfig::default()).unwrap();
        h.apply(&mut pso, &Sphere(3));
        assert!(h.storage.get(ids.population).candidates().iter().all(|c| !c.is_evaluated()));
        let pbest = h.storage.get(ids.particle_best);
        for c in pbest.candidates() {
            assert!(c.is_evaluated());
            assert_eq!(c.fitness(), Sphere(3).evaluate(c.position()));
        }
    }

    #[test]
    fn test_memory_hierarchy_consistent() {
        let mut h = Harness::new(2);
        let ids = swarm(&mut h, 12, 2, 4);
        let mut pso = Pso::new(ids, PsoConfig::default().with_topology(Topology::Rank)).unwrap();
        for _ in 0..10 {
            h.apply(&mut pso, &Sphere(2));
        }
        let pop = h.storage.get(ids.population);
        let pbest = h.storage.get(ids.particle_best);
        let gbest = h.storage.get(ids.group_best);
        for g in 0..pop.n_groups() {
            let b = pbest.best_in(pop.group_range(g)).unwrap();
            assert!(gbest.fitness(g) <= pbest.fitness(b));
        }
        let node = h.storage.get(ids.node_best).fitness(0);
        assert_eq!(Some(node), gbest.best().map(|(_, f)| f));
    }

    #[test]
    fn test_velocity_clamp() {
        let mut h = Harness::new(3);
        let ids = swarm(&mut h, 10, 2, 5);
        let config = PsoConfig::default().with_max_velocity(0.01);
        let mut pso = Pso::new(ids, config).unwrap();
        for _ in 0..5 {
            h.apply(&mut pso, &Sphere(2));
        }
        let vel = h.storage.get(ids.velocity);
        for c in vel.candidates() {
            assert!(c.position().iter().all(|v| v.abs() <= 0.01));
        }
    }

    #[test]
    fn test_global_uses_cluster_reference() {
        let mut h = Harness::new(4);
        let ids = swarm(&mut h, 6, 2, 6);
        h.storage.references.cluster = Some(Candidate::new(vec![0.0, 0.0], 0.0));
        let config = PsoConfig::default()
            .with_topology(Topology::Global)
            .with_inertia(0.0)
            .with_cognitive(0.0);
        let mut pso = Pso::new(ids, config).unwrap();
        let before: Vec<f64> = h
            .storage
            .get(ids.population)
            .candidates()
            .iter()
            .map(|c| c.position()[0].abs())
            .collect();
        h.apply(&mut pso, &Sphere(2));
        // only the social term acts: x <- x (1 - c2 r2), so |x| cannot grow
        for (c, b) in h.storage.get(ids.population).candidates().iter().zip(before) {
            assert!(c.position()[0].abs() <= b + 1e-12);
        }
    }

    #[test]
    fn test_mismatched_reference_is_ignored() {
        let mut h = Harness::new(4);
        let ids = swarm(&mut h, 6, 2, 3);
        h.storage.references.cluster = Some(Candidate::new(vec![0.0; 5], 0.0));
        let mut pso = Pso::new(ids, PsoConfig::default().with_topology(Topology::Global)).unwrap();
        h.apply(&mut pso, &Sphere(2));
        assert!(h
            .storage
            .get(ids.population)
            .candidates()
            .iter()
            .all(|c| c.position().iter().all(|v| v.is_finite())));
    }
}
