//! Named container storage of a runtime.

use crate::container::{Candidate, SolutionContainer};
use crate::error::ConfigError;
use std::collections::HashMap;

/// Handle of a container inside [`RuntimeStorage`].
pub type ContainerId = usize;

/// What a container holds. Only populations and memories hold solutions;
/// velocities are excluded from best tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRole {
    Population,
    Velocity,
    Memory,
}

/// Containers backing one PSO memory, index-aligned with its population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsoMemoryIds {
    pub population: ContainerId,
    pub velocity: ContainerId,
    pub particle_best: ContainerId,
    /// One slot per group of the population.
    pub group_best: ContainerId,
    /// A single slot holding the best of this runtime.
    pub node_best: ContainerId,
}

/// Externally supplied references consumed by the PSO topologies.
#[derive(Debug, Clone, Default)]
pub struct References {
    /// Best among the tribes of this rank.
    pub rank: Option<Candidate>,
    /// Best of the cluster after the last propagation.
    pub cluster: Option<Candidate>,
}

impl References {
    pub fn clear(&mut self) {
        self.rank = None;
        self.cluster = None;
    }
}

#[derive(Debug, Clone)]
struct Slot {
    name: String,
    role: ContainerRole,
    container: SolutionContainer,
}

/// All containers of a runtime, addressable by id or name.
#[derive(Debug, Clone, Default)]
pub struct RuntimeStorage {
    slots: Vec<Slot>,
    by_name: HashMap<String, ContainerId>,
    memories: HashMap<String, PsoMemoryIds>,
    pub references: References,
}

impl RuntimeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container under a unique name.
    pub fn insert(
        &mut self,
        name: &str,
        role: ContainerRole,
        container: SolutionContainer,
    ) -> Result<ContainerId, ConfigError> {
        if self.by_name.contains_key(name) {
            return Err(ConfigError::DuplicateContainer(name.to_string()));
        }
        let id = self.slots.len();
        self.slots.push(Slot {
            name: name.to_string(),
            role,
            container,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Allocates the four auxiliary containers of a PSO memory for `population`.
    ///
    /// They are registered as `<memory>::velocity`, `<memory>::pbest`,
    /// `<memory>::gbest` and `<memory>::nbest`.
    pub fn insert_pso_memory(
        &mut self,
        memory: &str,
        population: &str,
    ) -> Result<PsoMemoryIds, ConfigError> {
        if self.memories.contains_key(memory) {
            return Err(ConfigError::DuplicateMemory(memory.to_string()));
        }
        let pop_id = self.require(population)?;
        let pop = &self.slots[pop_id].container;
        let (len, dim, group_size, n_groups) =
            (pop.len(), pop.dim(), pop.group_size(), pop.n_groups());

        let mut velocity = SolutionContainer::new(len, dim, group_size);
        velocity.fill(0.0, f64::INFINITY);

        let ids = PsoMemoryIds {
            population: pop_id,
            velocity: self.insert(&format!("{memory}::velocity"), ContainerRole::Velocity, velocity)?,
            particle_best: self.insert(
                &format!("{memory}::pbest"),
                ContainerRole::Memory,
                SolutionContainer::new(len, dim, group_size),
            )?,
            group_best: self.insert(
                &format!("{memory}::gbest"),
                ContainerRole::Memory,
                SolutionContainer::new(n_groups, dim, 1),
            )?,
            node_best: self.insert(
                &format!("{memory}::nbest"),
                ContainerRole::Memory,
                SolutionContainer::new(1, dim, 1),
            )?,
        };
        self.memories.insert(memory.to_string(), ids);
        Ok(ids)
    }

    pub fn id(&self, name: &str) -> Option<ContainerId> {
        self.by_name.get(name).copied()
    }

    /// Looks up a container id, failing with [`ConfigError::UnknownContainer`].
    pub fn require(&self, name: &str) -> Result<ContainerId, ConfigError> {
        self.id(name)
            .ok_or_else(|| ConfigError::UnknownContainer(name.to_string()))
    }

    pub fn memory(&self, name: &str) -> Option<PsoMemoryIds> {
        self.memories.get(name).copied()
    }

    pub fn require_memory(&self, name: &str) -> Result<PsoMemoryIds, ConfigError> {
        self.memory(name)
            .ok_or_else(|| ConfigError::UnknownMemory(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn name(&self, id: ContainerId) -> &str {
        &self.slots[id].name
    }

    pub fn role(&self, id: ContainerId) -> ContainerRole {
        self.slots[id].role
    }

    pub fn get(&self, id: ContainerId) -> &SolutionContainer {
        &self.slots[id].container
    }

    pub fn get_mut(&mut self, id: ContainerId) -> &mut SolutionContainer {
        &mut self.slots[id].container
    }

    pub fn by_name(&self, name: &str) -> Option<&SolutionContainer> {
        self.id(name).map(|id| self.get(id))
    }

    /// Mutable access to several distinct containers at once.
    ///
    /// # Panics
    /// Panics if an id repeats or is out of range.
    pub fn get_many_mut<const N: usize>(
        &mut self,
        ids: [ContainerId; N],
    ) -> [&mut SolutionContainer; N] {
        match self.slots.get_disjoint_mut(ids) {
            Ok(slots) => slots.map(|s| &mut s.container),
            Err(e) => panic!("invalid container ids {ids:?}: {e}"),
        }
    }

    /// Ids of containers with the given role, in registration order.
    pub fn ids_with_role(&self, role: ContainerRole) -> Vec<ContainerId> {
        (0..self.slots.len())
            .filter(|&id| self.slots[id].role == role)
            .collect()
    }

    /// Id of the first registered population.
    pub fn primary(&self) -> Option<ContainerId> {
        self.slots
            .iter()
            .position(|s| s.role == ContainerRole::Population)
    }

    /// Best evaluated candidate across populations and memories.
    ///
    /// Ties go to the container registered first, then to the lowest index.
    pub fn best(&self) -> Option<&Candidate> {
        let mut best: Option<&Candidate> = None;
        for slot in &self.slots {
            if slot.role == ContainerRole::Velocity {
                continue;
            }
            if let Some(c) = slot.container.best_candidate() {
                if c.is_evaluated() && best.is_none_or(|b| c.fitness() < b.fitness()) {
                    best = Some(c);
                }
            }
        }
        best
    }

    /// Recreates every container at width `dim`; positions are zeroed and
    /// fitness values reset.
    pub fn reshape_all(&mut self, dim: usize) {
        for slot in &mut self.slots {
            slot.container.reshape(dim);
            if slot.role == ContainerRole::Velocity {
                slot.container.fill(0.0, f64::INFINITY);
            }
        }
    }

    /// Bytes allocated for candidate data across all containers.
    pub fn space(&self) -> usize {
        self.slots.iter().map(|s| s.container.space()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> RuntimeStorage {
        let mut s = RuntimeStorage::new();
        s.insert("main", ContainerRole::Population, SolutionContainer::new(10, 2, 4))
            .unwrap();
        s
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let mut s = storage();
        let err = s
            .insert("main", ContainerRole::Population, SolutionContainer::new(1, 2, 1))
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateContainer("main".into()));
        assert_eq!(
            s.require("nope"),
            Err(ConfigError::UnknownContainer("nope".into()))
        );
    }

    #[test]
    fn test_pso_memory_layout() {
        let mut s = storage();
        let ids = s.insert_pso_memory("M", "main").unwrap();
        assert_eq!(s.get(ids.velocity).len(), 10);
        assert_eq!(s.get(ids.particle_best).len(), 10);
        assert_eq!(s.get(ids.group_best).len(), 2);
        assert_eq!(s.get(ids.node_best).len(), 1);
        assert_eq!(s.id("M::pbest"), Some(ids.particle_best));
        assert_eq!(s.role(ids.velocity), ContainerRole::Velocity);
        assert_eq!(s.memory("M"), Some(ids));
        assert!(s.insert_pso_memory("M", "main").is_err());
        assert_eq!(
            s.insert_pso_memory("X", "missing"),
            Err(ConfigError::UnknownContainer("missing".into()))
        );
    }

    #[test]
    fn test_best_skips_velocity_and_unevaluated() {
        let mut s = storage();
        let ids = s.insert_pso_memory("M", "main").unwrap();
        assert!(s.best().is_none());

        s.get_mut(ids.velocity).set(0, &[0.0, 0.0], -100.0);
        s.get_mut(ids.particle_best).set(3, &[1.0, 1.0], 2.0);
        s.get_mut(ids.population).set(5, &[2.0, 2.0], 4.0);
        let best = s.best().unwrap();
        assert_eq!(best.fitness(), 2.0);
        assert_eq!(best.position(), &[1.0, 1.0]);
    }

    #[test]
    fn test_get_many_mut() {
        let mut s = storage();
        let ids = s.insert_pso_memory("M", "main").unwrap();
        let [pop, pbest] = s.get_many_mut([ids.population, ids.particle_best]);
        pop.set(0, &[1.0, 2.0], 5.0);
        pbest.set(0, pop.position(0), pop.fitness(0));
        assert_eq!(s.get(ids.particle_best).fitness(0), 5.0);
    }

    #[test]
    fn test_reshape_all_and_space() {
        let mut s = storage();
        s.insert_pso_memory("M", "main").unwrap();
        let before = s.space();
        s.reshape_all(4);
        assert!(s.space() > before);
        assert!(s.best().is_none());
        assert_eq!(s.by_name("M::gbest").map(|c| c.dim()), Some(4));
    }
}
