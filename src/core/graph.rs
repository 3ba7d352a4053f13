// src/core/graph.rs

//! The phase dependency graph.
//!
//! Phases live in an arena and are referred to by [`PhaseId`]. Edges point
//! from a dependent to its dependencies and are kept in insertion order,
//! which is also the order dependencies are visited in.

use crate::core::address::PhaseAddress;
use crate::core::options::OptionError;
use crate::core::overrides::OptionOverride;
use crate::core::phase::Phase;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("adding '{dependency}' as a dependency of '{dependent}' would create a cycle")]
    Cycle {
        dependent: String,
        dependency: String,
    },
    #[error("phase '{phase}' cannot depend on itself")]
    SelfDependency { phase: String },
    #[error("no phase matches '{selector}'")]
    UnknownPhase { selector: String },
    #[error("unknown phase kind '{kind}'")]
    UnknownKind { kind: String },
    #[error(transparent)]
    Option(#[from] OptionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseId(usize);

impl PhaseId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct PhaseGraph {
    phases: Vec<Phase>,
    dependencies: Vec<Vec<PhaseId>>,
    root: Option<PhaseId>,
}

impl PhaseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a phase with no edges. The first phase added is the root until
    /// [`Self::set_root`] says otherwise.
    pub fn add_phase(&mut self, phase: Phase) -> PhaseId {
        let id = PhaseId(self.phases.len());
        log::trace!("Adding phase #{} ({})", id.0, phase.label());
        self.phases.push(phase);
        self.dependencies.push(Vec::new());
        if self.root.is_none() {
            self.root = Some(id);
        }
        id
    }

    /// Adds a phase and wires it to `dependencies` in order.
    pub fn insert(&mut self, phase: Phase, dependencies: &[PhaseId]) -> Result<PhaseId, GraphError> {
        let id = self.add_phase(phase);
        for dep in dependencies {
            self.add_dependency(id, *dep)?;
        }
        Ok(id)
    }

    pub fn set_root(&mut self, id: PhaseId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<PhaseId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    // Ids are only minted by this graph, so they always index into the arena.
    #[allow(clippy::indexing_slicing)]
    pub fn phase(&self, id: PhaseId) -> &Phase {
        &self.phases[id.0]
    }

    #[allow(clippy::indexing_slicing)]
    pub fn phase_mut(&mut self, id: PhaseId) -> &mut Phase {
        &mut self.phases[id.0]
    }

    /// Direct dependencies of `id`, in insertion order.
    pub fn dependencies(&self, id: PhaseId) -> &[PhaseId] {
        self.dependencies.get(id.0).map_or(&[], Vec::as_slice)
    }

    /// Makes `dependent` depend on `dependency`. Rejects edges that would
    /// close a cycle, leaving the graph unchanged.
    pub fn add_dependency(
        &mut self,
        dependent: PhaseId,
        dependency: PhaseId,
    ) -> Result<(), GraphError> {
        if dependent == dependency {
            return Err(GraphError::SelfDependency {
                phase: self.phase(dependent).label(),
            });
        }
        if self.reaches(dependency, dependent) {
            return Err(GraphError::Cycle {
                dependent: self.phase(dependent).label(),
                dependency: self.phase(dependency).label(),
            });
        }
        if let Some(edges) = self.dependencies.get_mut(dependent.0)
            && !edges.contains(&dependency)
        {
            edges.push(dependency);
        }
        log::debug!(
            "{} now depends on {}",
            self.phase(dependent).label(),
            self.phase(dependency).label()
        );
        Ok(())
    }

    /// True if `to` is `from` or one of its transitive dependencies.
    pub fn reaches(&self, from: PhaseId, to: PhaseId) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if seen.insert(id) {
                stack.extend(self.dependencies(id).iter().copied());
            }
        }
        false
    }

    /// `from` and all its transitive dependencies, dependencies first.
    pub fn postorder(&self, from: PhaseId) -> Vec<PhaseId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        self.visit_postorder(from, &mut seen, &mut order);
        order
    }

    fn visit_postorder(&self, id: PhaseId, seen: &mut HashSet<PhaseId>, order: &mut Vec<PhaseId>) {
        if !seen.insert(id) {
            return;
        }
        for dep in self.dependencies(id) {
            self.visit_postorder(*dep, seen, order);
        }
        order.push(id);
    }

    /// Every phase, dependencies first: the root's subtree, then anything
    /// left unreached in insertion order.
    pub fn ordered(&self) -> Vec<PhaseId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        if let Some(root) = self.root {
            self.visit_postorder(root, &mut seen, &mut order);
        }
        for index in 0..self.phases.len() {
            self.visit_postorder(PhaseId(index), &mut seen, &mut order);
        }
        order
    }

    // --- Option propagation ---

    /// The phases an option change on `id` reaches: `id` itself, plus its
    /// descendants when `include_deps` is set. Boundary descendants are
    /// neither included nor crossed unless `include_boundary_deps` is set.
    pub fn propagation_targets(
        &self,
        id: PhaseId,
        include_deps: bool,
        include_boundary_deps: bool,
    ) -> Vec<PhaseId> {
        let mut targets = vec![id];
        if !include_deps {
            return targets;
        }
        let mut seen = HashSet::from([id]);
        let mut stack: Vec<PhaseId> = self.dependencies(id).iter().rev().copied().collect();
        while let Some(dep) = stack.pop() {
            if !seen.insert(dep) {
                continue;
            }
            if self.phase(dep).is_boundary() && !include_boundary_deps {
                continue;
            }
            targets.push(dep);
            stack.extend(self.dependencies(dep).iter().rev().copied());
        }
        targets
    }

    /// Pushes `overrides` onto every propagation target. Targets are
    /// updated on copies first, so a rejected override leaves the whole
    /// graph unchanged.
    pub fn push_options(
        &mut self,
        id: PhaseId,
        overrides: &[OptionOverride],
        include_deps: bool,
        include_boundary_deps: bool,
    ) -> Result<(), GraphError> {
        let targets = self.propagation_targets(id, include_deps, include_boundary_deps);
        log::debug!("Pushing {} override(s) onto {} phase(s)", overrides.len(), targets.len());
        self.commit_staged(targets, |phase| phase.push_all(overrides))
    }

    /// Pops `keys` from every propagation target, all or nothing.
    pub fn pop_options(
        &mut self,
        id: PhaseId,
        keys: &[&str],
        include_deps: bool,
        include_boundary_deps: bool,
    ) -> Result<(), GraphError> {
        let targets = self.propagation_targets(id, include_deps, include_boundary_deps);
        self.commit_staged(targets, |phase| {
            keys.iter().try_for_each(|key| phase.pop(key).map(|_| ()))
        })
    }

    fn commit_staged(
        &mut self,
        targets: Vec<PhaseId>,
        change: impl Fn(&mut Phase) -> Result<(), OptionError>,
    ) -> Result<(), GraphError> {
        let mut staged = Vec::with_capacity(targets.len());
        for target in targets {
            let mut copy = self.phase(target).clone();
            change(&mut copy)?;
            staged.push((target, copy));
        }
        for (target, copy) in staged {
            *self.phase_mut(target) = copy;
        }
        Ok(())
    }

    /// A deep copy of `id` with `overrides` applied and no dependencies.
    pub fn clone_phase(&self, id: PhaseId, overrides: &[OptionOverride]) -> Result<Phase, GraphError> {
        let mut copy = self.phase(id).clone();
        copy.push_all(overrides)?;
        Ok(copy)
    }

    // --- Naming ---

    /// Propagates group names from boundary phases to their members, then
    /// renames colliding addresses by appending `_0`, `_1`, ...
    pub fn finalize_names(&mut self) -> Result<(), GraphError> {
        self.propagate_groups()?;
        self.uniquify_names()
    }

    fn propagate_groups(&mut self) -> Result<(), GraphError> {
        let mut assigned = HashSet::new();
        let mut roots = Vec::new();
        if let Some(root) = self.root {
            roots.push(root);
        }
        roots.extend((0..self.phases.len()).map(PhaseId));

        for root in roots {
            // (phase, group inherited from the nearest boundary above it)
            let mut stack = vec![(root, String::new())];
            while let Some((id, inherited)) = stack.pop() {
                if !assigned.insert(id) {
                    continue;
                }
                if self.phase(id).group()?.is_empty() && !inherited.is_empty() {
                    self.phase_mut(id).set("group", inherited.as_str())?;
                }
                let below = if self.phase(id).is_boundary() {
                    self.phase(id).name()?
                } else {
                    inherited
                };
                for dep in self.dependencies(id).iter().rev() {
                    stack.push((*dep, below.clone()));
                }
            }
        }
        Ok(())
    }

    fn uniquify_names(&mut self) -> Result<(), GraphError> {
        let order = self.ordered();
        let mut taken: HashSet<PhaseAddress> = HashSet::new();
        let mut counters: HashMap<PhaseAddress, usize> = HashMap::new();

        for id in order {
            let address = self.phase(id).address()?;
            if taken.insert(address.clone()) {
                continue;
            }
            let counter = counters.entry(address.clone()).or_insert(0);
            let renamed = loop {
                let candidate = PhaseAddress::new(&address.group, &format!("{}_{}", address.name, counter));
                *counter += 1;
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            log::debug!("Renaming duplicate phase {} to {}", address, renamed);
            self.phase_mut(id).set("name", renamed.name.as_str())?;
            taken.insert(renamed);
        }
        Ok(())
    }

    /// Finds the phase at `address`.
    pub fn find(&self, address: &PhaseAddress) -> Option<PhaseId> {
        (0..self.phases.len())
            .map(PhaseId)
            .find(|id| self.phase(*id).address().ok().as_ref() == Some(address))
    }
}
