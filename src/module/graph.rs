//! Module dependency graph
//!
//! Edges point from a module to the modules it depends on (downstream to
//! upstream). The graph is rebuilt wholesale after every POM parse.

use crate::module::name::ModuleName;
use crate::module::pom_info::PomInfo;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Dependency graph over the modules of one module set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    /// module -> modules it depends on
    upstream: BTreeMap<ModuleName, BTreeSet<ModuleName>>,
    /// module -> modules depending on it
    downstream: BTreeMap<ModuleName, BTreeSet<ModuleName>>,
}

impl DependencyGraph {
    /// Build the graph from parsed modules.
    ///
    /// A dependency becomes an edge when another module in the set satisfies
    /// it (same name, matching or unknown version). Self references never
    /// become edges.
    pub fn build<'a>(poms: impl IntoIterator<Item = &'a PomInfo>) -> Self {
        let poms: Vec<&PomInfo> = poms.into_iter().collect();
        let mut graph = Self::default();

        for pom in &poms {
            graph.upstream.entry(pom.name.clone()).or_default();
            graph.downstream.entry(pom.name.clone()).or_default();
        }

        for pom in &poms {
            for dep in &pom.dependencies {
                let target = poms
                    .iter()
                    .find(|t| t.name != pom.name && dep.is_satisfied_by(&t.name, &t.version));
                if let Some(target) = target {
                    graph.add_edge(&pom.name, &target.name);
                }
            }
        }

        graph
    }

    fn add_edge(&mut self, from: &ModuleName, to: &ModuleName) {
        self.upstream
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        self.downstream
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
    }

    /// All modules in the graph
    pub fn modules(&self) -> impl Iterator<Item = &ModuleName> {
        self.upstream.keys()
    }

    /// Whether `from` depends on `to`
    pub fn has_edge(&self, from: &ModuleName, to: &ModuleName) -> bool {
        self.upstream
            .get(from)
            .is_some_and(|targets| targets.contains(to))
    }

    /// All edges as `(dependent, dependency)` pairs
    pub fn edges(&self) -> Vec<(&ModuleName, &ModuleName)> {
        self.upstream
            .iter()
            .flat_map(|(from, targets)| targets.iter().map(move |to| (from, to)))
            .collect()
    }

    /// Modules `name` depends on directly
    pub fn upstream_of(&self, name: &ModuleName) -> Vec<&ModuleName> {
        self.upstream
            .get(name)
            .map(|s| s.iter().collect())
            .unwrap_or_default()
    }

    /// Modules that depend on `name` directly
    pub fn downstream_of(&self, name: &ModuleName) -> Vec<&ModuleName> {
        self.downstream
            .get(name)
            .map(|s| s.iter().collect())
            .unwrap_or_default()
    }

    /// Modules ordered so that every module comes after its dependencies.
    ///
    /// Ties are broken by module name. Modules caught in a cycle cannot be
    /// ordered and are appended at the end in name order.
    pub fn build_order(&self) -> Vec<ModuleName> {
        let mut remaining: BTreeMap<&ModuleName, usize> = self
            .upstream
            .iter()
            .map(|(name, deps)| (name, deps.len()))
            .collect();
        let mut order = Vec::with_capacity(remaining.len());

        loop {
            let ready: Vec<&ModuleName> = remaining
                .iter()
                .filter(|(_, n)| **n == 0)
                .map(|(name, _)| *name)
                .collect();
            if ready.is_empty() {
                break;
            }
            for name in ready {
                remaining.remove(name);
                for dependent in self.downstream_of(name) {
                    if let Some(n) = remaining.get_mut(dependent) {
                        *n -= 1;
                    }
                }
                order.push(name.clone());
            }
        }

        order.extend(remaining.into_keys().cloned());
        order
    }
}
