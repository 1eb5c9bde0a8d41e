//! The target dependency graph and command scheduler (§4.H).
//!
//! Graph construction and cycle detection are new (no teacher analogue — solc projects have no
//! inter-target graph). The native strategy's worker pool reuses the teacher's
//! `compile::project::ProjectCompiler` `rayon::prelude::*`/`rayon::scope` idiom for parallel solc
//! invocation, generalized from "compile files grouped by solc version" to "compile files grouped
//! by target, respecting the static-link partial order" (§4.H implementation notes).

pub mod makefile;
pub mod ninja;
pub mod scheduler;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

pub use scheduler::{NodeResult, SchedulerError, Strategy as SchedulerStrategy};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("target dependency cycle detected: {0}")]
    Cycle(String),
    #[error("target `{0}` references unknown dependency `{1}`")]
    UnknownDependency(String, String),
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// §3 `TargetGraphNode`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetGraphNode {
    pub target_id: String,
    pub inputs: BTreeSet<PathBuf>,
    pub outputs: BTreeSet<PathBuf>,
    pub command: Vec<String>,
    pub deps: BTreeSet<String>,
}

impl TargetGraphNode {
    /// A rough scheduling weight: nodes with more dependents (heavier link nodes with many
    /// successors) are scheduled earlier to shorten the critical path (§4.H "Native" strategy).
    pub fn weight(&self, dependents_count: usize) -> usize {
        self.outputs.len() + dependents_count * 4
    }
}

/// One target's position in the workspace-level static/dynamic link graph, used to build the
/// inter-target ordering before per-target micro-DAGs (resource → PCH → compile → link) are
/// constructed by the caller.
#[derive(Clone, Debug)]
pub struct TargetDependencyGraph {
    nodes: BTreeMap<String, BTreeSet<String>>,
}

impl TargetDependencyGraph {
    pub fn new() -> Self {
        Self { nodes: BTreeMap::new() }
    }

    /// Registers `target` with its `staticLinks ∪ links ∪ projectDependencies ∪
    /// chaletSubproject` dependency set (§4.H "Graph construction").
    pub fn add_target(&mut self, target: &str, dependencies: impl IntoIterator<Item = String>) {
        self.nodes.entry(target.to_string()).or_default().extend(dependencies);
        // ensure dependency-only targets still have an entry so iteration order is total.
    }

    /// Kahn's algorithm: returns targets in an order where every dependency precedes its
    /// dependents, or `GraphError::Cycle` if one exists (§3 "Acyclic by construction; cycles are
    /// an error at resolution time").
    pub fn topological_order(&self) -> Result<Vec<String>> {
        for (target, deps) in &self.nodes {
            for dep in deps {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency(target.clone(), dep.clone()));
                }
            }
        }

        let mut in_degree: BTreeMap<&str, usize> = self.nodes.keys().map(|k| (k.as_str(), 0)).collect();
        for deps in self.nodes.values() {
            for dep in deps {
                // edge direction: dep -> target, so `target`'s in-degree counts its own deps.
                let _ = dep;
            }
        }
        for (target, deps) in &self.nodes {
            *in_degree.get_mut(target.as_str()).unwrap() = deps.len();
        }

        let mut ready: Vec<&str> =
            in_degree.iter().filter(|(_, d)| **d == 0).map(|(k, _)| *k).collect();
        ready.sort();

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (target, deps) in &self.nodes {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(target.as_str());
            }
        }

        while let Some(next) = ready.pop() {
            order.push(next.to_string());
            if let Some(children) = dependents.get(next) {
                let mut newly_ready = Vec::new();
                for child in children {
                    let degree = in_degree.get_mut(child).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        newly_ready.push(*child);
                    }
                }
                newly_ready.sort();
                ready.extend(newly_ready);
            }
        }

        if order.len() != self.nodes.len() {
            let remaining: Vec<&str> =
                self.nodes.keys().map(String::as_str).filter(|k| !order.contains(&k.to_string())).collect();
            return Err(GraphError::Cycle(remaining.join(", ")));
        }

        Ok(order)
    }
}

impl Default for TargetDependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topological_order_respects_static_links() {
        let mut graph = TargetDependencyGraph::new();
        graph.add_target("app", ["liba".to_string()]);
        graph.add_target("liba", []);
        let order = graph.topological_order().unwrap();
        assert!(order.iter().position(|t| t == "liba").unwrap() < order.iter().position(|t| t == "app").unwrap());
    }

    #[test]
    fn cycle_is_detected() {
        let mut graph = TargetDependencyGraph::new();
        graph.add_target("a", ["b".to_string()]);
        graph.add_target("b", ["a".to_string()]);
        assert!(matches!(graph.topological_order(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let mut graph = TargetDependencyGraph::new();
        graph.add_target("app", ["missing".to_string()]);
        assert!(matches!(graph.topological_order(), Err(GraphError::UnknownDependency(_, _))));
    }
}
