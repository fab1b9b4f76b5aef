//! Controller dependency graph.
//!
//! Nodes are controllers, edges point from a controller to the peers whose
//! published output it requires. `order` produces a construction order in
//! which every node comes after everything it requires, or reports a cycle.
//! Ties are broken by declaration order so wiring is deterministic.

use crate::error::WiringError;
use std::collections::{BTreeSet, HashMap};

/// Directed "requires" graph over named nodes.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    requires: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Names must be unique.
    pub fn add_node(&mut self, name: &str) -> Result<usize, WiringError> {
        if self.index.contains_key(name) {
            return Err(WiringError::DuplicateController(name.to_string()));
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        self.requires.push(BTreeSet::new());
        Ok(id)
    }

    /// Declares that `node` requires `dependency`. Both must already exist.
    pub fn add_edge(&mut self, node: &str, dependency: &str) -> Result<(), WiringError> {
        let from = self.lookup(node, node)?;
        let to = self.lookup(node, dependency)?;
        self.requires[from].insert(to);
        Ok(())
    }

    fn lookup(&self, node: &str, name: &str) -> Result<usize, WiringError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| WiringError::UnknownDependency {
                controller: node.to_string(),
                dependency: name.to_string(),
            })
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of a node.
    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Topological order of node ids, dependencies first.
    pub fn order(&self) -> Result<Vec<usize>, WiringError> {
        let n = self.names.len();
        let mut remaining: Vec<usize> = self.requires.iter().map(BTreeSet::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (node, deps) in self.requires.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&id| remaining[id] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &dependent in &dependents[id] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() == n {
            return Ok(order);
        }
        Err(WiringError::Cycle(self.find_cycle(&remaining)))
    }

    /// Walks unresolved "requires" edges until a node repeats.
    ///
    /// Every unresolved node still requires at least one unresolved node, so
    /// the walk always closes a loop.
    fn find_cycle(&self, remaining: &[usize]) -> Vec<String> {
        let unresolved = |id: usize| remaining[id] > 0;
        let Some(start) = (0..self.names.len()).find(|&id| unresolved(id)) else {
            return Vec::new();
        };

        let mut path: Vec<usize> = Vec::new();
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut current = start;
        loop {
            if let Some(&at) = position.get(&current) {
                let mut cycle: Vec<String> =
                    path[at..].iter().map(|&id| self.names[id].clone()).collect();
                cycle.push(self.names[current].clone());
                return cycle;
            }
            position.insert(current, path.len());
            path.push(current);
            match self.requires[current].iter().copied().find(|&dep| unresolved(dep)) {
                Some(next) => current = next,
                None => return path.iter().map(|&id| self.names[id].clone()).collect(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[(&str, &[&str])]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (name, _) in nodes {
            graph.add_node(name).expect("node");
        }
        for (name, deps) in nodes {
            for dep in *deps {
                graph.add_edge(name, dep).expect("edge");
            }
        }
        graph
    }

    fn names(graph: &DependencyGraph, order: &[usize]) -> Vec<String> {
        order
            .iter()
            .map(|&id| graph.name(id).unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_independent_nodes_keep_declaration_order() {
        let g = graph(&[("a", &[]), ("b", &[]), ("c", &[])]);
        let order = g.order().expect("order");
        assert_eq!(names(&g, &order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let g = graph(&[
            ("config-observer", &["resource-sync"]),
            ("encryption", &["resource-sync"]),
            ("resource-sync", &[]),
            ("status", &[]),
        ]);
        let order = names(&g, &g.order().expect("order"));
        let pos = |n: &str| order.iter().position(|x| x == n).expect("present");
        assert!(pos("resource-sync") < pos("config-observer"));
        assert!(pos("resource-sync") < pos("encryption"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn test_cycle_is_reported_with_members() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"]), ("d", &["a"])]);
        match g.order() {
            Err(WiringError::Cycle(cycle)) => {
                assert_eq!(cycle.first(), cycle.last());
                for member in ["a", "b", "c"] {
                    assert!(cycle.iter().any(|n| n == member), "{member} missing from {cycle:?}");
                }
                assert!(!cycle.iter().any(|n| n == "d"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let g = graph(&[("a", &["a"])]);
        assert!(matches!(g.order(), Err(WiringError::Cycle(_))));
    }

    #[test]
    fn test_duplicate_and_unknown_nodes() {
        let mut g = DependencyGraph::new();
        g.add_node("a").expect("node");
        assert!(matches!(g.add_node("a"), Err(WiringError::DuplicateController(_))));
        assert!(matches!(
            g.add_edge("a", "missing"),
            Err(WiringError::UnknownDependency { .. })
        ));
    }
}
