//! Reference graph for template cycle detection.
//!
//! Nodes are template keys, and an edge `a -> b` means the body of template `a`
//! contains a reference to `b`. A cycle means expansion would never terminate, so
//! the registry refuses any registration that would create one.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Node has not been visited.
    White,
    /// Node is on the current DFS path.
    Gray,
    /// Node and everything reachable from it has been visited.
    Black,
}

/// Directed graph of template references.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    graph: DiGraph<String, ()>,
    node_map: HashMap<String, NodeIndex>,
}

impl ReferenceGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_node(&mut self, key: &str) -> NodeIndex {
        if let Some(&index) = self.node_map.get(key) {
            index
        } else {
            let index = self.graph.add_node(key.to_string());
            self.node_map.insert(key.to_string(), index);
            index
        }
    }

    /// Add a template and the keys its body references.
    pub fn add_template<'a>(&mut self, key: &str, references: impl IntoIterator<Item = &'a String>) {
        let from = self.ensure_node(key);
        for reference in references {
            let to = self.ensure_node(reference);
            if !self.graph.contains_edge(from, to) {
                self.graph.add_edge(from, to, ());
            }
        }
    }

    /// Find a cycle reachable from `key`.
    ///
    /// The returned path starts and ends with the same key.
    #[must_use]
    pub fn find_cycle_from(&self, key: &str) -> Option<Vec<String>> {
        let start = *self.node_map.get(key)?;
        let mut colors: HashMap<NodeIndex, Color> =
            self.graph.node_indices().map(|n| (n, Color::White)).collect();
        let mut path = Vec::new();
        self.dfs_visit(start, &mut colors, &mut path)
    }

    fn dfs_visit(
        &self,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for neighbor in self.graph.neighbors(node) {
            match colors.get(&neighbor) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|n| *n == neighbor).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| self.graph[*n].clone()).collect();
                    cycle.push(self.graph[neighbor].clone());
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = self.dfs_visit(neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    /// Every key that lies on some cycle.
    ///
    /// Computed from the strongly connected components: a component of two or more
    /// keys is a cycle, and so is a single key that references itself.
    #[must_use]
    pub fn cyclic_keys(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for component in tarjan_scc(&self.graph) {
            let on_cycle = component.len() > 1
                || component.first().is_some_and(|&n| self.graph.contains_edge(n, n));
            if on_cycle {
                keys.extend(component.into_iter().map(|n| self.graph[n].clone()));
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(keys: &[&str]) -> Vec<String> {
        keys.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_chain_has_no_cycle() {
        let mut graph = ReferenceGraph::new();
        graph.add_template("a", &refs(&["b"]));
        graph.add_template("b", &refs(&["c"]));

        assert!(graph.find_cycle_from("a").is_none());
        assert!(graph.cyclic_keys().is_empty());
    }

    #[test]
    fn test_two_key_cycle() {
        let mut graph = ReferenceGraph::new();
        graph.add_template("a", &refs(&["b"]));
        graph.add_template("b", &refs(&["a"]));

        assert_eq!(graph.find_cycle_from("a"), Some(refs(&["a", "b", "a"])));
        assert_eq!(graph.find_cycle_from("b"), Some(refs(&["b", "a", "b"])));
        assert_eq!(graph.cyclic_keys(), ["a", "b"].iter().map(ToString::to_string).collect());
    }

    #[test]
    fn test_self_reference() {
        let mut graph = ReferenceGraph::new();
        graph.add_template("loop", &refs(&["loop"]));

        assert_eq!(graph.find_cycle_from("loop"), Some(refs(&["loop", "loop"])));
        assert!(graph.cyclic_keys().contains("loop"));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut graph = ReferenceGraph::new();
        graph.add_template("a", &refs(&["b", "c"]));
        graph.add_template("b", &refs(&["d"]));
        graph.add_template("c", &refs(&["d"]));

        assert!(graph.find_cycle_from("a").is_none());
        assert!(graph.cyclic_keys().is_empty());
    }

    #[test]
    fn test_key_feeding_a_cycle_is_not_on_it() {
        let mut graph = ReferenceGraph::new();
        graph.add_template("entry", &refs(&["x"]));
        graph.add_template("x", &refs(&["y"]));
        graph.add_template("y", &refs(&["x"]));

        let cyclic = graph.cyclic_keys();
        assert!(cyclic.contains("x") && cyclic.contains("y"));
        assert!(!cyclic.contains("entry"));
        // The path reported from the entry point starts at the cycle it reaches.
        assert_eq!(graph.find_cycle_from("entry"), Some(refs(&["x", "y", "x"])));
    }

    #[test]
    fn test_unknown_key_has_no_cycle() {
        let graph = ReferenceGraph::new();
        assert!(graph.find_cycle_from("ghost").is_none());
    }
}
