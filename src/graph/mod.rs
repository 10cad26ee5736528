//! Directed dependency graph of project files
//!
//! Architecture: Aggregate - The graph owns file nodes and the import edges leaving them
//! - Nodes are keyed by POSIX relative path; edges are stored under their source node
//! - Removing a node drops its outgoing edges but leaves edges pointing into it dangling
//! - Only the scanner mutates a graph; rules receive it by shared reference

use crate::domain::{Dependency, ProjectFile};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Dependency graph over project files.
///
/// Ordered maps keep iteration order independent of the order files were parsed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, ProjectFile>,
    out_edges: BTreeMap<String, Vec<Dependency>>,
}

/// Node and edge counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub resolved_edges: usize,
    pub dangling_edges: usize,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file node with all of its outgoing edges, replacing any previous version.
    ///
    /// Edges whose `source` differs from the node id are re-attributed to the node.
    pub fn upsert_node(&mut self, file: ProjectFile, edges: Vec<Dependency>) {
        let id = file.relative_path.clone();
        let edges = edges
            .into_iter()
            .map(|mut edge| {
                if edge.source != id {
                    edge.source = id.clone();
                }
                edge
            })
            .collect();
        self.nodes.insert(id.clone(), file);
        self.out_edges.insert(id, edges);
    }

    /// Remove a node and its outgoing edges. Edges from other nodes that target it are kept.
    pub fn remove_node(&mut self, id: &str) -> Option<ProjectFile> {
        self.out_edges.remove(id);
        self.nodes.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&ProjectFile> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ProjectFile> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Dependency> {
        self.out_edges.values().flatten()
    }

    pub fn out_edges(&self, id: &str) -> &[Dependency] {
        self.out_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every edge whose target is `id`, whether or not `id` is still a node
    pub fn in_edges<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Dependency> + 'a {
        self.edges().filter(move |edge| edge.target == id)
    }

    /// Distinct node ids that `id` has an edge to. Targets that are not nodes are skipped.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        let targets: BTreeSet<&str> = self
            .out_edges(id)
            .iter()
            .map(|edge| edge.target.as_str())
            .filter(|target| self.nodes.contains_key(*target))
            .collect();
        targets.into_iter().collect()
    }

    /// Distinct node ids with an edge into `id`
    pub fn predecessors<'a>(&'a self, id: &'a str) -> Vec<&'a str> {
        let sources: BTreeSet<&str> = self
            .in_edges(id)
            .map(|edge| edge.source.as_str())
            .filter(|source| self.nodes.contains_key(*source))
            .collect();
        sources.into_iter().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.out_edges.values().map(Vec::len).sum()
    }

    /// Edges that were resolved to a file which is no longer a node
    pub fn dangling_edges(&self) -> impl Iterator<Item = &Dependency> {
        self.edges().filter(|edge| edge.is_resolved() && !self.nodes.contains_key(&edge.target))
    }

    /// Canonical, order-independent view of every edge
    pub fn edge_set(&self) -> BTreeSet<&Dependency> {
        self.edges().collect()
    }

    pub fn stats(&self) -> GraphStats {
        let resolved_edges = self.edges().filter(|e| self.nodes.contains_key(&e.target)).count();
        GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            resolved_edges,
            dangling_edges: self.dangling_edges().count(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::domain::DependencyKind;

    #[test]
    fn test_accessors() {
        let graph = graph(&[("a.ts", &["b.ts", "c.ts"]), ("b.ts", &["c.ts"]), ("c.ts", &[])]);

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.successors("a.ts"), vec!["b.ts", "c.ts"]);
        assert_eq!(graph.predecessors("c.ts"), vec!["a.ts", "b.ts"]);
        assert_eq!(graph.in_edges("c.ts").count(), 2);
        assert_eq!(graph.out_edges("c.ts").len(), 0);
        assert!(graph.node("missing.ts").is_none());
    }

    #[test]
    fn test_predecessors_of_owned_id() {
        let graph = graph(&[("a.ts", &["c.ts"]), ("b.ts", &["c.ts"]), ("c.ts", &["a.ts"])]);
        let ids: Vec<String> = graph.node_ids().map(String::from).collect();
        let dependents: Vec<usize> = ids.iter().map(|id| graph.predecessors(id).len()).collect();
        assert_eq!(dependents, vec![1, 0, 2]);

        let removed = format!("{}.ts", "c");
        let mut graph = graph;
        let importers: Vec<String> = graph.predecessors(&removed).into_iter().map(String::from).collect();
        graph.remove_node(&removed);
        assert_eq!(importers, vec!["a.ts", "b.ts"]);
        assert!(graph.predecessors(&String::from("a.ts")).is_empty());
    }

    #[test]
    fn test_edges_are_not_deduplicated() {
        let mut graph = DependencyGraph::new();
        graph.upsert_node(file("a.ts"), vec![edge("a.ts", "b.ts"), edge("a.ts", "b.ts")]);
        graph.upsert_node(file("b.ts"), vec![]);

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.successors("a.ts"), vec!["b.ts"]);
    }

    #[test]
    fn test_unresolved_targets_are_not_successors() {
        let mut graph = DependencyGraph::new();
        graph.upsert_node(
            file("a.ts"),
            vec![Dependency::new("a.ts", "react", DependencyKind::Import, 1, 1)],
        );

        assert_eq!(graph.edge_count(), 1);
        assert!(graph.successors("a.ts").is_empty());
        assert_eq!(graph.dangling_edges().count(), 0);
    }

    #[test]
    fn test_remove_node_leaves_incoming_edges_dangling() {
        let mut graph = graph(&[("a.ts", &["b.ts"]), ("b.ts", &["c.ts"]), ("c.ts", &[])]);

        let removed = graph.remove_node("b.ts");
        assert!(removed.is_some());
        assert!(!graph.contains("b.ts"));
        assert!(graph.out_edges("b.ts").is_empty());
        assert!(graph.edges().all(|e| e.source != "b.ts"));

        // a -> b survives as a dangling edge
        assert_eq!(graph.in_edges("b.ts").count(), 1);
        assert_eq!(graph.dangling_edges().count(), 1);
        assert!(graph.successors("a.ts").is_empty());
        assert_eq!(graph.stats().dangling_edges, 1);
    }

    #[test]
    fn test_upsert_replaces_all_outgoing_edges() {
        let mut graph = graph(&[("a.ts", &["b.ts", "c.ts"]), ("b.ts", &[]), ("c.ts", &[])]);
        graph.upsert_node(file("a.ts"), vec![edge("a.ts", "c.ts")]);

        assert_eq!(graph.successors("a.ts"), vec!["c.ts"]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_edge_set_is_order_independent() {
        let first = graph(&[("a.ts", &["b.ts"]), ("b.ts", &["a.ts"])]);
        let second = graph(&[("b.ts", &["a.ts"]), ("a.ts", &["b.ts"])]);

        assert_eq!(first.edge_set(), second.edge_set());
        assert_eq!(
            first.node_ids().collect::<Vec<_>>(),
            second.node_ids().collect::<Vec<_>>()
        );
    }
}
