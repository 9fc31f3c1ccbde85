//! Directed Acyclic Graph (DAG) for dependency management.
//!
//! A single petgraph edge set backs both traversal directions, so upstream and
//! downstream lookups can never drift apart.
//!
//! **Note:** This module is internal to `fresco-flow` to preserve freedom to change internals.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::{Error, Result};

/// A directed graph with Kahn-style topological sorting.
///
/// Nodes are never removed, so a node's `NodeIndex` doubles as its insertion
/// position.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Ord + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Ord + Hash + Display,
{
    /// Creates a new empty DAG.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
        }
    }

    /// Returns the number of nodes in the DAG.
    #[must_use]
    pub(crate) fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the DAG.
    #[must_use]
    pub(crate) fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Adds a node to the DAG.
    ///
    /// If the node already exists, this is a no-op.
    pub(crate) fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        idx
    }

    /// Adds a directed edge from `from` (upstream) to `to` (downstream).
    ///
    /// # Errors
    ///
    /// Returns an error if either node index is invalid.
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        self.weight(from)?;
        self.weight(to)?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Returns the node index for a value, if it exists.
    #[must_use]
    pub(crate) fn get_index(&self, value: &T) -> Option<NodeIndex> {
        self.index_map.get(value).copied()
    }

    /// Returns the value stored at `idx`.
    pub(crate) fn weight(&self, idx: NodeIndex) -> Result<&T> {
        self.graph
            .node_weight(idx)
            .ok_or_else(|| Error::DagNodeNotFound {
                node: format!("index {}", idx.index()),
            })
    }

    /// Iterates over the direct upstreams of `node`.
    pub(crate) fn upstream_indices(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Incoming)
    }

    /// Iterates over the direct downstreams of `node`.
    pub(crate) fn downstream_indices(
        &self,
        node: NodeIndex,
    ) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(node, Direction::Outgoing)
    }

    /// Returns every node in topological order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains a cycle.
    pub(crate) fn toposort(&self) -> Result<Vec<NodeIndex>> {
        self.kahn(None)
    }

    /// Returns the nodes of `subset` in topological order of the induced subgraph.
    ///
    /// Edges leaving the subset are ignored, so two selected nodes connected
    /// only through an unselected node have no ordering constraint between them.
    ///
    /// # Errors
    ///
    /// Returns an error if the induced subgraph contains a cycle.
    pub(crate) fn toposort_subset(&self, subset: &HashSet<NodeIndex>) -> Result<Vec<NodeIndex>> {
        self.kahn(Some(subset))
    }

    /// Kahn's algorithm with deterministic tie-breaking: among ready nodes the
    /// smallest value (by `Ord`) is emitted first.
    fn kahn(&self, subset: Option<&HashSet<NodeIndex>>) -> Result<Vec<NodeIndex>> {
        let selected = |idx: NodeIndex| subset.is_none_or(|s| s.contains(&idx));
        let capacity = subset.map_or(self.graph.node_count(), HashSet::len);
        if capacity == 0 {
            return Ok(Vec::new());
        }

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::with_capacity(capacity);
        for idx in self.graph.node_indices().filter(|&idx| selected(idx)) {
            in_degree.insert(idx, 0);
        }
        for edge in self.graph.edge_references() {
            if selected(edge.source()) && selected(edge.target()) {
                *in_degree.entry(edge.target()).or_insert(0) += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<(&T, NodeIndex)>> = BinaryHeap::new();
        for (&idx, _) in in_degree.iter().filter(|(_, deg)| **deg == 0) {
            ready.push(Reverse((self.weight(idx)?, idx)));
        }

        let mut result = Vec::with_capacity(in_degree.len());
        while let Some(Reverse((_, idx))) = ready.pop() {
            result.push(idx);
            for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.push(Reverse((self.weight(neighbor)?, neighbor)));
                    }
                }
            }
        }

        if result.len() != in_degree.len() {
            let mut blocked: Vec<String> = in_degree
                .iter()
                .filter(|(_, deg)| **deg > 0)
                .filter_map(|(&idx, _)| self.graph.node_weight(idx))
                .map(ToString::to_string)
                .collect();
            blocked.sort();
            return Err(Error::CycleDetected { cycle: blocked });
        }

        Ok(result)
    }
}

impl<T> Default for Dag<T>
where
    T: Clone + Eq + Ord + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
