//! DAG resolver (C3).
//!
//! Stateless functions over a [`WorkflowGraph`] and the caller's own
//! completed/started bookkeeping. Unlike [`crate::remaining_work::RemainingWorkGraph`],
//! which mutates an internal graph as execution proceeds, the resolver takes
//! a snapshot of progress on each call and recomputes from scratch — useful
//! at admission time (`has_cycle`) and anywhere a stateless ready-set
//! computation is preferable to threading a mutable graph through.

use crate::graph::WorkflowGraph;
use crate::node::NodeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Errors from resolver operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// The workflow graph contains a cycle; it cannot be admitted.
    CycleDetected,
}

impl fmt::Display for ResolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "workflow graph contains a cycle"),
        }
    }
}

impl std::error::Error for ResolverError {}

impl ResolverError {
    /// Classifies this error per §7. A cycle is always an admission-time
    /// rejection.
    #[must_use]
    pub fn kind(&self) -> crate::error::ErrorKind {
        match self {
            Self::CycleDetected => crate::error::ErrorKind::AdmissionInvalid,
        }
    }
}

/// Computes ready sets and cycle-freedom for a workflow graph.
pub struct DagResolver;

impl DagResolver {
    /// Returns the nodes with no incoming dependencies, in node-id
    /// lexicographic order.
    #[must_use]
    pub fn initial_ready(graph: &WorkflowGraph) -> Vec<NodeId> {
        let mut ready: Vec<NodeId> = graph.entry_nodes().iter().map(|n| n.id).collect();
        Self::sort_deterministic(&mut ready);
        ready
    }

    /// Returns the nodes all of whose predecessors are in `completed`, minus
    /// any node already in `completed` or `started`.
    ///
    /// A predecessor with status `skipped` still counts as satisfied, since
    /// the caller is expected to fold skipped nodes into `completed` before
    /// calling this (skipped and completed both unblock downstream work).
    #[must_use]
    pub fn next_ready(
        graph: &WorkflowGraph,
        completed: &HashSet<NodeId>,
        started: &HashSet<NodeId>,
    ) -> Vec<NodeId> {
        let mut ready = Vec::new();
        for node in graph.nodes() {
            if completed.contains(&node.id) || started.contains(&node.id) {
                continue;
            }
            let satisfied = graph
                .predecessors(node.id)
                .into_iter()
                .all(|(pred, _edge)| completed.contains(&pred.id));
            if satisfied {
                ready.push(node.id);
            }
        }
        Self::sort_deterministic(&mut ready);
        ready
    }

    /// Returns true if the graph contains a cycle.
    ///
    /// Uses Kahn's algorithm: repeatedly remove nodes with in-degree zero; if
    /// the graph has nodes left over once no more can be removed, a cycle
    /// exists among them.
    #[must_use]
    pub fn has_cycle(graph: &WorkflowGraph) -> bool {
        let mut in_degree: HashMap<NodeId, usize> = graph
            .nodes()
            .map(|node| (node.id, graph.predecessors(node.id).len()))
            .collect();

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut visited = 0usize;
        while let Some(node_id) = queue.pop_front() {
            visited += 1;
            for (successor, _edge) in graph.successors(node_id) {
                if let Some(degree) = in_degree.get_mut(&successor.id) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(successor.id);
                    }
                }
            }
        }

        visited != in_degree.len()
    }

    /// Validates that the graph is acyclic, for use at admission time.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::CycleDetected`] if a cycle exists.
    pub fn validate_acyclic(graph: &WorkflowGraph) -> Result<(), ResolverError> {
        if Self::has_cycle(graph) {
            Err(ResolverError::CycleDetected)
        } else {
            Ok(())
        }
    }

    fn sort_deterministic(ids: &mut [NodeId]) {
        ids.sort_by_key(ToString::to_string);
    }
}
