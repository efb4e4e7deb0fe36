//! Dependency graph and topological scheduling
//!
//! The compiler wires every registered node into a directed multigraph whose
//! edges carry a kind and a small metadata payload. Edge kinds split into two
//! families:
//!
//! - **Scheduling edges** - [`EdgeKind::DataFlow`], [`EdgeKind::ControlFlow`],
//!   [`EdgeKind::EffectFlow`] - a node's handler must see all of its
//!   scheduling predecessors completed. These drive the topological order and
//!   the async-inference pass.
//! - **Traversal edges** - [`EdgeKind::Structural`] - child to parent links
//!   kept for walking the tree; they never constrain execution order.
//!
//! Sorting is Kahn's algorithm seeded in node-insertion order, which keeps the
//! result deterministic for identical inputs. Any cycle is fatal and reported
//! with the ids that remain unsorted.
//!
//! Runtime collection subtrees are wired into their own graph and ordered with
//! [`DepGraph::scoped_sort`], where edges crossing into the already-evaluated
//! compile-time graph count as satisfied.

use crate::ast::NodeId;
use crate::error::{CompileError, CompileResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

/// Edge classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Child -> parent, traversal only
    Structural,
    /// Producer -> consumer
    DataFlow,
    /// In-order execution inside one transition's effect list
    ControlFlow,
    /// Sequencing across transitions (onLoad / onAccess chains)
    EffectFlow,
}

impl EdgeKind {
    /// True for kinds that constrain execution order
    pub fn schedules(&self) -> bool {
        !matches!(self, EdgeKind::Structural)
    }
}

/// One directed edge
#[derive(Debug, Clone)]
pub struct Edge {
    /// Source node
    pub from: NodeId,
    /// Target node
    pub to: NodeId,
    /// Classification
    pub kind: EdgeKind,
    /// Wirer-supplied context (reason, branch, index, crossDepth, ...)
    pub metadata: Value,
}

/// Directed multigraph over node ids
#[derive(Debug, Default)]
pub struct DepGraph {
    order: Vec<NodeId>,
    present: HashSet<NodeId>,
    outgoing: HashMap<NodeId, Vec<Edge>>,
    incoming: HashMap<NodeId, Vec<Edge>>,
    seen: HashSet<(NodeId, NodeId, EdgeKind, String)>,
}

impl DepGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node (idempotent)
    pub fn add_node(&mut self, id: NodeId) {
        if self.present.insert(id.clone()) {
            self.order.push(id);
        }
    }

    /// Add an edge (idempotent per `(from, to, kind, metadata)`)
    ///
    /// Both endpoints are registered implicitly.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind, metadata: Value) {
        let meta_key = metadata.to_string();
        if !self
            .seen
            .insert((from.clone(), to.clone(), kind, meta_key))
        {
            return;
        }
        self.add_node(from.clone());
        self.add_node(to.clone());
        let edge = Edge {
            from: from.clone(),
            to: to.clone(),
            kind,
            metadata,
        };
        self.outgoing.entry(from).or_default().push(edge.clone());
        self.incoming.entry(to).or_default().push(edge);
    }

    /// True when the node is registered
    pub fn contains(&self, id: &NodeId) -> bool {
        self.present.contains(id)
    }

    /// Every node, in insertion order
    pub fn nodes(&self) -> &[NodeId] {
        &self.order
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.seen.len()
    }

    /// Outgoing edges of a node
    pub fn edges_from(&self, id: &NodeId) -> &[Edge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edges of a node
    pub fn edges_to(&self, id: &NodeId) -> &[Edge] {
        self.incoming.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All edges, in no particular order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.outgoing.values().flatten()
    }

    /// Scheduling predecessors of a node (sources of DataFlow / ControlFlow /
    /// EffectFlow edges into it)
    pub fn scheduling_predecessors(&self, id: &NodeId) -> impl Iterator<Item = &NodeId> {
        self.edges_to(id)
            .iter()
            .filter(|e| e.kind.schedules())
            .map(|e| &e.from)
    }

    /// Full topological order over scheduling edges
    ///
    /// Returns a permutation of every registered node. A cycle fails
    /// compilation with the ids it involves.
    pub fn topological_sort(&self) -> CompileResult<Vec<NodeId>> {
        self.sort_restricted(None)
    }

    /// Topological order of a runtime subset
    ///
    /// Only edges with both endpoints inside `scope` constrain the order;
    /// edges arriving from the pre-existing graph are treated as already
    /// satisfied.
    pub fn scoped_sort(&self, scope: &HashSet<NodeId>) -> CompileResult<Vec<NodeId>> {
        self.sort_restricted(Some(scope))
    }

    fn sort_restricted(&self, scope: Option<&HashSet<NodeId>>) -> CompileResult<Vec<NodeId>> {
        let in_scope = |id: &NodeId| scope.map(|s| s.contains(id)).unwrap_or(true);
        let candidates: Vec<&NodeId> = self.order.iter().filter(|id| in_scope(id)).collect();

        let mut in_degree: HashMap<&NodeId, usize> = HashMap::new();
        for id in &candidates {
            let degree = self
                .edges_to(id)
                .iter()
                .filter(|e| e.kind.schedules() && in_scope(&e.from))
                .count();
            in_degree.insert(*id, degree);
        }

        let mut queue: VecDeque<&NodeId> = candidates
            .iter()
            .filter(|id| in_degree[**id] == 0)
            .copied()
            .collect();
        let mut sorted = Vec::with_capacity(candidates.len());

        while let Some(id) = queue.pop_front() {
            sorted.push(id.clone());
            for edge in self.edges_from(id) {
                if !edge.kind.schedules() || !in_scope(&edge.to) {
                    continue;
                }
                let degree = in_degree
                    .get_mut(&edge.to)
                    .expect("edge target is a registered node");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(
                        candidates
                            .iter()
                            .find(|c| ***c == edge.to)
                            .copied()
                            .expect("edge target is in scope"),
                    );
                }
            }
        }

        if sorted.len() != candidates.len() {
            let stuck: Vec<NodeId> = candidates
                .iter()
                .filter(|id| in_degree[**id] > 0)
                .map(|id| (*id).clone())
                .collect();
            return Err(CompileError::CyclicDependency { ids: stuck });
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{IdGenerator, IdSpace};
    use serde_json::json;

    fn ids(n: usize) -> Vec<NodeId> {
        let mut generator = IdGenerator::new();
        (0..n).map(|_| generator.next(IdSpace::CompileAst)).collect()
    }

    #[test]
    fn test_edges_are_idempotent_per_metadata() {
        let nodes = ids(2);
        let mut graph = DepGraph::new();
        graph.add_edge(nodes[0].clone(), nodes[1].clone(), EdgeKind::DataFlow, json!(null));
        graph.add_edge(nodes[0].clone(), nodes[1].clone(), EdgeKind::DataFlow, json!(null));
        assert_eq!(graph.edge_count(), 1);

        // Different metadata is a distinct edge in the multigraph
        graph.add_edge(
            nodes[0].clone(),
            nodes[1].clone(),
            EdgeKind::DataFlow,
            json!({"index": 1}),
        );
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_topological_order_respects_data_flow() {
        let nodes = ids(4);
        let mut graph = DepGraph::new();
        for id in &nodes {
            graph.add_node(id.clone());
        }
        // 2 -> 1 -> 0, 3 independent
        graph.add_edge(nodes[2].clone(), nodes[1].clone(), EdgeKind::DataFlow, json!(null));
        graph.add_edge(nodes[1].clone(), nodes[0].clone(), EdgeKind::DataFlow, json!(null));

        let sorted = graph.topological_sort().unwrap();
        assert_eq!(sorted.len(), 4);
        let position = |id: &NodeId| sorted.iter().position(|s| s == id).unwrap();
        assert!(position(&nodes[2]) < position(&nodes[1]));
        assert!(position(&nodes[1]) < position(&nodes[0]));
    }

    #[test]
    fn test_structural_edges_do_not_schedule() {
        let nodes = ids(2);
        let mut graph = DepGraph::new();
        // A structural cycle is fine; it never constrains the sort
        graph.add_edge(nodes[0].clone(), nodes[1].clone(), EdgeKind::Structural, json!(null));
        graph.add_edge(nodes[1].clone(), nodes[0].clone(), EdgeKind::Structural, json!(null));
        let sorted = graph.topological_sort().unwrap();
        assert_eq!(sorted.len(), 2);
    }

    #[test]
    fn test_cycle_is_fatal_and_names_ids() {
        let nodes = ids(3);
        let mut graph = DepGraph::new();
        graph.add_edge(nodes[0].clone(), nodes[1].clone(), EdgeKind::DataFlow, json!(null));
        graph.add_edge(nodes[1].clone(), nodes[0].clone(), EdgeKind::EffectFlow, json!(null));
        graph.add_node(nodes[2].clone());

        let err = graph.topological_sort().unwrap_err();
        match err {
            CompileError::CyclicDependency { ids } => {
                assert!(ids.contains(&nodes[0]));
                assert!(ids.contains(&nodes[1]));
                assert!(!ids.contains(&nodes[2]));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_scoped_sort_ignores_cross_boundary_edges() {
        let nodes = ids(3);
        let mut graph = DepGraph::new();
        // Pre-existing node 0 feeds runtime node 1; runtime 1 feeds runtime 2
        graph.add_edge(nodes[0].clone(), nodes[1].clone(), EdgeKind::DataFlow, json!(null));
        graph.add_edge(nodes[1].clone(), nodes[2].clone(), EdgeKind::DataFlow, json!(null));

        let scope: HashSet<NodeId> = [nodes[1].clone(), nodes[2].clone()].into();
        let sorted = graph.scoped_sort(&scope).unwrap();
        assert_eq!(sorted, vec![nodes[1].clone(), nodes[2].clone()]);
    }

    #[test]
    fn test_sort_is_deterministic() {
        let nodes = ids(5);
        let mut build = || {
            let mut graph = DepGraph::new();
            for id in &nodes {
                graph.add_node(id.clone());
            }
            graph.add_edge(nodes[4].clone(), nodes[0].clone(), EdgeKind::DataFlow, json!(null));
            graph.topological_sort().unwrap()
        };
        assert_eq!(build(), build());
    }
}
