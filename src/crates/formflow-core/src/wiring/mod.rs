//! Dependency wirers
//!
//! Wiring is the phase that turns a registered node set into a scheduling
//! graph. Each [`Wirer`] is a pluggable pass that walks the registry through a
//! [`WiringContext`] and adds typed edges; the default set covers:
//!
//! | Wirer | Edges |
//! |---|---|
//! | [`StructuralWirer`] | child -> parent, traversal only |
//! | [`TransitionChainWirer`] | onLoad / onAccess chains (same-depth, cross-depth, internal effect chains) |
//! | [`ActionWirer`] | onAction predicates and effects |
//! | [`SubmitWirer`] | onSubmit gates, validation gating, branch effects and next entries |
//! | [`PseudoWirer`] | pseudo-node producers and consumers |
//! | [`ExpressionWirer`] | expression argument edges |
//!
//! The same wirers re-run over runtime collection subtrees with a context
//! scoped to the freshly instantiated nodes.

mod expressions;
mod pseudo;
mod structural;
mod transitions;

pub use expressions::ExpressionWirer;
pub use pseudo::PseudoWirer;
pub use structural::StructuralWirer;
pub use transitions::{ActionWirer, SubmitWirer, TransitionChainWirer};

use crate::ast::{ExpressionKind, NodeId, NodeKind, StructureKind};
use crate::error::CompileResult;
use crate::graph::{DepGraph, EdgeKind};
use crate::register::{reference_key, transition_chain};
use crate::registry::{MetadataRegistry, NodeRegistry};
use serde_json::Value;

/// Everything a wirer may consult while adding edges
pub struct WiringContext<'a> {
    /// Frozen node store
    pub nodes: &'a NodeRegistry,
    /// Stamped metadata
    pub meta: &'a MetadataRegistry,
    /// Graph under construction
    pub graph: &'a mut DepGraph,
    /// Current step, absent when wiring a runtime subtree
    pub step_id: Option<NodeId>,
}

impl<'a> WiringContext<'a> {
    /// Context for a full compile-time wiring run
    pub fn new(
        nodes: &'a NodeRegistry,
        meta: &'a MetadataRegistry,
        graph: &'a mut DepGraph,
        step_id: NodeId,
    ) -> Self {
        Self {
            nodes,
            meta,
            graph,
            step_id: Some(step_id),
        }
    }

    /// Context for a runtime subtree (no current-step services)
    pub fn runtime(
        nodes: &'a NodeRegistry,
        meta: &'a MetadataRegistry,
        graph: &'a mut DepGraph,
    ) -> Self {
        Self {
            nodes,
            meta,
            graph,
            step_id: None,
        }
    }

    /// Add one edge
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind, metadata: Value) {
        self.graph.add_edge(from, to, kind, metadata);
    }

    /// Ids of every node of this kind
    pub fn of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.nodes.of_kind(kind).to_vec()
    }

    /// Reference nodes whose first path segment is `namespace`
    pub fn find_reference_nodes(&self, namespace: &str) -> Vec<NodeId> {
        self.nodes
            .of_kind(NodeKind::Expression(ExpressionKind::Reference))
            .iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .and_then(reference_key)
                    .map(|(ns, _)| ns == namespace)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Structural parent of a node
    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        self.meta.parent(id)
    }

    /// The current step node
    pub fn current_step(&self) -> Option<&NodeId> {
        self.step_id.as_ref()
    }

    /// Number of structural ancestors above a node
    pub fn depth(&self, id: &NodeId) -> usize {
        self.meta.ancestors(id).len()
    }

    /// The ordered transition chain along the current step's ancestry
    pub fn chain(&self, key: &str) -> Vec<NodeId> {
        match &self.step_id {
            Some(step) => transition_chain(self.nodes, self.meta, step, key),
            None => Vec::new(),
        }
    }

    /// Last onLoad transition declared at or above `id`
    ///
    /// Climbs the structural ancestry and returns the final transition of the
    /// nearest `onLoad` list found.
    pub fn find_last_on_load_from(&self, id: &NodeId) -> Option<NodeId> {
        let mut cursor = Some(id.clone());
        while let Some(current) = cursor {
            if let Some(node) = self.nodes.get(&current) {
                if matches!(node.kind, NodeKind::Structure(_)) {
                    let on_load = node.node_items("onLoad");
                    if let Some(last) = on_load.last() {
                        return Some(last.clone());
                    }
                }
            }
            cursor = self.meta.parent(&current).cloned();
        }
        None
    }

    /// Nearest enclosing step of a node (the node itself counts)
    pub fn enclosing_step(&self, id: &NodeId) -> Option<NodeId> {
        let mut cursor = Some(id.clone());
        while let Some(current) = cursor {
            if let Some(node) = self.nodes.get(&current) {
                if node.kind == NodeKind::Structure(StructureKind::Step) {
                    return Some(current);
                }
            }
            cursor = self.meta.parent(&current).cloned();
        }
        None
    }
}

/// A pluggable wiring pass
pub trait Wirer: Send + Sync {
    /// Pass name, for diagnostics
    fn name(&self) -> &'static str;

    /// Add this pass's edges
    fn wire(&self, cx: &mut WiringContext<'_>) -> CompileResult<()>;
}

/// The default compile-time wiring pipeline, in execution order.
pub fn default_wirers() -> Vec<Box<dyn Wirer>> {
    vec![
        Box::new(StructuralWirer),
        Box::new(TransitionChainWirer),
        Box::new(ActionWirer),
        Box::new(SubmitWirer),
        Box::new(PseudoWirer),
        Box::new(ExpressionWirer),
    ]
}

/// The reduced pipeline re-run over runtime collection subtrees.
pub fn runtime_wirers() -> Vec<Box<dyn Wirer>> {
    vec![Box::new(StructuralWirer), Box::new(ExpressionWirer)]
}
