//! Node and metadata registries
//!
//! After normalization the AST is frozen into a [`NodeRegistry`]: the flat,
//! indexed node store every later phase (wiring, handler compilation,
//! evaluation) reads from. Alongside it the [`MetadataRegistry`] carries the
//! per-node facts stamped during registration - parent pointers, current-step
//! flags, scope info - keyed by `(node id, metadata key)`.
//!
//! Both registries are read-only during evaluation; runtime collection
//! instances get their own small registry pair in the evaluation overlay.

use crate::ast::{AstNode, NodeId, NodeKind, PseudoKind};
use crate::error::{ThunkError, ThunkResult};
use std::collections::HashMap;

/// Flat node store with secondary indices
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, AstNode>,
    by_kind: HashMap<NodeKind, Vec<NodeId>>,
    pseudo_by_key: HashMap<(PseudoKind, String), NodeId>,
    insertion: Vec<NodeId>,
    root: Option<NodeId>,
}

impl NodeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, maintaining the kind index
    pub fn insert(&mut self, node: AstNode) {
        self.by_kind
            .entry(node.kind)
            .or_default()
            .push(node.id.clone());
        self.insertion.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Insert a pseudo node under its lookup key
    ///
    /// Keys are unique per subkind; inserting the same key twice is a no-op
    /// so synthesis stays idempotent.
    pub fn insert_pseudo(&mut self, kind: PseudoKind, key: String, node: AstNode) {
        if self.pseudo_by_key.contains_key(&(kind, key.clone())) {
            return;
        }
        self.pseudo_by_key.insert((kind, key), node.id.clone());
        self.insert(node);
    }

    /// Mark the root node
    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    /// Root node id
    pub fn root(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    /// Shared access by id
    pub fn get(&self, id: &NodeId) -> Option<&AstNode> {
        self.nodes.get(id)
    }

    /// Access by id, failing with a lookup error
    pub fn require(&self, id: &NodeId) -> ThunkResult<&AstNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| ThunkError::lookup_failed(format!("node {id} is not registered")))
    }

    /// True when the id is registered
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Ids of every node of exactly this kind, in registration order
    pub fn of_kind(&self, kind: NodeKind) -> &[NodeId] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pseudo node for a subkind + key, if synthesized
    pub fn pseudo(&self, kind: PseudoKind, key: &str) -> Option<&NodeId> {
        self.pseudo_by_key.get(&(kind, key.to_string()))
    }

    /// All pseudo entries, in arbitrary order
    pub fn pseudo_entries(&self) -> impl Iterator<Item = (&(PseudoKind, String), &NodeId)> {
        self.pseudo_by_key.iter()
    }

    /// Every registered id, in registration order
    pub fn ids(&self) -> &[NodeId] {
        &self.insertion
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing was registered
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Scope information stamped on nodes that instantiate runtime subtrees
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeInfo {
    /// Enclosing structural node ids, outermost first
    pub enclosing: Vec<NodeId>,
    /// The onLoad transitions relevant to this scope, in execution order
    pub on_load_chain: Vec<NodeId>,
}

/// Metadata keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaKey {
    /// Structural parent pointer
    Parent,
    /// This step is the one being evaluated
    IsCurrentStep,
    /// On the ancestor chain of the current step
    IsAncestorOfStep,
    /// Inside the current step's subtree
    IsDescendantOfStep,
    /// Scope info for runtime instantiation
    ScopeInfo,
}

/// Metadata values
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// A node pointer
    Node(NodeId),
    /// A boolean flag
    Flag(bool),
    /// Scope info payload
    Scope(ScopeInfo),
}

/// `(id, key) -> value` metadata store
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: HashMap<(NodeId, MetaKey), MetaValue>,
}

impl MetadataRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw write
    pub fn set(&mut self, id: NodeId, key: MetaKey, value: MetaValue) {
        self.entries.insert((id, key), value);
    }

    /// Raw read
    pub fn get(&self, id: &NodeId, key: MetaKey) -> Option<&MetaValue> {
        self.entries.get(&(id.clone(), key))
    }

    /// Stamp the structural parent of a node
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        self.set(child, MetaKey::Parent, MetaValue::Node(parent));
    }

    /// Structural parent, if stamped
    pub fn parent(&self, id: &NodeId) -> Option<&NodeId> {
        match self.get(id, MetaKey::Parent) {
            Some(MetaValue::Node(parent)) => Some(parent),
            _ => None,
        }
    }

    /// Walk the parent chain from `id` upward (excluding `id` itself)
    pub fn ancestors<'a>(&'a self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = id.clone();
        while let Some(parent) = self.parent(&cursor) {
            out.push(parent.clone());
            cursor = parent.clone();
        }
        out
    }

    /// True when `candidate` appears on the parent chain of `id`
    pub fn is_ancestor(&self, candidate: &NodeId, id: &NodeId) -> bool {
        let mut cursor = id.clone();
        while let Some(parent) = self.parent(&cursor) {
            if parent == candidate {
                return true;
            }
            cursor = parent.clone();
        }
        false
    }

    fn flag(&self, id: &NodeId, key: MetaKey) -> bool {
        matches!(self.get(id, key), Some(MetaValue::Flag(true)))
    }

    /// Mark `id` as the current step
    pub fn mark_current_step(&mut self, id: NodeId) {
        self.set(id, MetaKey::IsCurrentStep, MetaValue::Flag(true));
    }

    /// Is this the current step?
    pub fn is_current_step(&self, id: &NodeId) -> bool {
        self.flag(id, MetaKey::IsCurrentStep)
    }

    /// Mark an ancestor of the current step
    pub fn mark_ancestor_of_step(&mut self, id: NodeId) {
        self.set(id, MetaKey::IsAncestorOfStep, MetaValue::Flag(true));
    }

    /// Is this an ancestor of the current step?
    pub fn is_ancestor_of_step(&self, id: &NodeId) -> bool {
        self.flag(id, MetaKey::IsAncestorOfStep)
    }

    /// Mark a descendant of the current step
    pub fn mark_descendant_of_step(&mut self, id: NodeId) {
        self.set(id, MetaKey::IsDescendantOfStep, MetaValue::Flag(true));
    }

    /// Is this inside the current step's subtree?
    pub fn is_descendant_of_step(&self, id: &NodeId) -> bool {
        self.flag(id, MetaKey::IsDescendantOfStep)
    }

    /// Attach scope info
    pub fn set_scope_info(&mut self, id: NodeId, info: ScopeInfo) {
        self.set(id, MetaKey::ScopeInfo, MetaValue::Scope(info));
    }

    /// Scope info, if stamped
    pub fn scope_info(&self, id: &NodeId) -> Option<&ScopeInfo> {
        match self.get(id, MetaKey::ScopeInfo) {
            Some(MetaValue::Scope(info)) => Some(info),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, IdGenerator, IdSpace, StructureKind};
    use serde_json::json;

    fn node(ids: &mut IdGenerator, kind: NodeKind) -> AstNode {
        AstNode::new(ids.next(IdSpace::CompileAst), kind, json!({}))
    }

    #[test]
    fn test_kind_index_preserves_order() {
        let mut ids = IdGenerator::new();
        let mut registry = NodeRegistry::new();
        let a = node(&mut ids, NodeKind::Structure(StructureKind::Step));
        let b = node(&mut ids, NodeKind::Structure(StructureKind::Step));
        let a_id = a.id.clone();
        let b_id = b.id.clone();
        registry.insert(a);
        registry.insert(b);

        assert_eq!(
            registry.of_kind(NodeKind::Structure(StructureKind::Step)),
            &[a_id, b_id]
        );
        assert!(registry
            .of_kind(NodeKind::Structure(StructureKind::Journey))
            .is_empty());
    }

    #[test]
    fn test_pseudo_key_is_unique_per_subkind() {
        let mut ids = IdGenerator::new();
        let mut registry = NodeRegistry::new();

        let first = AstNode::new(
            ids.next(IdSpace::CompilePseudo),
            NodeKind::Pseudo(PseudoKind::Post),
            json!({}),
        );
        let first_id = first.id.clone();
        registry.insert_pseudo(PseudoKind::Post, "age".to_string(), first);

        let second = AstNode::new(
            ids.next(IdSpace::CompilePseudo),
            NodeKind::Pseudo(PseudoKind::Post),
            json!({}),
        );
        registry.insert_pseudo(PseudoKind::Post, "age".to_string(), second);

        assert_eq!(registry.pseudo(PseudoKind::Post, "age"), Some(&first_id));
        assert_eq!(registry.of_kind(NodeKind::Pseudo(PseudoKind::Post)).len(), 1);
        // Same key under a different subkind is a separate entry
        assert!(registry.pseudo(PseudoKind::Query, "age").is_none());
    }

    #[test]
    fn test_parent_chain() {
        let mut ids = IdGenerator::new();
        let mut meta = MetadataRegistry::new();
        let journey = ids.next(IdSpace::CompileAst);
        let step = ids.next(IdSpace::CompileAst);
        let block = ids.next(IdSpace::CompileAst);

        meta.set_parent(step.clone(), journey.clone());
        meta.set_parent(block.clone(), step.clone());

        assert_eq!(meta.ancestors(&block), vec![step.clone(), journey.clone()]);
        assert!(meta.is_ancestor(&journey, &block));
        assert!(!meta.is_ancestor(&block, &journey));
    }

    #[test]
    fn test_flags_default_false() {
        let mut ids = IdGenerator::new();
        let meta = MetadataRegistry::new();
        let id = ids.next(IdSpace::CompileAst);
        assert!(!meta.is_current_step(&id));
        assert!(!meta.is_ancestor_of_step(&id));
        assert!(!meta.is_descendant_of_step(&id));
    }
}
