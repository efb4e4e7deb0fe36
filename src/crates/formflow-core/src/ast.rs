//! AST node model and identifiers
//!
//! Everything the compiler manipulates is an [`AstNode`]: an immutable record
//! of `{id, kind, properties, raw}` produced by the transformer, rewritten in
//! place by normalizers, then frozen at registration. Child relationships are
//! expressed through [`PropertyValue::Node`] references rather than owned
//! subtrees, so a node set is a flat arena ([`AstBuffer`] before registration,
//! `NodeRegistry` after) and every edge in the dependency graph can name both
//! ends by id.
//!
//! # Node identity
//!
//! A [`NodeId`] is `<space>:<seq>` where the space separates the three id
//! populations:
//!
//! | Space | Allocated by |
//! |---|---|
//! | `compile_ast` | the transformer and normalizers |
//! | `compile_pseudo` | pseudo-node synthesis during registration |
//! | `runtime_ast` | per-iteration collection instances during evaluation |
//!
//! Counters are monotonic within one [`IdGenerator`] and reset per
//! compilation; runtime spaces get a fresh generator per evaluation so ids
//! stay deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifier space a [`NodeId`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdSpace {
    /// Nodes created by the transformer or normalizers
    CompileAst,
    /// Pseudo nodes synthesized during registration
    CompilePseudo,
    /// Nodes instantiated per collection item during evaluation
    RuntimeAst,
}

impl IdSpace {
    /// Canonical wire form of the space
    pub fn as_str(&self) -> &'static str {
        match self {
            IdSpace::CompileAst => "compile_ast",
            IdSpace::CompilePseudo => "compile_pseudo",
            IdSpace::RuntimeAst => "runtime_ast",
        }
    }
}

/// Opaque, per-compilation-unique node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    space: IdSpace,
    seq: u64,
}

impl NodeId {
    /// Build an id from its parts
    pub fn new(space: IdSpace, seq: u64) -> Self {
        Self { space, seq }
    }

    /// Which id population this node belongs to
    pub fn space(&self) -> IdSpace {
        self.space
    }

    /// True for ids minted during evaluation
    pub fn is_runtime(&self) -> bool {
        self.space == IdSpace::RuntimeAst
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.space.as_str(), self.seq)
    }
}

/// Monotonic id allocator, one per compilation (or per evaluation for the
/// runtime space)
#[derive(Debug, Default)]
pub struct IdGenerator {
    counters: HashMap<IdSpace, u64>,
}

impl IdGenerator {
    /// Fresh generator with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id in `space`
    pub fn next(&mut self, space: IdSpace) -> NodeId {
        let counter = self.counters.entry(space).or_insert(0);
        let id = NodeId::new(space, *counter);
        *counter += 1;
        id
    }
}

/// Structural node subkinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    /// Top-level (or nested) container of steps
    Journey,
    /// One page
    Step,
    /// A basic UI block
    Block,
    /// A field block (owns `code`, `formatters`, `defaultValue`, `validate`)
    Field,
}

/// Iterator flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterateKind {
    /// Keep items whose predicate is truthy
    Filter,
    /// Transform each item
    Map,
    /// First item whose predicate is truthy
    Find,
}

/// Registered-function flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Boolean test, used by predicates
    Condition,
    /// Value-in, value-out
    Transformer,
    /// Produces a value from its arguments alone
    Generator,
    /// Side-effecting; receives a transition-typed context
    Effect,
}

/// Expression node subkinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    /// Path lookup into a namespace (`answers`, `post`, `data`, `@scope`, ...)
    Reference,
    /// `%N` template substitution
    Format,
    /// Left-to-right function fold
    Pipeline,
    /// Predicate-gated value choice
    Conditional,
    /// Filter / map / find over a source
    Iterate(IterateKind),
    /// Invocation of a registered function
    Function(FunctionKind),
    /// Conditional validation record
    Validation,
    /// Conditional navigation target
    Next,
    /// Conditional terminal error outcome
    ThrowError,
    /// Per-item runtime instantiation of a template subtree
    Collection,
}

/// Predicate node subkinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateKind {
    /// Subject tested by a registered condition
    Test,
    /// All operands truthy (errors fail closed)
    And,
    /// Any operand truthy (errors are skipped)
    Or,
    /// Odd number of truthy operands
    Xor,
    /// Inverted operand
    Not,
}

/// Transition node subkinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    /// Idempotent pre-evaluation step
    Load,
    /// Gatekeeper for GET
    Access,
    /// In-page action on POST
    Action,
    /// POST terminus
    Submit,
}

/// Pseudo node subkinds (request-side inputs and answer sources)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseudoKind {
    /// Raw form submission value
    Post,
    /// Query string value
    Query,
    /// Route parameter value
    Params,
    /// Server data populated by onLoad effects
    Data,
    /// Answer for a field under the current step
    AnswerLocal,
    /// Answer for a field elsewhere in the journey
    AnswerRemote,
}

/// Discriminated node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Journey / step / block
    Structure(StructureKind),
    /// Embedded expression
    Expression(ExpressionKind),
    /// Boolean combinator
    Predicate(PredicateKind),
    /// onLoad / onAccess / onAction / onSubmit state machine
    Transition(TransitionKind),
    /// Synthesized request-side or answer-source node
    Pseudo(PseudoKind),
}

impl NodeKind {
    /// Dotted label used in errors and visualization ("expression.reference")
    pub fn label(&self) -> String {
        match self {
            NodeKind::Structure(k) => format!("structure.{}", lower(format!("{k:?}"))),
            NodeKind::Expression(ExpressionKind::Iterate(k)) => {
                format!("iterator.{}", lower(format!("{k:?}")))
            }
            NodeKind::Expression(ExpressionKind::Function(k)) => {
                format!("function.{}", lower(format!("{k:?}")))
            }
            NodeKind::Expression(k) => format!("expression.{}", lower(format!("{k:?}"))),
            NodeKind::Predicate(k) => format!("predicate.{}", lower(format!("{k:?}"))),
            NodeKind::Transition(k) => format!("transition.{}", lower(format!("{k:?}"))),
            NodeKind::Pseudo(k) => format!("pseudo.{}", lower(format!("{k:?}"))),
        }
    }
}

fn lower(s: String) -> String {
    s.to_lowercase()
}

/// A property value: a literal, a child node reference, or an ordered list
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Plain JSON literal, passed through untouched
    Literal(Value),
    /// Reference to another node in the same arena
    Node(NodeId),
    /// Ordered list of values (array properties, reference paths, ...)
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// The node id, when this value is a node reference
    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            PropertyValue::Node(id) => Some(id),
            _ => None,
        }
    }

    /// The literal, when this value is one
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            PropertyValue::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// The list items, when this value is a list
    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Collect every node id reachable from this value, in order
    pub fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        match self {
            PropertyValue::Node(id) => out.push(id.clone()),
            PropertyValue::List(items) => {
                for item in items {
                    item.collect_nodes(out);
                }
            }
            PropertyValue::Literal(_) => {}
        }
    }
}

/// One AST node
///
/// Properties use a `BTreeMap` so iteration order (and therefore everything
/// derived from it: registration order, wiring order, ids of cloned subtrees)
/// is deterministic.
#[derive(Debug, Clone)]
pub struct AstNode {
    /// Unique id
    pub id: NodeId,
    /// Discriminated kind
    pub kind: NodeKind,
    /// Keyed properties
    pub properties: BTreeMap<String, PropertyValue>,
    /// The raw JSON fragment this node was built from
    pub raw: Value,
}

impl AstNode {
    /// Build a node with no properties yet
    pub fn new(id: NodeId, kind: NodeKind, raw: Value) -> Self {
        Self {
            id,
            kind,
            properties: BTreeMap::new(),
            raw,
        }
    }

    /// Raw property access
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Child node id stored under `key`
    pub fn node(&self, key: &str) -> Option<&NodeId> {
        self.property(key).and_then(PropertyValue::as_node)
    }

    /// Literal stored under `key`
    pub fn literal(&self, key: &str) -> Option<&Value> {
        self.property(key).and_then(PropertyValue::as_literal)
    }

    /// Literal string stored under `key`
    pub fn string(&self, key: &str) -> Option<&str> {
        self.literal(key).and_then(Value::as_str)
    }

    /// Literal boolean stored under `key`
    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.literal(key).and_then(Value::as_bool)
    }

    /// List stored under `key`
    pub fn items(&self, key: &str) -> &[PropertyValue] {
        self.property(key)
            .and_then(PropertyValue::as_list)
            .unwrap_or(&[])
    }

    /// Node ids inside the list stored under `key`, in order
    pub fn node_items(&self, key: &str) -> Vec<NodeId> {
        self.items(key)
            .iter()
            .filter_map(|v| v.as_node().cloned())
            .collect()
    }

    /// Every child node id referenced from any property, in deterministic
    /// order (property key order, then list order)
    pub fn child_ids(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        for value in self.properties.values() {
            value.collect_nodes(&mut out);
        }
        out
    }
}

/// Mutable node arena between transform and registration
///
/// The transformer fills it, normalizers rewrite it, registration drains it
/// into the frozen `NodeRegistry`.
#[derive(Debug)]
pub struct AstBuffer {
    nodes: HashMap<NodeId, AstNode>,
    root: NodeId,
}

impl AstBuffer {
    /// Buffer rooted at `root` (the root node must be inserted before use)
    pub fn new(root: NodeId) -> Self {
        Self {
            nodes: HashMap::new(),
            root,
        }
    }

    /// Root node id
    pub fn root(&self) -> &NodeId {
        &self.root
    }

    /// Insert or replace a node
    pub fn insert(&mut self, node: AstNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Shared access by id
    pub fn get(&self, id: &NodeId) -> Option<&AstNode> {
        self.nodes.get(id)
    }

    /// Mutable access by id
    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut AstNode> {
        self.nodes.get_mut(id)
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no nodes were inserted
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove a node, returning it
    pub fn take(&mut self, id: &NodeId) -> Option<AstNode> {
        self.nodes.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_display_form() {
        assert_eq!(NodeId::new(IdSpace::CompileAst, 3).to_string(), "compile_ast:3");
        assert_eq!(
            NodeId::new(IdSpace::RuntimeAst, 0).to_string(),
            "runtime_ast:0"
        );
    }

    #[test]
    fn test_generator_is_monotonic_per_space() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next(IdSpace::CompileAst).to_string(), "compile_ast:0");
        assert_eq!(ids.next(IdSpace::CompileAst).to_string(), "compile_ast:1");
        // Separate counter per space
        assert_eq!(
            ids.next(IdSpace::CompilePseudo).to_string(),
            "compile_pseudo:0"
        );
        assert_eq!(ids.next(IdSpace::CompileAst).to_string(), "compile_ast:2");
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(
            NodeKind::Expression(ExpressionKind::Reference).label(),
            "expression.reference"
        );
        assert_eq!(
            NodeKind::Expression(ExpressionKind::Iterate(IterateKind::Map)).label(),
            "iterator.map"
        );
        assert_eq!(
            NodeKind::Expression(ExpressionKind::Function(FunctionKind::Effect)).label(),
            "function.effect"
        );
        assert_eq!(NodeKind::Predicate(PredicateKind::And).label(), "predicate.and");
    }

    #[test]
    fn test_child_ids_are_in_property_then_list_order() {
        let mut ids = IdGenerator::new();
        let a = ids.next(IdSpace::CompileAst);
        let b = ids.next(IdSpace::CompileAst);
        let c = ids.next(IdSpace::CompileAst);
        let host = ids.next(IdSpace::CompileAst);

        let mut node = AstNode::new(
            host,
            NodeKind::Expression(ExpressionKind::Format),
            json!({}),
        );
        node.properties.insert(
            "arguments".to_string(),
            PropertyValue::List(vec![
                PropertyValue::Node(b.clone()),
                PropertyValue::Literal(json!("x")),
                PropertyValue::Node(c.clone()),
            ]),
        );
        node.properties
            .insert("another".to_string(), PropertyValue::Node(a.clone()));

        // BTreeMap: "another" < "arguments"
        assert_eq!(node.child_ids(), vec![a, b, c]);
    }

    #[test]
    fn test_property_accessors() {
        let mut ids = IdGenerator::new();
        let id = ids.next(IdSpace::CompileAst);
        let mut node = AstNode::new(
            id,
            NodeKind::Structure(StructureKind::Field),
            json!({"code": "firstName"}),
        );
        node.properties.insert(
            "code".to_string(),
            PropertyValue::Literal(json!("firstName")),
        );
        node.properties
            .insert("validate".to_string(), PropertyValue::List(vec![]));

        assert_eq!(node.string("code"), Some("firstName"));
        assert_eq!(node.boolean("code"), None);
        assert!(node.items("validate").is_empty());
        assert!(node.items("missing").is_empty());
    }
}
