//! Registration walk and pseudo-node synthesis
//!
//! One pass over the normalized AST produces the frozen compile-time state:
//!
//! 1. every node moves from the buffer into the [`NodeRegistry`] (parents
//!    before children, so registration order is a pre-order traversal),
//! 2. every non-root node gets its parent pointer stamped,
//! 3. exactly one step - resolved from the request path - is marked current,
//! 4. ancestor / descendant flags are propagated from that step,
//! 5. pseudo nodes are synthesized for request-side inputs (`post`, `query`,
//!    `params`, `data`) and answer sources (local / remote), at most one per
//!    key and subkind,
//! 6. collection nodes get [`ScopeInfo`] describing their enclosing
//!    structural chain and the onLoad transitions relevant to that scope.

use crate::ast::{
    AstBuffer, AstNode, ExpressionKind, IdGenerator, IdSpace, NodeId, NodeKind, PropertyValue,
    PseudoKind, StructureKind,
};
use crate::error::{CompileError, CompileResult};
use crate::registry::{MetadataRegistry, NodeRegistry, ScopeInfo};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::debug;

/// Output of the registration walk
#[derive(Debug)]
pub struct Registration {
    /// Frozen node store
    pub nodes: NodeRegistry,
    /// Stamped metadata
    pub meta: MetadataRegistry,
    /// The current step
    pub step_id: NodeId,
}

/// Run the registration walk for one request path.
pub fn register(
    mut buffer: AstBuffer,
    step_path: &str,
    ids: &mut IdGenerator,
) -> CompileResult<Registration> {
    let root = buffer.root().clone();
    let mut nodes = NodeRegistry::new();
    let mut meta = MetadataRegistry::new();

    // Pass 1: move nodes into the registry, stamping parents as we descend.
    let mut stack = vec![root.clone()];
    while let Some(id) = stack.pop() {
        let Some(node) = buffer.take(&id) else {
            continue;
        };
        let children = node.child_ids();
        for child in &children {
            meta.set_parent(child.clone(), id.clone());
        }
        nodes.insert(node);
        // Reverse keeps pre-order left-to-right under a LIFO stack.
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    nodes.set_root(root);

    // Pass 2: resolve and mark the current step.
    let step_id = nodes
        .of_kind(NodeKind::Structure(StructureKind::Step))
        .iter()
        .find(|id| {
            nodes
                .get(id)
                .and_then(|n| n.string("path"))
                .map(|p| p == step_path)
                .unwrap_or(false)
        })
        .cloned()
        .ok_or_else(|| CompileError::StepNotFound {
            path: step_path.to_string(),
        })?;
    meta.mark_current_step(step_id.clone());

    for ancestor in meta.ancestors(&step_id) {
        meta.mark_ancestor_of_step(ancestor);
    }
    mark_descendants(&nodes, &mut meta, &step_id);

    synthesize_pseudo_nodes(&mut nodes, &meta, &step_id, ids);
    stamp_scope_info(&mut nodes, &mut meta, &step_id);

    debug!(
        nodes = nodes.len(),
        step = %step_id,
        "registration complete"
    );
    Ok(Registration {
        nodes,
        meta,
        step_id,
    })
}

fn mark_descendants(nodes: &NodeRegistry, meta: &mut MetadataRegistry, step_id: &NodeId) {
    let mut stack: Vec<NodeId> = nodes
        .get(step_id)
        .map(|n| n.child_ids())
        .unwrap_or_default();
    while let Some(id) = stack.pop() {
        meta.mark_descendant_of_step(id.clone());
        if let Some(node) = nodes.get(&id) {
            stack.extend(node.child_ids());
        }
    }
}

/// Field codes of every field block inside the current step's subtree, with
/// the owning field node. Only literal codes participate; expression codes
/// resolve at runtime and cannot be keyed at compile time.
pub fn local_field_codes(nodes: &NodeRegistry, meta: &MetadataRegistry) -> Vec<(String, NodeId)> {
    nodes
        .of_kind(NodeKind::Structure(StructureKind::Field))
        .iter()
        .filter(|id| meta.is_descendant_of_step(id))
        .filter_map(|id| {
            nodes
                .get(id)
                .and_then(|n| n.string("code"))
                .map(|code| (code.to_string(), id.clone()))
        })
        .collect()
}

/// Namespace and base key of a reference node, when both are literal.
///
/// Dotted keys collapse to their base: `['data', 'case.manager']` consumes the
/// `case` pseudo node and navigates the rest at evaluation time.
pub fn reference_key(node: &AstNode) -> Option<(String, String)> {
    let segments = node.items("path");
    let namespace = segments.first()?.as_literal()?.as_str()?;
    let key = segments.get(1)?.as_literal()?.as_str()?;
    let base = key.split('.').next().unwrap_or(key);
    Some((namespace.to_string(), base.to_string()))
}

fn synthesize_pseudo_nodes(
    nodes: &mut NodeRegistry,
    meta: &MetadataRegistry,
    _step_id: &NodeId,
    ids: &mut IdGenerator,
) {
    let locals: Vec<(String, NodeId)> = local_field_codes(nodes, meta);
    let local_codes: BTreeSet<String> = locals.iter().map(|(code, _)| code.clone()).collect();

    // Answer sources for fields on the current step, plus the post key each
    // one is submitted under.
    let mut pending: Vec<(PseudoKind, String)> = Vec::new();
    for code in &local_codes {
        pending.push((PseudoKind::AnswerLocal, code.clone()));
        pending.push((PseudoKind::Post, code.clone()));
    }

    // Request-side inputs and remote answers, driven by what the definition
    // actually references.
    for id in nodes.of_kind(NodeKind::Expression(ExpressionKind::Reference)) {
        let Some((namespace, key)) = nodes.get(id).and_then(|n| reference_key(n)) else {
            continue;
        };
        let kind = match namespace.as_str() {
            "post" => PseudoKind::Post,
            "query" => PseudoKind::Query,
            "params" => PseudoKind::Params,
            "data" => PseudoKind::Data,
            "answers" => {
                if local_codes.contains(&key) {
                    continue; // already covered by the local pseudo
                }
                PseudoKind::AnswerRemote
            }
            _ => continue,
        };
        pending.push((kind, key));
    }

    for (kind, key) in pending {
        if nodes.pseudo(kind, &key).is_some() {
            continue;
        }
        let id = ids.next(IdSpace::CompilePseudo);
        let mut node = AstNode::new(id, NodeKind::Pseudo(kind), Value::Null);
        node.properties
            .insert("key".to_string(), PropertyValue::Literal(json!(key.clone())));
        nodes.insert_pseudo(kind, key, node);
    }
}

fn stamp_scope_info(nodes: &mut NodeRegistry, meta: &mut MetadataRegistry, step_id: &NodeId) {
    let collections: Vec<NodeId> = nodes
        .of_kind(NodeKind::Expression(ExpressionKind::Collection))
        .to_vec();
    for id in collections {
        let mut enclosing: Vec<NodeId> = meta
            .ancestors(&id)
            .into_iter()
            .filter(|a| {
                nodes
                    .get(a)
                    .map(|n| matches!(n.kind, NodeKind::Structure(_)))
                    .unwrap_or(false)
            })
            .collect();
        enclosing.reverse(); // outermost first

        let on_load_chain = transition_chain(nodes, meta, step_id, "onLoad");
        meta.set_scope_info(
            id,
            ScopeInfo {
                enclosing,
                on_load_chain,
            },
        );
    }
}

/// The ordered transition chain (`onLoad` or `onAccess`) along the current
/// step's ancestry: root journey first, then nested journeys, then the step.
pub fn transition_chain(
    nodes: &NodeRegistry,
    meta: &MetadataRegistry,
    step_id: &NodeId,
    key: &str,
) -> Vec<NodeId> {
    let mut path: Vec<NodeId> = meta.ancestors(step_id);
    path.reverse();
    path.push(step_id.clone());

    let mut chain = Vec::new();
    for id in path {
        if let Some(node) = nodes.get(&id) {
            if matches!(node.kind, NodeKind::Structure(_)) {
                chain.extend(node.node_items(key));
            }
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::transform;
    use serde_json::json;

    fn fixture() -> Value {
        json!({
            "code": "assessment",
            "path": "/assessment",
            "onLoad": [{"type": "transition.load", "effects": [
                {"type": "function.effect", "name": "loadCase"}
            ]}],
            "steps": [
                {
                    "path": "/assessment/name",
                    "blocks": [
                        {"variant": "text-input", "code": "firstName"},
                        {"variant": "text-input", "code": "lastName"}
                    ],
                    "onLoad": [{"type": "transition.load", "effects": [
                        {"type": "function.effect", "name": "loadNames"}
                    ]}]
                },
                {
                    "path": "/assessment/age",
                    "blocks": [
                        {"variant": "number-input", "code": "age"},
                        {
                            "variant": "hint",
                            "text": {"type": "reference", "path": ["answers", "firstName"]},
                            "section": {"type": "reference", "path": ["query", "section"]}
                        }
                    ]
                }
            ]
        })
    }

    fn registered(step: &str) -> Registration {
        let mut ids = IdGenerator::new();
        let buffer = transform(&fixture(), &mut ids).unwrap();
        register(buffer, step, &mut ids).unwrap()
    }

    #[test]
    fn test_every_non_root_node_has_a_parent() {
        let registration = registered("/assessment/name");
        let root = registration.nodes.root().unwrap();
        for id in registration.nodes.ids() {
            if id == root || id.space() == IdSpace::CompilePseudo {
                continue;
            }
            assert!(
                registration.meta.parent(id).is_some(),
                "node {id} has no parent"
            );
        }
    }

    #[test]
    fn test_unknown_step_path_fails() {
        let mut ids = IdGenerator::new();
        let buffer = transform(&fixture(), &mut ids).unwrap();
        let err = register(buffer, "/assessment/nope", &mut ids).unwrap_err();
        assert!(matches!(err, CompileError::StepNotFound { .. }));
    }

    #[test]
    fn test_step_flags() {
        let registration = registered("/assessment/name");
        let step = &registration.step_id;
        assert!(registration.meta.is_current_step(step));

        let journey = registration.nodes.root().unwrap();
        assert!(registration.meta.is_ancestor_of_step(journey));
        assert!(!registration.meta.is_descendant_of_step(journey));

        // Blocks of the current step are descendants
        let blocks = registration.nodes.get(step).unwrap().node_items("blocks");
        for block in &blocks {
            assert!(registration.meta.is_descendant_of_step(block));
        }
    }

    #[test]
    fn test_local_and_remote_answer_pseudo_nodes() {
        let registration = registered("/assessment/age");
        // "age" is on the current step -> local (and a post key)
        assert!(registration
            .nodes
            .pseudo(PseudoKind::AnswerLocal, "age")
            .is_some());
        assert!(registration.nodes.pseudo(PseudoKind::Post, "age").is_some());
        // "firstName" is referenced but lives on another step -> remote
        assert!(registration
            .nodes
            .pseudo(PseudoKind::AnswerRemote, "firstName")
            .is_some());
        assert!(registration
            .nodes
            .pseudo(PseudoKind::AnswerLocal, "firstName")
            .is_none());
        // referenced query key
        assert!(registration.nodes.pseudo(PseudoKind::Query, "section").is_some());
    }

    #[test]
    fn test_pseudo_synthesis_is_unique_per_key() {
        let registration = registered("/assessment/name");
        let locals = registration
            .nodes
            .of_kind(NodeKind::Pseudo(PseudoKind::AnswerLocal));
        let keys: Vec<&str> = locals
            .iter()
            .filter_map(|id| registration.nodes.get(id).and_then(|n| n.string("key")))
            .collect();
        let mut deduped = keys.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(keys.len(), deduped.len());
    }

    #[test]
    fn test_transition_chain_is_root_first() {
        let registration = registered("/assessment/name");
        let chain = transition_chain(
            &registration.nodes,
            &registration.meta,
            &registration.step_id,
            "onLoad",
        );
        assert_eq!(chain.len(), 2, "journey onLoad then step onLoad");
        // First entry belongs to the journey (parent of its transition is the root)
        let journey = registration.nodes.root().unwrap();
        assert_eq!(registration.meta.parent(&chain[0]), Some(journey));
        assert_eq!(
            registration.meta.parent(&chain[1]),
            Some(&registration.step_id)
        );
    }
}
