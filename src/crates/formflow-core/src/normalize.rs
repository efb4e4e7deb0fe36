//! AST rewrites between transformation and registration
//!
//! Normalizers run while a node arena is still mutable. Each one is a
//! structural traversal that may rewrite nodes in place; all of them must be
//! idempotent so a normalized tree passes through unchanged. They run over
//! every tree the engine builds: the compile-time buffer inside the form
//! compiler, and each runtime collection-template subtree before it is
//! registered into the evaluation overlay.
//!
//! The one mandatory normalizer is [`ResolveSelfReferences`]: every reference
//! whose path begins `['answers', '@self']` has the `@self` segment replaced
//! by the `code` of the nearest enclosing field block. Literal codes are
//! copied; expression codes are deep-cloned with fresh ids so the same subtree
//! is never aliased at two AST positions.

use crate::ast::{
    AstBuffer, AstNode, IdGenerator, NodeId, NodeKind, PropertyValue, StructureKind,
};
use crate::error::{CompileError, CompileResult};
use serde_json::Value;
use tracing::debug;

/// A compile-time AST rewrite pass
pub trait Normalizer: Send + Sync {
    /// Pass name, for diagnostics
    fn name(&self) -> &'static str;

    /// Rewrite the buffer in place
    fn apply(&self, buffer: &mut AstBuffer, ids: &mut IdGenerator) -> CompileResult<()>;
}

/// Replaces `@self` reference segments with the enclosing field's code
#[derive(Debug, Default)]
pub struct ResolveSelfReferences;

/// One `@self` occurrence and the ancestry that led to it
struct SelfSite {
    reference: NodeId,
    /// (ancestor node, property key we descended through), outermost first
    ancestry: Vec<(NodeId, String)>,
}

impl Normalizer for ResolveSelfReferences {
    fn name(&self) -> &'static str {
        "resolve-self-references"
    }

    fn apply(&self, buffer: &mut AstBuffer, ids: &mut IdGenerator) -> CompileResult<()> {
        let mut sites = Vec::new();
        collect_sites(buffer, buffer.root().clone(), &mut Vec::new(), &mut sites);
        debug!(count = sites.len(), "resolving @self references");

        for site in sites {
            resolve_site(buffer, ids, site)?;
        }
        Ok(())
    }
}

fn collect_sites(
    buffer: &AstBuffer,
    id: NodeId,
    ancestry: &mut Vec<(NodeId, String)>,
    out: &mut Vec<SelfSite>,
) {
    let Some(node) = buffer.get(&id) else {
        return;
    };

    if is_self_reference(node) {
        out.push(SelfSite {
            reference: id.clone(),
            ancestry: ancestry.clone(),
        });
    }

    // Snapshot child links so the borrow on `buffer` ends before recursion.
    let children: Vec<(String, NodeId)> = node
        .properties
        .iter()
        .flat_map(|(key, value)| {
            let mut ids = Vec::new();
            value.collect_nodes(&mut ids);
            ids.into_iter().map(move |child| (key.clone(), child))
        })
        .collect();

    for (key, child) in children {
        ancestry.push((id.clone(), key));
        collect_sites(buffer, child, ancestry, out);
        ancestry.pop();
    }
}

fn is_self_reference(node: &AstNode) -> bool {
    if node.kind != NodeKind::Expression(crate::ast::ExpressionKind::Reference) {
        return false;
    }
    let segments = node.items("path");
    matches!(
        (segments.first(), segments.get(1)),
        (
            Some(PropertyValue::Literal(Value::String(ns))),
            Some(PropertyValue::Literal(Value::String(seg))),
        ) if ns == "answers" && seg == "@self"
    )
}

fn resolve_site(
    buffer: &mut AstBuffer,
    ids: &mut IdGenerator,
    site: SelfSite,
) -> CompileResult<()> {
    // Nearest enclosing field block, innermost first.
    let field = site
        .ancestry
        .iter()
        .rev()
        .find(|(id, _)| {
            buffer
                .get(id)
                .map(|n| n.kind == NodeKind::Structure(StructureKind::Field))
                .unwrap_or(false)
        })
        .cloned();

    let Some((field_id, _)) = field else {
        return Err(CompileError::SelfOutsideField {
            node: site.reference,
        });
    };

    // Recursion guard: a reference inside the field's own code property would
    // resolve to itself forever.
    let inside_code = site
        .ancestry
        .iter()
        .any(|(id, key)| *id == field_id && key == "code");
    if inside_code {
        return Err(CompileError::SelfInsideCode {
            node: site.reference,
        });
    }

    let code = buffer
        .get(&field_id)
        .and_then(|f| f.property("code").cloned())
        .ok_or(CompileError::MissingFieldCode {
            node: site.reference.clone(),
        })?;

    let replacement = match code {
        PropertyValue::Literal(value) => PropertyValue::Literal(value),
        // Expression codes are cloned with fresh ids so the subtree is not
        // aliased at two positions.
        PropertyValue::Node(code_root) => {
            let clone_root = clone_subtree(buffer, ids, &code_root)?;
            PropertyValue::Node(clone_root)
        }
        PropertyValue::List(_) => {
            return Err(CompileError::MissingFieldCode {
                node: site.reference,
            })
        }
    };

    let node = buffer
        .get_mut(&site.reference)
        .expect("collected site is present");
    if let Some(PropertyValue::List(segments)) = node.properties.get_mut("path") {
        segments[1] = replacement;
    }
    Ok(())
}

/// Deep-clone the subtree rooted at `root`, allocating fresh ids in the
/// source node's own id space (compile-time clones stay `compile_ast`,
/// clones inside runtime templates stay `runtime_ast`).
pub fn clone_subtree(
    buffer: &mut AstBuffer,
    ids: &mut IdGenerator,
    root: &NodeId,
) -> CompileResult<NodeId> {
    let node = buffer
        .get(root)
        .cloned()
        .ok_or_else(|| CompileError::InvalidDefinition {
            path: root.to_string(),
            message: "dangling node reference during clone".to_string(),
        })?;

    let new_id = ids.next(node.id.space());
    let mut clone = AstNode::new(new_id.clone(), node.kind, node.raw.clone());
    for (key, value) in &node.properties {
        clone
            .properties
            .insert(key.clone(), clone_value(buffer, ids, value)?);
    }
    buffer.insert(clone);
    Ok(new_id)
}

fn clone_value(
    buffer: &mut AstBuffer,
    ids: &mut IdGenerator,
    value: &PropertyValue,
) -> CompileResult<PropertyValue> {
    Ok(match value {
        PropertyValue::Literal(v) => PropertyValue::Literal(v.clone()),
        PropertyValue::Node(id) => PropertyValue::Node(clone_subtree(buffer, ids, id)?),
        PropertyValue::List(items) => PropertyValue::List(
            items
                .iter()
                .map(|item| clone_value(buffer, ids, item))
                .collect::<CompileResult<Vec<_>>>()?,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::transform;
    use serde_json::json;

    fn journey_with_field_value(code: Value, value: Value) -> Value {
        json!({
            "code": "j",
            "path": "/j",
            "steps": [{
                "path": "/j/s",
                "blocks": [{
                    "variant": "text-input",
                    "code": code,
                    "value": value
                }]
            }]
        })
    }

    fn find_reference(buffer: &AstBuffer) -> &AstNode {
        let root = buffer.get(buffer.root()).unwrap();
        let step = buffer.get(&root.node_items("steps")[0]).unwrap();
        let block = buffer.get(&step.node_items("blocks")[0]).unwrap();
        buffer.get(block.node("value").unwrap()).unwrap()
    }

    #[test]
    fn test_self_resolves_to_literal_code() {
        let definition = journey_with_field_value(
            json!("firstName"),
            json!({"type": "reference", "path": ["answers", "@self"]}),
        );
        let mut ids = IdGenerator::new();
        let mut buffer = transform(&definition, &mut ids).unwrap();
        ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap();

        let reference = find_reference(&buffer);
        let segments = reference.items("path");
        assert_eq!(
            segments[1],
            PropertyValue::Literal(json!("firstName")),
            "path should now be ['answers', 'firstName']"
        );
    }

    #[test]
    fn test_trailing_segments_survive() {
        let definition = journey_with_field_value(
            json!("address"),
            json!({"type": "reference", "path": ["answers", "@self", "city"]}),
        );
        let mut ids = IdGenerator::new();
        let mut buffer = transform(&definition, &mut ids).unwrap();
        ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap();

        let reference = find_reference(&buffer);
        let segments = reference.items("path");
        assert_eq!(segments[1], PropertyValue::Literal(json!("address")));
        assert_eq!(segments[2], PropertyValue::Literal(json!("city")));
    }

    #[test]
    fn test_expression_code_is_cloned_not_aliased() {
        let definition = journey_with_field_value(
            json!({"type": "reference", "path": ["params", "fieldCode"]}),
            json!({"type": "reference", "path": ["answers", "@self"]}),
        );
        let mut ids = IdGenerator::new();
        let mut buffer = transform(&definition, &mut ids).unwrap();
        let before = buffer.len();
        ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap();

        // One cloned node was added
        assert_eq!(buffer.len(), before + 1);

        let reference = find_reference(&buffer);
        let segments = reference.items("path");
        let cloned = segments[1].as_node().unwrap();

        // The clone must differ from the field's own code node
        let root = buffer.get(buffer.root()).unwrap();
        let step = buffer.get(&root.node_items("steps")[0]).unwrap();
        let block = buffer.get(&step.node_items("blocks")[0]).unwrap();
        let original_code = block.node("code").unwrap();
        assert_ne!(cloned, original_code);

        // But carry the same shape
        let clone_node = buffer.get(cloned).unwrap();
        let original = buffer.get(original_code).unwrap();
        assert_eq!(clone_node.kind, original.kind);
        assert_eq!(clone_node.items("path").len(), original.items("path").len());
    }

    #[test]
    fn test_self_outside_field_fails() {
        let definition = json!({
            "code": "j",
            "path": "/j",
            "steps": [{
                "path": "/j/s",
                "blocks": [{
                    "variant": "heading",
                    "text": {"type": "reference", "path": ["answers", "@self"]}
                }]
            }]
        });
        let mut ids = IdGenerator::new();
        let mut buffer = transform(&definition, &mut ids).unwrap();
        let err = ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap_err();
        assert!(matches!(err, CompileError::SelfOutsideField { .. }));
    }

    #[test]
    fn test_self_inside_code_fails() {
        let definition = journey_with_field_value(
            json!({"type": "reference", "path": ["answers", "@self"]}),
            json!("plain"),
        );
        let mut ids = IdGenerator::new();
        let mut buffer = transform(&definition, &mut ids).unwrap();
        let err = ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap_err();
        assert!(matches!(err, CompileError::SelfInsideCode { .. }));
    }

    #[test]
    fn test_runtime_template_self_resolves_in_runtime_space() {
        use crate::ast::IdSpace;
        use crate::transform::transform_runtime_template;

        let template = json!({
            "variant": "member-row",
            "code": {"type": "reference", "path": ["params", "memberField"]},
            "value": {"type": "reference", "path": ["answers", "@self"]}
        });
        let mut ids = IdGenerator::new();
        let mut buffer = transform_runtime_template(&template, &mut ids).unwrap();
        ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap();

        let field = buffer.get(buffer.root()).unwrap();
        let reference = buffer.get(field.node("value").unwrap()).unwrap();
        let cloned = reference.items("path")[1].as_node().unwrap();

        // The cloned code subtree must stay in the runtime id space, never
        // colliding with compile-time ids.
        assert_eq!(cloned.space(), IdSpace::RuntimeAst);
        assert_ne!(cloned, field.node("code").unwrap());
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let definition = journey_with_field_value(
            json!("firstName"),
            json!({"type": "reference", "path": ["answers", "@self"]}),
        );
        let mut ids = IdGenerator::new();
        let mut buffer = transform(&definition, &mut ids).unwrap();
        ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap();

        let after_first: Vec<_> = {
            let r = find_reference(&buffer);
            r.items("path").to_vec()
        };
        let len_first = buffer.len();

        ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap();
        assert_eq!(buffer.len(), len_first);
        assert_eq!(find_reference(&buffer).items("path"), &after_first[..]);
    }
}
