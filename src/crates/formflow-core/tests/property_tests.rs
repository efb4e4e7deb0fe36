//! Property tests for the compile-time passes

use formflow_core::normalize::{Normalizer, ResolveSelfReferences};
use formflow_core::{transform, IdGenerator};
use proptest::prelude::*;
use serde_json::json;

fn journey_with_self_reference(code: &str, trailing: Option<&str>) -> serde_json::Value {
    let mut path = vec![json!("answers"), json!("@self")];
    if let Some(segment) = trailing {
        path.push(json!(segment));
    }
    json!({
        "code": "j",
        "path": "/j",
        "steps": [{
            "path": "/j/s",
            "blocks": [{
                "variant": "text-input",
                "code": code,
                "value": {"type": "reference", "path": path}
            }]
        }]
    })
}

proptest! {
    #[test]
    fn normalization_is_idempotent(
        code in "[a-z][a-zA-Z0-9]{0,12}",
        trailing in proptest::option::of("[a-z]{1,8}"),
    ) {
        let definition = journey_with_self_reference(&code, trailing.as_deref());
        let mut ids = IdGenerator::new();
        let mut buffer = transform(&definition, &mut ids).unwrap();

        ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap();
        let size_once = buffer.len();
        let raw_once: Vec<String> = buffer_paths(&buffer);

        ResolveSelfReferences.apply(&mut buffer, &mut ids).unwrap();
        prop_assert_eq!(buffer.len(), size_once);
        prop_assert_eq!(buffer_paths(&buffer), raw_once);
    }

    #[test]
    fn transformation_is_deterministic(
        code in "[a-z][a-zA-Z0-9]{0,12}",
        label in "[ -~]{0,24}",
    ) {
        let definition = json!({
            "code": "j",
            "path": "/j",
            "steps": [{
                "path": "/j/s",
                "blocks": [{"variant": "text-input", "code": code, "label": label}]
            }]
        });

        let mut first_ids = IdGenerator::new();
        let first = transform(&definition, &mut first_ids).unwrap();
        let mut second_ids = IdGenerator::new();
        let second = transform(&definition, &mut second_ids).unwrap();

        // Same ids, same node count, same root
        prop_assert_eq!(first.len(), second.len());
        prop_assert_eq!(first.root(), second.root());
    }
}

/// Stable textual fingerprint of every reference path in the buffer
fn buffer_paths(buffer: &formflow_core::AstBuffer) -> Vec<String> {
    use formflow_core::{ExpressionKind, NodeKind, PropertyValue};

    let mut out = Vec::new();
    let mut stack = vec![buffer.root().clone()];
    while let Some(id) = stack.pop() {
        let Some(node) = buffer.get(&id) else { continue };
        if node.kind == NodeKind::Expression(ExpressionKind::Reference) {
            let rendered: Vec<String> = node
                .items("path")
                .iter()
                .map(|segment| match segment {
                    PropertyValue::Literal(v) => v.to_string(),
                    PropertyValue::Node(id) => format!("<{id}>"),
                    PropertyValue::List(_) => "<list>".to_string(),
                })
                .collect();
            out.push(rendered.join("/"));
        }
        stack.extend(node.child_ids());
    }
    out.sort();
    out
}
