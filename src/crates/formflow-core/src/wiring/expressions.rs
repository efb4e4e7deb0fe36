//! Expression argument edges
//!
//! Every expression, predicate, and structure node depends on the child
//! expressions it will evaluate, so the scheduler (and the async-inference
//! pass) sees arguments before their consumers. Transition nodes are excluded
//! here - their internal ordering is owned by the transition wirers - and so
//! are the purely structural child lists (`steps`, `children`) plus the
//! transition and validation lists hanging off structures, which attach
//! through their own wirers.

use super::{Wirer, WiringContext};
use crate::ast::{NodeId, NodeKind};
use crate::error::CompileResult;
use crate::graph::EdgeKind;
use serde_json::Value;

/// Structure properties whose children are not evaluation inputs of the
/// structure node itself.
const STRUCTURE_EXCLUDED: &[&str] = &[
    "steps",
    "children",
    "onLoad",
    "onAccess",
    "onAction",
    "onSubmission",
    "validate",
];

/// Wires `argument -> consumer` DATA_FLOW edges.
pub struct ExpressionWirer;

impl Wirer for ExpressionWirer {
    fn name(&self) -> &'static str {
        "expressions"
    }

    fn wire(&self, cx: &mut WiringContext<'_>) -> CompileResult<()> {
        for id in cx.nodes.ids().to_vec() {
            let Some(node) = cx.nodes.get(&id) else {
                continue;
            };
            let arguments: Vec<NodeId> = match node.kind {
                NodeKind::Transition(_) | NodeKind::Pseudo(_) => continue,
                NodeKind::Structure(_) => {
                    let mut out = Vec::new();
                    for (key, value) in &node.properties {
                        if STRUCTURE_EXCLUDED.contains(&key.as_str()) {
                            continue;
                        }
                        value.collect_nodes(&mut out);
                    }
                    out
                }
                NodeKind::Expression(_) | NodeKind::Predicate(_) => node.child_ids(),
            };

            for argument in arguments {
                cx.add_edge(argument, id.clone(), EdgeKind::DataFlow, Value::Null);
            }
        }
        Ok(())
    }
}
