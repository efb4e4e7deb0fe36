//! Transition wiring: onLoad / onAccess chains, onAction, onSubmit
//!
//! Three edge families order the transition machinery:
//!
//! - **Same-depth chains**: consecutive entries of one `onLoad` (or
//!   `onAccess`) array run in order - EFFECT_FLOW.
//! - **Cross-depth chains**: the last transition at one depth of the current
//!   step's ancestry precedes the first at the next depth - EFFECT_FLOW with
//!   `crossDepth: true`.
//! - **Internal chains**: a transition's own effect list runs in order -
//!   CONTROL_FLOW between effects, DATA_FLOW from the last effect (and from
//!   `when` / `guards`) into the transition node itself.
//!
//! onAction transitions never chain across one another: the controller
//! evaluates them in order and stops at the first executed one. onSubmit
//! additionally gates on every validation of its parent step when
//! `validate: true`, and attaches branch effects and next entries with branch
//! and index metadata.

use super::{Wirer, WiringContext};
use crate::ast::{ExpressionKind, NodeId, NodeKind, TransitionKind};
use crate::error::CompileResult;
use crate::graph::EdgeKind;
use serde_json::{json, Value};

/// Wires onLoad / onAccess ordering and every transition's internal chain.
pub struct TransitionChainWirer;

impl TransitionChainWirer {
    fn wire_same_depth(&self, cx: &mut WiringContext<'_>, key: &str) {
        let structures: Vec<NodeId> = cx
            .nodes
            .ids()
            .iter()
            .filter(|id| {
                cx.nodes
                    .get(id)
                    .map(|n| matches!(n.kind, NodeKind::Structure(_)))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for id in structures {
            let Some(node) = cx.nodes.get(&id) else {
                continue;
            };
            let transitions = node.node_items(key);
            for pair in transitions.windows(2) {
                cx.add_edge(
                    pair[0].clone(),
                    pair[1].clone(),
                    EdgeKind::EffectFlow,
                    Value::Null,
                );
            }
        }
    }

    fn wire_cross_depth(&self, cx: &mut WiringContext<'_>, key: &str) {
        let Some(step) = cx.current_step().cloned() else {
            return;
        };
        let mut path: Vec<NodeId> = cx.meta.ancestors(&step);
        path.reverse();
        path.push(step);

        // Non-empty transition lists along the ancestry, outermost first.
        let lists: Vec<Vec<NodeId>> = path
            .iter()
            .filter_map(|id| cx.nodes.get(id).map(|n| n.node_items(key)))
            .filter(|list| !list.is_empty())
            .collect();

        for pair in lists.windows(2) {
            let from = pair[0].last().expect("list is non-empty").clone();
            let to = pair[1].first().expect("list is non-empty").clone();
            cx.add_edge(from, to, EdgeKind::EffectFlow, json!({"crossDepth": true}));
        }
    }

    fn wire_internal(&self, cx: &mut WiringContext<'_>, kind: TransitionKind) {
        for id in cx.of_kind(NodeKind::Transition(kind)) {
            let Some(node) = cx.nodes.get(&id) else {
                continue;
            };
            let effects = node.node_items("effects");
            let when = node.node("when").cloned();

            for pair in effects.windows(2) {
                cx.add_edge(
                    pair[0].clone(),
                    pair[1].clone(),
                    EdgeKind::ControlFlow,
                    Value::Null,
                );
            }
            if let Some(last) = effects.last() {
                cx.add_edge(last.clone(), id.clone(), EdgeKind::DataFlow, Value::Null);
            }
            if let Some(when) = when {
                cx.add_edge(when, id.clone(), EdgeKind::DataFlow, Value::Null);
            }
        }
    }
}

impl Wirer for TransitionChainWirer {
    fn name(&self) -> &'static str {
        "transition-chains"
    }

    fn wire(&self, cx: &mut WiringContext<'_>) -> CompileResult<()> {
        for key in ["onLoad", "onAccess"] {
            self.wire_same_depth(cx, key);
            self.wire_cross_depth(cx, key);
        }
        self.wire_internal(cx, TransitionKind::Load);
        self.wire_internal(cx, TransitionKind::Access);
        Ok(())
    }
}

/// Wires onAction transitions: `when` and indexed effects, no cross-chain.
pub struct ActionWirer;

impl Wirer for ActionWirer {
    fn name(&self) -> &'static str {
        "actions"
    }

    fn wire(&self, cx: &mut WiringContext<'_>) -> CompileResult<()> {
        for id in cx.of_kind(NodeKind::Transition(TransitionKind::Action)) {
            let Some(node) = cx.nodes.get(&id) else {
                continue;
            };
            if let Some(when) = node.node("when").cloned() {
                cx.add_edge(when, id.clone(), EdgeKind::DataFlow, Value::Null);
            }
            let effects = node.node_items("effects");
            for (index, effect) in effects.iter().enumerate() {
                cx.add_edge(
                    effect.clone(),
                    id.clone(),
                    EdgeKind::DataFlow,
                    json!({"index": index}),
                );
            }
            for pair in effects.windows(2) {
                cx.add_edge(
                    pair[0].clone(),
                    pair[1].clone(),
                    EdgeKind::ControlFlow,
                    Value::Null,
                );
            }
        }
        Ok(())
    }
}

/// Wires onSubmit transitions: gates, validation gating, branch payloads.
pub struct SubmitWirer;

const BRANCHES: &[&str] = &["onAlways", "onValid", "onInvalid"];

impl Wirer for SubmitWirer {
    fn name(&self) -> &'static str {
        "submissions"
    }

    fn wire(&self, cx: &mut WiringContext<'_>) -> CompileResult<()> {
        let validations = cx.of_kind(NodeKind::Expression(ExpressionKind::Validation));

        for id in cx.of_kind(NodeKind::Transition(TransitionKind::Submit)) {
            let Some(node) = cx.nodes.get(&id) else {
                continue;
            };
            if let Some(when) = node.node("when").cloned() {
                cx.add_edge(when, id.clone(), EdgeKind::DataFlow, Value::Null);
            }
            for guard in node.node_items("guards") {
                cx.add_edge(guard, id.clone(), EdgeKind::DataFlow, json!({"guard": true}));
            }

            // Validations of the owning step must complete before submission.
            if node.boolean("validate").unwrap_or(false) {
                if let Some(step) = cx.enclosing_step(&id) {
                    for validation in &validations {
                        let owned = cx
                            .enclosing_step(validation)
                            .map(|s| s == step)
                            .unwrap_or(false);
                        if owned {
                            cx.add_edge(
                                validation.clone(),
                                id.clone(),
                                EdgeKind::DataFlow,
                                json!({"reason": "validation gate"}),
                            );
                        }
                    }
                }
            }

            for branch in BRANCHES {
                let Some(node) = cx.nodes.get(&id) else {
                    continue;
                };
                let effects = node.node_items(&format!("{branch}Effects"));
                let next = node.node_items(&format!("{branch}Next"));

                for (index, effect) in effects.iter().enumerate() {
                    cx.add_edge(
                        effect.clone(),
                        id.clone(),
                        EdgeKind::DataFlow,
                        json!({"branch": branch, "index": index}),
                    );
                }
                for pair in effects.windows(2) {
                    cx.add_edge(
                        pair[0].clone(),
                        pair[1].clone(),
                        EdgeKind::ControlFlow,
                        Value::Null,
                    );
                }
                for (index, entry) in next.iter().enumerate() {
                    cx.add_edge(
                        entry.clone(),
                        id.clone(),
                        EdgeKind::DataFlow,
                        json!({"branch": branch, "next": index}),
                    );
                }
            }
        }
        Ok(())
    }
}
