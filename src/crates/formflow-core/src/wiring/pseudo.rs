//! Pseudo-node producer and consumer edges
//!
//! Consumers: every reference node whose literal namespace + base key match a
//! synthesized pseudo node depends on it. References into `answers` bind to
//! the local pseudo when the field lives under the current step, otherwise to
//! the remote one.
//!
//! Producers, per subkind:
//!
//! - POST / QUERY / PARAMS - none; they are sourced from the request snapshot
//! - DATA - every onLoad transition on the current chain might populate the
//!   key, except a transition that itself consumes it (that edge would close
//!   a cycle through the transition's own effect chain)
//! - ANSWER_LOCAL - the field's post value, its formatters, its default value
//!   and the nearest onLoad transition
//! - ANSWER_REMOTE - the last onLoad transition on the chain

use super::{Wirer, WiringContext};
use crate::ast::{NodeId, PropertyValue, PseudoKind};
use crate::error::CompileResult;
use crate::graph::EdgeKind;
use crate::register::{local_field_codes, reference_key};
use serde_json::{json, Value};

/// Wires pseudo nodes into the data-flow graph.
pub struct PseudoWirer;

impl PseudoWirer {
    fn consumers(&self, cx: &mut WiringContext<'_>) -> Vec<(PseudoKind, String, NodeId, Vec<NodeId>)> {
        let mut wired = Vec::new();
        let entries: Vec<((PseudoKind, String), NodeId)> = cx
            .nodes
            .pseudo_entries()
            .map(|(k, id)| (k.clone(), id.clone()))
            .collect();

        for ((kind, key), pseudo_id) in entries {
            let namespace = match kind {
                PseudoKind::Post => "post",
                PseudoKind::Query => "query",
                PseudoKind::Params => "params",
                PseudoKind::Data => "data",
                PseudoKind::AnswerLocal | PseudoKind::AnswerRemote => "answers",
            };

            let mut consumers = Vec::new();
            for reference in cx.find_reference_nodes(namespace) {
                let Some((_, ref_key)) = cx.nodes.get(&reference).and_then(reference_key) else {
                    continue;
                };
                if ref_key != key {
                    continue;
                }
                // Answers: the local pseudo wins when both could match.
                if kind == PseudoKind::AnswerRemote
                    && cx.nodes.pseudo(PseudoKind::AnswerLocal, &key).is_some()
                {
                    continue;
                }
                cx.add_edge(
                    pseudo_id.clone(),
                    reference.clone(),
                    EdgeKind::DataFlow,
                    Value::Null,
                );
                consumers.push(reference);
            }
            wired.push((kind, key, pseudo_id, consumers));
        }
        wired
    }

    fn data_producers(
        &self,
        cx: &mut WiringContext<'_>,
        pseudo_id: &NodeId,
        consumers: &[NodeId],
    ) {
        for transition in cx.chain("onLoad") {
            // Skip the producer edge when the transition consumes the key
            // itself, otherwise transition -> data -> reference -> effect ->
            // transition closes a cycle.
            let self_consuming = consumers
                .iter()
                .any(|reference| cx.meta.is_ancestor(&transition, reference));
            if self_consuming {
                continue;
            }
            cx.add_edge(
                transition,
                pseudo_id.clone(),
                EdgeKind::DataFlow,
                json!({"reason": "onLoad might populate this data"}),
            );
        }
    }

    fn answer_local_producers(&self, cx: &mut WiringContext<'_>, key: &str, pseudo_id: &NodeId) {
        // The post value the field is submitted under.
        if let Some(post) = cx.nodes.pseudo(PseudoKind::Post, key).cloned() {
            cx.add_edge(post, pseudo_id.clone(), EdgeKind::DataFlow, Value::Null);
        }

        // The owning field block contributes formatters and default value.
        let field = local_field_codes(cx.nodes, cx.meta)
            .into_iter()
            .find(|(code, _)| code == key)
            .map(|(_, id)| id);
        let Some(field) = field else {
            return;
        };

        if let Some(node) = cx.nodes.get(&field) {
            for (index, formatter) in node.node_items("formatters").iter().enumerate() {
                cx.add_edge(
                    formatter.clone(),
                    pseudo_id.clone(),
                    EdgeKind::DataFlow,
                    json!({"formatter": index}),
                );
            }
            if let Some(PropertyValue::Node(default)) = node.property("defaultValue") {
                cx.add_edge(
                    default.clone(),
                    pseudo_id.clone(),
                    EdgeKind::DataFlow,
                    json!({"reason": "defaultValue"}),
                );
            }
        }
        if let Some(on_load) = cx.find_last_on_load_from(&field) {
            cx.add_edge(
                on_load,
                pseudo_id.clone(),
                EdgeKind::DataFlow,
                json!({"reason": "nearest onLoad"}),
            );
        }
    }

    fn answer_remote_producers(&self, cx: &mut WiringContext<'_>, pseudo_id: &NodeId) {
        if let Some(last) = cx.chain("onLoad").last().cloned() {
            cx.add_edge(
                last,
                pseudo_id.clone(),
                EdgeKind::DataFlow,
                json!({"reason": "nearest onLoad"}),
            );
        }
    }
}

impl Wirer for PseudoWirer {
    fn name(&self) -> &'static str {
        "pseudo-nodes"
    }

    fn wire(&self, cx: &mut WiringContext<'_>) -> CompileResult<()> {
        let wired = self.consumers(cx);
        for (kind, key, pseudo_id, consumers) in wired {
            match kind {
                PseudoKind::Post | PseudoKind::Query | PseudoKind::Params => {}
                PseudoKind::Data => self.data_producers(cx, &pseudo_id, &consumers),
                PseudoKind::AnswerLocal => self.answer_local_producers(cx, &key, &pseudo_id),
                PseudoKind::AnswerRemote => self.answer_remote_producers(cx, &pseudo_id),
            }
        }
        Ok(())
    }
}
