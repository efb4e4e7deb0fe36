//! Child to parent structural edges

use super::{Wirer, WiringContext};
use crate::error::CompileResult;
use crate::graph::EdgeKind;
use serde_json::Value;

/// Adds one `child -> parent` STRUCTURAL edge per stamped parent pointer.
///
/// These edges make the tree walkable from the graph but never constrain
/// scheduling.
pub struct StructuralWirer;

impl Wirer for StructuralWirer {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn wire(&self, cx: &mut WiringContext<'_>) -> CompileResult<()> {
        for id in cx.nodes.ids().to_vec() {
            cx.graph.add_node(id.clone());
            if let Some(parent) = cx.parent(&id).cloned() {
                cx.add_edge(id, parent, EdgeKind::Structural, Value::Null);
            }
        }
        Ok(())
    }
}
