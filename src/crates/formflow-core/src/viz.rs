//! Dependency graph visualization
//!
//! Renders a wired graph as DOT or Mermaid for debugging compiled forms. Edge
//! kinds are styled distinctly so a glance separates scheduling edges from
//! the structural skeleton:
//!
//! | Kind | DOT | Mermaid |
//! |---|---|---|
//! | STRUCTURAL | dashed gray | dotted link |
//! | DATA_FLOW | solid | arrow |
//! | CONTROL_FLOW | bold | thick arrow |
//! | EFFECT_FLOW | dotted | labeled arrow |

use crate::graph::{DepGraph, EdgeKind};
use crate::registry::NodeRegistry;
use std::fmt::Write;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    /// Graphviz DOT
    Dot,
    /// Mermaid flowchart
    Mermaid,
}

/// Render the graph in the requested format
pub fn visualize(graph: &DepGraph, nodes: &NodeRegistry, format: VisualizationFormat) -> String {
    match format {
        VisualizationFormat::Dot => to_dot(graph, nodes),
        VisualizationFormat::Mermaid => to_mermaid(graph, nodes),
    }
}

fn ident(id: &crate::ast::NodeId) -> String {
    id.to_string().replace(':', "_")
}

fn label(nodes: &NodeRegistry, id: &crate::ast::NodeId) -> String {
    nodes
        .get(id)
        .map(|n| format!("{}\\n{}", n.kind.label(), id))
        .unwrap_or_else(|| id.to_string())
}

fn to_dot(graph: &DepGraph, nodes: &NodeRegistry) -> String {
    let mut out = String::from("digraph dependencies {\n  rankdir=LR;\n  node [shape=box, fontsize=10];\n");
    for id in graph.nodes() {
        let _ = writeln!(out, "  {} [label=\"{}\"];", ident(id), label(nodes, id));
    }
    for id in graph.nodes() {
        for edge in graph.edges_from(id) {
            let style = match edge.kind {
                EdgeKind::Structural => "style=dashed, color=gray",
                EdgeKind::DataFlow => "style=solid",
                EdgeKind::ControlFlow => "style=bold",
                EdgeKind::EffectFlow => "style=dotted",
            };
            let _ = writeln!(
                out,
                "  {} -> {} [{}];",
                ident(&edge.from),
                ident(&edge.to),
                style
            );
        }
    }
    out.push_str("}\n");
    out
}

fn to_mermaid(graph: &DepGraph, nodes: &NodeRegistry) -> String {
    let mut out = String::from("flowchart LR\n");
    for id in graph.nodes() {
        let text = label(nodes, id).replace("\\n", "<br/>");
        let _ = writeln!(out, "    {}[\"{}\"]", ident(id), text);
    }
    for id in graph.nodes() {
        for edge in graph.edges_from(id) {
            let arrow = match edge.kind {
                EdgeKind::Structural => "-.->",
                EdgeKind::DataFlow => "-->",
                EdgeKind::ControlFlow => "==>",
                EdgeKind::EffectFlow => "--effect-->",
            };
            let _ = writeln!(out, "    {} {} {}", ident(&edge.from), arrow, ident(&edge.to));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{AstNode, IdGenerator, IdSpace, NodeKind, StructureKind};
    use crate::graph::EdgeKind;
    use serde_json::{json, Value};

    fn sample() -> (DepGraph, NodeRegistry) {
        let mut ids = IdGenerator::new();
        let mut nodes = NodeRegistry::new();
        let a = AstNode::new(
            ids.next(IdSpace::CompileAst),
            NodeKind::Structure(StructureKind::Step),
            json!({}),
        );
        let b = AstNode::new(
            ids.next(IdSpace::CompileAst),
            NodeKind::Structure(StructureKind::Block),
            json!({}),
        );
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        nodes.insert(a);
        nodes.insert(b);

        let mut graph = DepGraph::new();
        graph.add_edge(b_id, a_id, EdgeKind::Structural, Value::Null);
        (graph, nodes)
    }

    #[test]
    fn test_dot_output_mentions_nodes_and_styles() {
        let (graph, nodes) = sample();
        let dot = visualize(&graph, &nodes, VisualizationFormat::Dot);
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("compile_ast_0"));
        assert!(dot.contains("structure.step"));
        assert!(dot.contains("style=dashed"));
    }

    #[test]
    fn test_mermaid_output_uses_flowchart() {
        let (graph, nodes) = sample();
        let mermaid = visualize(&graph, &nodes, VisualizationFormat::Mermaid);
        assert!(mermaid.starts_with("flowchart"));
        assert!(mermaid.contains("-.->"));
    }
}
