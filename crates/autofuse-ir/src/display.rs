//! Textual graph dump for diagnostics.

use std::fmt::Write;

use crate::graph::ComputeGraph;

/// Render a graph as text: edges with type/shape metadata, then nodes in
/// stored order with their connectivity. Used for verbose logging and
/// for the diagnostic dumps written when a fusion commit fails.
pub fn dump_graph(graph: &ComputeGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "graph: {} node(s), {} edge(s)",
        graph.node_count(),
        graph.edge_count()
    );

    let _ = writeln!(out, "Edges:");
    for (id, info) in &graph.edges {
        match &info.shape {
            Some(shape) => {
                let _ = writeln!(
                    out,
                    "  [{}] {}: {} {}",
                    id.0, info.name, info.dtype, shape
                );
            }
            None => {
                let _ = writeln!(out, "  [{}] {}: {} <no shape>", id.0, info.name, info.dtype);
            }
        }
    }

    let _ = writeln!(out, "Nodes:");
    for node in &graph.nodes {
        let ins: Vec<String> = node.inputs.iter().map(|e| e.0.to_string()).collect();
        let outs: Vec<String> = node.outputs.iter().map(|e| e.0.to_string()).collect();
        let _ = writeln!(
            out,
            "  [{}] {} ({}) in=[{}] out=[{}]",
            node.id.0,
            node.name,
            node.op.op_type(),
            ins.join(","),
            outs.join(","),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphOp, TensorInfo};
    use crate::types::{DataType, Dim, TensorShape};

    #[test]
    fn dump_contains_nodes_and_edges() {
        let mut g = ComputeGraph::new();
        let a = g.add_edge(TensorInfo {
            name: "a".into(),
            dtype: DataType::F32,
            shape: Some(TensorShape {
                dims: vec![Dim::Sym("N".into()), Dim::Fixed(4)],
            }),
        });
        let b = g.add_edge(TensorInfo {
            name: "b".into(),
            dtype: DataType::F16,
            shape: None,
        });
        g.add_node(GraphOp::Relu, vec![a], vec![b], "relu0").unwrap();

        let text = dump_graph(&g);
        assert!(text.contains("1 node(s), 2 edge(s)"));
        assert!(text.contains("a: f32 Nx4"));
        assert!(text.contains("b: f16 <no shape>"));
        assert!(text.contains("relu0 (Relu)"));
    }
}
