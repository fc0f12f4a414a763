//! Compute-graph container for the fusion solver.
//!
//! A DAG of operations connected by tensor edges. Node and edge ids are
//! stable integers assigned at ingest; every solver side table is keyed
//! on them, so nothing depends on allocation addresses or hash-iteration
//! order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::IrError;
use crate::expr::SizeExpr;
use crate::types::{DataType, TensorShape};

/// A unique identifier for a node in the computation graph.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(pub u32);

/// A unique identifier for an edge (tensor) in the computation graph.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EdgeId(pub u32);

/// Which decider framework a graph targets.
///
/// A graph may carry its own tag (set at ingest); when absent, the
/// solver falls back to the framework named in its configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Framework {
    /// Structure-only rules, no op-type policy.
    #[default]
    Generic,
    /// NPU policy: data-movement ops block vertical fusion, compute-heavy
    /// ops never fuse horizontally with each other.
    Npu,
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Framework::Generic => "generic",
            Framework::Npu => "npu",
        })
    }
}

impl FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(Framework::Generic),
            "npu" => Ok(Framework::Npu),
            other => Err(format!("unknown framework '{other}'")),
        }
    }
}

/// The operation type for a graph node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphOp {
    /// Matrix multiplication.
    MatMul,
    /// Convolution 2D.
    Conv2d,
    /// Element-wise addition.
    Add,
    /// Element-wise subtraction.
    Sub,
    /// Element-wise multiplication.
    Mul,
    /// Element-wise division.
    Div,
    /// Rectified Linear Unit activation.
    Relu,
    /// Sigmoid activation.
    Sigmoid,
    /// Softmax activation.
    Softmax,
    /// Layer normalization.
    LayerNorm,
    /// Reshape/view.
    Reshape,
    /// Transpose/permute dimensions.
    Transpose,
    /// Concatenation.
    Concat,
    /// Custom/vendor-specific operation.
    Custom {
        /// Vendor op-type string.
        op_type: String,
    },
    /// A node produced by the fusion solver. `ops` records the op-type
    /// strings of all subsumed leaf operations, in fusion order.
    Fused {
        /// Constituent leaf op types.
        ops: Vec<String>,
    },
}

impl GraphOp {
    /// Returns the operator type string.
    pub fn op_type(&self) -> &str {
        match self {
            Self::MatMul => "MatMul",
            Self::Conv2d => "Conv2d",
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::Div => "Div",
            Self::Relu => "Relu",
            Self::Sigmoid => "Sigmoid",
            Self::Softmax => "Softmax",
            Self::LayerNorm => "LayerNorm",
            Self::Reshape => "Reshape",
            Self::Transpose => "Transpose",
            Self::Concat => "Concat",
            Self::Custom { op_type } => op_type,
            Self::Fused { .. } => "Fused",
        }
    }

    /// The leaf op types this operation stands for: itself for ordinary
    /// ops, the recorded constituent list for fused nodes.
    pub fn leaf_ops(&self) -> Vec<String> {
        match self {
            Self::Fused { ops } => ops.clone(),
            other => vec![other.op_type().to_string()],
        }
    }

    /// Number of original leaf operations subsumed by this op.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Fused { ops } => ops.len(),
            _ => 1,
        }
    }
}

/// Metadata about a tensor edge in the graph.
#[derive(Clone, Debug)]
pub struct TensorInfo {
    /// Human-readable name, unique within the graph.
    pub name: String,
    /// Element data type.
    pub dtype: DataType,
    /// Shape, when known. Tensors without shape metadata contribute no
    /// memory buffers and therefore never affect fusion scoring.
    pub shape: Option<TensorShape>,
}

impl TensorInfo {
    /// Byte size of this tensor: `element_count * element_byte_width`,
    /// or `None` when the shape is unknown.
    pub fn byte_size(&self) -> Option<SizeExpr> {
        let shape = self.shape.as_ref()?;
        Some(
            shape
                .element_count()
                .mul(SizeExpr::Const(i64::from(self.dtype.byte_width()))),
        )
    }
}

/// A node in the computation graph.
#[derive(Clone, Debug)]
pub struct GraphNode {
    /// Unique identifier for this node.
    pub id: NodeId,
    /// The operation this node performs.
    pub op: GraphOp,
    /// Input edge identifiers (ordered).
    pub inputs: Vec<EdgeId>,
    /// Output edge identifiers (ordered).
    pub outputs: Vec<EdgeId>,
    /// Human-readable name for this node.
    pub name: String,
}

/// A computation graph: nodes are operations, edges are tensors.
#[derive(Clone, Debug, Default)]
pub struct ComputeGraph {
    /// All nodes, in insertion order.
    pub nodes: Vec<GraphNode>,
    /// All tensor edges, keyed by id.
    pub edges: BTreeMap<EdgeId, TensorInfo>,
    /// Graph-level input edges (model inputs).
    pub inputs: Vec<EdgeId>,
    /// Graph-level output edges (model outputs).
    pub outputs: Vec<EdgeId>,
    framework: Option<Framework>,
    hint_pairs: Vec<(NodeId, NodeId)>,
    next_node_id: u32,
    next_edge_id: u32,
}

impl ComputeGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tensor edge to the graph and return its id.
    pub fn add_edge(&mut self, info: TensorInfo) -> EdgeId {
        let id = EdgeId(self.next_edge_id);
        self.next_edge_id += 1;
        self.edges.insert(id, info);
        id
    }

    /// Add a node to the graph and return its id.
    ///
    /// All referenced edges must be registered and each output edge may
    /// have at most one producer.
    pub fn add_node(
        &mut self,
        op: GraphOp,
        inputs: Vec<EdgeId>,
        outputs: Vec<EdgeId>,
        name: impl Into<String>,
    ) -> Result<NodeId, IrError> {
        let name = name.into();

        for &e in inputs.iter().chain(outputs.iter()) {
            if !self.edges.contains_key(&e) {
                return Err(IrError::UnknownEdge {
                    node: name,
                    edge: e,
                });
            }
        }

        for &out in &outputs {
            if let Some(existing) = self.edge_producer(out) {
                return Err(IrError::DuplicateProducer {
                    edge: out,
                    producer: existing.name.clone(),
                });
            }
        }

        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.push(GraphNode {
            id,
            op,
            inputs,
            outputs,
            name,
        });
        Ok(id)
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges (tensors) in the graph.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Look up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The framework tag carried by this graph, if any.
    pub fn framework(&self) -> Option<Framework> {
        self.framework
    }

    /// Tag this graph with a decider framework.
    pub fn set_framework(&mut self, fwk: Framework) {
        self.framework = Some(fwk);
    }

    /// Attach externally-supplied candidate fusion pairs. The solver
    /// consumes these exactly once, in place of full enumeration.
    pub fn set_hint_pairs(&mut self, pairs: Vec<(NodeId, NodeId)>) {
        self.hint_pairs = pairs;
    }

    /// Consume and clear the hint pairs, if any were attached.
    pub fn take_hint_pairs(&mut self) -> Vec<(NodeId, NodeId)> {
        std::mem::take(&mut self.hint_pairs)
    }

    /// Returns node ids in topological order.
    ///
    /// Deterministic: among ready nodes, the smallest [`NodeId`] is
    /// emitted first. Fails if the graph contains a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, IrError> {
        let n = self.nodes.len();
        let mut edge_producer: BTreeMap<EdgeId, usize> = BTreeMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            for &out in &node.outputs {
                edge_producer.insert(out, i);
            }
        }

        let mut in_degree = vec![0usize; n];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (ci, node) in self.nodes.iter().enumerate() {
            for &inp in &node.inputs {
                if let Some(&pi) = edge_producer.get(&inp) {
                    in_degree[ci] += 1;
                    consumers[pi].push(ci);
                }
            }
        }

        // Kahn's algorithm with an ordered ready set.
        let mut ready: std::collections::BTreeSet<(NodeId, usize)> =
            std::collections::BTreeSet::new();
        for (i, &deg) in in_degree.iter().enumerate() {
            if deg == 0 {
                ready.insert((self.nodes[i].id, i));
            }
        }

        let mut result = Vec::with_capacity(n);
        while let Some(&(id, idx)) = ready.iter().next() {
            ready.remove(&(id, idx));
            result.push(id);
            for &ci in &consumers[idx] {
                in_degree[ci] -= 1;
                if in_degree[ci] == 0 {
                    ready.insert((self.nodes[ci].id, ci));
                }
            }
        }

        if result.len() != n {
            return Err(IrError::CyclicGraph {
                visited: result.len(),
                total: n,
            });
        }
        Ok(result)
    }

    /// Find the node that produces the given edge, if any.
    pub fn edge_producer(&self, edge: EdgeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.outputs.contains(&edge))
    }

    /// Find all nodes that consume the given edge.
    pub fn edge_consumers(&self, edge: EdgeId) -> Vec<&GraphNode> {
        self.nodes
            .iter()
            .filter(|n| n.inputs.contains(&edge))
            .collect()
    }

    /// Returns `true` if the node consumes one of its own outputs.
    pub fn has_self_loop(&self, id: NodeId) -> bool {
        match self.node(id) {
            Some(n) => n.inputs.iter().any(|e| n.outputs.contains(e)),
            None => false,
        }
    }

    /// Physically merge two nodes into a single fused node.
    ///
    /// The merged node takes the union of both nodes' external inputs and
    /// keeps only the outputs that are still consumed outside the pair or
    /// exposed as graph outputs. Edges that become fully internal are
    /// removed from the graph. `counter` disambiguates the merged node's
    /// name across a solve.
    pub fn fuse_pair(
        &mut self,
        a: NodeId,
        b: NodeId,
        counter: u64,
    ) -> Result<NodeId, IrError> {
        let na = self.node(a).ok_or(IrError::UnknownNode(a))?.clone();
        let nb = self.node(b).ok_or(IrError::UnknownNode(b))?.clone();

        let produced =
            |e: &EdgeId| na.outputs.contains(e) || nb.outputs.contains(e);

        // External inputs, in order, deduplicated.
        let mut inputs: Vec<EdgeId> = Vec::new();
        for &e in na.inputs.iter().chain(nb.inputs.iter()) {
            if !produced(&e) && !inputs.contains(&e) {
                inputs.push(e);
            }
        }

        // Outputs still visible outside the pair.
        let mut outputs: Vec<EdgeId> = Vec::new();
        let mut internal: Vec<EdgeId> = Vec::new();
        for &e in na.outputs.iter().chain(nb.outputs.iter()) {
            let external = self
                .nodes
                .iter()
                .any(|n| n.id != a && n.id != b && n.inputs.contains(&e));
            if external || self.outputs.contains(&e) {
                if !outputs.contains(&e) {
                    outputs.push(e);
                }
            } else {
                internal.push(e);
            }
        }

        // Emit the producer's ops first when the pair is vertical.
        let (first, second) = if nb.inputs.iter().any(|e| na.outputs.contains(e)) {
            (&na, &nb)
        } else if na.inputs.iter().any(|e| nb.outputs.contains(e)) {
            (&nb, &na)
        } else {
            (&na, &nb)
        };
        let mut ops = first.op.leaf_ops();
        ops.extend(second.op.leaf_ops());

        let name = format!("{}_{}_fused{}", na.name, nb.name, counter);

        self.nodes.retain(|n| n.id != a && n.id != b);
        for e in internal {
            self.edges.remove(&e);
        }

        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        self.nodes.push(GraphNode {
            id,
            op: GraphOp::Fused { ops },
            inputs,
            outputs,
            name,
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dim;

    fn tensor(name: &str, dims: &[u64]) -> TensorInfo {
        TensorInfo {
            name: name.into(),
            dtype: DataType::F32,
            shape: Some(TensorShape {
                dims: dims.iter().map(|&d| Dim::Fixed(d)).collect(),
            }),
        }
    }

    fn chain_graph() -> (ComputeGraph, Vec<NodeId>, Vec<EdgeId>) {
        // a -> m -> b -> n -> c
        let mut g = ComputeGraph::new();
        let e_in = g.add_edge(tensor("in", &[200]));
        let m = g.add_edge(tensor("m", &[200]));
        let n = g.add_edge(tensor("n", &[200]));
        g.inputs = vec![e_in];
        g.outputs = vec![n];
        let a = g.add_node(GraphOp::MatMul, vec![e_in], vec![m], "a").unwrap();
        let b = g.add_node(GraphOp::Add, vec![m], vec![n], "b").unwrap();
        (g, vec![a, b], vec![e_in, m, n])
    }

    #[test]
    fn build_and_count() {
        let (g, _, _) = chain_graph();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn reject_unknown_edge() {
        let mut g = ComputeGraph::new();
        let out = g.add_edge(tensor("out", &[4]));
        let err = g
            .add_node(GraphOp::Relu, vec![EdgeId(99)], vec![out], "bad")
            .unwrap_err();
        assert!(matches!(err, IrError::UnknownEdge { .. }));
    }

    #[test]
    fn reject_duplicate_producer() {
        let mut g = ComputeGraph::new();
        let a = g.add_edge(tensor("a", &[4]));
        let b = g.add_edge(tensor("b", &[4]));
        let c = g.add_edge(tensor("c", &[4]));
        g.add_node(GraphOp::Relu, vec![a], vec![b], "first").unwrap();
        let err = g
            .add_node(GraphOp::Relu, vec![c], vec![b], "second")
            .unwrap_err();
        assert!(matches!(err, IrError::DuplicateProducer { .. }));
    }

    #[test]
    fn topological_order_chain() {
        let (g, nodes, _) = chain_graph();
        let order = g.topological_order().unwrap();
        assert_eq!(order, nodes);
    }

    #[test]
    fn topological_order_detects_cycle() {
        let mut g = ComputeGraph::new();
        let e0 = g.add_edge(tensor("e0", &[4]));
        let e1 = g.add_edge(tensor("e1", &[4]));
        // Build the cycle directly, bypassing add_node validation.
        g.nodes.push(GraphNode {
            id: NodeId(0),
            op: GraphOp::Relu,
            inputs: vec![e1],
            outputs: vec![e0],
            name: "a".into(),
        });
        g.nodes.push(GraphNode {
            id: NodeId(1),
            op: GraphOp::Relu,
            inputs: vec![e0],
            outputs: vec![e1],
            name: "b".into(),
        });
        g.next_node_id = 2;
        assert!(matches!(
            g.topological_order(),
            Err(IrError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn producer_consumer_queries() {
        let (g, nodes, edges) = chain_graph();
        assert_eq!(g.edge_producer(edges[1]).unwrap().id, nodes[0]);
        assert!(g.edge_producer(edges[0]).is_none());
        let consumers = g.edge_consumers(edges[1]);
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].id, nodes[1]);
    }

    #[test]
    fn fuse_pair_merges_chain() {
        let (mut g, nodes, edges) = chain_graph();
        let fused = g.fuse_pair(nodes[0], nodes[1], 0).unwrap();
        assert_eq!(g.node_count(), 1);
        let node = g.node(fused).unwrap();
        assert_eq!(node.inputs, vec![edges[0]]);
        assert_eq!(node.outputs, vec![edges[2]]);
        // The intermediate edge became internal and is gone.
        assert!(!g.edges.contains_key(&edges[1]));
        assert_eq!(
            node.op,
            GraphOp::Fused {
                ops: vec!["MatMul".into(), "Add".into()]
            }
        );
        assert_eq!(node.op.leaf_count(), 2);
        assert!(!g.has_self_loop(fused));
    }

    #[test]
    fn fuse_pair_keeps_externally_consumed_edge() {
        // a -> m, m consumed by both b and c; fusing (a, b) must keep m.
        let mut g = ComputeGraph::new();
        let e_in = g.add_edge(tensor("in", &[8]));
        let m = g.add_edge(tensor("m", &[8]));
        let o1 = g.add_edge(tensor("o1", &[8]));
        let o2 = g.add_edge(tensor("o2", &[8]));
        g.inputs = vec![e_in];
        g.outputs = vec![o1, o2];
        let a = g.add_node(GraphOp::MatMul, vec![e_in], vec![m], "a").unwrap();
        let b = g.add_node(GraphOp::Relu, vec![m], vec![o1], "b").unwrap();
        g.add_node(GraphOp::Sigmoid, vec![m], vec![o2], "c").unwrap();

        let fused = g.fuse_pair(a, b, 0).unwrap();
        let node = g.node(fused).unwrap();
        assert!(node.outputs.contains(&m));
        assert!(node.outputs.contains(&o1));
        assert!(g.edges.contains_key(&m));
    }

    #[test]
    fn fused_ops_order_producer_first() {
        let (mut g, nodes, _) = chain_graph();
        // Pass the consumer first; the fused op list still starts with
        // the producer.
        let fused = g.fuse_pair(nodes[1], nodes[0], 3).unwrap();
        let node = g.node(fused).unwrap();
        assert_eq!(
            node.op,
            GraphOp::Fused {
                ops: vec!["MatMul".into(), "Add".into()]
            }
        );
        assert!(node.name.ends_with("fused3"));
    }

    #[test]
    fn hint_pairs_consumed_once() {
        let (mut g, nodes, _) = chain_graph();
        g.set_hint_pairs(vec![(nodes[0], nodes[1])]);
        assert_eq!(g.take_hint_pairs(), vec![(nodes[0], nodes[1])]);
        assert!(g.take_hint_pairs().is_empty());
    }

    #[test]
    fn tensor_byte_size() {
        let t = tensor("t", &[10, 20]);
        assert_eq!(t.byte_size().unwrap().as_const(), Some(800));
        let unsized_t = TensorInfo {
            name: "u".into(),
            dtype: DataType::F32,
            shape: None,
        };
        assert!(unsized_t.byte_size().is_none());
    }
}
