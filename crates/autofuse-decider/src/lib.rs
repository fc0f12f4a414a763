#![warn(missing_docs)]
//! Fusion decider trait and plugin architecture.
//!
//! The solver never decides fusibility itself: it consults a
//! [`FusionDecider`] for pair priority, vertical/horizontal permission,
//! and the physical construction of merged nodes. Deciders are resolved
//! from a [`DeciderRegistry`] keyed by [`Framework`].

use std::fmt::Debug;

use autofuse_ir::{ComputeGraph, Framework, GraphOp, NodeId};

/// A pluggable fusibility oracle and fuse operation.
pub trait FusionDecider: Debug + Send + Sync {
    /// Human-readable name (e.g. "generic").
    fn name(&self) -> &str;

    /// The framework this decider serves (for registry dispatch).
    fn framework(&self) -> Framework;

    /// Priority for fusing this pair; lower is more urgent. The solver
    /// attempts all priority-0 candidates before any priority-1 ones.
    fn fusion_pair_priority(&self, graph: &ComputeGraph, a: NodeId, b: NodeId) -> u32 {
        let _ = (graph, a, b);
        0
    }

    /// May `a` and `b` fuse when one is a topological ancestor of the
    /// other (producer-consumer fusion)?
    fn can_fuse_vertical(&self, graph: &ComputeGraph, a: NodeId, b: NodeId) -> bool;

    /// May `a` and `b` fuse when neither is an ancestor of the other
    /// (sibling fusion)?
    fn can_fuse_horizontal(&self, graph: &ComputeGraph, a: NodeId, b: NodeId) -> bool;

    /// Physically construct the merged node, mutating the graph in
    /// place. Returns `None` when construction fails; the solver then
    /// skips the pair and continues.
    fn fuse(
        &self,
        graph: &mut ComputeGraph,
        a: NodeId,
        b: NodeId,
        counter: u64,
    ) -> Option<NodeId>;
}

/// Registry of available deciders, resolved by framework tag.
pub struct DeciderRegistry {
    deciders: Vec<Box<dyn FusionDecider>>,
}

impl Default for DeciderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl DeciderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            deciders: Vec::new(),
        }
    }

    /// Creates a registry pre-populated with the built-in deciders.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(GenericDecider));
        reg.register(Box::new(NpuDecider));
        reg
    }

    /// Registers a decider. A later registration for the same framework
    /// shadows an earlier one.
    pub fn register(&mut self, decider: Box<dyn FusionDecider>) {
        self.deciders.push(decider);
    }

    /// Finds the decider for the given framework.
    pub fn find(&self, framework: Framework) -> Option<&dyn FusionDecider> {
        self.deciders
            .iter()
            .rev()
            .find(|d| d.framework() == framework)
            .map(|d| &**d)
    }
}

/// Structure-only decider: every pair is fusible, priority is uniform,
/// and the merged node is built by [`ComputeGraph::fuse_pair`].
#[derive(Debug)]
pub struct GenericDecider;

impl FusionDecider for GenericDecider {
    fn name(&self) -> &str {
        "generic"
    }

    fn framework(&self) -> Framework {
        Framework::Generic
    }

    fn can_fuse_vertical(&self, _graph: &ComputeGraph, _a: NodeId, _b: NodeId) -> bool {
        true
    }

    fn can_fuse_horizontal(&self, _graph: &ComputeGraph, _a: NodeId, _b: NodeId) -> bool {
        true
    }

    fn fuse(
        &self,
        graph: &mut ComputeGraph,
        a: NodeId,
        b: NodeId,
        counter: u64,
    ) -> Option<NodeId> {
        match graph.fuse_pair(a, b, counter) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("fuse_pair({a:?}, {b:?}) failed: {e}");
                None
            }
        }
    }
}

/// Returns `true` for ops that reinterpret or move data without
/// computing; fusing across them buys nothing and complicates layout.
fn is_data_movement(op: &GraphOp) -> bool {
    matches!(op, GraphOp::Reshape | GraphOp::Transpose | GraphOp::Concat)
}

/// Returns `true` for compute-heavy ops that saturate the NPU's matrix
/// unit on their own.
fn is_compute_heavy(op: &GraphOp) -> bool {
    match op {
        GraphOp::MatMul | GraphOp::Conv2d => true,
        GraphOp::Fused { ops } => ops
            .iter()
            .any(|o| o == "MatMul" || o == "Conv2d"),
        _ => false,
    }
}

/// Returns `true` for cheap element-wise followers that the NPU folds
/// into a producer for free.
fn is_elementwise_follower(op: &GraphOp) -> bool {
    matches!(
        op,
        GraphOp::Add
            | GraphOp::Sub
            | GraphOp::Mul
            | GraphOp::Div
            | GraphOp::Relu
            | GraphOp::Sigmoid
    )
}

/// NPU policy decider.
///
/// Rules: data-movement ops never fuse vertically (their output layout
/// must materialize); two compute-heavy units never fuse horizontally
/// (each already saturates the matrix unit); a compute-heavy producer
/// with an element-wise follower is priority 0 (the codegen path expects
/// these folded), everything else priority 1.
#[derive(Debug)]
pub struct NpuDecider;

impl NpuDecider {
    fn ops<'g>(graph: &'g ComputeGraph, id: NodeId) -> Option<&'g GraphOp> {
        graph.node(id).map(|n| &n.op)
    }
}

impl FusionDecider for NpuDecider {
    fn name(&self) -> &str {
        "npu"
    }

    fn framework(&self) -> Framework {
        Framework::Npu
    }

    fn fusion_pair_priority(&self, graph: &ComputeGraph, a: NodeId, b: NodeId) -> u32 {
        match (Self::ops(graph, a), Self::ops(graph, b)) {
            (Some(oa), Some(ob)) => {
                let folded = (is_compute_heavy(oa) && is_elementwise_follower(ob))
                    || (is_compute_heavy(ob) && is_elementwise_follower(oa));
                if folded { 0 } else { 1 }
            }
            _ => 1,
        }
    }

    fn can_fuse_vertical(&self, graph: &ComputeGraph, a: NodeId, b: NodeId) -> bool {
        match (Self::ops(graph, a), Self::ops(graph, b)) {
            (Some(oa), Some(ob)) => !is_data_movement(oa) && !is_data_movement(ob),
            _ => false,
        }
    }

    fn can_fuse_horizontal(&self, graph: &ComputeGraph, a: NodeId, b: NodeId) -> bool {
        match (Self::ops(graph, a), Self::ops(graph, b)) {
            (Some(oa), Some(ob)) => {
                !(is_compute_heavy(oa) && is_compute_heavy(ob))
                    && !is_data_movement(oa)
                    && !is_data_movement(ob)
            }
            _ => false,
        }
    }

    fn fuse(
        &self,
        graph: &mut ComputeGraph,
        a: NodeId,
        b: NodeId,
        counter: u64,
    ) -> Option<NodeId> {
        GenericDecider.fuse(graph, a, b, counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autofuse_ir::{DataType, Dim, TensorInfo, TensorShape};

    fn tensor(name: &str, dims: &[u64]) -> TensorInfo {
        TensorInfo {
            name: name.into(),
            dtype: DataType::F32,
            shape: Some(TensorShape {
                dims: dims.iter().map(|&d| Dim::Fixed(d)).collect(),
            }),
        }
    }

    fn two_node_graph(op_a: GraphOp, op_b: GraphOp) -> (ComputeGraph, NodeId, NodeId) {
        let mut g = ComputeGraph::new();
        let e0 = g.add_edge(tensor("e0", &[16]));
        let e1 = g.add_edge(tensor("e1", &[16]));
        let e2 = g.add_edge(tensor("e2", &[16]));
        g.inputs = vec![e0];
        g.outputs = vec![e2];
        let a = g.add_node(op_a, vec![e0], vec![e1], "a").unwrap();
        let b = g.add_node(op_b, vec![e1], vec![e2], "b").unwrap();
        (g, a, b)
    }

    #[test]
    fn registry_resolves_builtins() {
        let reg = DeciderRegistry::with_builtins();
        assert_eq!(reg.find(Framework::Generic).unwrap().name(), "generic");
        assert_eq!(reg.find(Framework::Npu).unwrap().name(), "npu");
    }

    #[test]
    fn later_registration_shadows() {
        #[derive(Debug)]
        struct Custom;
        impl FusionDecider for Custom {
            fn name(&self) -> &str {
                "custom"
            }
            fn framework(&self) -> Framework {
                Framework::Generic
            }
            fn can_fuse_vertical(&self, _: &ComputeGraph, _: NodeId, _: NodeId) -> bool {
                false
            }
            fn can_fuse_horizontal(&self, _: &ComputeGraph, _: NodeId, _: NodeId) -> bool {
                false
            }
            fn fuse(
                &self,
                _: &mut ComputeGraph,
                _: NodeId,
                _: NodeId,
                _: u64,
            ) -> Option<NodeId> {
                None
            }
        }

        let mut reg = DeciderRegistry::with_builtins();
        reg.register(Box::new(Custom));
        assert_eq!(reg.find(Framework::Generic).unwrap().name(), "custom");
    }

    #[test]
    fn generic_decider_fuses() {
        let (mut g, a, b) = two_node_graph(GraphOp::MatMul, GraphOp::Add);
        let fused = GenericDecider.fuse(&mut g, a, b, 0).unwrap();
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.node(fused).unwrap().op.leaf_count(), 2);
    }

    #[test]
    fn generic_decider_fuse_unknown_node() {
        let (mut g, a, _) = two_node_graph(GraphOp::MatMul, GraphOp::Add);
        assert!(GenericDecider.fuse(&mut g, a, NodeId(99), 0).is_none());
    }

    #[test]
    fn npu_blocks_vertical_through_reshape() {
        let (g, a, b) = two_node_graph(GraphOp::MatMul, GraphOp::Reshape);
        assert!(!NpuDecider.can_fuse_vertical(&g, a, b));
        let (g, a, b) = two_node_graph(GraphOp::MatMul, GraphOp::Relu);
        assert!(NpuDecider.can_fuse_vertical(&g, a, b));
    }

    #[test]
    fn npu_blocks_horizontal_compute_heavy() {
        let (g, a, b) = two_node_graph(GraphOp::MatMul, GraphOp::Conv2d);
        assert!(!NpuDecider.can_fuse_horizontal(&g, a, b));
        let (g, a, b) = two_node_graph(GraphOp::Add, GraphOp::Mul);
        assert!(NpuDecider.can_fuse_horizontal(&g, a, b));
    }

    #[test]
    fn npu_priority_prefers_folded_followers() {
        let (g, a, b) = two_node_graph(GraphOp::MatMul, GraphOp::Relu);
        assert_eq!(NpuDecider.fusion_pair_priority(&g, a, b), 0);
        let (g, a, b) = two_node_graph(GraphOp::Relu, GraphOp::Sigmoid);
        assert_eq!(NpuDecider.fusion_pair_priority(&g, a, b), 1);
    }

    #[test]
    fn npu_treats_fused_matmul_as_compute_heavy() {
        let (mut g, a, b) = two_node_graph(GraphOp::MatMul, GraphOp::Relu);
        let fused = NpuDecider.fuse(&mut g, a, b, 0).unwrap();
        assert!(is_compute_heavy(&g.node(fused).unwrap().op));
    }
}
