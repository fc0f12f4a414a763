//! Memory-buffer extraction: which tensors a node reads and writes.
//!
//! Buffers are the unit of fusion scoring. Only tensors with shape/size
//! metadata contribute; a node whose tensors all lack metadata can still
//! be fused but will never score any memory benefit.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use autofuse_ir::{ComputeGraph, EdgeId, NodeId, SizeExpr};

/// One memory region: a producer's output tensor.
///
/// Identity is the edge id. Ordering is primarily by the stable tensor
/// name so that iteration order is deterministic across runs (size
/// expressions have no total order), with the edge index breaking ties
/// between same-named tensors.
#[derive(Clone, Debug)]
pub struct MemoryBuffer {
    /// The producing edge.
    pub edge: EdgeId,
    /// Stable tensor name, used for ordering.
    pub name: String,
    /// Byte size, possibly symbolic.
    pub size: SizeExpr,
}

impl PartialEq for MemoryBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.edge == other.edge
    }
}

impl Eq for MemoryBuffer {}

impl PartialOrd for MemoryBuffer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemoryBuffer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.edge.cmp(&other.edge))
    }
}

fn buffer_for(graph: &ComputeGraph, edge: EdgeId) -> Option<MemoryBuffer> {
    let info = graph.edges.get(&edge)?;
    let size = info.byte_size()?;
    Some(MemoryBuffer {
        edge,
        name: info.name.clone(),
        size,
    })
}

/// The buffers a node reads: output tensors of its upstream producers.
///
/// Graph-level inputs have no producer and contribute nothing. An input
/// edge with no producer that is not a declared graph input is a
/// dangling reference; that is tolerated (the graph may be a valid
/// partial sub-graph) but logged.
pub fn reads(graph: &ComputeGraph, node: NodeId) -> BTreeSet<MemoryBuffer> {
    let mut set = BTreeSet::new();
    let Some(n) = graph.node(node) else {
        return set;
    };
    for &edge in &n.inputs {
        if graph.edge_producer(edge).is_none() {
            if !graph.inputs.contains(&edge) {
                log::warn!(
                    "node '{}': input edge {:?} has no producer and is not a graph input",
                    n.name,
                    edge
                );
            }
            continue;
        }
        if let Some(buf) = buffer_for(graph, edge) {
            set.insert(buf);
        }
    }
    set
}

/// The buffers a node writes: its own output tensors.
pub fn writes(graph: &ComputeGraph, node: NodeId) -> BTreeSet<MemoryBuffer> {
    let mut set = BTreeSet::new();
    let Some(n) = graph.node(node) else {
        return set;
    };
    for &edge in &n.outputs {
        if let Some(buf) = buffer_for(graph, edge) {
            set.insert(buf);
        }
    }
    set
}

/// Union of [`reads`] and [`writes`].
pub fn read_writes(graph: &ComputeGraph, node: NodeId) -> BTreeSet<MemoryBuffer> {
    let mut set = reads(graph, node);
    set.extend(writes(graph, node));
    set
}

/// Sum of the written-output sizes of a node.
pub fn written_bytes(graph: &ComputeGraph, node: NodeId) -> SizeExpr {
    writes(graph, node)
        .into_iter()
        .fold(SizeExpr::zero(), |acc, b| acc.add(b.size))
}
