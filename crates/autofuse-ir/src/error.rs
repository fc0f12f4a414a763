//! Error types for the compute-graph IR.

use crate::graph::{EdgeId, NodeId};

/// Errors that can occur when constructing or traversing a graph.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A node referenced an edge that was never registered.
    #[error("node '{node}' references unregistered edge {edge:?}")]
    UnknownEdge {
        /// Name of the offending node.
        node: String,
        /// The unregistered edge id.
        edge: EdgeId,
    },

    /// An edge already has a producer (each edge may have at most one).
    #[error("edge {edge:?} already produced by node '{producer}'")]
    DuplicateProducer {
        /// The contested edge id.
        edge: EdgeId,
        /// Name of the existing producer.
        producer: String,
    },

    /// A node id was looked up that does not exist in the graph.
    #[error("node {0:?} not present in graph")]
    UnknownNode(NodeId),

    /// Topological sort visited fewer nodes than the graph contains.
    #[error("graph contains a cycle ({visited} of {total} nodes visited)")]
    CyclicGraph {
        /// Nodes reached before the sort stalled.
        visited: usize,
        /// Total node count.
        total: usize,
    },
}
