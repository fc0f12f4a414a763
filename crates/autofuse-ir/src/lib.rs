#![warn(missing_docs)]
//! Compute-graph intermediate representation for the autofuse solver.
//!
//! Stable-id DAG of operations with tensor metadata carrying symbolic
//! shapes, plus the arena/handle storage the solver uses for its own
//! records.

pub mod arena;
mod display;
mod error;
mod expr;
pub mod graph;
mod types;

pub use arena::{Arena, Handle};
pub use display::dump_graph;
pub use error::IrError;
pub use expr::SizeExpr;
pub use graph::{ComputeGraph, EdgeId, Framework, GraphNode, GraphOp, NodeId, TensorInfo};
pub use types::{DataType, Dim, TensorShape, SUB_BYTE_FLAG};
