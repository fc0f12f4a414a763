#![warn(missing_docs)]
//! Automatic operator-fusion strategy solving.
//!
//! Given a [`ComputeGraph`](autofuse_ir::ComputeGraph) and a decider,
//! the solver greedily merges producer-consumer and sibling node pairs
//! that share memory buffers, rewriting the graph in place until no
//! profitable fusion remains.

mod cycle;
mod error;
mod fusing;
mod memory;
mod score;
mod solver;

pub use cycle::CycleDetector;
pub use error::SolveError;
pub use fusing::{FusingNode, FusionId, FusionSet, NodeState};
pub use memory::{read_writes, reads, writes, written_bytes, MemoryBuffer};
pub use score::{proximity, score_fusion_memory, NodePair};
pub use solver::{FusionReport, FusionStrategySolver, SolverConfig};
