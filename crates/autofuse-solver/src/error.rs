//! Solver error taxonomy.
//!
//! Only internal-consistency violations and missing collaborators are
//! errors; a decider declining a pair or failing to construct a merged
//! node is normal per-pair control flow and never surfaces here.

use autofuse_ir::{Framework, IrError, NodeId};

/// Fatal solver failures that abort the whole solve.
#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    /// No decider is registered for the requested framework.
    #[error("no fusion decider registered for framework '{0}'")]
    UnknownDecider(Framework),

    /// A graph node has no entry in the live map. This indicates state
    /// corruption and is never retried.
    #[error("live map lookup failed for node {0:?}")]
    LiveMapInconsistency(NodeId),

    /// A freshly fused node consumes one of its own outputs.
    #[error("fused node {0:?} has a self-loop")]
    SelfLoop(NodeId),

    /// An underlying graph operation failed.
    #[error(transparent)]
    Ir(#[from] IrError),
}
