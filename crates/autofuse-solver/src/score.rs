//! Candidate pair scoring and priority ordering.

use std::cmp::Ordering;

use autofuse_ir::SizeExpr;

use crate::fusing::{FusingNode, FusionId};

/// A candidate pair of fusion units with precomputed scores. Ephemeral:
/// built during enumeration, never kept past one fusion round.
#[derive(Clone, Debug)]
pub struct NodePair {
    /// First unit of the pair.
    pub a: FusionId,
    /// Second unit of the pair.
    pub b: FusionId,
    /// Bytes of intermediate data fusion would keep in local storage.
    pub memory_score: SizeExpr,
    /// Topological spread of the pair; smaller means less risk of a
    /// memory-peak increase.
    pub proximity_score: i64,
    min_order: usize,
}

impl NodePair {
    /// Build a candidate, computing both scores eagerly. Cost is
    /// O(|read_writes|) per pair.
    pub fn new(a: FusionId, ua: &FusingNode, b: FusionId, ub: &FusingNode) -> Self {
        NodePair {
            a,
            b,
            memory_score: score_fusion_memory(ua, ub),
            proximity_score: proximity(ua, ub),
            min_order: ua.min_order,
        }
    }
}

/// Sum of the sizes of memory buffers present in both units' read/write
/// sets. Intersection is by buffer identity; the first match replaces
/// the zero accumulator outright so no `0 + x` term is ever built.
pub fn score_fusion_memory(a: &FusingNode, b: &FusingNode) -> SizeExpr {
    let mut total = SizeExpr::zero();
    for buf in &a.read_writes {
        if b.read_writes.contains(buf) {
            total = total.add(buf.size.clone());
        }
    }
    total
}

/// Topological spread a fusion of the two units would cover: the width
/// of the combined order range.
pub fn proximity(a: &FusingNode, b: &FusingNode) -> i64 {
    let lo = a.min_order.min(b.min_order) as i64;
    let hi = a.max_order.max(b.max_order) as i64;
    hi - lo
}

impl PartialEq for NodePair {
    fn eq(&self, other: &Self) -> bool {
        self.a == other.a && self.b == other.b
    }
}

impl Eq for NodePair {}

impl PartialOrd for NodePair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodePair {
    /// Priority order: higher memory score first; symbolic scores fall
    /// back to the structural comparison; ties broken by proximity
    /// (ascending, closer pairs first), then by the first unit's minimum
    /// topological order, then by handles for a total order.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_memory = match (self.memory_score.as_const(), other.memory_score.as_const()) {
            (Some(x), Some(y)) => y.cmp(&x),
            _ => {
                if self.memory_score == other.memory_score {
                    Ordering::Equal
                } else if self.memory_score.statically_gt(&other.memory_score) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
        };
        by_memory
            .then_with(|| self.proximity_score.cmp(&other.proximity_score))
            .then_with(|| self.min_order.cmp(&other.min_order))
            .then_with(|| (self.a, self.b).cmp(&(other.a, other.b)))
    }
}
