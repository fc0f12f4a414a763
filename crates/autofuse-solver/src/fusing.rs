//! Fusion units and the live map.
//!
//! A [`FusingNode`] wraps one or more original graph nodes that have
//! been merged into a single unit. Units live in an arena; identity is
//! the arena handle, and the [`FusionSet`] maps each graph node id to
//! the unit currently representing it. Superseded units stay in the
//! arena as children of their successor, forming a fusion-history tree.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use autofuse_ir::{Arena, ComputeGraph, Handle, NodeId, SizeExpr};

use crate::error::SolveError;
use crate::memory::{self, MemoryBuffer};

/// Handle identifying a fusion unit in the arena.
pub type FusionId = Handle<FusingNode>;

/// Whether an original node is still represented, and by which unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// The node is the representative of a live unit.
    Live(FusionId),
    /// The node was merged away; it no longer exists in the graph.
    Absorbed,
}

/// One fusion unit: a representative graph node plus accumulated state
/// from every original node it subsumes.
#[derive(Clone, Debug)]
pub struct FusingNode {
    /// The current representative graph node.
    pub representative: NodeId,
    /// Topological position of the representative, refreshed after each
    /// re-sort.
    pub topo_id: usize,
    /// Smallest topological position over all subsumed original nodes.
    pub min_order: usize,
    /// Largest topological position over all subsumed original nodes.
    pub max_order: usize,
    /// Units merged to produce this one (fusion history, diagnostics
    /// only). Empty for leaf units.
    pub children: Vec<FusionId>,
    /// Original nodes that are topological predecessors of this unit.
    pub ancestors: BTreeSet<NodeId>,
    /// Memory buffers the representative reads and writes.
    pub read_writes: BTreeSet<MemoryBuffer>,
    /// Count of original leaf nodes subsumed.
    pub leaf_count: u32,
}

impl FusingNode {
    fn new(representative: NodeId, order: usize) -> Self {
        Self {
            representative,
            topo_id: order,
            min_order: order,
            max_order: order,
            children: Vec::new(),
            ancestors: BTreeSet::new(),
            read_writes: BTreeSet::new(),
            leaf_count: 1,
        }
    }

    /// Populate `read_writes` from the wrapped node. Called once at
    /// construction for leaf units; fused units get theirs recomputed
    /// inside [`FusionSet::fuse`].
    fn init(&mut self, graph: &ComputeGraph) {
        self.read_writes = memory::read_writes(graph, self.representative);
    }

    /// Refresh the cached topological id after a global re-sort. Leaf
    /// units also reset their order range to the new position; fused
    /// units keep the accumulated range from [`FusingNode::merge`].
    pub fn update_order(&mut self, order: usize) {
        self.topo_id = order;
        if self.children.is_empty() {
            self.min_order = order;
            self.max_order = order;
        }
    }

    /// Absorb another unit's state: expand the order range, record the
    /// child, union ancestors, accumulate the leaf count. Must be called
    /// exactly once per operand per fuse.
    fn merge(&mut self, other: &FusingNode, other_id: FusionId) {
        self.min_order = self.min_order.min(other.min_order);
        self.max_order = self.max_order.max(other.max_order);
        self.children.push(other_id);
        self.ancestors.extend(other.ancestors.iter().copied());
        self.leaf_count += other.leaf_count;
    }

    /// O(log n) lookup: is `candidate` a topological predecessor of this
    /// unit?
    pub fn is_ancestor(&self, candidate: NodeId) -> bool {
        self.ancestors.contains(&candidate)
    }

    /// Clear and recompute `read_writes` from the current representative.
    /// Called when an upstream fuse may have changed this unit's
    /// producers without going through [`FusionSet::fuse`].
    pub fn update_reads_and_writes(&mut self, graph: &ComputeGraph) {
        self.read_writes = memory::read_writes(graph, self.representative);
    }
}

/// The arena of fusion units plus the live map from graph node id to
/// current representative unit.
///
/// Invariant: the live entries partition the graph's current nodes; a
/// graph node id is `Live` exactly when the graph still contains it.
#[derive(Debug)]
pub struct FusionSet {
    arena: Arena<FusingNode>,
    state: BTreeMap<NodeId, NodeState>,
}

impl FusionSet {
    /// Build one leaf unit per graph node, with topological positions
    /// and ancestor sets computed from a fresh sort.
    pub fn from_graph(graph: &ComputeGraph) -> Result<Self, SolveError> {
        let order = graph.topological_order()?;

        // Ancestor sets propagate along the topological order: a node's
        // ancestors are its producers plus their ancestors.
        let mut ancestors: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for &id in &order {
            let node = graph.node(id).ok_or(SolveError::LiveMapInconsistency(id))?;
            let mut set = BTreeSet::new();
            for &edge in &node.inputs {
                if let Some(producer) = graph.edge_producer(edge) {
                    set.insert(producer.id);
                    if let Some(up) = ancestors.get(&producer.id) {
                        set.extend(up.iter().copied());
                    }
                }
            }
            ancestors.insert(id, set);
        }

        let mut arena = Arena::new();
        let mut state = BTreeMap::new();
        for (pos, &id) in order.iter().enumerate() {
            let mut unit = FusingNode::new(id, pos);
            unit.init(graph);
            unit.ancestors = ancestors.remove(&id).unwrap_or_default();
            let fid = arena.append(unit);
            state.insert(id, NodeState::Live(fid));
        }
        Ok(Self { arena, state })
    }

    /// The unit record for a handle.
    pub fn unit(&self, id: FusionId) -> &FusingNode {
        &self.arena[id]
    }

    /// Mutable unit record for a handle.
    pub fn unit_mut(&mut self, id: FusionId) -> &mut FusingNode {
        &mut self.arena[id]
    }

    /// The state of an original node, if it was ever part of this solve.
    pub fn state(&self, node: NodeId) -> Option<NodeState> {
        self.state.get(&node).copied()
    }

    /// The live unit currently representing a graph node, if any.
    pub fn live_id(&self, node: NodeId) -> Option<FusionId> {
        match self.state.get(&node) {
            Some(NodeState::Live(fid)) => Some(*fid),
            _ => None,
        }
    }

    /// Returns `true` if the unit is still a current representative.
    pub fn is_live(&self, id: FusionId) -> bool {
        self.live_id(self.arena[id].representative) == Some(id)
    }

    /// Iterate over `(representative node, unit handle)` for all live
    /// units, in node-id order.
    pub fn live_units(&self) -> impl Iterator<Item = (NodeId, FusionId)> + '_ {
        self.state.iter().filter_map(|(&n, &s)| match s {
            NodeState::Live(fid) => Some((n, fid)),
            NodeState::Absorbed => None,
        })
    }

    /// Number of live units.
    pub fn live_count(&self) -> usize {
        self.live_units().count()
    }

    /// Total read-write bytes over all live units (statistics).
    pub fn total_live_bytes(&self) -> SizeExpr {
        let mut total = SizeExpr::zero();
        for (_, fid) in self.live_units() {
            for buf in &self.arena[fid].read_writes {
                total = total.add(buf.size.clone());
            }
        }
        total
    }

    /// Distribution of subsumed-leaf counts over live units.
    pub fn unit_sizes(&self) -> Vec<u32> {
        self.live_units()
            .map(|(_, fid)| self.arena[fid].leaf_count)
            .collect()
    }

    /// Commit a fusion: wrap the freshly created graph node `new_rep` in
    /// a new unit absorbing `a` and `b`, recompute its read/write set,
    /// push it (and its ancestors) into every downstream consumer's
    /// ancestor set, force those consumers to recompute their read/write
    /// sets, and update the live map.
    ///
    /// Fails when a downstream consumer has no live unit, which means
    /// the bookkeeping is corrupt and the solve must abort.
    pub fn fuse(
        &mut self,
        graph: &ComputeGraph,
        new_rep: NodeId,
        a: FusionId,
        b: FusionId,
    ) -> Result<FusionId, SolveError> {
        let rep_a = self.arena[a].representative;
        let rep_b = self.arena[b].representative;

        let unit_a = self.arena[a].clone();
        let unit_b = self.arena[b].clone();
        let mut unit = FusingNode::new(new_rep, unit_a.min_order);
        unit.leaf_count = 0;
        unit.merge(&unit_a, a);
        unit.merge(&unit_b, b);
        unit.topo_id = unit.min_order;
        unit.update_reads_and_writes(graph);

        let merged_ancestors = unit.ancestors.clone();
        let fid = self.arena.append(unit);

        self.state.insert(rep_a, NodeState::Absorbed);
        self.state.insert(rep_b, NodeState::Absorbed);
        self.state.insert(new_rep, NodeState::Live(fid));

        // Downstream consumers now read from a different producer whose
        // shape set may have changed.
        let node = graph
            .node(new_rep)
            .ok_or(SolveError::LiveMapInconsistency(new_rep))?;
        let mut touched: BTreeSet<NodeId> = BTreeSet::new();
        for &edge in &node.outputs {
            for consumer in graph.edge_consumers(edge) {
                if consumer.id != new_rep {
                    touched.insert(consumer.id);
                }
            }
        }
        for consumer in touched {
            let cid = self
                .live_id(consumer)
                .ok_or(SolveError::LiveMapInconsistency(consumer))?;
            let rec = &mut self.arena[cid];
            rec.ancestors.insert(new_rep);
            rec.ancestors.extend(merged_ancestors.iter().copied());
            rec.update_reads_and_writes(graph);
        }
        Ok(fid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autofuse_ir::{DataType, Dim, GraphOp, TensorInfo, TensorShape};

    fn tensor(name: &str, dims: &[u64]) -> TensorInfo {
        TensorInfo {
            name: name.into(),
            dtype: DataType::F32,
            shape: Some(TensorShape {
                dims: dims.iter().map(|&d| Dim::Fixed(d)).collect(),
            }),
        }
    }

    // a -> b -> c chain sharing buffer m between a/b and n between b/c.
    fn chain() -> (ComputeGraph, [NodeId; 3]) {
        let mut g = ComputeGraph::new();
        let e_in = g.add_edge(tensor("in", &[100]));
        let m = g.add_edge(tensor("m", &[200]));
        let n = g.add_edge(tensor("n", &[200]));
        let out = g.add_edge(tensor("out", &[200]));
        g.inputs = vec![e_in];
        g.outputs = vec![out];
        let a = g.add_node(GraphOp::MatMul, vec![e_in], vec![m], "a").unwrap();
        let b = g.add_node(GraphOp::Add, vec![m], vec![n], "b").unwrap();
        let c = g.add_node(GraphOp::Relu, vec![n], vec![out], "c").unwrap();
        (g, [a, b, c])
    }

    #[test]
    fn leaf_units_partition_graph() {
        let (g, nodes) = chain();
        let set = FusionSet::from_graph(&g).unwrap();
        assert_eq!(set.live_count(), 3);
        for &n in &nodes {
            assert!(set.live_id(n).is_some());
        }
    }

    #[test]
    fn ancestors_propagate_transitively() {
        let (g, [a, b, c]) = chain();
        let set = FusionSet::from_graph(&g).unwrap();
        let unit_c = set.unit(set.live_id(c).unwrap());
        assert!(unit_c.is_ancestor(a));
        assert!(unit_c.is_ancestor(b));
        let unit_a = set.unit(set.live_id(a).unwrap());
        assert!(!unit_a.is_ancestor(c));
        // A unit never reports itself as its own ancestor.
        assert!(!unit_a.is_ancestor(a));
    }

    #[test]
    fn order_bounds_valid_after_init() {
        let (g, [a, _, c]) = chain();
        let set = FusionSet::from_graph(&g).unwrap();
        let ua = set.unit(set.live_id(a).unwrap());
        let uc = set.unit(set.live_id(c).unwrap());
        assert!(ua.min_order <= ua.max_order);
        assert!(ua.max_order < uc.min_order);
    }

    #[test]
    fn fuse_updates_live_map_and_downstream() {
        let (mut g, [a, b, c]) = chain();
        let mut set = FusionSet::from_graph(&g).unwrap();
        let fa = set.live_id(a).unwrap();
        let fb = set.live_id(b).unwrap();

        let new_rep = g.fuse_pair(a, b, 0).unwrap();
        let fid = set.fuse(&g, new_rep, fa, fb).unwrap();

        assert_eq!(set.state(a), Some(NodeState::Absorbed));
        assert_eq!(set.state(b), Some(NodeState::Absorbed));
        assert_eq!(set.live_id(new_rep), Some(fid));
        assert_eq!(set.live_count(), 2);

        let unit = set.unit(fid);
        assert_eq!(unit.leaf_count, 2);
        assert_eq!(unit.min_order, 0);
        assert_eq!(unit.max_order, 1);
        assert_eq!(unit.children.len(), 2);

        // Downstream consumer c gained the new unit as an ancestor and
        // refreshed its read set.
        let unit_c = set.unit(set.live_id(c).unwrap());
        assert!(unit_c.is_ancestor(new_rep));
        assert!(unit_c
            .read_writes
            .iter()
            .any(|buf| buf.name == "n"));
    }

    #[test]
    fn is_live_tracks_absorption() {
        let (mut g, [a, b, _]) = chain();
        let mut set = FusionSet::from_graph(&g).unwrap();
        let fa = set.live_id(a).unwrap();
        let fb = set.live_id(b).unwrap();
        assert!(set.is_live(fa));

        let new_rep = g.fuse_pair(a, b, 0).unwrap();
        let fid = set.fuse(&g, new_rep, fa, fb).unwrap();
        assert!(!set.is_live(fa));
        assert!(!set.is_live(fb));
        assert!(set.is_live(fid));
    }

    #[test]
    fn update_order_resets_leaf_range_only() {
        let (g, [a, _, _]) = chain();
        let mut set = FusionSet::from_graph(&g).unwrap();
        let fa = set.live_id(a).unwrap();
        set.unit_mut(fa).update_order(7);
        let unit = set.unit(fa);
        assert_eq!((unit.min_order, unit.max_order, unit.topo_id), (7, 7, 7));
    }

    #[test]
    fn total_bytes_and_sizes() {
        let (g, _) = chain();
        let set = FusionSet::from_graph(&g).unwrap();
        // a: writes m (800); b: reads m, writes n (1600); c: reads n,
        // writes out (1600).
        assert_eq!(set.total_live_bytes().as_const(), Some(4000));
        assert_eq!(set.unit_sizes(), vec![1, 1, 1]);
    }
}
