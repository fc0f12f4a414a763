//! Incremental cycle detection for fusion candidates.
//!
//! Built once per solve from a graph snapshot, after the initial
//! topological sort (building it from an unsorted graph risks seeding it
//! from inconsistent state). The solver asks whether merging a pair
//! would close a cycle before committing, and feeds every committed
//! merge back in via [`CycleDetector::expand_and_update`].

use std::collections::{BTreeMap, BTreeSet};

use autofuse_ir::{ComputeGraph, NodeId};

/// Successor-set snapshot of the graph, kept in sync with fusions.
#[derive(Clone, Debug)]
pub struct CycleDetector {
    succ: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl CycleDetector {
    /// Snapshot the graph's node adjacency.
    pub fn from_graph(graph: &ComputeGraph) -> Self {
        let mut succ: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for node in &graph.nodes {
            let entry = succ.entry(node.id).or_default();
            for &edge in &node.outputs {
                for consumer in graph.edge_consumers(edge) {
                    entry.insert(consumer.id);
                }
            }
        }
        Self { succ }
    }

    /// Would merging each `(a, b)` pair into a single node close a cycle?
    ///
    /// The snapshot is acyclic, so any new cycle must pass through a
    /// merged pair: it exists exactly when some path from one pair
    /// member leads back to the other through at least one outside node.
    /// Direct `a -> b` edges become internal to the merged node and are
    /// ignored.
    pub fn would_create_cycle(&self, pairs: &[(NodeId, NodeId)]) -> bool {
        pairs.iter().any(|&(a, b)| self.merge_closes_cycle(a, b))
    }

    fn merge_closes_cycle(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return false;
        }
        let mut stack: Vec<NodeId> = Vec::new();
        for &start in [a, b].iter() {
            if let Some(next) = self.succ.get(&start) {
                stack.extend(next.iter().filter(|&&n| n != a && n != b));
            }
        }
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        while let Some(n) = stack.pop() {
            if n == a || n == b {
                return true;
            }
            if !seen.insert(n) {
                continue;
            }
            if let Some(next) = self.succ.get(&n) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Replace the merged nodes with `new_id` in the snapshot: union
    /// their successors (minus themselves), and redirect every edge that
    /// pointed at a merged node.
    pub fn expand_and_update(&mut self, merged: &[NodeId], new_id: NodeId) {
        let mut union: BTreeSet<NodeId> = BTreeSet::new();
        for m in merged {
            if let Some(next) = self.succ.remove(m) {
                union.extend(next);
            }
        }
        for m in merged {
            union.remove(m);
        }
        self.succ.insert(new_id, union);

        for next in self.succ.values_mut() {
            let mut redirect = false;
            for m in merged {
                redirect |= next.remove(m);
            }
            if redirect {
                next.insert(new_id);
            }
        }
        // A merge may leave the new node pointing at itself via the
        // redirect pass; that edge is internal.
        if let Some(own) = self.succ.get_mut(&new_id) {
            own.remove(&new_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autofuse_ir::{DataType, Dim, GraphOp, TensorInfo, TensorShape};

    fn tensor(name: &str) -> TensorInfo {
        TensorInfo {
            name: name.into(),
            dtype: DataType::F32,
            shape: Some(TensorShape {
                dims: vec![Dim::Fixed(8)],
            }),
        }
    }

    // Diamond: a -> b, a -> c, b -> d, c -> d.
    fn diamond() -> (ComputeGraph, [NodeId; 4]) {
        let mut g = ComputeGraph::new();
        let e_in = g.add_edge(tensor("in"));
        let ab = g.add_edge(tensor("ab"));
        let ac = g.add_edge(tensor("ac"));
        let bd = g.add_edge(tensor("bd"));
        let cd = g.add_edge(tensor("cd"));
        let out = g.add_edge(tensor("out"));
        g.inputs = vec![e_in];
        g.outputs = vec![out];
        let a = g
            .add_node(GraphOp::Relu, vec![e_in], vec![ab, ac], "a")
            .unwrap();
        let b = g.add_node(GraphOp::Relu, vec![ab], vec![bd], "b").unwrap();
        let c = g.add_node(GraphOp::Relu, vec![ac], vec![cd], "c").unwrap();
        let d = g
            .add_node(GraphOp::Add, vec![bd, cd], vec![out], "d")
            .unwrap();
        (g, [a, b, c, d])
    }

    #[test]
    fn adjacent_merge_is_safe() {
        let (g, [a, b, _, _]) = diamond();
        let det = CycleDetector::from_graph(&g);
        assert!(!det.would_create_cycle(&[(a, b)]));
    }

    #[test]
    fn merging_endpoints_across_a_path_closes_cycle() {
        // Merging a and d pinches both branch paths into loops.
        let (g, [a, _, _, d]) = diamond();
        let det = CycleDetector::from_graph(&g);
        assert!(det.would_create_cycle(&[(a, d)]));
    }

    #[test]
    fn sibling_merge_is_safe() {
        let (g, [_, b, c, _]) = diamond();
        let det = CycleDetector::from_graph(&g);
        assert!(!det.would_create_cycle(&[(b, c)]));
    }

    #[test]
    fn chain_endpoint_merge_closes_cycle() {
        // a -> b -> c; merging a and c traps b in a loop.
        let mut g = ComputeGraph::new();
        let e0 = g.add_edge(tensor("e0"));
        let e1 = g.add_edge(tensor("e1"));
        let e2 = g.add_edge(tensor("e2"));
        let e3 = g.add_edge(tensor("e3"));
        g.inputs = vec![e0];
        g.outputs = vec![e3];
        let a = g.add_node(GraphOp::Relu, vec![e0], vec![e1], "a").unwrap();
        g.add_node(GraphOp::Relu, vec![e1], vec![e2], "b").unwrap();
        let c = g.add_node(GraphOp::Relu, vec![e2], vec![e3], "c").unwrap();

        let det = CycleDetector::from_graph(&g);
        assert!(det.would_create_cycle(&[(a, c)]));
    }

    #[test]
    fn expand_and_update_keeps_snapshot_consistent() {
        let (g, [a, b, c, d]) = diamond();
        let mut det = CycleDetector::from_graph(&g);

        // Merge a and b into a synthetic new node.
        let ab = NodeId(100);
        det.expand_and_update(&[a, b], ab);

        // The merged node now reaches c and d; merging it with d would
        // close a cycle through c, merging with c would not.
        assert!(det.would_create_cycle(&[(ab, d)]));
        assert!(!det.would_create_cycle(&[(ab, c)]));
    }

    #[test]
    fn self_pair_never_cycles() {
        let (g, [a, _, _, _]) = diamond();
        let det = CycleDetector::from_graph(&g);
        assert!(!det.would_create_cycle(&[(a, a)]));
    }
}
