//! The fusion strategy solver.
//!
//! A greedy, iterative graph rewriter: enumerate candidate pairs, gate
//! them through decider rules and the cycle check, commit the highest
//! priority fusion, update the bookkeeping, repeat until fixed point or
//! the round cap. All graph mutation happens in place on the caller's
//! graph; the solver's own unit arena is discarded when `fuse` returns.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use autofuse_decider::{DeciderRegistry, FusionDecider};
use autofuse_ir::{dump_graph, ComputeGraph, EdgeId, Framework, SizeExpr};

use crate::cycle::CycleDetector;
use crate::error::SolveError;
use crate::fusing::{FusionId, FusionSet};
use crate::memory;
use crate::score::{proximity, score_fusion_memory, NodePair};

/// Solver-lifetime configuration. The thresholds are tunable policy,
/// not invariants.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Upper bound on fusion rounds per solve.
    pub max_fuse_rounds: u32,
    /// Horizontal fusion is rejected when the pair's topological spread
    /// exceeds this (peak-memory heuristic).
    pub max_proximity: i64,
    /// Horizontal fusion is rejected when the combined written-output
    /// bytes would exceed this.
    pub max_output_memory_size_after_fusion: i64,
    /// Decider framework used when the graph carries no tag of its own.
    pub framework: Framework,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_fuse_rounds: 8,
            max_proximity: 16,
            max_output_memory_size_after_fusion: 1 << 20,
            framework: Framework::Generic,
        }
    }
}

/// Summary statistics of one solve. Detailed per-pair reasons live in
/// the logs, not here.
#[derive(Clone, Debug)]
pub struct FusionReport {
    /// Node count before fusion.
    pub nodes_before: usize,
    /// Node count after fusion.
    pub nodes_after: usize,
    /// Number of committed fusions.
    pub fusions: u64,
    /// Rounds actually run.
    pub rounds: u32,
    /// Total read-write bytes before fusion.
    pub bytes_before: SizeExpr,
    /// Total read-write bytes after fusion.
    pub bytes_after: SizeExpr,
    /// Subsumed-leaf counts of the surviving units.
    pub unit_sizes: Vec<u32>,
}

impl fmt::Display for FusionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} node(s), {} fusion(s) in {} round(s), bytes {} -> {}",
            self.nodes_before,
            self.nodes_after,
            self.fusions,
            self.rounds,
            self.bytes_before,
            self.bytes_after,
        )
    }
}

/// Drives fusion over a compute graph.
#[derive(Debug, Default)]
pub struct FusionStrategySolver {
    config: SolverConfig,
}

impl FusionStrategySolver {
    /// Create a solver with the given configuration.
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Run the full fusion loop on `graph`, mutating it in place.
    ///
    /// The decider is resolved from the graph's framework tag, falling
    /// back to the configured framework. Single-threaded; the caller
    /// must not mutate the graph concurrently.
    pub fn fuse(
        &self,
        graph: &mut ComputeGraph,
        registry: &DeciderRegistry,
    ) -> Result<FusionReport, SolveError> {
        let framework = graph.framework().unwrap_or(self.config.framework);
        let decider = registry
            .find(framework)
            .ok_or(SolveError::UnknownDecider(framework))?;

        // The unit set performs the initial topological sort; the cycle
        // detector must be seeded after it.
        let set = FusionSet::from_graph(graph)?;
        let cycle = CycleDetector::from_graph(graph);

        let mut pass = SolvePass {
            graph,
            decider,
            cfg: &self.config,
            set,
            cycle,
            can_not_fuse: BTreeSet::new(),
            fuse_counter: 0,
            fusions: 0,
        };
        pass.run()
    }
}

/// Per-solve state, discarded when the solve finishes.
struct SolvePass<'a> {
    graph: &'a mut ComputeGraph,
    decider: &'a dyn FusionDecider,
    cfg: &'a SolverConfig,
    set: FusionSet,
    cycle: CycleDetector,
    /// Persistent negative cache: pairs rejected for structural or
    /// decider reasons stay rejected for the rest of the solve.
    can_not_fuse: BTreeSet<(FusionId, FusionId)>,
    fuse_counter: u64,
    fusions: u64,
}

impl SolvePass<'_> {
    fn run(&mut self) -> Result<FusionReport, SolveError> {
        let nodes_before = self.graph.node_count();
        let bytes_before = self.set.total_live_bytes();
        let mut rounds = 0u32;
        let mut last_round_changed = false;

        while rounds < self.cfg.max_fuse_rounds {
            rounds += 1;
            let before = self.set.live_count();
            self.fuse_nodes_once()?;
            let after = self.set.live_count();
            last_round_changed = after != before;
            if after == before {
                break;
            }
            self.reconcile()?;
            if after <= 1 {
                break;
            }
        }

        // Fused units are flat nodes here, so nested fusible regions
        // surface as ordinary candidates; give them one extra round when
        // the cap cut the loop short while fusions were still landing.
        if rounds == self.cfg.max_fuse_rounds
            && last_round_changed
            && self.set.live_count() > 1
        {
            let before = self.set.live_count();
            self.fuse_nodes_once()?;
            if self.set.live_count() < before {
                self.reconcile()?;
                rounds += 1;
            }
        }

        let report = FusionReport {
            nodes_before,
            nodes_after: self.graph.node_count(),
            fusions: self.fusions,
            rounds,
            bytes_before,
            bytes_after: self.set.total_live_bytes(),
            unit_sizes: self.set.unit_sizes(),
        };
        log::info!(
            "fusion complete: {} -> {} node(s), {} fusion(s), {} round(s)",
            report.nodes_before,
            report.nodes_after,
            report.fusions,
            report.rounds,
        );
        log::info!(
            "read-write bytes: {} -> {}; unit sizes: {:?}",
            report.bytes_before,
            report.bytes_after,
            report.unit_sizes,
        );
        Ok(report)
    }

    /// One fusion round: enumerate, then commit candidates in priority
    /// order, skipping any invalidated by earlier commits this round.
    fn fuse_nodes_once(&mut self) -> Result<(), SolveError> {
        let candidates = self.possible_fusions()?;
        for pair in candidates {
            if !self.set.is_live(pair.a) || !self.set.is_live(pair.b) {
                continue;
            }
            let rep_a = self.set.unit(pair.a).representative;
            let rep_b = self.set.unit(pair.b).representative;
            if self.cycle.would_create_cycle(&[(rep_a, rep_b)]) {
                log::info!("reject {rep_a:?}+{rep_b:?}: would-create-cycle");
                continue;
            }
            self.fuse_node(&pair)?;
        }
        Ok(())
    }

    /// Candidate generation.
    ///
    /// Pre-seeded mode consumes graph-carried hint pairs exactly once;
    /// otherwise units are grouped by shared memory buffer and all
    /// unordered pairs within a group are checked, with a per-round
    /// dedup set so pairs sharing several buffers are checked once.
    /// Candidates are bucketed by decider pair priority, each bucket
    /// sorted by score, and the buckets concatenated in priority order.
    fn possible_fusions(&mut self) -> Result<Vec<NodePair>, SolveError> {
        let hints = self.graph.take_hint_pairs();
        let mut raw: Vec<NodePair> = Vec::new();

        if !hints.is_empty() {
            log::debug!("pre-seeded mode: {} hint pair(s)", hints.len());
            for (na, nb) in hints {
                let (Some(fa), Some(fb)) = (self.set.live_id(na), self.set.live_id(nb))
                else {
                    log::warn!("hint pair ({na:?}, {nb:?}) references absorbed or unknown nodes");
                    continue;
                };
                if self.can_fuse(fa, fb) {
                    raw.push(NodePair::new(fa, self.set.unit(fa), fb, self.set.unit(fb)));
                }
            }
        } else {
            let mut groups: BTreeMap<EdgeId, Vec<FusionId>> = BTreeMap::new();
            for (_, fid) in self.set.live_units() {
                for buf in &self.set.unit(fid).read_writes {
                    groups.entry(buf.edge).or_default().push(fid);
                }
            }

            let mut repeat_check: BTreeSet<(FusionId, FusionId)> = BTreeSet::new();
            for members in groups.values() {
                for i in 0..members.len() {
                    for j in (i + 1)..members.len() {
                        let (a, b) = ordered(members[i], members[j]);
                        if !repeat_check.insert((a, b)) {
                            continue;
                        }
                        if self.can_fuse(a, b) {
                            raw.push(NodePair::new(
                                a,
                                self.set.unit(a),
                                b,
                                self.set.unit(b),
                            ));
                        }
                    }
                }
            }
        }

        let mut buckets: BTreeMap<u32, Vec<NodePair>> = BTreeMap::new();
        for pair in raw {
            let rep_a = self.set.unit(pair.a).representative;
            let rep_b = self.set.unit(pair.b).representative;
            let priority = self.decider.fusion_pair_priority(self.graph, rep_a, rep_b);
            buckets.entry(priority).or_default().push(pair);
        }

        let mut out = Vec::new();
        for (_, mut bucket) in buckets {
            bucket.sort();
            out.extend(bucket);
        }
        Ok(out)
    }

    /// The feasibility gate. Returns `false` with an info-level reason
    /// code on rejection. Structural and decider rejections are cached
    /// for the lifetime of the solve; the proximity heuristic is not,
    /// since the spread of a unit changes as the graph evolves.
    fn can_fuse(&mut self, a: FusionId, b: FusionId) -> bool {
        if a == b {
            log::info!("reject {a:?}+{b:?}: self-pair");
            return false;
        }
        let key = ordered(a, b);
        if self.can_not_fuse.contains(&key) {
            log::info!("reject {a:?}+{b:?}: cached");
            return false;
        }

        let (rep_a, rep_b, mem, vertical, prox) = {
            let ua = self.set.unit(a);
            let ub = self.set.unit(b);
            let vertical =
                ua.is_ancestor(ub.representative) || ub.is_ancestor(ua.representative);
            (
                ua.representative,
                ub.representative,
                score_fusion_memory(ua, ub),
                vertical,
                proximity(ua, ub),
            )
        };

        if mem.is_zero() {
            log::info!("reject {rep_a:?}+{rep_b:?}: no-shared-memory");
            self.can_not_fuse.insert(key);
            return false;
        }

        if vertical {
            if !self.decider.can_fuse_vertical(self.graph, rep_a, rep_b) {
                log::info!("reject {rep_a:?}+{rep_b:?}: vertical-forbidden");
                self.can_not_fuse.insert(key);
                return false;
            }
        } else {
            if prox > self.cfg.max_proximity {
                log::info!(
                    "reject {rep_a:?}+{rep_b:?}: proximity-exceeded ({prox} > {})",
                    self.cfg.max_proximity
                );
                return false;
            }
            if !self.decider.can_fuse_horizontal(self.graph, rep_a, rep_b) {
                log::info!("reject {rep_a:?}+{rep_b:?}: horizontal-forbidden");
                self.can_not_fuse.insert(key);
                return false;
            }
            let combined = memory::written_bytes(self.graph, rep_a)
                .add(memory::written_bytes(self.graph, rep_b));
            let limit = self.cfg.max_output_memory_size_after_fusion;
            let too_big = match combined.as_const() {
                Some(c) => c > limit,
                None => combined.statically_gt(&SizeExpr::Const(limit)),
            };
            if too_big {
                log::info!(
                    "reject {rep_a:?}+{rep_b:?}: output-size-exceeded ({combined} > {limit})"
                );
                self.can_not_fuse.insert(key);
                return false;
            }
        }
        true
    }

    /// Commit one fusion. Decider construction failure skips the pair
    /// (with a diagnostic dump) and the solve continues; bookkeeping
    /// inconsistencies abort the solve.
    fn fuse_node(&mut self, pair: &NodePair) -> Result<(), SolveError> {
        let rep_a = self.set.unit(pair.a).representative;
        let rep_b = self.set.unit(pair.b).representative;

        let Some(new_id) = self
            .decider
            .fuse(self.graph, rep_a, rep_b, self.fuse_counter)
        else {
            log::warn!("decider failed to fuse {rep_a:?}+{rep_b:?}, skipping pair");
            log::debug!("graph at failure:\n{}", dump_graph(self.graph));
            return Ok(());
        };
        self.fuse_counter += 1;

        // Guaranteed by the cycle gate, checked anyway.
        if self.graph.has_self_loop(new_id) {
            return Err(SolveError::SelfLoop(new_id));
        }

        self.set.fuse(self.graph, new_id, pair.a, pair.b)?;
        self.cycle.expand_and_update(&[rep_a, rep_b], new_id);
        self.fusions += 1;
        log::debug!(
            "fused {rep_a:?}+{rep_b:?} -> {new_id:?} (memory score {})",
            pair.memory_score
        );
        Ok(())
    }

    /// After a round that shrank the live map: re-sort and refresh every
    /// unit's cached topological position.
    fn reconcile(&mut self) -> Result<(), SolveError> {
        let order = self.graph.topological_order()?;
        for (pos, id) in order.iter().enumerate() {
            let fid = self
                .set
                .live_id(*id)
                .ok_or(SolveError::LiveMapInconsistency(*id))?;
            self.set.unit_mut(fid).update_order(pos);
        }
        Ok(())
    }
}

fn ordered(a: FusionId, b: FusionId) -> (FusionId, FusionId) {
    if a <= b { (a, b) } else { (b, a) }
}
