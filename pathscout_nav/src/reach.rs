// Reachability evaluation: which bodies can get from node A to node B.
//
// `ReachabilityEvaluator::evaluate` classifies one ordered node pair. After a
// cheap line-of-sight reject it places the probe at the start node and has
// it walk to the end node once per trial envelope, smallest first
// (crouched, human, small, common, wide, max by default). The smallest must
// pass or no edge exists. The ladder stops at the first envelope that fails;
// the edge records the largest envelope that passed, the union of movement
// modes the passing walks used, and the hardest landing observed.
//
// Because the trials stop at the first failure and the recorded envelope is
// the largest passing one, a body no larger than the recorded envelope with
// a superset of the recorded capabilities is always supported, and a
// smaller body is never rejected where a larger one is accepted.
//
// Edge distance is the straight-line distance, multiplied by the swim
// penalty when swimming was needed and by the crouch penalty when only
// bodies smaller than a standing human fit. Door nodes add DOOR and
// player-only nodes add PLAYER_ONLY to every edge touching them.
//
// Candidate filtering (`is_candidate`) applies the cheap structural rules
// before any probing: maximum edge distance, NO_AUTO_CONNECT, designer
// overrides, one-way facing.
//
// `evaluate_pairs` runs a batch either sequentially or on the rayon pool;
// each worker clones the probe, and results come back in pair order so
// parallel and sequential builds produce identical graphs.
//
// See also: `probe.rs` for the simulated walk, `builder.rs` which drives
// evaluation, `graph.rs` for `ReachSpec`.

use crate::config::ReachConfig;
use crate::geometry::{LevelGeometry, LineMode};
use crate::graph::{NavNode, PathGraph, ReachSpec};
use crate::probe::ProbeAgent;
use crate::types::{Capsule, NodeFlags, NodeHandle, ReachFlags, Vec3, flatten};
use rayon::prelude::*;

/// Result of the envelope ladder for one ordered pair of points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvelopeTrial {
    /// Index of the largest passing envelope.
    pub envelope: usize,
    pub radius: f32,
    pub height: f32,
    pub flags: ReachFlags,
    pub max_fall_speed: f32,
    pub distance: f32,
}

pub struct ReachabilityEvaluator<'a, G: LevelGeometry + ?Sized> {
    geometry: &'a G,
    config: &'a ReachConfig,
}

impl<'a, G: LevelGeometry + ?Sized> ReachabilityEvaluator<'a, G> {
    pub fn new(geometry: &'a G, config: &'a ReachConfig) -> Self {
        Self { geometry, config }
    }

    pub fn config(&self) -> &ReachConfig {
        self.config
    }

    /// Largest configured envelope, used for edges nothing is probed on.
    pub fn max_envelope(&self) -> Capsule {
        self.config
            .envelopes
            .last()
            .map_or(Capsule::new(f32::MAX, f32::MAX), |e| e.capsule())
    }

    /// Classify the edge `start -> end`. `None` if no envelope can make it
    /// or either handle is stale. The probe's capsule is left changed.
    pub fn evaluate(
        &self,
        graph: &PathGraph,
        start: NodeHandle,
        end: NodeHandle,
        probe: &mut ProbeAgent,
    ) -> Option<ReachSpec> {
        let a = graph.node(start)?;
        let b = graph.node(end)?;
        let trial = self.trial(a.position, b.position, probe)?;

        let mut flags = trial.flags | a.kind.implied_flags() | b.kind.implied_flags();
        if a.flags.contains(NodeFlags::PLAYER_ONLY) || b.flags.contains(NodeFlags::PLAYER_ONLY) {
            flags |= ReachFlags::PLAYER_ONLY;
        }
        Some(ReachSpec {
            start,
            end,
            distance: trial.distance,
            radius: trial.radius,
            height: trial.height,
            flags,
            max_landing_speed: trial.max_fall_speed,
            pruned: false,
        })
    }

    /// Run the envelope ladder from `from` to `to`.
    pub fn trial(&self, from: Vec3, to: Vec3, probe: &mut ProbeAgent) -> Option<EnvelopeTrial> {
        if self.occluded(from, to) {
            return None;
        }
        probe.set_caps(self.config.probe_caps);

        let mut best: Option<usize> = None;
        let mut flags = ReachFlags::NONE;
        let mut max_fall_speed = 0.0f32;
        for (i, envelope) in self.config.envelopes.iter().enumerate() {
            probe.set_capsule(envelope.capsule());
            if !probe.place_at(self.geometry, from) {
                break;
            }
            let walk = probe.walk_to(self.geometry, to);
            if !walk.reached {
                break;
            }
            flags |= walk.flags;
            max_fall_speed = max_fall_speed.max(walk.max_fall_speed);
            best = Some(i);
        }
        let best = best?;
        let envelope = &self.config.envelopes[best];

        let mut distance = from.distance(to);
        if flags.contains(ReachFlags::SWIM) {
            distance *= self.config.swim_penalty;
        }
        if best < self.config.human_envelope {
            distance *= self.config.crouch_penalty;
        }
        Some(EnvelopeTrial {
            envelope: best,
            radius: envelope.radius,
            height: envelope.height,
            flags,
            max_fall_speed,
            distance,
        })
    }

    /// Fast reject before probing. A ledge edge clips the lip on the straight
    /// line, so the dog-leg over the top at the higher end's height also
    /// counts as open.
    fn occluded(&self, from: Vec3, to: Vec3) -> bool {
        let blocked = |a: Vec3, b: Vec3| self.geometry.line_check(a, b, LineMode::AnyHit).is_some();
        if !blocked(from, to) {
            return false;
        }
        let top = from.y.max(to.y);
        let over_from = Vec3::new(from.x, top, from.z);
        let over_to = Vec3::new(to.x, top, to.z);
        blocked(from, over_from) || blocked(over_from, over_to) || blocked(over_to, to)
    }

    /// True if a body of `capsule` can walk from `from` to `to`.
    pub fn walkable(&self, from: Vec3, to: Vec3, capsule: Capsule, probe: &mut ProbeAgent) -> bool {
        probe.set_capsule(capsule);
        probe.set_caps(self.config.probe_caps);
        probe.can_reach(self.geometry, from, to)
    }

    /// Evaluate a batch of ordered pairs. Results are in pair order.
    pub fn evaluate_pairs(
        &self,
        graph: &PathGraph,
        pairs: &[(NodeHandle, NodeHandle)],
        probe: &ProbeAgent,
        parallel: bool,
    ) -> Vec<Option<ReachSpec>> {
        if parallel {
            pairs
                .par_iter()
                .map_init(|| probe.clone(), |p, &(a, b)| self.evaluate(graph, a, b, p))
                .collect()
        } else {
            let mut p = probe.clone();
            pairs
                .iter()
                .map(|&(a, b)| self.evaluate(graph, a, b, &mut p))
                .collect()
        }
    }
}

/// Structural pre-filter for evaluating `a -> b`: within `max_distance`, no
/// NO_AUTO_CONNECT on either end, no designer override between them, and
/// one-way facing respected at both ends.
pub fn is_candidate(a: &NavNode, b: &NavNode, max_distance: f32) -> bool {
    if a.handle == b.handle {
        return false;
    }
    let offset = b.position - a.position;
    if offset.length() > max_distance {
        return false;
    }
    if a.flags.contains(NodeFlags::NO_AUTO_CONNECT) || b.flags.contains(NodeFlags::NO_AUTO_CONNECT) {
        return false;
    }
    if a.forced.contains(&b.label) || a.proscribed.contains(&b.label) {
        return false;
    }
    let heading = flatten(offset);
    if a.flags.contains(NodeFlags::ONE_WAY) && heading.dot(flatten(a.facing)) <= 0.0 {
        return false;
    }
    if b.flags.contains(NodeFlags::ONE_WAY) && heading.dot(flatten(b.facing)) <= 0.0 {
        return false;
    }
    true
}

/// Ordered candidate pairs among `graph`'s nodes. With `only`, at least one
/// end must be in it.
pub fn candidate_pairs(
    graph: &PathGraph,
    max_distance: f32,
    only: Option<&dyn Fn(NodeHandle) -> bool>,
) -> Vec<(NodeHandle, NodeHandle)> {
    let nodes: Vec<&NavNode> = graph.iter().collect();
    let mut pairs = Vec::new();
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            if let Some(filter) = only {
                if !filter(a.handle) && !filter(b.handle) {
                    continue;
                }
            }
            if is_candidate(a, b, max_distance) {
                pairs.push((a.handle, b.handle));
            }
            if is_candidate(b, a, max_distance) {
                pairs.push((b.handle, a.handle));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewNode;
    use crate::types::Traveler;
    use crate::voxel_level::{VoxelKind, VoxelLevel};

    fn stand(level: &VoxelLevel, x: i32, floor_y: i32, z: i32) -> Vec3 {
        level.stand_point(x, floor_y, z, 0.9)
    }

    #[test]
    fn open_floor_passes_every_envelope() {
        let level = VoxelLevel::with_floor(20, 8, 20, 1.0);
        let config = ReachConfig::default();
        let eval = ReachabilityEvaluator::new(&level, &config);
        let mut probe = ProbeAgent::from_config(&config);
        let trial = eval
            .trial(stand(&level, 5, 0, 9), stand(&level, 12, 0, 9), &mut probe)
            .unwrap();
        assert_eq!(trial.envelope, config.envelopes.len() - 1);
        assert_eq!(trial.flags, ReachFlags::WALK);
        assert!((trial.distance - 7.0).abs() < 1e-4);
    }

    #[test]
    fn narrow_gap_limits_envelope() {
        let mut level = VoxelLevel::with_floor(80, 32, 80, 0.25);
        // Wall across the level with a 1.25 m doorway.
        level.fill_box([28, 1, 0], [31, 22, 79], VoxelKind::Solid);
        level.fill_box([28, 1, 36], [31, 14, 40], VoxelKind::Air);
        let config = ReachConfig::default();
        let eval = ReachabilityEvaluator::new(&level, &config);
        let mut probe = ProbeAgent::from_config(&config);
        let from = Vec3::new(4.5, 1.15, 9.625);
        let to = Vec3::new(11.5, 1.15, 9.625);
        let trial = eval.trial(from, to, &mut probe).unwrap();
        // Fits radius 0.5, not 0.75.
        assert_eq!(config.envelopes[trial.envelope].name, "small");
    }

    #[test]
    fn wall_means_no_edge() {
        let mut level = VoxelLevel::with_floor(20, 8, 20, 1.0);
        level.fill_box([9, 1, 0], [9, 7, 19], VoxelKind::Solid);
        let config = ReachConfig::default();
        let eval = ReachabilityEvaluator::new(&level, &config);
        let mut probe = ProbeAgent::from_config(&config);
        assert!(eval
            .trial(stand(&level, 5, 0, 9), stand(&level, 12, 0, 9), &mut probe)
            .is_none());
    }

    #[test]
    fn ledge_is_one_way() {
        let mut level = VoxelLevel::with_floor(20, 10, 20, 1.0);
        level.fill_box([0, 1, 0], [6, 3, 19], VoxelKind::Solid);
        let config = ReachConfig::default();
        let eval = ReachabilityEvaluator::new(&level, &config);
        let mut graph = PathGraph::new();
        let high = graph.add_node(NewNode::auto(stand(&level, 4, 3, 9)));
        let low = graph.add_node(NewNode::auto(stand(&level, 10, 0, 9)));
        let mut probe = ProbeAgent::from_config(&config);
        let down = eval.evaluate(&graph, high, low, &mut probe).unwrap();
        assert!(down.max_landing_speed > 0.0);
        assert!(eval.evaluate(&graph, low, high, &mut probe).is_none());
    }

    #[test]
    fn swimming_costs_more() {
        let mut level = VoxelLevel::with_floor(20, 8, 20, 1.0);
        level.fill_box([7, 0, 0], [10, 1, 19], VoxelKind::Water);
        let config = ReachConfig::default();
        let eval = ReachabilityEvaluator::new(&level, &config);
        let mut probe = ProbeAgent::from_config(&config);
        let from = stand(&level, 4, 0, 9);
        let to = stand(&level, 14, 0, 9);
        let trial = eval.trial(from, to, &mut probe).unwrap();
        assert!(trial.flags.contains(ReachFlags::SWIM));
        assert!((trial.distance - from.distance(to) * config.swim_penalty).abs() < 1e-3);
    }

    #[test]
    fn door_nodes_imply_door_flag() {
        let level = VoxelLevel::with_floor(20, 8, 20, 1.0);
        let config = ReachConfig::default();
        let eval = ReachabilityEvaluator::new(&level, &config);
        let mut graph = PathGraph::new();
        let a = graph.add_node(NewNode::auto(stand(&level, 3, 0, 3)));
        let door = graph.add_node(NewNode::auto(stand(&level, 7, 0, 3)).kind(crate::graph::NodeKind::Door));
        let mut probe = ProbeAgent::from_config(&config);
        let spec = eval.evaluate(&graph, a, door, &mut probe).unwrap();
        assert!(spec.flags.contains(ReachFlags::DOOR));
        let mut no_doors = Traveler::human();
        no_doors.caps.remove(ReachFlags::DOOR);
        assert!(!spec.supports(&no_doors));
    }

    #[test]
    fn envelope_support_is_monotonic() {
        // A level with gaps and a low ceiling so edges land on different
        // envelopes; every edge must accept every smaller, less capable body
        // that a larger one is accepted with.
        let mut level = VoxelLevel::with_floor(48, 16, 48, 0.5);
        level.fill_box([20, 1, 0], [21, 12, 47], VoxelKind::Solid);
        level.fill_box([20, 1, 10], [21, 4, 12], VoxelKind::Air);
        level.fill_box([20, 1, 30], [21, 3, 34], VoxelKind::Air);
        let config = ReachConfig::default();
        let eval = ReachabilityEvaluator::new(&level, &config);
        let mut graph = PathGraph::new();
        for &(x, z) in &[(4.0, 5.5), (4.0, 16.0), (16.0, 5.5), (16.0, 16.0), (7.0, 11.0)] {
            graph.add_node(NewNode::auto(Vec3::new(x, 1.4, z)));
        }
        let pairs = candidate_pairs(&graph, 20.0, None);
        let probe = ProbeAgent::from_config(&config);
        let specs: Vec<ReachSpec> = eval
            .evaluate_pairs(&graph, &pairs, &probe, false)
            .into_iter()
            .flatten()
            .collect();
        assert!(!specs.is_empty());

        let bodies: Vec<Traveler> = config
            .envelopes
            .iter()
            .flat_map(|e| {
                [ReachFlags::WALK, ReachFlags::WALK | ReachFlags::JUMP, ReachFlags::MOVEMENT]
                    .into_iter()
                    .map(move |caps| Traveler {
                        radius: e.radius,
                        height: e.height,
                        caps,
                        max_landing_speed: 11.0,
                        is_player: false,
                    })
            })
            .collect();
        for spec in &specs {
            for big in &bodies {
                if !spec.supports(big) {
                    continue;
                }
                for small in &bodies {
                    let fits_inside = small.radius <= big.radius
                        && small.height <= big.height
                        && big.caps.is_subset_of(small.caps);
                    if fits_inside {
                        assert!(spec.supports(small), "{spec:?} rejects {small:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let mut level = VoxelLevel::with_floor(20, 8, 20, 1.0);
        level.fill_box([9, 1, 0], [9, 7, 12], VoxelKind::Solid);
        let config = ReachConfig::default();
        let eval = ReachabilityEvaluator::new(&level, &config);
        let mut graph = PathGraph::new();
        for x in [2, 6, 12, 16] {
            for z in [3, 15] {
                graph.add_node(NewNode::auto(stand(&level, x, 0, z)));
            }
        }
        let pairs = candidate_pairs(&graph, 12.0, None);
        let probe = ProbeAgent::from_config(&config);
        let seq = eval.evaluate_pairs(&graph, &pairs, &probe, false);
        let par = eval.evaluate_pairs(&graph, &pairs, &probe, true);
        assert_eq!(seq, par);
    }

    #[test]
    fn one_way_facing_filters_candidates() {
        let mut graph = PathGraph::new();
        let a = graph.add_node(
            NewNode::designer(Vec3::new(0.0, 1.9, 0.0))
                .flags(NodeFlags::ONE_WAY)
                .facing(Vec3::X),
        );
        let ahead = graph.add_node(NewNode::auto(Vec3::new(5.0, 1.9, 0.0)));
        let behind = graph.add_node(NewNode::auto(Vec3::new(-5.0, 1.9, 0.0)));
        let (na, nahead, nbehind) = (
            graph.node(a).unwrap(),
            graph.node(ahead).unwrap(),
            graph.node(behind).unwrap(),
        );
        assert!(is_candidate(na, nahead, 12.0));
        assert!(!is_candidate(na, nbehind, 12.0));
        // Entering along the facing is allowed, against it is not.
        assert!(is_candidate(nbehind, na, 12.0));
        assert!(!is_candidate(nahead, na, 12.0));
    }
}
