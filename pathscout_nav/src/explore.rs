// Exploratory node placement.
//
// Seeds auto-built nodes over open floor that no entity marks. From every
// existing node the probe sets out in each of the four axis headings and
// walks straight until it meets a boundary (a wall, a ledge it would fall
// from, or water), then follows that boundary keeping it on its right: at
// each step it tries to turn right first, so it wraps around open corners,
// then straight, then left, then back.
//
// The walker remembers an anchor, initially the seed. Whenever the anchor
// stops being reachable from the probe's new position (too far, out of
// sight, or the probe cannot walk back to it) a node is dropped at the last
// position from which it still was, and that node becomes the anchor. A
// nearby existing node is reused instead of dropping a duplicate.
//
// A walk ends when it revisits a cell with the same heading, when it would
// drop a node where some walk already dropped one with the same heading
// (a full circuit), when it is boxed in, or on its step cap. The whole pass
// is capped at `max_nodes` additions.
//
// See also: `builder.rs` (the Explore phase), `probe.rs`.

use crate::config::{BuildConfig, ReachConfig};
use crate::geometry::{LevelGeometry, LineMode, Medium};
use crate::graph::{NewNode, PathGraph};
use crate::probe::ProbeAgent;
use crate::types::{Capsule, NodeHandle, Vec3};
use rustc_hash::FxHashSet;
use tracing::debug;

/// Axis headings, each a quarter turn left of the previous.
const HEADINGS: [Vec3; 4] = [Vec3::X, Vec3::NEG_Z, Vec3::NEG_X, Vec3::Z];

fn left(h: usize) -> usize {
    (h + 1) % 4
}

fn right(h: usize) -> usize {
    (h + 3) % 4
}

fn back(h: usize) -> usize {
    (h + 2) % 4
}

type CellKey = (i32, i32, i32, usize);

fn cell_key(p: Vec3, step: f32, heading: usize) -> CellKey {
    (
        (p.x / step).floor() as i32,
        (p.y / step).floor() as i32,
        (p.z / step).floor() as i32,
        heading,
    )
}

struct Explorer<'a, G: LevelGeometry + ?Sized> {
    geometry: &'a G,
    build: &'a BuildConfig,
    capsule: Capsule,
    step_height: f32,
    probe: &'a mut ProbeAgent,
    /// Cells where some walk dropped (or reused) an anchor, per heading.
    drops: FxHashSet<CellKey>,
}

impl<G: LevelGeometry + ?Sized> Explorer<'_, G> {
    /// One move along `heading`, refusing ledges and liquids.
    fn try_move(&self, pos: Vec3, heading: usize) -> Option<Vec3> {
        let delta = HEADINGS[heading] * self.build.explore.step;
        let moved = self
            .geometry
            .move_agent(pos, delta, self.capsule, self.step_height);
        if moved.blocked {
            return None;
        }
        let floor = self
            .geometry
            .probe_floor(moved.position, self.capsule, self.step_height)?;
        if self.geometry.medium_at(floor.location) != Medium::Air {
            return None;
        }
        Some(floor.location)
    }

    fn anchor_reachable(&mut self, anchor: Vec3, pos: Vec3) -> bool {
        let d = anchor.distance(pos);
        if d > self.build.explore.anchor_reach_distance {
            return false;
        }
        if self.geometry.line_check(pos, anchor, LineMode::AnyHit).is_some() {
            return false;
        }
        d <= self.build.explore.step * 1.5 || self.probe.can_reach(self.geometry, pos, anchor)
    }

    /// Walk from `seed` starting along `heading`. Returns nodes added.
    fn walk(&mut self, graph: &mut PathGraph, seed: NodeHandle, heading: usize, budget: usize) -> usize {
        let build = self.build;
        let cfg = &build.explore;
        let Some(seed_pos) = graph.node(seed).map(|n| n.position) else {
            return 0;
        };
        let Some(mut pos) = self.geometry.teleport_agent(seed_pos, self.capsule) else {
            return 0;
        };
        let mut anchor = seed_pos;
        let mut last_good = pos;
        let mut heading = heading;
        let mut following = false;
        let mut visited: FxHashSet<CellKey> = FxHashSet::default();
        let mut added = 0;

        for _ in 0..cfg.max_steps_per_walk {
            let order = if following {
                [right(heading), heading, left(heading), back(heading)]
            } else {
                [heading, left(heading), right(heading), back(heading)]
            };
            let Some((k, next)) = order
                .iter()
                .enumerate()
                .find_map(|(k, &h)| self.try_move(pos, h).map(|p| (k, p)))
            else {
                break;
            };
            if !following && k > 0 {
                following = true;
            }
            heading = order[k];
            pos = next;
            if !visited.insert(cell_key(pos, cfg.step, heading)) {
                break;
            }

            if self.anchor_reachable(anchor, pos) {
                last_good = pos;
                continue;
            }
            if !self.drops.insert(cell_key(last_good, cfg.step, heading)) {
                break;
            }
            match graph.nearest(last_good, 1, build.merge_distance).first() {
                Some(&(existing, _)) => {
                    anchor = graph.node(existing).map_or(last_good, |n| n.position);
                }
                None => {
                    graph.add_node(NewNode::auto(last_good));
                    anchor = last_good;
                    added += 1;
                    if added >= budget {
                        break;
                    }
                }
            }
            last_good = pos;
        }
        added
    }
}

/// Seed auto-built nodes by boundary walking from every node that stands on
/// a floor. Returns the number of nodes added.
pub fn explore<G: LevelGeometry + ?Sized>(
    graph: &mut PathGraph,
    geometry: &G,
    reach: &ReachConfig,
    build: &BuildConfig,
    probe: &mut ProbeAgent,
) -> usize {
    let cfg = &build.explore;
    if !cfg.enabled || cfg.step <= 0.0 {
        return 0;
    }
    let capsule = reach.human().capsule();
    probe.set_capsule(capsule);
    probe.set_caps(reach.probe_caps);

    let seeds: Vec<NodeHandle> = graph
        .iter()
        .filter(|n| n.kind.needs_base())
        .map(|n| n.handle)
        .collect();
    let mut explorer = Explorer {
        geometry,
        build,
        capsule,
        step_height: reach.probe.step_height,
        probe,
        drops: FxHashSet::default(),
    };

    let mut added = 0;
    'seeds: for seed in seeds {
        for heading in 0..HEADINGS.len() {
            if added >= cfg.max_nodes {
                break 'seeds;
            }
            added += explorer.walk(graph, seed, heading, cfg.max_nodes - added);
        }
    }
    debug!(added, "exploration finished");
    added
}
