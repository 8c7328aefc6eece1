// Graph refinement passes run by the builder after edge evaluation.
//
// MERGE: pairs of auto-built path nodes closer than `merge_distance` whose
// common-envelope neighbourhoods (nodes linked in either direction by an
// edge wide enough for the "common" envelope) are equal or nested collapse
// to one node. Equal neighbourhoods collapse onto the midpoint when a body
// can stand there and walk to both originals; otherwise (and for nested
// neighbourhoods) the node with the larger neighbourhood is kept. The
// survivor is flagged `changed` so the builder re-evaluates its edges.
//
// INTERMEDIATE_INSERT: mutually visible pairs farther apart than the edge
// radius (up to `intermediate_max_distance`) that a standing human can walk
// both ways get a new node at their midpoint, unless an already connected
// third node offers a path within `intermediate_shorten_ratio`.
//
// PRUNE: A->B is pruned when some A->C, no stricter than A->B, starts a
// chain reaching B within `prune_ratio` x dist(A->B), every hop no stricter
// than A->B. The chain search is a depth-limited DFS over unpruned edges.
// Pruned edges are marked immediately, so a later check never leans on an
// edge that is itself gone. Designer and special edges are never pruned.
//
// See also: `builder.rs` for phase ordering, `graph.rs` for
// `ReachSpec::no_stricter_than`.

use crate::config::{BuildConfig, ReachConfig};
use crate::geometry::{LevelGeometry, LineMode};
use crate::graph::{NavNode, NewNode, NodeKind, PathGraph, ReachSpec};
use crate::probe::ProbeAgent;
use crate::types::{NodeFlags, NodeHandle, NodeOrigin, ReachFlags, Vec3};
use rustc_hash::FxHashSet;
use tracing::debug;

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Neighbour key: node and whether the link leaves (`true`) or enters.
type Link = (NodeHandle, bool);

fn common_links(graph: &PathGraph, node: &NavNode, exclude: NodeHandle, reach: &ReachConfig) -> FxHashSet<Link> {
    let common = reach.common();
    let wide = |e: &ReachSpec| e.is_traversable() && e.radius >= common.radius && e.height >= common.height;
    let mut links: FxHashSet<Link> = node
        .live_edges()
        .filter(|e| e.end != exclude && wide(e) && graph.contains(e.end))
        .map(|e| (e.end, true))
        .collect();
    for other in graph.iter().filter(|n| n.handle != exclude && n.handle != node.handle) {
        if other.live_edges().any(|e| e.end == node.handle && wide(e)) {
            links.insert((other.handle, false));
        }
    }
    links
}

enum MergeAction {
    Midpoint { keep: NodeHandle, drop: NodeHandle, at: Vec3 },
    Drop { drop: NodeHandle },
}

fn is_mergeable(node: &NavNode) -> bool {
    node.origin == NodeOrigin::AutoBuilt && node.kind == NodeKind::Path && node.flags.is_empty()
}

fn plan_merge<G: LevelGeometry + ?Sized>(
    graph: &PathGraph,
    geometry: &G,
    reach: &ReachConfig,
    build: &BuildConfig,
    probe: &mut ProbeAgent,
) -> Option<MergeAction> {
    let candidates: Vec<&NavNode> = graph.iter().filter(|n| is_mergeable(n)).collect();
    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            if a.position.distance(b.position) >= build.merge_distance {
                continue;
            }
            let la = common_links(graph, a, b.handle, reach);
            let lb = common_links(graph, b, a.handle, reach);
            if la == lb {
                let mid = (a.position + b.position) * 0.5;
                let human = reach.human().capsule();
                probe.set_capsule(human);
                probe.set_caps(reach.probe_caps);
                let standing = geometry.teleport_agent(mid, human);
                if let Some(at) = standing.filter(|&p| {
                    p.distance(mid) < build.merge_distance
                        && probe.can_reach(geometry, p, a.position)
                        && probe.can_reach(geometry, p, b.position)
                }) {
                    return Some(MergeAction::Midpoint {
                        keep: a.handle,
                        drop: b.handle,
                        at,
                    });
                }
                return Some(MergeAction::Drop { drop: b.handle });
            }
            if la.is_subset(&lb) {
                return Some(MergeAction::Drop { drop: a.handle });
            }
            if lb.is_subset(&la) {
                return Some(MergeAction::Drop { drop: b.handle });
            }
        }
    }
    None
}

/// Collapse redundant auto-built nodes. Returns how many were removed.
///
/// A close pair merges when the two neighbourhoods are equal (onto the
/// midpoint if it is usable) and also when one is a strict subset of the
/// other: the node reaching fewer neighbours adds nothing the other lacks,
/// so it is dropped and the larger neighbourhood survives.
pub fn merge_nodes<G: LevelGeometry + ?Sized>(
    graph: &mut PathGraph,
    geometry: &G,
    reach: &ReachConfig,
    build: &BuildConfig,
    probe: &mut ProbeAgent,
) -> usize {
    let mut merged = 0;
    while let Some(action) = plan_merge(graph, geometry, reach, build, probe) {
        let dropped = match action {
            MergeAction::Midpoint { keep, drop, at } => {
                graph.move_node(keep, at);
                drop
            }
            MergeAction::Drop { drop } => drop,
        };
        // Nodes that linked to the dropped one must be re-evaluated.
        for neighbor in graph.incoming(dropped) {
            if let Some(n) = graph.node_mut(neighbor) {
                n.changed = true;
            }
        }
        for end in graph.edges_from(dropped).iter().map(|e| e.end).collect::<Vec<_>>() {
            if let Some(n) = graph.node_mut(end) {
                n.changed = true;
            }
        }
        graph.remove_node(dropped);
        merged += 1;
    }
    if merged > 0 {
        graph.compact();
        debug!(merged, "merged redundant nodes");
    }
    merged
}

// ---------------------------------------------------------------------------
// Intermediate insertion
// ---------------------------------------------------------------------------

/// One intermediate pass. Returns the number of nodes inserted; they are
/// flagged `changed` and have no edges yet.
pub fn insert_intermediates<G: LevelGeometry + ?Sized>(
    graph: &mut PathGraph,
    geometry: &G,
    reach: &ReachConfig,
    build: &BuildConfig,
    probe: &mut ProbeAgent,
) -> usize {
    let human = reach.human().capsule();
    probe.set_capsule(human);
    probe.set_caps(reach.probe_caps);

    let nodes: Vec<(NodeHandle, Vec3)> = graph
        .iter()
        .filter(|n| !n.flags.contains(NodeFlags::NO_AUTO_CONNECT) && n.kind.needs_base())
        .map(|n| (n.handle, n.position))
        .collect();
    let spacing = build.merge_distance.max(build.min_node_spacing);
    let mut planned: Vec<Vec3> = Vec::new();

    for (i, &(a, pa)) in nodes.iter().enumerate() {
        for &(b, pb) in &nodes[i + 1..] {
            let d = pa.distance(pb);
            if d <= build.max_edge_distance || d > build.intermediate_max_distance {
                continue;
            }
            if graph.edge(a, b).is_some() || graph.edge(b, a).is_some() {
                continue;
            }
            if geometry.line_check(pa, pb, LineMode::AnyHit).is_some() {
                continue;
            }
            let linked = |x: NodeHandle, y: NodeHandle| graph.edge(x, y).is_some() || graph.edge(y, x).is_some();
            let shortcut = graph.iter().any(|c| {
                c.handle != a
                    && c.handle != b
                    && c.position.distance(pa) + c.position.distance(pb) <= build.intermediate_shorten_ratio * d
                    && linked(a, c.handle)
                    && linked(c.handle, b)
            });
            if shortcut {
                continue;
            }
            if !(probe.can_reach(geometry, pa, pb) && probe.can_reach(geometry, pb, pa)) {
                continue;
            }
            let Some(at) = geometry.teleport_agent((pa + pb) * 0.5, human) else {
                continue;
            };
            let crowded = !graph.nearest(at, 1, spacing).is_empty()
                || planned.iter().any(|p| p.distance(at) < spacing);
            if !crowded {
                planned.push(at);
            }
        }
    }

    for &at in &planned {
        graph.add_node(NewNode::auto(at));
    }
    planned.len()
}

// ---------------------------------------------------------------------------
// Prune
// ---------------------------------------------------------------------------

fn prunable(edge: &ReachSpec) -> bool {
    !edge.pruned
        && !edge
            .flags
            .intersects(ReachFlags::FORCED | ReachFlags::PROSCRIBED | ReachFlags::SPECIAL)
}

/// True if a chain of edges, each no stricter than `req`, leads from `from`
/// to `target` within `remaining` distance and `depth` further hops.
fn reaches_within(
    graph: &PathGraph,
    from: NodeHandle,
    target: NodeHandle,
    req: &ReachSpec,
    remaining: f32,
    depth: u32,
    visited: &mut Vec<NodeHandle>,
) -> bool {
    for hop in graph.edges_from(from) {
        if !hop.is_traversable() || hop.distance > remaining || !hop.no_stricter_than(req) {
            continue;
        }
        if !graph.contains(hop.end) {
            continue;
        }
        if hop.end == target {
            return true;
        }
        if depth == 0 || visited.contains(&hop.end) {
            continue;
        }
        visited.push(hop.end);
        let found = reaches_within(graph, hop.end, target, req, remaining - hop.distance, depth - 1, visited);
        visited.pop();
        if found {
            return true;
        }
    }
    false
}

/// Prune edges that a good-enough detour makes redundant, then compact.
/// Returns the number pruned.
pub fn prune_edges(graph: &mut PathGraph, build: &BuildConfig) -> usize {
    let mut pruned = 0;
    for a in graph.handles() {
        let direct: Vec<ReachSpec> = graph
            .edges_from(a)
            .iter()
            .filter(|e| prunable(e))
            .cloned()
            .collect();
        for edge in direct {
            let budget = edge.distance * build.prune_ratio;
            let detour = graph.edges_from(a).iter().any(|first| {
                first.end != edge.end
                    && first.is_traversable()
                    && first.distance <= budget
                    && first.no_stricter_than(&edge)
                    && graph.contains(first.end)
                    && {
                        let mut visited = vec![a, first.end];
                        reaches_within(
                            graph,
                            first.end,
                            edge.end,
                            &edge,
                            budget - first.distance,
                            build.prune_max_depth.saturating_sub(1),
                            &mut visited,
                        )
                    }
            });
            if detour && graph.mark_pruned(a, edge.end) {
                pruned += 1;
            }
        }
    }
    graph.compact();
    debug!(pruned, "pruned redundant edges");
    pruned
}
