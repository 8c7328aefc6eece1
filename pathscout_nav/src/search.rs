// Runtime route search.
//
// `RouteSearch::find_path_toward` is the per-tick query an agent makes:
//
// 1. Resolve the start anchor from the seeker's position. A failure is
//    remembered with the tick, and further queries by the same seeker in
//    that tick fail immediately.
// 2. Resolve the goal: a point or entity gets a goal anchor, a node is used
//    as is, and a weighed query (`NodeWeigher`) has no goal node at all.
// 3. Start anchor == goal anchor: answered by straight-line distance.
// 4. Otherwise a uniform-cost expansion from the start anchor. Edges the
//    seeker's body cannot use are skipped, as are blocked and hazardous
//    nodes. Entering a node costs the edge distance plus the node's own
//    cost. The search stops when the goal is settled, when the weigher
//    reports a weight at or above its target, or when `max_expansions`
//    nodes have been settled. On budget exhaustion the best node settled so
//    far (closest to the goal, or highest weight) is still returned if it is
//    worth anything.
// 5. An optional detour: a neighbour of the start anchor with a non-forced
//    way back, not already on the route, that the caller's
//    `DetourEvaluator` rates above `detour_threshold`, becomes the next hop.
// 6. The route is rebuilt from back-pointers and at most `route_cache_len`
//    entries are written to the seeker's cache. The start anchor is skipped
//    when the seeker is standing on it, or when the second node is closer
//    and in sight.
//
// All search state lives in a scratch table allocated per query and indexed
// by slot, so the graph itself is only read and concurrent queries over a
// shared graph are safe. The open set is a `BinaryHeap` ordered by cost with
// slot index as tie-break, so results do not depend on heap internals.
//
// No path is an outcome (`SearchOutcome`) with zero weight and an empty
// cache, never an error.
//
// See also: `anchor.rs`, `route.rs` (the cache), `session.rs` (the owning
// context).

use crate::anchor::{AnchorQuery, AnchorResolver};
use crate::config::SearchConfig;
use crate::geometry::{LevelGeometry, LineMode};
use crate::graph::{NavNode, NodeKind, PathGraph};
use crate::prng::ScoutRng;
use crate::route::Seeker;
use crate::types::{EntityId, NodeHandle, ReachFlags, Traveler, Vec3};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// Caller-supplied scoring
// ---------------------------------------------------------------------------

/// Scores nodes for queries without a fixed destination.
pub trait NodeWeigher {
    /// Weight of `node` reached at `path_cost`. Zero means worthless.
    fn weigh(&mut self, node: &NavNode, path_cost: f32) -> f32;

    /// A weight at or above this ends the search early.
    fn target(&self) -> f32 {
        f32::INFINITY
    }
}

/// Rates a neighbour of the seeker's anchor as a detour.
pub trait DetourEvaluator {
    fn desirability(&mut self, node: &NavNode, seeker: &Seeker) -> f32;
}

impl<F: FnMut(&NavNode, &Seeker) -> f32> DetourEvaluator for F {
    fn desirability(&mut self, node: &NavNode, seeker: &Seeker) -> f32 {
        self(node, seeker)
    }
}

/// Stops at the cheapest endpoint: nodes with the persistent endpoint flag
/// plus this query's own endpoints.
#[derive(Clone, Debug, Default)]
pub struct EndpointWeigher {
    pub extra: FxHashSet<NodeHandle>,
}

impl EndpointWeigher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(endpoints: impl IntoIterator<Item = NodeHandle>) -> Self {
        Self {
            extra: endpoints.into_iter().collect(),
        }
    }
}

impl NodeWeigher for EndpointWeigher {
    fn weigh(&mut self, node: &NavNode, path_cost: f32) -> f32 {
        if node.endpoint || self.extra.contains(&node.handle) {
            1.0 / (1.0 + path_cost)
        } else {
            0.0
        }
    }

    fn target(&self) -> f32 {
        f32::MIN_POSITIVE
    }
}

/// Scores pickups by how much the seeker wants the item, discounted by
/// path cost.
#[derive(Clone, Debug)]
pub struct ItemWeigher {
    pub desires: FxHashMap<String, f32>,
    pub target: f32,
}

impl ItemWeigher {
    pub fn new(desires: impl IntoIterator<Item = (String, f32)>) -> Self {
        Self {
            desires: desires.into_iter().collect(),
            target: f32::INFINITY,
        }
    }
}

impl NodeWeigher for ItemWeigher {
    fn weigh(&mut self, node: &NavNode, path_cost: f32) -> f32 {
        match &node.kind {
            NodeKind::Pickup { item } => self
                .desires
                .get(item)
                .map_or(0.0, |desire| desire.max(0.0) / (1.0 + path_cost)),
            _ => 0.0,
        }
    }

    fn target(&self) -> f32 {
        self.target
    }
}

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

pub enum Destination<'a> {
    Point(Vec3),
    Entity { id: EntityId, position: Vec3 },
    Node(NodeHandle),
    Weighed(&'a mut dyn NodeWeigher),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    Reached,
    /// Out of budget; the route leads toward the best node settled.
    BudgetExhausted,
    NoPath,
    NoStartAnchor,
    NoGoalAnchor,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RouteResult {
    /// First node of the written route cache.
    pub next: Option<NodeHandle>,
    /// Path cost to the goal, or the weigher's best weight. Zero for no path.
    pub weight: f32,
    pub outcome: SearchOutcome,
    /// Nodes settled by the expansion.
    pub expansions: usize,
}

impl RouteResult {
    fn none(outcome: SearchOutcome, expansions: usize) -> Self {
        Self {
            next: None,
            weight: 0.0,
            outcome,
            expansions,
        }
    }

    pub fn has_route(&self) -> bool {
        self.next.is_some()
    }
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Entry in the open set (min-heap via reversed ordering).
struct OpenEntry {
    cost: f32,
    node: NodeHandle,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.index().cmp(&self.node.index()))
    }
}

/// Per-query search state, indexed by slot.
struct Scratch {
    cost: Vec<f32>,
    via: Vec<Option<NodeHandle>>,
    settled: Vec<bool>,
}

impl Scratch {
    fn new(slots: usize) -> Self {
        Self {
            cost: vec![f32::INFINITY; slots],
            via: vec![None; slots],
            settled: vec![false; slots],
        }
    }

    /// Nodes from `start` to `end` inclusive.
    fn path(&self, start: NodeHandle, end: NodeHandle) -> Vec<NodeHandle> {
        let mut path = vec![end];
        let mut at = end;
        while at != start {
            match self.via[at.index()] {
                Some(prev) if path.len() <= self.via.len() => {
                    path.push(prev);
                    at = prev;
                }
                _ => break,
            }
        }
        path.reverse();
        path
    }
}

enum Target<'w> {
    Node { handle: NodeHandle, position: Vec3 },
    Weighed(&'w mut dyn NodeWeigher),
    Wander,
}

struct Expansion {
    scratch: Scratch,
    /// Settled nodes in settle order.
    order: Vec<NodeHandle>,
    best: Option<NodeHandle>,
    weight: f32,
    reached: bool,
    exhausted: bool,
}

// ---------------------------------------------------------------------------
// RouteSearch
// ---------------------------------------------------------------------------

pub struct RouteSearch<'a, G: LevelGeometry + ?Sized> {
    graph: &'a PathGraph,
    geometry: &'a G,
    config: &'a SearchConfig,
    anchors: &'a mut AnchorResolver,
}

impl<'a, G: LevelGeometry + ?Sized> RouteSearch<'a, G> {
    pub fn new(
        graph: &'a PathGraph,
        geometry: &'a G,
        config: &'a SearchConfig,
        anchors: &'a mut AnchorResolver,
    ) -> Self {
        Self {
            graph,
            geometry,
            config,
            anchors,
        }
    }

    /// Route `seeker` toward `destination`, overwriting its route cache.
    pub fn find_path_toward(
        &mut self,
        seeker: &mut Seeker,
        destination: Destination<'_>,
        detour: Option<&mut dyn DetourEvaluator>,
        tick: u64,
    ) -> RouteResult {
        seeker.route.clear();
        let Some(start) = self.start_anchor(seeker, tick) else {
            return RouteResult::none(SearchOutcome::NoStartAnchor, 0);
        };

        let mut target = match destination {
            Destination::Point(p) => match self.goal_anchor(AnchorQuery::Point(p), &seeker.traveler, tick) {
                Some(handle) => Target::Node { handle, position: p },
                None => return RouteResult::none(SearchOutcome::NoGoalAnchor, 0),
            },
            Destination::Entity { id, position } => {
                match self.goal_anchor(AnchorQuery::Entity { id, position }, &seeker.traveler, tick) {
                    Some(handle) => Target::Node { handle, position },
                    None => return RouteResult::none(SearchOutcome::NoGoalAnchor, 0),
                }
            }
            Destination::Node(handle) => match self.graph.node(handle) {
                Some(node) => Target::Node {
                    handle,
                    position: node.position,
                },
                None => return RouteResult::none(SearchOutcome::NoGoalAnchor, 0),
            },
            Destination::Weighed(weigher) => Target::Weighed(weigher),
        };

        if let Target::Node { handle, position } = target {
            if handle == start {
                seeker.route.fill(&[start], self.config.route_cache_len);
                trace!(node = %start, "already at goal anchor");
                return RouteResult {
                    next: Some(start),
                    weight: seeker.position.distance(position),
                    outcome: SearchOutcome::Reached,
                    expansions: 0,
                };
            }
        }

        let expansion = self.expand(start, &seeker.traveler, &mut target, self.config.max_expansions);
        let expansions = expansion.order.len();
        let weighed = matches!(target, Target::Weighed(_));
        let outcome = if expansion.reached {
            SearchOutcome::Reached
        } else if expansion.exhausted {
            SearchOutcome::BudgetExhausted
        } else if weighed {
            SearchOutcome::Reached
        } else {
            SearchOutcome::NoPath
        };
        let worthwhile = expansion.reached || (outcome != SearchOutcome::NoPath && expansion.weight > 0.0);
        let best = match expansion.best {
            Some(best) if worthwhile => best,
            _ => {
                let outcome = match outcome {
                    SearchOutcome::BudgetExhausted => SearchOutcome::BudgetExhausted,
                    _ => SearchOutcome::NoPath,
                };
                debug!(expansions, ?outcome, "no route");
                return RouteResult::none(outcome, expansions);
            }
        };

        let path = expansion.scratch.path(start, best);
        let mut route = self.trim_start(seeker, &path);
        if let Some(evaluator) = detour {
            if let Some(extra) = self.pick_detour(seeker, start, &path, evaluator) {
                route.retain(|&h| h != start);
                route.insert(0, start);
                route.insert(0, extra);
            }
        }
        seeker.route.fill(&route, self.config.route_cache_len);
        debug!(expansions, weight = expansion.weight, ?outcome, len = route.len(), "route found");
        RouteResult {
            next: seeker.route.first(),
            weight: expansion.weight,
            outcome,
            expansions,
        }
    }

    /// Route `seeker` to a node picked at random among those reachable
    /// within `random_destination_expansions` settled nodes.
    pub fn random_destination(&mut self, seeker: &mut Seeker, rng: &mut ScoutRng, tick: u64) -> RouteResult {
        seeker.route.clear();
        let Some(start) = self.start_anchor(seeker, tick) else {
            return RouteResult::none(SearchOutcome::NoStartAnchor, 0);
        };
        let mut target = Target::Wander;
        let expansion = self.expand(
            start,
            &seeker.traveler,
            &mut target,
            self.config.random_destination_expansions,
        );
        let expansions = expansion.order.len();
        let candidates = &expansion.order[1.min(expansions)..];
        if candidates.is_empty() {
            return RouteResult::none(SearchOutcome::NoPath, expansions);
        }
        let pick = candidates[rng.index(candidates.len())];
        let path = expansion.scratch.path(start, pick);
        let route = self.trim_start(seeker, &path);
        seeker.route.fill(&route, self.config.route_cache_len);
        RouteResult {
            next: seeker.route.first(),
            weight: expansion.scratch.cost[pick.index()],
            outcome: SearchOutcome::Reached,
            expansions,
        }
    }

    fn start_anchor(&mut self, seeker: &mut Seeker, tick: u64) -> Option<NodeHandle> {
        if seeker.anchor_failed_tick == Some(tick) {
            trace!(tick, "start anchor already failed this tick");
            return None;
        }
        let query = match seeker.id {
            Some(id) => AnchorQuery::Entity {
                id,
                position: seeker.position,
            },
            None => AnchorQuery::Point(seeker.position),
        };
        let found = self.anchors.find_anchor(
            self.graph,
            self.geometry,
            self.config,
            query,
            &seeker.traveler,
            false,
            tick,
        );
        match found {
            Some(start) => {
                seeker.anchor = Some(start);
                seeker.anchor_failed_tick = None;
            }
            None => {
                seeker.anchor_failed_tick = Some(tick);
                debug!(position = %seeker.position, "no start anchor");
            }
        }
        found
    }

    fn goal_anchor(&mut self, query: AnchorQuery, traveler: &Traveler, tick: u64) -> Option<NodeHandle> {
        self.anchors
            .find_anchor(self.graph, self.geometry, self.config, query, traveler, true, tick)
    }

    fn expand(&self, start: NodeHandle, traveler: &Traveler, target: &mut Target<'_>, budget: usize) -> Expansion {
        let mut scratch = Scratch::new(self.graph.slot_count());
        let mut order = Vec::new();
        let mut open = BinaryHeap::new();
        let mut best: Option<NodeHandle> = None;
        let mut best_score = f32::NEG_INFINITY;
        let mut weight = 0.0;
        let mut reached = false;
        let mut exhausted = false;

        scratch.cost[start.index()] = 0.0;
        open.push(OpenEntry {
            cost: 0.0,
            node: start,
        });

        while let Some(OpenEntry { cost, node: handle }) = open.pop() {
            let i = handle.index();
            if scratch.settled[i] {
                continue;
            }
            let Some(node) = self.graph.node(handle) else {
                continue;
            };
            if order.len() >= budget {
                exhausted = true;
                break;
            }
            scratch.settled[i] = true;
            order.push(handle);

            match target {
                Target::Node { handle: goal, position } => {
                    if handle == *goal {
                        best = Some(handle);
                        weight = cost;
                        reached = true;
                        break;
                    }
                    // Closer to the goal is better; ties go to the cheaper,
                    // earlier-settled node.
                    let score = -node.position.distance(*position);
                    if score > best_score {
                        best_score = score;
                        best = Some(handle);
                        weight = cost;
                    }
                }
                Target::Weighed(weigher) => {
                    let w = weigher.weigh(node, cost);
                    if w > best_score {
                        best_score = w;
                        best = Some(handle);
                        weight = w;
                    }
                    if w >= weigher.target() {
                        reached = true;
                        break;
                    }
                }
                Target::Wander => {}
            }

            for edge in &node.edges {
                if !edge.supports(traveler) {
                    continue;
                }
                let Some(end) = self.graph.node(edge.end) else {
                    continue;
                };
                if end.blocked || end.hazard {
                    continue;
                }
                let j = edge.end.index();
                if scratch.settled[j] {
                    continue;
                }
                let next = cost + edge.distance + end.cost;
                if next < scratch.cost[j] {
                    scratch.cost[j] = next;
                    scratch.via[j] = Some(handle);
                    open.push(OpenEntry {
                        cost: next,
                        node: edge.end,
                    });
                }
            }
        }

        trace!(settled = order.len(), reached, exhausted, "expansion finished");
        Expansion {
            scratch,
            order,
            best,
            weight,
            reached,
            exhausted,
        }
    }

    /// Drop the start anchor from the front of `path` when the seeker does
    /// not need to walk back to it.
    fn trim_start(&self, seeker: &Seeker, path: &[NodeHandle]) -> Vec<NodeHandle> {
        let [start, second, ..] = path else {
            return path.to_vec();
        };
        let (Some(a), Some(b)) = (self.graph.node(*start), self.graph.node(*second)) else {
            return path.to_vec();
        };
        let on_anchor = a.position.distance(seeker.position) <= self.config.arrive_radius;
        let second_closer = b.position.distance(seeker.position) < a.position.distance(seeker.position)
            && self
                .geometry
                .line_check(seeker.position, b.position, LineMode::AnyHit)
                .is_none();
        if on_anchor || second_closer {
            path[1..].to_vec()
        } else {
            path.to_vec()
        }
    }

    fn pick_detour(
        &self,
        seeker: &Seeker,
        start: NodeHandle,
        path: &[NodeHandle],
        evaluator: &mut dyn DetourEvaluator,
    ) -> Option<NodeHandle> {
        let anchor = self.graph.node(start)?;
        let mut best: Option<(NodeHandle, f32)> = None;
        for edge in anchor.edges.iter().filter(|e| e.supports(&seeker.traveler)) {
            if path.contains(&edge.end) {
                continue;
            }
            let Some(node) = self.graph.node(edge.end) else {
                continue;
            };
            if node.blocked || node.hazard {
                continue;
            }
            let returns = self.graph.edge(edge.end, start).is_some_and(|back| {
                back.supports(&seeker.traveler) && !back.flags.contains(ReachFlags::FORCED)
            });
            if !returns {
                continue;
            }
            let score = evaluator.desirability(node, seeker);
            if score > self.config.detour_threshold && best.is_none_or(|(_, s)| score > s) {
                best = Some((edge.end, score));
            }
        }
        if let Some((node, score)) = best {
            trace!(%node, score, "detour spliced in");
        }
        best.map(|(h, _)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReachConfig;
    use crate::graph::{NewNode, ReachSpec};
    use crate::voxel_level::VoxelLevel;

    fn walk(graph: &mut PathGraph, a: NodeHandle, b: NodeHandle) {
        let distance = graph.node(a).unwrap().position.distance(graph.node(b).unwrap().position);
        walk_cost(graph, a, b, distance);
    }

    fn walk_cost(graph: &mut PathGraph, a: NodeHandle, b: NodeHandle, distance: f32) {
        graph.add_edge(ReachSpec {
            start: a,
            end: b,
            distance,
            radius: 1.1,
            height: 1.2,
            flags: ReachFlags::WALK,
            max_landing_speed: 0.0,
            pruned: false,
        });
    }

    struct Fixture {
        level: VoxelLevel,
        graph: PathGraph,
        a: NodeHandle,
        b: NodeHandle,
        c: NodeHandle,
    }

    /// Three colinear nodes A -> B -> C, 4 m apart, with node costs on B and C.
    fn line() -> Fixture {
        let level = VoxelLevel::with_floor(24, 4, 12, 1.0);
        let mut graph = PathGraph::new();
        let a = graph.add_node(NewNode::designer(level.stand_point(2, 0, 6, 0.9)).label("A"));
        let b = graph.add_node(NewNode::designer(level.stand_point(6, 0, 6, 0.9)).label("B").cost(1.5));
        let c = graph.add_node(NewNode::designer(level.stand_point(10, 0, 6, 0.9)).label("C").cost(0.5));
        walk(&mut graph, a, b);
        walk(&mut graph, b, c);
        Fixture { level, graph, a, b, c }
    }

    fn seeker_at(f: &Fixture, node: NodeHandle) -> Seeker {
        Seeker::new(f.graph.node(node).unwrap().position, Traveler::human())
    }

    fn search<'a>(f: &'a Fixture, config: &'a SearchConfig, anchors: &'a mut AnchorResolver) -> RouteSearch<'a, VoxelLevel> {
        RouteSearch::new(&f.graph, &f.level, config, anchors)
    }

    #[test]
    fn straight_hop_weight_sums_edges_and_node_costs() {
        let f = line();
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = seeker_at(&f, f.a);
        let result = search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Node(f.c), None, 0);
        assert_eq!(result.outcome, SearchOutcome::Reached);
        assert_eq!(seeker.route.as_slice(), &[f.b, f.c]);
        assert_eq!(result.next, Some(f.b));
        assert!((result.weight - (4.0 + 1.5 + 4.0 + 0.5)).abs() < 1e-4);
        assert_eq!(seeker.anchor, Some(f.a));
    }

    #[test]
    fn point_destination_resolves_goal_anchor() {
        let f = line();
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = seeker_at(&f, f.a);
        let goal = f.level.stand_point(11, 0, 6, 0.9);
        let result =
            search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Point(goal), None, 0);
        assert_eq!(result.outcome, SearchOutcome::Reached);
        assert_eq!(seeker.route.as_slice().last(), Some(&f.c));
    }

    #[test]
    fn missing_direction_is_never_used() {
        let f = line();
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = seeker_at(&f, f.c);
        let result = search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Node(f.a), None, 0);
        assert_eq!(result.outcome, SearchOutcome::NoPath);
        assert_eq!(result.weight, 0.0);
        assert!(seeker.route.is_empty());
    }

    #[test]
    fn blocked_and_unsupported_edges_are_skipped() {
        let mut f = line();
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());

        f.graph.set_hazard(f.b, true);
        let mut seeker = seeker_at(&f, f.a);
        let result = search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Node(f.c), None, 0);
        assert_eq!(result.outcome, SearchOutcome::NoPath);

        f.graph.set_hazard(f.b, false);
        let mut giant = seeker_at(&f, f.a);
        giant.traveler.radius = 1.5;
        let result = search(&f, &config, &mut anchors).find_path_toward(&mut giant, Destination::Node(f.c), None, 0);
        assert_ne!(result.outcome, SearchOutcome::Reached);
        assert!(giant.route.is_empty());
    }

    #[test]
    fn same_anchor_answers_by_straight_line() {
        let f = line();
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = seeker_at(&f, f.a);
        let goal = f.level.stand_point(3, 0, 6, 0.9);
        let result =
            search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Point(goal), None, 0);
        assert_eq!(result.outcome, SearchOutcome::Reached);
        assert_eq!(result.expansions, 0);
        assert!((result.weight - 1.0).abs() < 1e-4);
        assert_eq!(seeker.route.as_slice(), &[f.a]);
    }

    #[test]
    fn failed_start_anchor_is_remembered_for_the_tick() {
        let f = line();
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = Seeker::new(f.level.stand_point(22, 0, 10, 0.9) + Vec3::new(0.0, 0.0, 40.0), Traveler::human());
        let result = search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Node(f.c), None, 5);
        assert_eq!(result.outcome, SearchOutcome::NoStartAnchor);
        assert_eq!(seeker.anchor_failed_tick, Some(5));

        // Even from a good position, the same tick short-circuits.
        seeker.position = f.graph.node(f.a).unwrap().position;
        let again = search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Node(f.c), None, 5);
        assert_eq!(again.outcome, SearchOutcome::NoStartAnchor);

        let next_tick = search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Node(f.c), None, 6);
        assert_eq!(next_tick.outcome, SearchOutcome::Reached);
        assert_eq!(seeker.anchor_failed_tick, None);
    }

    /// A `side x side` grid, 1.5 m apart, with edges both ways along rows
    /// and columns.
    fn grid(side: usize) -> (VoxelLevel, PathGraph, Vec<NodeHandle>) {
        let extent = (side as f32 * 1.5).ceil() as u32 + 4;
        let level = VoxelLevel::with_floor(extent, 4, extent, 1.0);
        let mut graph = PathGraph::new();
        let mut nodes = Vec::with_capacity(side * side);
        for z in 0..side {
            for x in 0..side {
                let p = Vec3::new(1.5 + x as f32 * 1.5, 1.9, 1.5 + z as f32 * 1.5);
                nodes.push(graph.add_node(NewNode::auto(p)));
            }
        }
        for z in 0..side {
            for x in 0..side {
                let here = nodes[z * side + x];
                if x + 1 < side {
                    walk(&mut graph, here, nodes[z * side + x + 1]);
                    walk(&mut graph, nodes[z * side + x + 1], here);
                }
                if z + 1 < side {
                    walk(&mut graph, here, nodes[(z + 1) * side + x]);
                    walk(&mut graph, nodes[(z + 1) * side + x], here);
                }
            }
        }
        (level, graph, nodes)
    }

    #[test]
    fn expansions_never_exceed_budget() {
        let (level, graph, nodes) = grid(30);
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let start = nodes[0];
        let mut seeker = Seeker::new(graph.node(start).unwrap().position, Traveler::human());
        let goal = *nodes.last().unwrap();
        let result = RouteSearch::new(&graph, &level, &config, &mut anchors).find_path_toward(
            &mut seeker,
            Destination::Node(goal),
            None,
            0,
        );
        assert_eq!(result.outcome, SearchOutcome::BudgetExhausted);
        assert!(result.expansions <= config.max_expansions);
        assert!(result.weight > 0.0);

        // The partial route is a chain of real edges out of the start anchor.
        let route = seeker.route.as_slice();
        assert!(!route.is_empty());
        assert!(graph.edge(start, route[0]).is_some());
        for pair in route.windows(2) {
            assert!(graph.edge(pair[0], pair[1]).is_some());
        }
    }

    #[test]
    fn route_cache_is_bounded() {
        let (level, graph, nodes) = grid(30);
        let config = SearchConfig {
            max_expansions: 2000,
            ..SearchConfig::default()
        };
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = Seeker::new(graph.node(nodes[0]).unwrap().position, Traveler::human());
        let result = RouteSearch::new(&graph, &level, &config, &mut anchors).find_path_toward(
            &mut seeker,
            Destination::Node(nodes[29]),
            None,
            0,
        );
        assert_eq!(result.outcome, SearchOutcome::Reached);
        assert_eq!(seeker.route.len(), config.route_cache_len);
        assert!((result.weight - 29.0 * 1.5).abs() < 1e-3);
    }

    #[test]
    fn endpoint_weigher_stops_at_nearest_endpoint() {
        let (level, mut graph, nodes) = grid(6);
        graph.set_endpoint(nodes[5], true);
        graph.set_endpoint(nodes[2], true);
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = Seeker::new(graph.node(nodes[0]).unwrap().position, Traveler::human());
        let mut weigher = EndpointWeigher::new();
        let result = RouteSearch::new(&graph, &level, &config, &mut anchors).find_path_toward(
            &mut seeker,
            Destination::Weighed(&mut weigher),
            None,
            0,
        );
        assert_eq!(result.outcome, SearchOutcome::Reached);
        assert_eq!(seeker.route.as_slice(), &[nodes[1], nodes[2]]);
        assert!((result.weight - 1.0 / (1.0 + 3.0)).abs() < 1e-4);
    }

    #[test]
    fn item_weigher_prefers_desire_over_distance() {
        let level = VoxelLevel::with_floor(24, 4, 12, 1.0);
        let mut graph = PathGraph::new();
        let start = graph.add_node(NewNode::designer(level.stand_point(2, 0, 6, 0.9)));
        let ammo = graph.add_node(
            NewNode::designer(level.stand_point(4, 0, 6, 0.9)).kind(NodeKind::Pickup { item: "ammo".into() }),
        );
        let armor = graph.add_node(
            NewNode::designer(level.stand_point(8, 0, 6, 0.9)).kind(NodeKind::Pickup { item: "armor".into() }),
        );
        walk(&mut graph, start, ammo);
        walk(&mut graph, ammo, armor);
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = Seeker::new(graph.node(start).unwrap().position, Traveler::human());
        let mut weigher = ItemWeigher::new([("ammo".to_string(), 1.0), ("armor".to_string(), 20.0)]);
        let result = RouteSearch::new(&graph, &level, &config, &mut anchors).find_path_toward(
            &mut seeker,
            Destination::Weighed(&mut weigher),
            None,
            0,
        );
        assert_eq!(result.outcome, SearchOutcome::Reached);
        assert_eq!(seeker.route.as_slice().last(), Some(&armor));
        assert!((result.weight - 20.0 / 7.0).abs() < 1e-4);
    }

    #[test]
    fn detour_skips_nodes_already_on_the_route() {
        let mut f = line();
        let d = f
            .graph
            .add_node(NewNode::designer(f.level.stand_point(2, 0, 9, 0.9)).label("D"));
        walk(&mut f.graph, f.a, d);
        walk(&mut f.graph, d, f.a);
        walk(&mut f.graph, f.b, f.a);
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = seeker_at(&f, f.a);

        // B rates highest but is already on the route, so D is spliced in.
        let (b, d_handle) = (f.b, d);
        let mut rate = move |node: &NavNode, _: &Seeker| -> f32 {
            match node.handle {
                h if h == b => 10.0,
                h if h == d_handle => 1.0,
                _ => 0.0,
            }
        };
        let result = search(&f, &config, &mut anchors).find_path_toward(
            &mut seeker,
            Destination::Node(f.c),
            Some(&mut rate),
            0,
        );
        assert_eq!(result.next, Some(d));
        assert_eq!(seeker.route.as_slice(), &[d, f.a, f.b, f.c]);
        let route = seeker.route.as_slice();
        for (i, h) in route.iter().enumerate() {
            assert!(!route[i + 1..].contains(h), "{h} repeats");
        }
    }

    #[test]
    fn detour_needs_an_unforced_way_back() {
        let mut f = line();
        let d = f
            .graph
            .add_node(NewNode::designer(f.level.stand_point(2, 0, 9, 0.9)).label("D"));
        walk(&mut f.graph, f.a, d);
        let mut forced_back = ReachSpec::unconditional(d, f.a, 3.0, crate::types::Capsule::new(2.0, 2.0), ReachFlags::FORCED);
        forced_back.flags |= ReachFlags::WALK;
        f.graph.add_edge(forced_back);
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let mut seeker = seeker_at(&f, f.a);
        let mut rate = |_: &NavNode, _: &Seeker| -> f32 { 5.0 };
        search(&f, &config, &mut anchors).find_path_toward(&mut seeker, Destination::Node(f.c), Some(&mut rate), 0);
        assert_eq!(seeker.route.as_slice(), &[f.b, f.c]);
    }

    #[test]
    fn random_destination_is_reachable_and_seeded() {
        let (level, graph, nodes) = grid(6);
        let config = SearchConfig::default();
        let mut anchors = AnchorResolver::new(&ReachConfig::default());
        let start_pos = graph.node(nodes[0]).unwrap().position;

        let mut picks = Vec::new();
        for _ in 0..2 {
            let mut rng = ScoutRng::new(42);
            let mut seeker = Seeker::new(start_pos, Traveler::human());
            let result = RouteSearch::new(&graph, &level, &config, &mut anchors).random_destination(&mut seeker, &mut rng, 0);
            assert_eq!(result.outcome, SearchOutcome::Reached);
            assert!(result.weight > 0.0);
            let last = *seeker.route.as_slice().last().unwrap();
            assert_ne!(last, nodes[0]);
            picks.push(last);
        }
        assert_eq!(picks[0], picks[1]);
    }
}
