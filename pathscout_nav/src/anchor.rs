// Anchor resolution: which graph node stands in for a world position.
//
// `find_anchor` takes a point or a moving entity and returns the nearest
// node that is both in line of sight and actually walkable for the querying
// body. It builds a bounded shortlist of nearby nodes sorted by squared
// distance and accepts the first that passes both checks. For a start
// anchor the probe walks from the query point to the node; for a goal
// anchor it walks from the node to the point.
//
// Goal queries on an entity remember their last anchor with the tick it was
// found. While that entry is younger than `anchor_cache_ticks` and the node
// is still visible and unblocked it is reused without rescanning, so a
// chased target does not cost a shortlist scan every frame. Start queries
// never touch the cache: the seeker may have dropped somewhere it cannot
// walk back from, so its anchor is always walk-checked from where it is.
//
// "No anchor" is `None`, never an error; the caller reports it as no path.
//
// See also: `search.rs` (start and goal resolution), `graph.rs`
// (`PathGraph::nearest`).

use crate::config::{ReachConfig, SearchConfig};
use crate::geometry::{LevelGeometry, LineMode};
use crate::graph::PathGraph;
use crate::probe::ProbeAgent;
use crate::types::{EntityId, NodeHandle, Traveler, Vec3};
use rustc_hash::FxHashMap;
use tracing::trace;

/// What an anchor is being resolved for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AnchorQuery {
    Point(Vec3),
    Entity { id: EntityId, position: Vec3 },
}

impl AnchorQuery {
    pub fn position(&self) -> Vec3 {
        match *self {
            AnchorQuery::Point(p) => p,
            AnchorQuery::Entity { position, .. } => position,
        }
    }

    fn entity(&self) -> Option<EntityId> {
        match *self {
            AnchorQuery::Point(_) => None,
            AnchorQuery::Entity { id, .. } => Some(id),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct CachedAnchor {
    node: NodeHandle,
    tick: u64,
}

#[derive(Clone, Debug)]
pub struct AnchorResolver {
    cache: FxHashMap<EntityId, CachedAnchor>,
    probe: ProbeAgent,
}

impl AnchorResolver {
    pub fn new(reach: &ReachConfig) -> Self {
        Self {
            cache: FxHashMap::default(),
            probe: ProbeAgent::from_config(reach),
        }
    }

    /// Resolve an anchor for `query`. `for_goal` reverses the walk check and
    /// enables the entity cache.
    #[allow(clippy::too_many_arguments)]
    pub fn find_anchor<G: LevelGeometry + ?Sized>(
        &mut self,
        graph: &PathGraph,
        geometry: &G,
        config: &SearchConfig,
        query: AnchorQuery,
        traveler: &Traveler,
        for_goal: bool,
        tick: u64,
    ) -> Option<NodeHandle> {
        let point = query.position();
        let entity = query.entity().filter(|_| for_goal);

        if let Some(cached) = entity.and_then(|id| self.cache.get(&id).copied()) {
            let fresh = tick.saturating_sub(cached.tick) <= config.anchor_cache_ticks;
            let usable = graph
                .node(cached.node)
                .is_some_and(|n| !n.blocked && visible(geometry, point, n.position));
            if fresh && usable {
                trace!(node = %cached.node, "reusing cached anchor");
                return Some(cached.node);
            }
        }

        let shortlist = graph.nearest(point, config.anchor_shortlist, config.max_anchor_distance);
        self.probe.set_capsule(traveler.capsule());
        self.probe.set_caps(traveler.caps);

        let found = shortlist.into_iter().map(|(h, _)| h).find(|&h| {
            let Some(node) = graph.node(h) else {
                return false;
            };
            if node.blocked || !visible(geometry, point, node.position) {
                return false;
            }
            if !config.anchor_walk_check || node.position.distance(point) <= config.arrive_radius {
                return true;
            }
            let (from, to) = if for_goal {
                (node.position, point)
            } else {
                (point, node.position)
            };
            self.probe.can_reach(geometry, from, to)
        });

        match (found, entity) {
            (Some(node), Some(id)) => {
                self.cache.insert(id, CachedAnchor { node, tick });
            }
            (None, Some(id)) => {
                self.cache.remove(&id);
            }
            _ => {}
        }
        trace!(?found, for_goal, "anchor resolved");
        found
    }

    /// Forget the cached anchor of one entity.
    pub fn forget(&mut self, id: EntityId) {
        self.cache.remove(&id);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

fn visible<G: LevelGeometry + ?Sized>(geometry: &G, from: Vec3, to: Vec3) -> bool {
    geometry.line_check(from, to, LineMode::AnyHit).is_none()
}
