// Route cache and seeker state.
//
// A `Seeker` is one agent asking for routes: its position, body
// (`Traveler`), current anchor node, and the bounded route cache written by
// the last query. The cache holds at most `ROUTE_CACHE_CAPACITY` upcoming
// nodes, nearest first, and is overwritten wholesale by every query. The
// agent consumes it with `advance` as it moves and re-queries when it runs
// dry or the goal moves.
//
// See also: `search.rs`, which fills the cache.

use crate::graph::PathGraph;
use crate::types::{EntityId, NodeHandle, Traveler, Vec3};
use smallvec::SmallVec;

/// Hard upper bound on route cache entries.
pub const ROUTE_CACHE_CAPACITY: usize = 16;

/// The next leg of a route, nearest node first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteCache {
    nodes: SmallVec<[NodeHandle; ROUTE_CACHE_CAPACITY]>,
}

impl RouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first(&self) -> Option<NodeHandle> {
        self.nodes.first().copied()
    }

    pub fn get(&self, i: usize) -> Option<NodeHandle> {
        self.nodes.get(i).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.iter().copied()
    }

    pub fn as_slice(&self) -> &[NodeHandle] {
        &self.nodes
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.nodes.contains(&handle)
    }

    pub fn pop_front(&mut self) -> Option<NodeHandle> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(self.nodes.remove(0))
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Replace the contents with at most `limit` (and never more than
    /// `ROUTE_CACHE_CAPACITY`) entries of `route`.
    pub fn fill(&mut self, route: &[NodeHandle], limit: usize) {
        let n = route.len().min(limit).min(ROUTE_CACHE_CAPACITY);
        self.nodes.clear();
        self.nodes.extend_from_slice(&route[..n]);
    }
}

/// An agent that queries routes.
#[derive(Clone, Debug)]
pub struct Seeker {
    /// Entity the seeker is, if any. Entity seekers get cached anchors.
    pub id: Option<EntityId>,
    pub position: Vec3,
    pub traveler: Traveler,
    /// Node the seeker was last anchored to.
    pub anchor: Option<NodeHandle>,
    pub route: RouteCache,
    /// Tick of the last failed start-anchor resolution.
    pub(crate) anchor_failed_tick: Option<u64>,
}

impl Seeker {
    pub fn new(position: Vec3, traveler: Traveler) -> Self {
        Self {
            id: None,
            position,
            traveler,
            anchor: None,
            route: RouteCache::new(),
            anchor_failed_tick: None,
        }
    }

    pub fn with_entity(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Move the seeker and pop every leading cache entry it has arrived at
    /// (or that no longer exists). The last node reached becomes the anchor.
    /// Returns how many entries were consumed.
    pub fn advance(&mut self, graph: &PathGraph, position: Vec3, arrive_radius: f32) -> usize {
        self.position = position;
        let mut consumed = 0;
        while let Some(next) = self.route.first() {
            match graph.node(next) {
                Some(node) if node.position.distance(position) > arrive_radius => break,
                Some(_) => self.anchor = Some(next),
                None => {}
            }
            self.route.pop_front();
            consumed += 1;
        }
        consumed
    }

    /// Position of the next live cache entry.
    pub fn next_waypoint(&self, graph: &PathGraph) -> Option<Vec3> {
        self.route
            .iter()
            .find_map(|h| graph.node(h))
            .map(|n| n.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewNode;

    #[test]
    fn fill_respects_capacity() {
        let handles: Vec<NodeHandle> = (0..40).map(|i| NodeHandle::new(i, 0)).collect();
        let mut cache = RouteCache::new();
        cache.fill(&handles, 100);
        assert_eq!(cache.len(), ROUTE_CACHE_CAPACITY);
        cache.fill(&handles, 4);
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.first(), Some(handles[0]));
    }

    #[test]
    fn advance_consumes_reached_entries() {
        let mut graph = PathGraph::new();
        let a = graph.add_node(NewNode::auto(Vec3::new(1.0, 0.0, 0.0)));
        let b = graph.add_node(NewNode::auto(Vec3::new(5.0, 0.0, 0.0)));
        let mut seeker = Seeker::new(Vec3::ZERO, Traveler::human());
        seeker.route.fill(&[a, b], 16);

        assert_eq!(seeker.advance(&graph, Vec3::new(0.2, 0.0, 0.0), 0.5), 0);
        assert_eq!(seeker.advance(&graph, Vec3::new(1.1, 0.0, 0.0), 0.5), 1);
        assert_eq!(seeker.anchor, Some(a));
        assert_eq!(seeker.route.first(), Some(b));
        assert_eq!(seeker.next_waypoint(&graph), Some(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn advance_skips_removed_nodes() {
        let mut graph = PathGraph::new();
        let a = graph.add_node(NewNode::auto(Vec3::new(1.0, 0.0, 0.0)));
        let b = graph.add_node(NewNode::auto(Vec3::new(9.0, 0.0, 0.0)));
        let mut seeker = Seeker::new(Vec3::ZERO, Traveler::human());
        seeker.route.fill(&[a, b], 16);
        graph.remove_node(a);
        assert_eq!(seeker.advance(&graph, Vec3::ZERO, 0.5), 1);
        assert_eq!(seeker.route.first(), Some(b));
        assert_eq!(seeker.anchor, None);
    }
}
