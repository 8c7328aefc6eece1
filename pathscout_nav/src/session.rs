// Navigation session: the context object runtime callers hold.
//
// Owns the graph, the configuration and the anchor cache, and hands out a
// `RouteSearch` per query. Graph mutation goes through `graph_mut` between
// queries; a query first compacts the graph if a removal left stale edges
// behind, so search never walks into a dead slot.
//
// See also: `search.rs`, `builder.rs` (offline counterpart).

use crate::anchor::AnchorResolver;
use crate::config::NavConfig;
use crate::geometry::LevelGeometry;
use crate::graph::PathGraph;
use crate::prng::ScoutRng;
use crate::route::Seeker;
use crate::search::{DetourEvaluator, Destination, RouteResult, RouteSearch};
use tracing::debug;

pub struct NavSession {
    graph: PathGraph,
    config: NavConfig,
    anchors: AnchorResolver,
}

impl NavSession {
    pub fn new(graph: PathGraph, config: NavConfig) -> Self {
        let anchors = AnchorResolver::new(&config.reach);
        Self {
            graph,
            config,
            anchors,
        }
    }

    pub fn graph(&self) -> &PathGraph {
        &self.graph
    }

    /// Mutable access for edits between queries. Cached anchors are
    /// revalidated on use, so nothing needs resetting here.
    pub fn graph_mut(&mut self) -> &mut PathGraph {
        &mut self.graph
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn into_graph(self) -> PathGraph {
        self.graph
    }

    fn prepare(&mut self) {
        if self.graph.has_stale_edges() {
            let removed = self.graph.compact();
            debug!(removed, "compacted stale edges before query");
        }
    }

    pub fn find_path_toward<G: LevelGeometry + ?Sized>(
        &mut self,
        geometry: &G,
        seeker: &mut Seeker,
        destination: Destination<'_>,
        detour: Option<&mut dyn DetourEvaluator>,
        tick: u64,
    ) -> RouteResult {
        self.prepare();
        RouteSearch::new(&self.graph, geometry, &self.config.search, &mut self.anchors)
            .find_path_toward(seeker, destination, detour, tick)
    }

    pub fn random_destination<G: LevelGeometry + ?Sized>(
        &mut self,
        geometry: &G,
        seeker: &mut Seeker,
        rng: &mut ScoutRng,
        tick: u64,
    ) -> RouteResult {
        self.prepare();
        RouteSearch::new(&self.graph, geometry, &self.config.search, &mut self.anchors)
            .random_destination(seeker, rng, tick)
    }

    /// Re-read hazard state from the level. Returns the hazardous count.
    pub fn refresh_hazards<G: LevelGeometry + ?Sized>(&mut self, geometry: &G) -> usize {
        self.graph.refresh_hazards(geometry)
    }
}
