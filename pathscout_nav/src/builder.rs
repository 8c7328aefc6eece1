// Graph building: the tooling operations over a `PathGraph`.
//
// A full `build` runs the phases
//
//   CLEAR -> MARK -> EXPLORE -> BASE -> EVALUATE_EDGES -> MERGE
//         -> INTERMEDIATE_INSERT -> PRUNE -> COMMIT
//
// CLEAR removes auto-built nodes and strips every edge; designer nodes keep
// their position. MARK spawns one typed auto-built node per entity that
// wants a waypoint. EXPLORE seeds nodes over unmarked floor. BASE settles
// nodes onto their floor; an auto-built node with no floor within
// `base_tolerance` is dropped, a designer node stays put and COMMIT reports
// it. EVALUATE_EDGES probes every candidate pair in both directions, then
// adds the per-kind special edges and the designer overrides. MERGE and
// INTERMEDIATE_INSERT change the node set, and every node they touch is
// re-evaluated against its neighbours before PRUNE. COMMIT restores
// collision on movers, reviews the graph into the report and clears the
// `changed` flags.
//
// Movers (doors) do not block the probe from EXPLORE until COMMIT, so a
// closed door neither stops exploration nor cuts the graph.
//
// `define` re-evaluates all edges over the existing nodes, `define_changed`
// only those touching nodes flagged `changed`; neither explores or merges.
// `remove` and `undefine` strip auto-built content, and `review` only
// reports.
//
// The builder borrows the level for its lifetime and owns the probe and the
// report in progress; nothing here is global.
//
// See also: `reach.rs`, `refine.rs`, `explore.rs`, `diagnostics.rs`.

use crate::config::NavConfig;
use crate::diagnostics::{BuildReport, review_graph};
use crate::entity::EntityRegistry;
use crate::explore::explore;
use crate::geometry::{LevelGeometry, Medium};
use crate::graph::{NewNode, PathGraph, ReachSpec};
use crate::probe::ProbeAgent;
use crate::reach::{ReachabilityEvaluator, candidate_pairs};
use crate::refine::{insert_intermediates, merge_nodes, prune_edges};
use crate::types::{NodeHandle, NodeOrigin, ReachFlags};
use rustc_hash::FxHashSet;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    Clear,
    Mark,
    Explore,
    Base,
    EvaluateEdges,
    Merge,
    IntermediateInsert,
    Prune,
    Commit,
}

impl BuildPhase {
    const COUNT: usize = 9;

    /// Fraction of a full build completed when this phase starts.
    pub fn fraction(self) -> f32 {
        self as usize as f32 / Self::COUNT as f32
    }
}

type ProgressFn<'a> = Box<dyn FnMut(BuildPhase, f32) + 'a>;

pub struct NavGraphBuilder<'a, G: LevelGeometry + ?Sized> {
    geometry: &'a mut G,
    config: &'a NavConfig,
    progress: Option<ProgressFn<'a>>,
    probe: ProbeAgent,
    report: BuildReport,
}

impl<'a, G: LevelGeometry + ?Sized> NavGraphBuilder<'a, G> {
    pub fn new(geometry: &'a mut G, config: &'a NavConfig) -> Self {
        Self {
            geometry,
            config,
            progress: None,
            probe: ProbeAgent::from_config(&config.reach),
            report: BuildReport::new(),
        }
    }

    /// Called with each phase as it starts, and with `(Commit, 1.0)` at the
    /// end of every operation.
    pub fn with_progress(mut self, progress: impl FnMut(BuildPhase, f32) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    fn enter(&mut self, phase: BuildPhase) {
        debug!(?phase, "build phase");
        if let Some(progress) = self.progress.as_mut() {
            progress(phase, phase.fraction());
        }
    }

    // -----------------------------------------------------------------------
    // Tooling operations
    // -----------------------------------------------------------------------

    /// Full rebuild from the level's entities.
    pub fn build<R: EntityRegistry + ?Sized>(&mut self, graph: &mut PathGraph, entities: &R) -> BuildReport {
        info!(nodes = graph.len(), "building nav graph");
        self.geometry.set_movers_blocking(false);
        self.enter(BuildPhase::Clear);
        self.clear(graph);

        self.enter(BuildPhase::Mark);
        self.mark(graph, entities);

        self.enter(BuildPhase::Explore);
        let explored = explore(
            graph,
            &*self.geometry,
            &self.config.reach,
            &self.config.build,
            &mut self.probe,
        );
        self.report.stats.explored_nodes += explored;
        self.report.stats.nodes_added += explored;

        self.enter(BuildPhase::Base);
        self.base(graph, None);

        self.enter(BuildPhase::EvaluateEdges);
        self.evaluate(graph, None);
        self.settle(graph);

        self.enter(BuildPhase::Merge);
        let merged = merge_nodes(
            graph,
            &*self.geometry,
            &self.config.reach,
            &self.config.build,
            &mut self.probe,
        );
        self.report.stats.nodes_merged += merged;
        self.report.stats.nodes_removed += merged;
        self.reevaluate_changed(graph);

        self.enter(BuildPhase::IntermediateInsert);
        for _ in 0..self.config.build.intermediate_passes {
            let inserted = insert_intermediates(
                graph,
                &*self.geometry,
                &self.config.reach,
                &self.config.build,
                &mut self.probe,
            );
            if inserted == 0 {
                break;
            }
            self.report.stats.intermediates_inserted += inserted;
            self.report.stats.nodes_added += inserted;
            self.reevaluate_changed(graph);
        }

        self.enter(BuildPhase::Prune);
        self.report.stats.edges_pruned += prune_edges(graph, &self.config.build);

        self.commit(graph)
    }

    /// Delete every auto-built node and every edge.
    pub fn remove(&mut self, graph: &mut PathGraph) -> BuildReport {
        self.enter(BuildPhase::Clear);
        self.clear(graph);
        info!(
            removed = self.report.stats.nodes_removed,
            remaining = graph.len(),
            "removed auto-built nav points"
        );
        self.finish()
    }

    /// Recompute every edge over the existing nodes.
    pub fn define(&mut self, graph: &mut PathGraph) -> BuildReport {
        self.enter(BuildPhase::Clear);
        graph.compact();
        graph.clear_all_edges();

        self.enter(BuildPhase::Base);
        self.geometry.set_movers_blocking(false);
        self.base(graph, None);

        self.enter(BuildPhase::EvaluateEdges);
        self.evaluate(graph, None);

        self.enter(BuildPhase::Prune);
        self.report.stats.edges_pruned += prune_edges(graph, &self.config.build);
        self.commit(graph)
    }

    /// Recompute only the edges touching nodes flagged `changed`.
    pub fn define_changed(&mut self, graph: &mut PathGraph) -> BuildReport {
        graph.compact();
        let changed = changed_set(graph);
        info!(changed = changed.len(), "incremental define");
        if !changed.is_empty() {
            self.enter(BuildPhase::Clear);
            clear_incident_edges(graph, &changed);

            self.enter(BuildPhase::Base);
            self.geometry.set_movers_blocking(false);
            self.base(graph, Some(&changed));

            self.enter(BuildPhase::EvaluateEdges);
            self.evaluate(graph, Some(&changed));

            self.enter(BuildPhase::Prune);
            self.report.stats.edges_pruned += prune_edges(graph, &self.config.build);
        }
        self.commit(graph)
    }

    /// Strip to designer-placed nodes with no edges and no runtime state.
    pub fn undefine(&mut self, graph: &mut PathGraph) -> BuildReport {
        self.enter(BuildPhase::Clear);
        self.clear(graph);
        for node in graph.iter_mut() {
            node.blocked = false;
            node.hazard = false;
            node.endpoint = false;
            node.changed = true;
        }
        info!(nodes = graph.len(), "undefined nav graph");
        self.finish()
    }

    /// Validate the graph without changing it.
    pub fn review(&self, graph: &PathGraph) -> BuildReport {
        let mut report = BuildReport::new();
        review_graph(
            graph,
            &*self.geometry,
            &self.config.reach,
            &self.config.build,
            &mut report,
        );
        info!(
            errors = report.errors().count(),
            warnings = report.warnings().count(),
            "nav graph reviewed"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn clear(&mut self, graph: &mut PathGraph) {
        let auto: Vec<NodeHandle> = graph
            .iter()
            .filter(|n| n.origin == NodeOrigin::AutoBuilt)
            .map(|n| n.handle)
            .collect();
        for handle in &auto {
            graph.remove_node(*handle);
        }
        graph.clear_all_edges();
        self.report.stats.nodes_removed += auto.len();
        debug!(removed = auto.len(), "cleared auto-built nodes");
    }

    fn mark<R: EntityRegistry + ?Sized>(&mut self, graph: &mut PathGraph, entities: &R) {
        let bound: FxHashSet<_> = graph.iter().filter_map(|n| n.entity).collect();
        let mut spawned = 0;
        for entity in entities.entities() {
            let Some(kind) = entity.kind.waypoint_kind() else {
                continue;
            };
            if bound.contains(&entity.id) {
                continue;
            }
            graph.add_node(NewNode::auto(entity.position).kind(kind).entity(entity.id));
            spawned += 1;
        }
        self.report.stats.nodes_added += spawned;
        debug!(spawned, "marked waypoint entities");
    }

    /// Settle nodes (all, or those in `only`) onto their floor.
    fn base(&mut self, graph: &mut PathGraph, only: Option<&FxHashSet<NodeHandle>>) {
        let capsule = self.config.reach.human().capsule();
        let tolerance = self.config.build.base_tolerance;
        let mut unsupported = Vec::new();
        for node in graph.iter_mut() {
            if only.is_some_and(|set| !set.contains(&node.handle)) || !node.kind.needs_base() {
                continue;
            }
            if matches!(self.geometry.medium_at(node.position), Medium::Water | Medium::Ladder) {
                continue;
            }
            let start = if node.origin == NodeOrigin::AutoBuilt && self.geometry.encroaches(node.position, capsule) {
                self.geometry.teleport_agent(node.position, capsule)
            } else {
                Some(node.position)
            };
            match start.and_then(|p| self.geometry.probe_floor(p, capsule, tolerance)) {
                Some(floor) => node.position = floor.location,
                None if node.origin == NodeOrigin::AutoBuilt => unsupported.push(node.handle),
                None => {}
            }
        }
        for handle in &unsupported {
            graph.remove_node(*handle);
        }
        if !unsupported.is_empty() {
            graph.compact();
            self.report.stats.nodes_removed += unsupported.len();
            debug!(dropped = unsupported.len(), "dropped auto-built nodes without a floor");
        }
    }

    /// Probe candidate pairs (all, or those touching `only`) and add the
    /// special and designer edges.
    fn evaluate(&mut self, graph: &mut PathGraph, only: Option<&FxHashSet<NodeHandle>>) {
        let evaluator = ReachabilityEvaluator::new(&*self.geometry, &self.config.reach);
        let filter = only.map(|set| move |h: NodeHandle| set.contains(&h));
        let pairs = candidate_pairs(
            graph,
            self.config.build.max_edge_distance,
            filter.as_ref().map(|f| f as &dyn Fn(NodeHandle) -> bool),
        );
        let results = evaluator.evaluate_pairs(graph, &pairs, &self.probe, self.config.build.parallel_evaluation);
        self.report.stats.pairs_evaluated += pairs.len();

        let mut created = 0;
        for spec in results.into_iter().flatten() {
            if graph.add_edge(spec) {
                created += 1;
            }
        }
        self.report.stats.edges_created += created;

        let envelope = evaluator.max_envelope();
        let mut special = Vec::new();
        let mut overrides = Vec::new();
        for node in graph.iter() {
            special.extend(node.kind.special_edges(graph, node, envelope, &self.config.build));
            for label in &node.forced {
                if let Some(end) = graph.by_label(label).and_then(|h| graph.node(h)) {
                    let distance = node.position.distance(end.position);
                    overrides.push(ReachSpec::unconditional(
                        node.handle,
                        end.handle,
                        distance,
                        envelope,
                        ReachFlags::FORCED,
                    ));
                }
            }
            for label in &node.proscribed {
                if let Some(end) = graph.by_label(label) {
                    overrides.push(ReachSpec::unconditional(
                        node.handle,
                        end,
                        0.0,
                        envelope,
                        ReachFlags::PROSCRIBED,
                    ));
                }
            }
        }
        for spec in special {
            if graph.add_edge(spec) {
                self.report.stats.special_edges += 1;
            }
        }
        for spec in overrides {
            let forced = spec.flags.contains(ReachFlags::FORCED);
            if graph.add_edge(spec) {
                if forced {
                    self.report.stats.forced_edges += 1;
                } else {
                    self.report.stats.proscribed_edges += 1;
                }
            }
        }
        info!(
            pairs = pairs.len(),
            created,
            edges = graph.edge_count(),
            "evaluated edges"
        );
    }

    /// Re-evaluate every node the last refinement pass flagged.
    fn reevaluate_changed(&mut self, graph: &mut PathGraph) {
        let changed = changed_set(graph);
        if changed.is_empty() {
            return;
        }
        clear_incident_edges(graph, &changed);
        self.base(graph, Some(&changed));
        self.evaluate(graph, Some(&changed));
        self.settle(graph);
    }

    fn settle(&mut self, graph: &mut PathGraph) {
        for node in graph.iter_mut() {
            node.changed = false;
        }
    }

    fn commit(&mut self, graph: &mut PathGraph) -> BuildReport {
        self.enter(BuildPhase::Commit);
        self.geometry.set_movers_blocking(true);
        graph.compact();
        review_graph(
            graph,
            &*self.geometry,
            &self.config.reach,
            &self.config.build,
            &mut self.report,
        );
        self.settle(graph);
        let stats = &self.report.stats;
        info!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            added = stats.nodes_added,
            removed = stats.nodes_removed,
            merged = stats.nodes_merged,
            intermediates = stats.intermediates_inserted,
            pruned = stats.edges_pruned,
            errors = self.report.errors().count(),
            warnings = self.report.warnings().count(),
            "nav graph committed"
        );
        self.finish()
    }

    fn finish(&mut self) -> BuildReport {
        if let Some(progress) = self.progress.as_mut() {
            progress(BuildPhase::Commit, 1.0);
        }
        std::mem::take(&mut self.report)
    }
}

fn changed_set(graph: &PathGraph) -> FxHashSet<NodeHandle> {
    graph.iter().filter(|n| n.changed).map(|n| n.handle).collect()
}

/// Drop edges into or out of `set`, except those the owning kind keeps.
fn clear_incident_edges(graph: &mut PathGraph, set: &FxHashSet<NodeHandle>) {
    for node in graph.iter_mut() {
        let owner_changed = set.contains(&node.handle);
        let kind = &node.kind;
        node.edges
            .retain(|e| kind.keeps_edge_on_clear(e) || !(owner_changed || set.contains(&e.end)));
    }
}
