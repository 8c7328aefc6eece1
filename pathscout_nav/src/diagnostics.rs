// Build diagnostics and graph review.
//
// Everything the builder or `review` finds wrong with a graph is a
// `Diagnostic` collected in a `BuildReport`; nothing here aborts a build.
// Each diagnostic is logged as it is pushed (`warn!` or `error!`), so the
// tooling log and the returned report always agree.
//
// `review_graph` is the read-only check run at COMMIT and by the `review`
// tooling command: missing floors, embedded nodes, crowding, unreachable
// must-reach nodes, missing back edges, long lonely edges, spawn point
// count, isolated nodes, and the per-kind checks from
// `NodeKind::review`.
//
// See also: `builder.rs`, `graph.rs` (`NodeKind::review`).

use crate::config::{BuildConfig, ReachConfig};
use crate::geometry::{LevelGeometry, Medium};
use crate::graph::{NavNode, NodeKind, PathGraph};
use crate::types::{NodeFlags, NodeHandle, ReachFlags, Vec3};
use serde::Serialize;
use std::fmt;
use tracing::{error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DiagnosticKind {
    /// No supporting floor within the base tolerance.
    NoBase,
    /// The node's body overlaps solid geometry.
    Embedded,
    TooClose { other: String },
    /// MUST_BE_REACHABLE, yet no edge leads into it.
    UnreachableRequired,
    /// A level walk edge whose reverse is missing.
    MissingBackEdge { to: String },
    /// Long unforced edge with no shorter two-hop alternative.
    LongEdge { to: String, distance: f32 },
    TooFewSpawnPoints { found: usize, required: usize },
    MissingTeleportDestination { destination: String },
    LiftWithoutExits,
    OrphanLiftExit,
    /// A forced or proscribed label that names no node.
    UnknownOverrideTarget { label: String },
    /// No edges in or out.
    IsolatedNode,
}

impl DiagnosticKind {
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticKind::NoBase
            | DiagnosticKind::Embedded
            | DiagnosticKind::UnreachableRequired
            | DiagnosticKind::TooFewSpawnPoints { .. }
            | DiagnosticKind::MissingTeleportDestination { .. } => Severity::Error,
            DiagnosticKind::TooClose { .. }
            | DiagnosticKind::MissingBackEdge { .. }
            | DiagnosticKind::LongEdge { .. }
            | DiagnosticKind::LiftWithoutExits
            | DiagnosticKind::OrphanLiftExit
            | DiagnosticKind::UnknownOverrideTarget { .. }
            | DiagnosticKind::IsolatedNode => Severity::Warning,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    #[serde(skip)]
    pub node: Option<NodeHandle>,
    pub label: Option<String>,
    pub position: Option<Vec3>,
}

impl Diagnostic {
    pub fn at(node: &NavNode, kind: DiagnosticKind) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            node: Some(node.handle),
            label: Some(node.label.clone()),
            position: Some(node.position),
        }
    }

    pub fn global(kind: DiagnosticKind) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            node: None,
            label: None,
            position: None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.label {
            Some(label) => write!(f, "{level}: {label}: {:?}", self.kind),
            None => write!(f, "{level}: {:?}", self.kind),
        }
    }
}

/// Counters collected over one tooling operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub nodes_added: usize,
    pub nodes_removed: usize,
    pub nodes_merged: usize,
    pub explored_nodes: usize,
    pub intermediates_inserted: usize,
    pub pairs_evaluated: usize,
    pub edges_created: usize,
    pub edges_pruned: usize,
    pub special_edges: usize,
    pub forced_edges: usize,
    pub proscribed_edges: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub diagnostics: Vec<Diagnostic>,
    pub stats: BuildStats,
}

impl BuildReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => warn!(label = ?diagnostic.label, kind = ?diagnostic.kind, "nav review"),
            Severity::Error => error!(label = ?diagnostic.label, kind = ?diagnostic.kind, "nav review"),
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// Diagnostics attached to the node labelled `label`.
    pub fn for_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.diagnostics
            .iter()
            .filter(move |d| d.label.as_deref() == Some(label))
    }
}

/// Check a graph without changing it.
pub fn review_graph<G: LevelGeometry + ?Sized>(
    graph: &PathGraph,
    geometry: &G,
    reach: &ReachConfig,
    build: &BuildConfig,
    report: &mut BuildReport,
) {
    let nodes: Vec<&NavNode> = graph.iter().collect();
    let smallest = reach
        .envelopes
        .first()
        .map_or(reach.human().capsule(), |e| e.capsule());
    let multi_node = nodes.len() > 1;

    for (i, node) in nodes.iter().enumerate() {
        if geometry.encroaches(node.position, smallest) {
            report.push(Diagnostic::at(node, DiagnosticKind::Embedded));
        } else if node.kind.needs_base()
            && !matches!(geometry.medium_at(node.position), Medium::Water | Medium::Ladder)
            && geometry
                .probe_floor(node.position, smallest, build.base_tolerance)
                .is_none()
        {
            report.push(Diagnostic::at(node, DiagnosticKind::NoBase));
        }

        for other in &nodes[..i] {
            if node.position.distance(other.position) < build.min_node_spacing {
                report.push(Diagnostic::at(
                    node,
                    DiagnosticKind::TooClose {
                        other: other.label.clone(),
                    },
                ));
            }
        }

        let incoming = graph.incoming(node.handle);
        if node.flags.contains(NodeFlags::MUST_BE_REACHABLE) && incoming.is_empty() {
            report.push(Diagnostic::at(node, DiagnosticKind::UnreachableRequired));
        }
        if multi_node && incoming.is_empty() && node.live_edges().next().is_none() {
            report.push(Diagnostic::at(node, DiagnosticKind::IsolatedNode));
        }

        for label in node.forced.iter().chain(&node.proscribed) {
            if graph.by_label(label).is_none() {
                report.push(Diagnostic::at(
                    node,
                    DiagnosticKind::UnknownOverrideTarget {
                        label: label.clone(),
                    },
                ));
            }
        }

        review_edges(graph, node, build, report);

        for kind in node.kind.review(graph, node) {
            report.push(Diagnostic::at(node, kind));
        }
    }

    let spawns = nodes
        .iter()
        .filter(|n| n.kind == NodeKind::PlayerStart)
        .count();
    if spawns < build.min_spawn_points {
        report.push(Diagnostic::global(DiagnosticKind::TooFewSpawnPoints {
            found: spawns,
            required: build.min_spawn_points,
        }));
    }
}

fn review_edges(graph: &PathGraph, node: &NavNode, build: &BuildConfig, report: &mut BuildReport) {
    let non_walk = ReachFlags::MOVEMENT.difference(ReachFlags::WALK.union(ReachFlags::DOOR));
    for edge in node.live_edges().filter(|e| e.is_traversable()) {
        let Some(end) = graph.node(edge.end) else {
            continue;
        };

        let plain_walk = !edge.flags.intersects(non_walk) && !edge.is_designer_override();
        let level = (end.position.y - node.position.y).abs() <= build.symmetric_height_tolerance;
        let one_way = node.flags.contains(NodeFlags::ONE_WAY) || end.flags.contains(NodeFlags::ONE_WAY);
        let no_auto = node.flags.contains(NodeFlags::NO_AUTO_CONNECT)
            || end.flags.contains(NodeFlags::NO_AUTO_CONNECT);
        if plain_walk && level && !one_way && !no_auto && graph.edge(edge.end, node.handle).is_none() {
            report.push(Diagnostic::at(
                node,
                DiagnosticKind::MissingBackEdge {
                    to: end.label.clone(),
                },
            ));
        }

        let long = edge.distance > build.long_edge_warning
            && !edge
                .flags
                .intersects(ReachFlags::FORCED | ReachFlags::SPECIAL);
        if long {
            let alternate = node.live_edges().any(|first| {
                first.end != edge.end
                    && first.is_traversable()
                    && graph.edge(first.end, edge.end).is_some_and(|second| {
                        second.is_traversable() && first.distance.max(second.distance) < edge.distance
                    })
            });
            if !alternate {
                report.push(Diagnostic::at(
                    node,
                    DiagnosticKind::LongEdge {
                        to: end.label.clone(),
                        distance: edge.distance,
                    },
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NewNode, ReachSpec};
    use crate::voxel_level::{VoxelKind, VoxelLevel};

    fn walk(graph: &mut PathGraph, a: NodeHandle, b: NodeHandle) {
        let (pa, pb) = (graph.node(a).unwrap().position, graph.node(b).unwrap().position);
        graph.add_edge(ReachSpec {
            start: a,
            end: b,
            distance: pa.distance(pb),
            radius: 0.75,
            height: 1.1,
            flags: ReachFlags::WALK,
            max_landing_speed: 0.0,
            pruned: false,
        });
    }

    fn review(graph: &PathGraph, level: &VoxelLevel) -> BuildReport {
        let mut report = BuildReport::new();
        let mut build = BuildConfig::default();
        build.min_spawn_points = 0;
        review_graph(graph, level, &ReachConfig::default(), &build, &mut report);
        report
    }

    #[test]
    fn unreachable_required_node_is_an_error() {
        let level = VoxelLevel::with_floor(16, 6, 16, 1.0);
        let mut graph = PathGraph::new();
        let a = graph.add_node(NewNode::designer(level.stand_point(2, 0, 2, 0.9)).label("A"));
        let goal = graph.add_node(
            NewNode::designer(level.stand_point(6, 0, 2, 0.9))
                .label("Vault")
                .flags(NodeFlags::MUST_BE_REACHABLE),
        );
        walk(&mut graph, goal, a);
        let report = review(&graph, &level);
        assert!(report.has_errors());
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::UnreachableRequired);
        assert_eq!(errors[0].label.as_deref(), Some("Vault"));
    }

    #[test]
    fn floating_and_embedded_nodes() {
        let mut level = VoxelLevel::with_floor(16, 12, 16, 1.0);
        level.fill_box([10, 1, 10], [12, 4, 12], VoxelKind::Solid);
        let mut graph = PathGraph::new();
        graph.add_node(NewNode::designer(Vec3::new(3.5, 9.0, 3.5)).label("Floating"));
        graph.add_node(NewNode::designer(Vec3::new(11.5, 2.5, 11.5)).label("Buried"));
        let report = review(&graph, &level);
        assert!(report
            .for_label("Floating")
            .any(|d| d.kind == DiagnosticKind::NoBase));
        assert!(report
            .for_label("Buried")
            .any(|d| d.kind == DiagnosticKind::Embedded));
    }

    #[test]
    fn missing_back_edge_on_level_ground() {
        let level = VoxelLevel::with_floor(16, 6, 16, 1.0);
        let mut graph = PathGraph::new();
        let a = graph.add_node(NewNode::designer(level.stand_point(2, 0, 2, 0.9)).label("A"));
        let b = graph.add_node(NewNode::designer(level.stand_point(6, 0, 2, 0.9)).label("B"));
        walk(&mut graph, a, b);
        let report = review(&graph, &level);
        assert!(report
            .for_label("A")
            .any(|d| d.kind == DiagnosticKind::MissingBackEdge { to: "B".into() }));
        walk(&mut graph, b, a);
        assert!(review(&graph, &level).diagnostics.is_empty());
    }

    #[test]
    fn too_few_spawn_points_and_crowding() {
        let level = VoxelLevel::with_floor(16, 6, 16, 1.0);
        let mut graph = PathGraph::new();
        let p = level.stand_point(2, 0, 2, 0.9);
        graph.add_node(NewNode::designer(p).label("A"));
        graph.add_node(NewNode::designer(p + Vec3::new(0.2, 0.0, 0.0)).label("B"));
        let mut report = BuildReport::new();
        review_graph(
            &graph,
            &level,
            &ReachConfig::default(),
            &BuildConfig::default(),
            &mut report,
        );
        assert!(report.diagnostics.iter().any(|d| matches!(
            d.kind,
            DiagnosticKind::TooFewSpawnPoints { found: 0, required: 1 }
        )));
        assert!(report
            .for_label("B")
            .any(|d| d.kind == DiagnosticKind::TooClose { other: "A".into() }));
    }

    #[test]
    fn long_edge_without_alternate_is_reported() {
        let level = VoxelLevel::with_floor(32, 6, 8, 1.0);
        let mut graph = PathGraph::new();
        let a = graph.add_node(NewNode::designer(level.stand_point(2, 0, 2, 0.9)).label("A"));
        let b = graph.add_node(NewNode::designer(level.stand_point(25, 0, 2, 0.9)).label("B"));
        walk(&mut graph, a, b);
        walk(&mut graph, b, a);
        let report = review(&graph, &level);
        assert!(report
            .for_label("A")
            .any(|d| matches!(d.kind, DiagnosticKind::LongEdge { .. })));

        let mid = graph.add_node(NewNode::designer(level.stand_point(13, 0, 2, 0.9)).label("M"));
        walk(&mut graph, a, mid);
        walk(&mut graph, mid, b);
        let report = review(&graph, &level);
        assert!(!report
            .for_label("A")
            .any(|d| matches!(d.kind, DiagnosticKind::LongEdge { .. })));
    }
}
