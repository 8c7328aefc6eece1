// Saved levels and graph persistence.
//
// A `Level` is the voxel geometry plus the entity list, saved as one JSON
// document. There is no separate graph file: every nav node is stored as an
// ordinary entity of kind `NavPoint` carrying a `NavPointRecord` (label,
// position, kind, flags, designer overrides and, for tooling, its edges).
//
// Labels are the persisted identity of nodes; handles are rebuilt on load.
// `load_graph` reproduces node positions exactly. Saved edges are only
// restored when the caller trusts them; otherwise the graph comes back with
// every node flagged `changed` and no edges, ready for `define`.
//
// See also: `entity.rs` (`EntityList`, `EntityKind::NavPoint`),
// `voxel_level.rs`.

use crate::entity::{EntityKind, EntityList, EntityRegistry};
use crate::error::{NavError, NavResult};
use crate::graph::{NewNode, NodeKind, PathGraph, ReachSpec};
use crate::types::{EntityId, NodeFlags, NodeOrigin, ReachFlags, Vec3};
use crate::voxel_level::VoxelLevel;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_facing() -> Vec3 {
    Vec3::X
}

/// One outgoing edge of a saved nav point, addressed by label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedEdge {
    pub to: String,
    pub distance: f32,
    pub radius: f32,
    pub height: f32,
    pub flags: ReachFlags,
    #[serde(default)]
    pub max_landing_speed: f32,
}

/// Persisted form of a `NavNode`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NavPointRecord {
    pub label: String,
    pub position: Vec3,
    #[serde(default = "default_facing")]
    pub facing: Vec3,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub flags: NodeFlags,
    pub origin: NodeOrigin,
    #[serde(default)]
    pub cost: f32,
    #[serde(default)]
    pub endpoint: bool,
    #[serde(default)]
    pub entity: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forced: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proscribed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<SavedEdge>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Level {
    pub geometry: VoxelLevel,
    #[serde(default)]
    pub entities: EntityList,
}

impl Level {
    pub fn new(geometry: VoxelLevel) -> Self {
        Self {
            geometry,
            entities: EntityList::new(),
        }
    }

    pub fn from_json(json: &str) -> NavResult<Self> {
        let level: Level = serde_json::from_str(json)?;
        if !level.geometry.is_consistent() {
            return Err(NavError::InvalidLevel {
                reason: format!(
                    "voxel data does not match {}x{}x{} grid",
                    level.geometry.size_x, level.geometry.size_y, level.geometry.size_z
                ),
            });
        }
        Ok(level)
    }

    pub fn to_json_pretty(&self) -> NavResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> NavResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| NavError::io(path, e))?;
        let level = Self::from_json(&json)?;
        info!(path = %path.display(), entities = level.entities.len(), "loaded level");
        Ok(level)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> NavResult<()> {
        let path = path.as_ref();
        let json = self.to_json_pretty()?;
        std::fs::write(path, json).map_err(|e| NavError::io(path, e))?;
        info!(path = %path.display(), "saved level");
        Ok(())
    }

    /// Replace the level's nav point entities with the nodes of `graph`, in
    /// slot order. Returns the number of nav points written.
    pub fn store_graph(&mut self, graph: &PathGraph) -> usize {
        self.entities.clear_nav_points();
        let mut stored = 0;
        for node in graph.iter() {
            let edges = node
                .live_edges()
                .filter_map(|e| {
                    let end = graph.node(e.end)?;
                    Some(SavedEdge {
                        to: end.label.clone(),
                        distance: e.distance,
                        radius: e.radius,
                        height: e.height,
                        flags: e.flags,
                        max_landing_speed: e.max_landing_speed,
                    })
                })
                .collect();
            let record = NavPointRecord {
                label: node.label.clone(),
                position: node.position,
                facing: node.facing,
                kind: node.kind.clone(),
                flags: node.flags,
                origin: node.origin,
                cost: node.cost,
                endpoint: node.endpoint,
                entity: node.entity,
                forced: node.forced.clone(),
                proscribed: node.proscribed.clone(),
                edges,
            };
            self.entities
                .spawn(EntityKind::NavPoint(Box::new(record)), node.position);
            stored += 1;
        }
        stored
    }

    /// Rebuild the graph from the saved nav points.
    pub fn load_graph(&self, trust_edges: bool) -> NavResult<PathGraph> {
        let mut graph = PathGraph::new();
        let mut seen = FxHashSet::default();
        for (_, record) in self.entities.nav_points() {
            if !seen.insert(record.label.as_str()) {
                return Err(NavError::DuplicateLabel {
                    label: record.label.clone(),
                });
            }
            let mut spec = NewNode::new(record.position, record.origin)
                .label(&record.label)
                .kind(record.kind.clone())
                .flags(record.flags)
                .cost(record.cost)
                .facing(record.facing);
            spec.endpoint = record.endpoint;
            spec.entity = record.entity;
            spec.forced = record.forced.clone();
            spec.proscribed = record.proscribed.clone();
            graph.add_node(spec);
        }

        if trust_edges {
            for (_, record) in self.entities.nav_points() {
                let start = graph
                    .by_label(&record.label)
                    .ok_or_else(|| NavError::UnknownLabel {
                        label: record.label.clone(),
                    })?;
                for saved in &record.edges {
                    let end = graph.by_label(&saved.to).ok_or_else(|| NavError::UnknownLabel {
                        label: saved.to.clone(),
                    })?;
                    graph.add_edge(ReachSpec {
                        start,
                        end,
                        distance: saved.distance,
                        radius: saved.radius,
                        height: saved.height,
                        flags: saved.flags,
                        max_landing_speed: saved.max_landing_speed,
                        pruned: false,
                    });
                }
            }
            for node in graph.iter_mut() {
                node.changed = false;
            }
        }
        info!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            trust_edges,
            "loaded nav graph"
        );
        Ok(graph)
    }
}
