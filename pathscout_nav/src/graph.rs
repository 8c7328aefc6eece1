// The persistent navigation graph: nodes, directed edges, and node kinds.
//
// `PathGraph` is an arena of slots addressed by generation-checked
// `NodeHandle`s. Removing a node bumps its slot's generation and pushes the
// slot onto a free list; every handle to the removed node (including the
// `end` of other nodes' edges) becomes stale and is detected in O(1) by
// `contains`. Stale edges are not swept eagerly: they are skipped by every
// reader and dropped by `compact`, which callers run between queries.
//
// Each node owns its outgoing edges (`ReachSpec`). Edges are directional;
// A->B says nothing about B->A. At most one edge exists per ordered pair.
// Designer overrides win: a FORCED or PROSCRIBED edge is never replaced by
// an evaluated one.
//
// `NodeKind` is a closed set of node categories with a small capability
// table (special edges, review checks, edge clearing, base requirement,
// implied edge flags) dispatched by `match`, so lifts, teleporters, ladders
// and doors need no runtime type inspection.
//
// Labels are unique and are the persisted identity of a node (handles are
// not stable across save/load). Unlabelled nodes get `NavPoint<n>`.
//
// See also: `types.rs` for handles and flags, `reach.rs` which produces
// edges, `search.rs` which reads them, `level.rs` for persistence.

use crate::config::BuildConfig;
use crate::diagnostics::DiagnosticKind;
use crate::geometry::{LevelGeometry, Medium};
use crate::types::{
    Capsule, EntityId, NodeFlags, NodeHandle, NodeOrigin, ReachFlags, Traveler, Vec3,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// A directed, capability-qualified connection between two nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct ReachSpec {
    pub start: NodeHandle,
    pub end: NodeHandle,
    /// Traversal cost, penalties already applied.
    pub distance: f32,
    /// Largest body radius known to fit.
    pub radius: f32,
    /// Largest body half-height known to fit.
    pub height: f32,
    pub flags: ReachFlags,
    /// Fastest landing observed along the edge.
    pub max_landing_speed: f32,
    pub pruned: bool,
}

impl ReachSpec {
    /// Edge that any body may use, of the given kind and cost. Used for
    /// designer and special-kind edges, which are never probed.
    pub fn unconditional(
        start: NodeHandle,
        end: NodeHandle,
        distance: f32,
        envelope: Capsule,
        flags: ReachFlags,
    ) -> Self {
        Self {
            start,
            end,
            distance,
            radius: envelope.radius,
            height: envelope.height,
            flags,
            max_landing_speed: 0.0,
            pruned: false,
        }
    }

    /// Not pruned and not proscribed.
    pub fn is_traversable(&self) -> bool {
        !self.pruned && !self.flags.contains(ReachFlags::PROSCRIBED)
    }

    pub fn is_designer_override(&self) -> bool {
        self.flags
            .intersects(ReachFlags::FORCED | ReachFlags::PROSCRIBED)
    }

    /// True if `traveler` may use this edge.
    pub fn supports(&self, traveler: &Traveler) -> bool {
        self.is_traversable()
            && traveler.radius <= self.radius
            && traveler.height <= self.height
            && self.flags.requirements().is_subset_of(traveler.caps)
            && self.max_landing_speed <= traveler.max_landing_speed
            && (traveler.is_player || !self.flags.contains(ReachFlags::PLAYER_ONLY))
    }

    /// True if every traveler that can use `other` can also use `self`.
    pub fn no_stricter_than(&self, other: &ReachSpec) -> bool {
        self.radius >= other.radius
            && self.height >= other.height
            && self
                .flags
                .requirements()
                .is_subset_of(other.flags.requirements())
            && self.max_landing_speed <= other.max_landing_speed
            && (!self.flags.contains(ReachFlags::PLAYER_ONLY)
                || other.flags.contains(ReachFlags::PLAYER_ONLY))
    }
}

// ---------------------------------------------------------------------------
// Node kinds
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    #[default]
    Path,
    PlayerStart,
    Pickup {
        item: String,
    },
    Door,
    LiftCenter {
        lift: String,
    },
    LiftExit {
        lift: String,
    },
    Ladder {
        ladder: String,
    },
    Teleporter {
        tag: String,
        destination: String,
    },
    Marker {
        name: String,
    },
}

impl NodeKind {
    /// Whether BASE must find a supporting floor under the node. Ladder rungs
    /// and lift centres hang in the air by nature.
    pub fn needs_base(&self) -> bool {
        !matches!(self, NodeKind::Ladder { .. } | NodeKind::LiftCenter { .. })
    }

    /// Flags added to every evaluated edge touching a node of this kind.
    pub fn implied_flags(&self) -> ReachFlags {
        match self {
            NodeKind::Door => ReachFlags::DOOR,
            _ => ReachFlags::NONE,
        }
    }

    /// Whether an incremental clear keeps `edge`. Special edges depend only
    /// on tags, not on geometry, so they survive local re-evaluation.
    pub fn keeps_edge_on_clear(&self, edge: &ReachSpec) -> bool {
        match self {
            NodeKind::LiftCenter { .. } | NodeKind::Teleporter { .. } | NodeKind::Ladder { .. } => {
                edge.flags
                    .intersects(ReachFlags::SPECIAL | ReachFlags::LADDER)
                    && !edge.flags.contains(ReachFlags::WALK)
            }
            _ => false,
        }
    }

    /// Edges this kind adds on its own, without probing.
    pub fn special_edges(
        &self,
        graph: &PathGraph,
        from: &NavNode,
        envelope: Capsule,
        build: &BuildConfig,
    ) -> Vec<ReachSpec> {
        match self {
            NodeKind::Teleporter { destination, .. } => graph
                .iter()
                .filter(|n| matches!(&n.kind, NodeKind::Teleporter { tag, .. } if tag == destination))
                .filter(|n| n.handle != from.handle)
                .map(|n| {
                    ReachSpec::unconditional(
                        from.handle,
                        n.handle,
                        build.teleport_cost,
                        envelope,
                        ReachFlags::SPECIAL,
                    )
                })
                .collect(),
            NodeKind::LiftCenter { lift } => {
                let mut out = Vec::new();
                for exit in graph
                    .iter()
                    .filter(|n| matches!(&n.kind, NodeKind::LiftExit { lift: l } if l == lift))
                {
                    let distance = from.position.distance(exit.position) + build.lift_cost;
                    out.push(ReachSpec::unconditional(
                        from.handle,
                        exit.handle,
                        distance,
                        envelope,
                        ReachFlags::SPECIAL,
                    ));
                }
                out
            }
            NodeKind::LiftExit { lift } => graph
                .iter()
                .filter(|n| matches!(&n.kind, NodeKind::LiftCenter { lift: l } if l == lift))
                .map(|center| {
                    let distance = from.position.distance(center.position) + build.lift_cost;
                    ReachSpec::unconditional(
                        from.handle,
                        center.handle,
                        distance,
                        envelope,
                        ReachFlags::SPECIAL,
                    )
                })
                .collect(),
            NodeKind::Ladder { ladder } => graph
                .iter()
                .filter(|n| n.handle != from.handle)
                .filter(|n| matches!(&n.kind, NodeKind::Ladder { ladder: l } if l == ladder))
                .map(|rung| {
                    ReachSpec::unconditional(
                        from.handle,
                        rung.handle,
                        from.position.distance(rung.position),
                        envelope,
                        ReachFlags::LADDER,
                    )
                })
                .collect(),
            NodeKind::Path
            | NodeKind::PlayerStart
            | NodeKind::Pickup { .. }
            | NodeKind::Door
            | NodeKind::Marker { .. } => Vec::new(),
        }
    }

    /// Kind-specific review findings for `node`.
    pub fn review(&self, graph: &PathGraph, node: &NavNode) -> Vec<DiagnosticKind> {
        match self {
            NodeKind::Teleporter { destination, .. } => {
                let found = graph.iter().any(|n| {
                    n.handle != node.handle
                        && matches!(&n.kind, NodeKind::Teleporter { tag, .. } if tag == destination)
                });
                if found {
                    Vec::new()
                } else {
                    vec![DiagnosticKind::MissingTeleportDestination {
                        destination: destination.clone(),
                    }]
                }
            }
            NodeKind::LiftCenter { lift } => {
                let exits = graph
                    .iter()
                    .any(|n| matches!(&n.kind, NodeKind::LiftExit { lift: l } if l == lift));
                if exits {
                    Vec::new()
                } else {
                    vec![DiagnosticKind::LiftWithoutExits]
                }
            }
            NodeKind::LiftExit { lift } => {
                let center = graph
                    .iter()
                    .any(|n| matches!(&n.kind, NodeKind::LiftCenter { lift: l } if l == lift));
                if center {
                    Vec::new()
                } else {
                    vec![DiagnosticKind::OrphanLiftExit]
                }
            }
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct NavNode {
    pub handle: NodeHandle,
    pub label: String,
    /// Capsule center of a standing body.
    pub position: Vec3,
    /// Horizontal direction, meaningful for one-way nodes.
    pub facing: Vec3,
    pub kind: NodeKind,
    pub flags: NodeFlags,
    pub origin: NodeOrigin,
    /// Intrinsic cost added when a route enters this node.
    pub cost: f32,
    pub edges: Vec<ReachSpec>,
    /// Persistent search-target marker.
    pub endpoint: bool,
    pub blocked: bool,
    /// Set while the node sits in a damaging volume.
    pub hazard: bool,
    pub entity: Option<EntityId>,
    /// Labels this node must connect to regardless of evaluation.
    pub forced: Vec<String>,
    /// Labels this node must never connect to.
    pub proscribed: Vec<String>,
    /// Added or moved since the last define.
    pub changed: bool,
}

impl NavNode {
    pub fn is_designer(&self) -> bool {
        self.origin == NodeOrigin::Designer
    }

    /// Outgoing edges that have not been pruned.
    pub fn live_edges(&self) -> impl Iterator<Item = &ReachSpec> {
        self.edges.iter().filter(|e| !e.pruned)
    }
}

/// Parameters for `PathGraph::add_node`.
#[derive(Clone, Debug, PartialEq)]
pub struct NewNode {
    pub label: Option<String>,
    pub position: Vec3,
    pub facing: Vec3,
    pub kind: NodeKind,
    pub flags: NodeFlags,
    pub origin: NodeOrigin,
    pub cost: f32,
    pub endpoint: bool,
    pub entity: Option<EntityId>,
    pub forced: Vec<String>,
    pub proscribed: Vec<String>,
}

impl NewNode {
    pub fn new(position: Vec3, origin: NodeOrigin) -> Self {
        Self {
            label: None,
            position,
            facing: Vec3::X,
            kind: NodeKind::Path,
            flags: NodeFlags::NONE,
            origin,
            cost: 0.0,
            endpoint: false,
            entity: None,
            forced: Vec::new(),
            proscribed: Vec::new(),
        }
    }

    pub fn designer(position: Vec3) -> Self {
        Self::new(position, NodeOrigin::Designer)
    }

    pub fn auto(position: Vec3) -> Self {
        Self::new(position, NodeOrigin::AutoBuilt)
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn flags(mut self, flags: NodeFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn cost(mut self, cost: f32) -> Self {
        self.cost = cost;
        self
    }

    pub fn facing(mut self, facing: Vec3) -> Self {
        self.facing = facing;
        self
    }

    pub fn entity(mut self, id: EntityId) -> Self {
        self.entity = Some(id);
        self
    }

    pub fn forced_to(mut self, label: &str) -> Self {
        self.forced.push(label.to_string());
        self
    }

    pub fn proscribed_to(mut self, label: &str) -> Self {
        self.proscribed.push(label.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// PathGraph
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<NavNode>,
}

#[derive(Clone, Debug, Default)]
pub struct PathGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    labels: FxHashMap<String, NodeHandle>,
    next_label: u32,
    /// Set when a removal may have left edges pointing at a dead slot.
    stale_edges: bool,
}

impl PathGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the slot arena. Per-query scratch tables are this long.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn edge_count(&self) -> usize {
        self.iter().map(|n| n.live_edges().count()).sum()
    }

    fn fresh_label(&mut self) -> String {
        loop {
            let label = format!("NavPoint{}", self.next_label);
            self.next_label += 1;
            if !self.labels.contains_key(&label) {
                return label;
            }
        }
    }

    /// Insert a node. A missing or already-taken label is replaced by a
    /// generated one.
    pub fn add_node(&mut self, spec: NewNode) -> NodeHandle {
        let label = match spec.label {
            Some(label) if !self.labels.contains_key(&label) => label,
            Some(taken) => {
                let fresh = self.fresh_label();
                debug!(taken = %taken, fresh = %fresh, "nav point label already in use");
                fresh
            }
            None => self.fresh_label(),
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let handle = NodeHandle::new(index, slot.generation);
        slot.node = Some(NavNode {
            handle,
            label: label.clone(),
            position: spec.position,
            facing: spec.facing,
            kind: spec.kind,
            flags: spec.flags,
            origin: spec.origin,
            cost: spec.cost,
            edges: Vec::new(),
            endpoint: spec.endpoint,
            blocked: false,
            hazard: false,
            entity: spec.entity,
            forced: spec.forced,
            proscribed: spec.proscribed,
            changed: true,
        });
        self.labels.insert(label, handle);
        handle
    }

    /// Remove a node. Edges into it from other nodes become stale.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Option<NavNode> {
        if !self.contains(handle) {
            return None;
        }
        let slot = &mut self.slots[handle.index()];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.labels.remove(&node.label);
        self.stale_edges = true;
        Some(node)
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.slots
            .get(handle.index())
            .is_some_and(|s| s.generation == handle.generation && s.node.is_some())
    }

    pub fn node(&self, handle: NodeHandle) -> Option<&NavNode> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut NavNode> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// The live handle stored at `index`, if any.
    pub fn handle_at(&self, index: usize) -> Option<NodeHandle> {
        self.slots
            .get(index)
            .and_then(|s| s.node.as_ref())
            .map(|n| n.handle)
    }

    /// Live nodes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &NavNode> {
        self.slots.iter().filter_map(|s| s.node.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NavNode> {
        self.slots.iter_mut().filter_map(|s| s.node.as_mut())
    }

    pub fn handles(&self) -> Vec<NodeHandle> {
        self.iter().map(|n| n.handle).collect()
    }

    pub fn by_label(&self, label: &str) -> Option<NodeHandle> {
        self.labels.get(label).copied()
    }

    /// Add or replace the edge `spec.start -> spec.end`. Evaluated edges never
    /// replace designer overrides. Returns false if either end is missing or
    /// the existing edge was kept.
    pub fn add_edge(&mut self, spec: ReachSpec) -> bool {
        if spec.start == spec.end || !self.contains(spec.end) {
            return false;
        }
        let Some(node) = self.node_mut(spec.start) else {
            return false;
        };
        match node.edges.iter_mut().find(|e| e.end == spec.end) {
            Some(existing) => {
                if existing.is_designer_override() && !spec.is_designer_override() {
                    return false;
                }
                *existing = spec;
            }
            None => node.edges.push(spec),
        }
        true
    }

    /// The non-pruned edge `from -> to`.
    pub fn edge(&self, from: NodeHandle, to: NodeHandle) -> Option<&ReachSpec> {
        self.node(from)?
            .edges
            .iter()
            .find(|e| e.end == to && !e.pruned)
    }

    /// Outgoing edges of `handle`; empty for a stale handle.
    pub fn edges_from(&self, handle: NodeHandle) -> &[ReachSpec] {
        self.node(handle).map_or(&[], |n| n.edges.as_slice())
    }

    pub fn remove_edge(&mut self, from: NodeHandle, to: NodeHandle) -> bool {
        let Some(node) = self.node_mut(from) else {
            return false;
        };
        let before = node.edges.len();
        node.edges.retain(|e| e.end != to);
        node.edges.len() != before
    }

    /// Mark `from -> to` pruned. It stays visible until `compact`.
    pub fn mark_pruned(&mut self, from: NodeHandle, to: NodeHandle) -> bool {
        let Some(edge) = self
            .node_mut(from)
            .and_then(|n| n.edges.iter_mut().find(|e| e.end == to))
        else {
            return false;
        };
        edge.pruned = true;
        true
    }

    pub fn clear_edges(&mut self, handle: NodeHandle) {
        if let Some(node) = self.node_mut(handle) {
            node.edges.clear();
        }
    }

    pub fn clear_all_edges(&mut self) {
        for node in self.iter_mut() {
            node.edges.clear();
        }
        self.stale_edges = false;
    }

    pub fn has_stale_edges(&self) -> bool {
        self.stale_edges
    }

    /// Drop pruned edges and edges whose end no longer exists. Returns the
    /// number of edges removed.
    pub fn compact(&mut self) -> usize {
        let live: Vec<Option<u32>> = self
            .slots
            .iter()
            .map(|s| s.node.as_ref().map(|_| s.generation))
            .collect();
        let mut removed = 0;
        for node in self.slots.iter_mut().filter_map(|s| s.node.as_mut()) {
            let before = node.edges.len();
            node.edges.retain(|e| {
                !e.pruned && live.get(e.end.index()).copied().flatten() == Some(e.end.generation)
            });
            removed += before - node.edges.len();
        }
        self.stale_edges = false;
        removed
    }

    /// Up to `limit` nodes within `max_distance` of `point`, nearest first,
    /// as `(handle, squared distance)`. Ties keep slot order.
    pub fn nearest(&self, point: Vec3, limit: usize, max_distance: f32) -> Vec<(NodeHandle, f32)> {
        let max_sq = max_distance * max_distance;
        let mut found: Vec<(NodeHandle, f32)> = self
            .iter()
            .map(|n| (n.handle, n.position.distance_squared(point)))
            .filter(|&(_, d)| d <= max_sq)
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.index.cmp(&b.0.index)));
        found.truncate(limit);
        found
    }

    /// Nodes with a traversable edge into `handle`.
    pub fn incoming(&self, handle: NodeHandle) -> Vec<NodeHandle> {
        self.iter()
            .filter(|n| {
                n.edges
                    .iter()
                    .any(|e| e.end == handle && e.is_traversable())
            })
            .map(|n| n.handle)
            .collect()
    }

    /// Move a node and flag it for incremental re-evaluation.
    pub fn move_node(&mut self, handle: NodeHandle, position: Vec3) -> bool {
        match self.node_mut(handle) {
            Some(node) => {
                node.position = position;
                node.changed = true;
                true
            }
            None => false,
        }
    }

    pub fn set_blocked(&mut self, handle: NodeHandle, blocked: bool) -> bool {
        self.node_mut(handle).map(|n| n.blocked = blocked).is_some()
    }

    pub fn set_hazard(&mut self, handle: NodeHandle, hazard: bool) -> bool {
        self.node_mut(handle).map(|n| n.hazard = hazard).is_some()
    }

    pub fn set_endpoint(&mut self, handle: NodeHandle, endpoint: bool) -> bool {
        self.node_mut(handle).map(|n| n.endpoint = endpoint).is_some()
    }

    pub fn clear_endpoints(&mut self) {
        for node in self.iter_mut() {
            node.endpoint = false;
        }
    }

    /// Recompute every node's hazard flag from the medium at its position.
    /// Returns how many nodes are in a hazard.
    pub fn refresh_hazards<G: LevelGeometry + ?Sized>(&mut self, geometry: &G) -> usize {
        let mut count = 0;
        for node in self.iter_mut() {
            node.hazard = geometry.medium_at(node.position) == Medium::Hazard;
            count += usize::from(node.hazard);
        }
        count
    }
}
