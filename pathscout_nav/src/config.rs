// Data-driven navigation configuration.
//
// Every tunable constant of graph building and route search lives in
// `NavConfig`, loaded from JSON by the tooling (or built from `Default` in
// code). The library never hard-codes a threshold that belongs here. The
// values are empirically tuned: the envelope ladder, the 1.2 pruning ratio,
// merge and intermediate distances, and the swim/crouch penalties have no
// derivation beyond "works well on real levels", so they stay parameters.
//
// Groups:
// - `ReachConfig`:   the ascending envelope list and probe physics used by
//                    `reach.rs`.
// - `BuildConfig`:   distances and ratios for `builder.rs`/`refine.rs`, with
//                    `ExploreConfig` for `explore.rs`.
// - `SearchConfig`:  per-query budgets for `search.rs` and `anchor.rs`.
//
// Units are meters; a capsule `height` is a half-height (see `types.rs`).
// Every struct is `#[serde(default)]` so partial JSON files are accepted and
// missing fields take the defaults below.

use crate::error::{NavError, NavResult};
use crate::route::ROUTE_CACHE_CAPACITY;
use crate::types::{Capsule, ReachFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One trial body size in the reachability ladder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeSpec {
    pub name: String,
    pub radius: f32,
    pub height: f32,
}

impl EnvelopeSpec {
    pub fn new(name: &str, radius: f32, height: f32) -> Self {
        Self {
            name: name.to_string(),
            radius,
            height,
        }
    }

    pub fn capsule(&self) -> Capsule {
        Capsule::new(self.radius, self.height)
    }
}

/// Physics of the probe body that walks candidate edges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeParams {
    /// Highest ledge the probe walks up without jumping.
    pub step_height: f32,
    /// Extra height gained by a jump.
    pub jump_height: f32,
    /// Downward acceleration used to turn fall distance into landing speed.
    pub gravity: f32,
    /// Distance covered per simulated step.
    pub walk_step: f32,
    /// Step cap for a single walk.
    pub max_walk_steps: u32,
    /// Steps without getting closer before a walk is declared stuck.
    pub stall_steps: u32,
    /// Deepest drop the probe survives looking for a floor.
    pub max_fall_depth: f32,
    /// Horizontal distance at which a target counts as reached.
    pub reach_tolerance: f32,
    /// Half-height at which nodes stand above their floor.
    pub node_height: f32,
}

impl Default for ProbeParams {
    fn default() -> Self {
        Self {
            step_height: 0.55,
            jump_height: 1.3,
            gravity: 9.8,
            walk_step: 0.5,
            max_walk_steps: 400,
            stall_steps: 6,
            max_fall_depth: 24.0,
            reach_tolerance: 0.3,
            node_height: 0.9,
        }
    }
}

/// Parameters of `ReachabilityEvaluator`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachConfig {
    /// Trial envelopes, smallest first. The first must pass for an edge to
    /// exist at all.
    pub envelopes: Vec<EnvelopeSpec>,
    /// Index of the standing-human envelope. Edges that only pass below it
    /// are crouch-only and pay `crouch_penalty`.
    pub human_envelope: usize,
    /// Index of the "common" envelope used by the merge pass.
    pub common_envelope: usize,
    /// Distance multiplier for edges that need swimming.
    pub swim_penalty: f32,
    /// Distance multiplier for crouch-only edges.
    pub crouch_penalty: f32,
    /// Movement modes the probe may use while testing an edge.
    pub probe_caps: ReachFlags,
    pub probe: ProbeParams,
}

impl Default for ReachConfig {
    fn default() -> Self {
        Self {
            envelopes: vec![
                EnvelopeSpec::new("crouched", 0.35, 0.6),
                EnvelopeSpec::new("human", 0.35, 0.9),
                EnvelopeSpec::new("small", 0.5, 1.1),
                EnvelopeSpec::new("common", 0.75, 1.1),
                EnvelopeSpec::new("wide", 1.1, 1.2),
                EnvelopeSpec::new("max", 1.6, 1.6),
            ],
            human_envelope: 1,
            common_envelope: 3,
            swim_penalty: 2.0,
            crouch_penalty: 1.5,
            probe_caps: ReachFlags::WALK | ReachFlags::JUMP | ReachFlags::SWIM | ReachFlags::LADDER,
            probe: ProbeParams::default(),
        }
    }
}

impl ReachConfig {
    pub fn human(&self) -> &EnvelopeSpec {
        &self.envelopes[self.human_envelope]
    }

    pub fn common(&self) -> &EnvelopeSpec {
        &self.envelopes[self.common_envelope]
    }
}

/// Parameters of the exploratory boundary walk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExploreConfig {
    pub enabled: bool,
    /// Length of one exploration move.
    pub step: f32,
    /// Move cap for one boundary walk.
    pub max_steps_per_walk: u32,
    /// Cap on nodes added by exploration in one build.
    pub max_nodes: usize,
    /// Farthest the remembered anchor may be before a new node is dropped.
    pub anchor_reach_distance: f32,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step: 1.0,
            max_steps_per_walk: 400,
            max_nodes: 256,
            anchor_reach_distance: 8.0,
        }
    }
}

/// Parameters of `NavGraphBuilder` and the refinement passes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Pairs farther apart than this are never evaluated.
    pub max_edge_distance: f32,
    /// How far below a node BASE looks for a supporting floor.
    pub base_tolerance: f32,
    /// Auto-built nodes closer than this are merge candidates.
    pub merge_distance: f32,
    /// A detour within `prune_ratio` x the direct distance prunes the direct edge.
    pub prune_ratio: f32,
    /// Hop limit of the recursive detour search.
    pub prune_max_depth: u32,
    /// Mutually visible pairs up to this far apart get an intermediate node.
    pub intermediate_max_distance: f32,
    /// An existing third node whose detour is within this ratio is accepted
    /// instead of inserting a new one.
    pub intermediate_shorten_ratio: f32,
    pub intermediate_passes: u32,
    /// Nodes closer than this are reported as too close.
    pub min_node_spacing: f32,
    /// Unforced edges longer than this with no shorter alternate are reported.
    pub long_edge_warning: f32,
    /// Vertical difference under which a walk edge is expected to be mutual.
    pub symmetric_height_tolerance: f32,
    pub min_spawn_points: usize,
    /// Traversal cost of a teleporter hop.
    pub teleport_cost: f32,
    /// Extra traversal cost of riding a lift.
    pub lift_cost: f32,
    /// Evaluate candidate pairs on the rayon pool.
    pub parallel_evaluation: bool,
    pub explore: ExploreConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_edge_distance: 12.0,
            base_tolerance: 3.0,
            merge_distance: 1.5,
            prune_ratio: 1.2,
            prune_max_depth: 6,
            intermediate_max_distance: 24.0,
            intermediate_shorten_ratio: 1.1,
            intermediate_passes: 2,
            min_node_spacing: 0.5,
            long_edge_warning: 10.0,
            symmetric_height_tolerance: 0.3,
            min_spawn_points: 1,
            teleport_cost: 1.0,
            lift_cost: 2.0,
            parallel_evaluation: false,
            explore: ExploreConfig::default(),
        }
    }
}

/// Per-query budgets for route search and anchor resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Hard cap on node expansions per query.
    pub max_expansions: usize,
    /// Entries written into a seeker's route cache (at most 16).
    pub route_cache_len: usize,
    /// Candidates considered when resolving an anchor.
    pub anchor_shortlist: usize,
    pub max_anchor_distance: f32,
    /// Ticks a cached entity anchor stays reusable.
    pub anchor_cache_ticks: u64,
    /// Require a probe walk (not just line of sight) when resolving anchors.
    pub anchor_walk_check: bool,
    /// Distance at which a seeker counts as standing on a node.
    pub arrive_radius: f32,
    /// Detour desirability must exceed this to be spliced in.
    pub detour_threshold: f32,
    pub random_destination_expansions: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_expansions: 300,
            route_cache_len: ROUTE_CACHE_CAPACITY,
            anchor_shortlist: 12,
            max_anchor_distance: 10.0,
            anchor_cache_ticks: 30,
            anchor_walk_check: true,
            arrive_radius: 0.6,
            detour_threshold: 0.0,
            random_destination_expansions: 64,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    pub reach: ReachConfig,
    pub build: BuildConfig,
    pub search: SearchConfig,
}

impl NavConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> NavResult<Self> {
        let config: NavConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> NavResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| NavError::io(path, e))?;
        Self::from_json(&json)
    }

    pub fn to_json_pretty(&self) -> NavResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the builder or search cannot work with.
    pub fn validate(&self) -> NavResult<()> {
        let invalid = |reason: &str| {
            Err(NavError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        let envelopes = &self.reach.envelopes;
        if envelopes.is_empty() {
            return invalid("reach.envelopes must not be empty");
        }
        if envelopes
            .windows(2)
            .any(|w| w[1].radius < w[0].radius || w[1].height < w[0].height)
        {
            return invalid("reach.envelopes must be ascending in radius and height");
        }
        if self.reach.human_envelope >= envelopes.len()
            || self.reach.common_envelope >= envelopes.len()
        {
            return invalid("reach.human_envelope/common_envelope out of range");
        }
        if self.reach.probe.walk_step <= 0.0 || self.reach.probe.max_walk_steps == 0 {
            return invalid("reach.probe.walk_step and max_walk_steps must be positive");
        }
        if self.build.prune_ratio < 1.0 {
            return invalid("build.prune_ratio must be at least 1.0");
        }
        if self.build.max_edge_distance <= 0.0 {
            return invalid("build.max_edge_distance must be positive");
        }
        if self.search.max_expansions == 0 {
            return invalid("search.max_expansions must be positive");
        }
        if self.search.route_cache_len == 0 || self.search.route_cache_len > ROUTE_CACHE_CAPACITY {
            return invalid("search.route_cache_len must be within 1..=16");
        }
        Ok(())
    }
}
