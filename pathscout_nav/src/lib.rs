// pathscout_nav — probe-validated waypoint graphs for 3-D levels.
//
// Builds a graph of navigation nodes and directed, capability-qualified
// edges by physically walking a probe capsule through the level, and
// answers bounded per-tick route queries over it. No navmesh is involved:
// connectivity is whatever the probe could actually traverse.
//
// Module overview:
// - `types.rs`:        Vec3, node handles, entity ids, ReachFlags/NodeFlags, Capsule, Traveler.
// - `config.rs`:       NavConfig: envelopes, probe physics, build and search tuning.
// - `error.rs`:        NavError for load/save/config failures.
// - `geometry.rs`:     LevelGeometry trait (sweeps, line checks, move, floor probe).
// - `voxel_level.rs`:  Dense voxel LevelGeometry used by the tool and tests.
// - `entity.rs`:       EntityRegistry trait and the level's entity list.
// - `probe.rs`:        ProbeAgent: simulated walk/jump/swim/climb.
// - `graph.rs`:        PathGraph arena, NavNode, ReachSpec, NodeKind capability table.
// - `reach.rs`:        ReachabilityEvaluator: envelope trials per ordered pair.
// - `anchor.rs`:       AnchorResolver: world position -> nearest usable node.
// - `explore.rs`:      Boundary-walking node seeding.
// - `refine.rs`:       Merge, intermediate insertion and pruning passes.
// - `diagnostics.rs`:  BuildReport and graph review.
// - `builder.rs`:      NavGraphBuilder: build/remove/define/define_changed/undefine/review.
// - `route.rs`:        RouteCache and Seeker.
// - `search.rs`:       RouteSearch: uniform-cost search, weighers, detours.
// - `session.rs`:      NavSession: graph + config + anchor cache for runtime use.
// - `prng.rs`:         xoshiro256++ for seeded random destinations.
// - `level.rs`:        Level JSON save/load, graph <-> nav point entities.
//
// Building is a long batch job driven by tooling; searching runs inside a
// frame and is bounded by an expansion budget. Neither aborts on bad input:
// failures are outcomes and diagnostics, not panics.

pub mod anchor;
pub mod builder;
pub mod config;
pub mod diagnostics;
pub mod entity;
pub mod error;
pub mod explore;
pub mod geometry;
pub mod graph;
pub mod level;
pub mod prng;
pub mod probe;
pub mod reach;
pub mod refine;
pub mod route;
pub mod search;
pub mod session;
pub mod types;
pub mod voxel_level;

pub use builder::{BuildPhase, NavGraphBuilder};
pub use config::NavConfig;
pub use diagnostics::{BuildReport, Diagnostic, DiagnosticKind, Severity};
pub use error::{NavError, NavResult};
pub use graph::{NavNode, NewNode, NodeKind, PathGraph, ReachSpec};
pub use level::Level;
pub use route::{RouteCache, Seeker};
pub use search::{Destination, RouteResult, RouteSearch, SearchOutcome};
pub use session::NavSession;
pub use types::{NodeHandle, ReachFlags, Traveler, Vec3};
