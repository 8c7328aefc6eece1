// Level geometry query surface.
//
// The navigation core never owns level geometry. Everything it learns about
// walls, floors, water and doors comes through the `LevelGeometry` trait:
// capsule sweeps, line checks, "move agent" with slide and step resolution,
// downward floor probes, and a point medium lookup. `VoxelLevel`
// (`voxel_level.rs`) is the in-tree implementation used by the tooling and
// the tests; a game engine would implement the trait over its own collision
// world.
//
// Queries take `&self`; the only mutation is `set_movers_blocking`, which the
// builder uses to make doors passable while it evaluates edges. The trait
// requires `Sync` so the builder may fan pure edge evaluation out over the
// rayon pool.
//
// See also: `probe.rs` (the main consumer), `anchor.rs` (line-of-sight),
// `builder.rs` (mover toggling).

use crate::types::{Capsule, Vec3};

/// Line check behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineMode {
    /// Report where the line first hits blocking geometry.
    FirstHit,
    /// Stop at any hit without locating it; the returned point is the start.
    AnyHit,
}

/// First blocking contact of a capsule sweep.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepHit {
    /// Fraction of the sweep completed before contact, in `[0, 1]`.
    pub time: f32,
    /// Capsule center at the last free position.
    pub location: Vec3,
    /// Approximate surface normal at the contact.
    pub normal: Vec3,
}

/// Result of `move_agent`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveResult {
    pub position: Vec3,
    /// True if geometry stopped any part of the requested move.
    pub blocked: bool,
    pub hit_normal: Option<Vec3>,
}

/// Supporting surface below a capsule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloorHit {
    /// Capsule center resting on the floor.
    pub location: Vec3,
    /// Vertical drop from the probed position to `location`.
    pub distance: f32,
    pub normal: Vec3,
}

/// What fills space at a point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Medium {
    Air,
    Water,
    Ladder,
    /// Damaging volume (lava, slime, ...).
    Hazard,
}

pub trait LevelGeometry: Sync {
    /// Sweep `capsule` from `from` to `to`; `None` if the path is clear.
    fn sweep_capsule(&self, from: Vec3, to: Vec3, capsule: Capsule) -> Option<SweepHit>;

    /// Cast a ray; `None` if nothing blocks it.
    fn line_check(&self, from: Vec3, to: Vec3, mode: LineMode) -> Option<Vec3>;

    /// Move `capsule` by `delta`, sliding along walls and stepping up ledges
    /// no higher than `step_height` (then back down onto the floor).
    fn move_agent(&self, position: Vec3, delta: Vec3, capsule: Capsule, step_height: f32)
    -> MoveResult;

    /// Cast `capsule` downward at most `max_depth`.
    fn probe_floor(&self, position: Vec3, capsule: Capsule, max_depth: f32) -> Option<FloorHit>;

    fn medium_at(&self, point: Vec3) -> Medium;

    /// True if `capsule` at `position` overlaps blocking geometry.
    fn encroaches(&self, position: Vec3, capsule: Capsule) -> bool;

    /// Toggle whether movers (doors) block movement.
    fn set_movers_blocking(&mut self, blocking: bool);

    /// Place `capsule` at `position`: push it out of geometry if it is
    /// embedded, then settle it onto its supporting floor if one is within a
    /// body height below. Water and ladders hold the body where it is.
    fn teleport_agent(&self, position: Vec3, capsule: Capsule) -> Option<Vec3> {
        let offsets = [
            Vec3::ZERO,
            Vec3::Y * (capsule.height * 0.5),
            Vec3::Y * capsule.height,
            Vec3::X * capsule.radius,
            -Vec3::X * capsule.radius,
            Vec3::Z * capsule.radius,
            -Vec3::Z * capsule.radius,
            Vec3::Y * (capsule.height * 2.0),
        ];
        let free = offsets
            .iter()
            .map(|&o| position + o)
            .find(|&p| !self.encroaches(p, capsule))?;

        match self.medium_at(free) {
            Medium::Water | Medium::Ladder => Some(free),
            Medium::Air | Medium::Hazard => Some(
                self.probe_floor(free, capsule, capsule.height * 2.0)
                    .map_or(free, |floor| floor.location),
            ),
        }
    }
}
