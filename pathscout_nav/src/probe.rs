// The probe: a gameplay-free body that physically tests traversability.
//
// A `ProbeAgent` is a capsule with capability flags and a small step-based
// locomotion model layered over `LevelGeometry::move_agent`. `walk_to`
// steers it from its current position toward a target and reports whether
// it arrived and what it had to do on the way (walk, jump, swim, climb) and
// the hardest landing it took. Reachability is an observation of that
// simulated traversal, never a static visibility test.
//
// Locomotion per step:
// - in water: swim straight at the target (needs SWIM); a blocked swim tries
//   to climb out over the bank;
// - on a ladder: climb straight at the target (needs LADDER);
// - FLY without WALK: fly straight at the target, no gravity;
// - otherwise walk horizontally with step-up; a blocked walk tries a jump
//   (needs JUMP), then gravity settles the body onto the floor below and the
//   fall speed `sqrt(2 g h)` is recorded unless it lands in water.
// A walk fails when the body falls out of the level, steps without getting
// closer for `stall_steps`, or runs out of steps.
//
// The probe holds no reference to the level; each call borrows it, so one
// probe is cloned per rayon worker during parallel edge evaluation.
//
// See also: `reach.rs` (envelope trials), `anchor.rs` (anchor walk checks),
// `explore.rs` (boundary walking).

use crate::config::{ProbeParams, ReachConfig};
use crate::geometry::{LevelGeometry, Medium};
use crate::types::{Capsule, ReachFlags, Vec3, flatten};

const EPS: f32 = 1e-3;

/// Outcome of one `walk_to`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeWalk {
    pub reached: bool,
    /// Movement modes used on the way.
    pub flags: ReachFlags,
    /// Fastest landing on solid ground.
    pub max_fall_speed: f32,
    pub steps: u32,
    /// Where the probe stopped.
    pub end: Vec3,
}

#[derive(Clone, Debug)]
pub struct ProbeAgent {
    capsule: Capsule,
    caps: ReachFlags,
    params: ProbeParams,
    position: Vec3,
}

impl ProbeAgent {
    pub fn new(capsule: Capsule, caps: ReachFlags, params: ProbeParams) -> Self {
        Self {
            capsule,
            caps,
            params,
            position: Vec3::ZERO,
        }
    }

    /// A standing-human probe with the configured capabilities.
    pub fn from_config(reach: &ReachConfig) -> Self {
        Self::new(reach.human().capsule(), reach.probe_caps, reach.probe.clone())
    }

    pub fn capsule(&self) -> Capsule {
        self.capsule
    }

    pub fn set_capsule(&mut self, capsule: Capsule) {
        self.capsule = capsule;
    }

    pub fn caps(&self) -> ReachFlags {
        self.caps
    }

    pub fn set_caps(&mut self, caps: ReachFlags) {
        self.caps = caps;
    }

    pub fn params(&self) -> &ProbeParams {
        &self.params
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Teleport onto `point`, settling onto the floor. False if no free spot
    /// exists near it.
    pub fn place_at<G: LevelGeometry + ?Sized>(&mut self, geometry: &G, point: Vec3) -> bool {
        match geometry.teleport_agent(point, self.capsule) {
            Some(p) => {
                self.position = p;
                true
            }
            None => false,
        }
    }

    /// Place at `from` and walk to `to`.
    pub fn can_reach<G: LevelGeometry + ?Sized>(&mut self, geometry: &G, from: Vec3, to: Vec3) -> bool {
        self.place_at(geometry, from) && self.walk_to(geometry, to).reached
    }

    fn at_target(&self, target: Vec3) -> bool {
        let p = &self.params;
        if flatten(target - self.position).length() > p.reach_tolerance {
            return false;
        }
        let foot = self.position.y - self.capsule.height;
        let target_foot = target.y - p.node_height;
        (foot - target_foot).abs() <= p.step_height
            || (self.position.y - target.y).abs() <= p.step_height
    }

    /// Steer toward `target` until arrival or failure.
    pub fn walk_to<G: LevelGeometry + ?Sized>(&mut self, geometry: &G, target: Vec3) -> ProbeWalk {
        let mut flags = ReachFlags::NONE;
        let mut max_fall_speed = 0.0f32;
        let mut best = self.position.distance(target);
        let mut since_progress = 0;
        let max_steps = self.params.max_walk_steps;

        for step in 0..max_steps {
            if self.at_target(target) {
                return self.finish(true, flags, max_fall_speed, step);
            }

            let moved = match geometry.medium_at(self.position) {
                Medium::Water => {
                    flags |= ReachFlags::SWIM;
                    self.caps.contains(ReachFlags::SWIM) && self.swim_step(geometry, target)
                }
                Medium::Ladder => {
                    flags |= ReachFlags::LADDER;
                    self.caps.contains(ReachFlags::LADDER) && self.direct_step(geometry, target)
                }
                Medium::Air | Medium::Hazard
                    if self.caps.contains(ReachFlags::FLY) && !self.caps.contains(ReachFlags::WALK) =>
                {
                    flags |= ReachFlags::FLY;
                    self.direct_step(geometry, target)
                }
                Medium::Air | Medium::Hazard => {
                    flags |= ReachFlags::WALK;
                    match self.walk_step(geometry, target) {
                        Some(StepOutcome { jumped, fall_speed }) => {
                            if jumped {
                                flags |= ReachFlags::JUMP;
                            }
                            max_fall_speed = max_fall_speed.max(fall_speed);
                            true
                        }
                        None => false,
                    }
                }
            };
            if !moved {
                return self.finish(false, flags, max_fall_speed, step);
            }

            let d = self.position.distance(target);
            if d < best - EPS {
                best = d;
                since_progress = 0;
            } else {
                since_progress += 1;
                if since_progress >= self.params.stall_steps {
                    return self.finish(false, flags, max_fall_speed, step);
                }
            }
        }
        let reached = self.at_target(target);
        self.finish(reached, flags, max_fall_speed, max_steps)
    }

    fn finish(&self, reached: bool, flags: ReachFlags, max_fall_speed: f32, steps: u32) -> ProbeWalk {
        ProbeWalk {
            reached,
            flags,
            max_fall_speed,
            steps,
            end: self.position,
        }
    }

    /// Unconstrained move straight at the target (fly, climb).
    fn direct_step<G: LevelGeometry + ?Sized>(&mut self, geometry: &G, target: Vec3) -> bool {
        let delta = (target - self.position).clamp_length_max(self.params.walk_step);
        self.position = geometry
            .move_agent(self.position, delta, self.capsule, 0.0)
            .position;
        true
    }

    fn swim_step<G: LevelGeometry + ?Sized>(&mut self, geometry: &G, target: Vec3) -> bool {
        let delta = (target - self.position).clamp_length_max(self.params.walk_step);
        let moved = geometry.move_agent(self.position, delta, self.capsule, 0.0);
        if moved.blocked && flatten(delta).length_squared() > EPS * EPS {
            // Climb out over the bank.
            if let Some(out) = self.hop(geometry, flatten(delta)) {
                self.position = out;
                return true;
            }
        }
        self.position = moved.position;
        true
    }

    /// Rise by `jump_height`, then move `horizontal` unblocked.
    fn hop<G: LevelGeometry + ?Sized>(&self, geometry: &G, horizontal: Vec3) -> Option<Vec3> {
        let p = &self.params;
        let raised = geometry.move_agent(self.position, Vec3::Y * p.jump_height, self.capsule, 0.0);
        if raised.position.y - self.position.y < p.step_height {
            return None;
        }
        let across = geometry.move_agent(raised.position, horizontal, self.capsule, 0.0);
        if across.blocked {
            return None;
        }
        Some(across.position)
    }

    fn walk_step<G: LevelGeometry + ?Sized>(&mut self, geometry: &G, target: Vec3) -> Option<StepOutcome> {
        let p = &self.params;
        let horizontal = flatten(target - self.position).clamp_length_max(p.walk_step);
        let moved = geometry.move_agent(self.position, horizontal, self.capsule, p.step_height);
        let mut next = moved.position;
        let mut jumped = false;
        if moved.blocked && self.caps.contains(ReachFlags::JUMP) && horizontal.length_squared() > EPS * EPS {
            if let Some(landing) = self.hop(geometry, horizontal) {
                next = landing;
                jumped = true;
            }
        }
        self.position = next;

        let mut fall_speed = 0.0;
        if !matches!(geometry.medium_at(self.position), Medium::Water | Medium::Ladder) {
            let floor = geometry.probe_floor(self.position, self.capsule, p.max_fall_depth)?;
            if floor.distance > EPS {
                self.position = floor.location;
                if geometry.medium_at(floor.location) != Medium::Water {
                    fall_speed = (2.0 * p.gravity * floor.distance).sqrt();
                }
            }
        }
        Some(StepOutcome { jumped, fall_speed })
    }
}

struct StepOutcome {
    jumped: bool,
    fall_speed: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel_level::{VoxelKind, VoxelLevel};

    fn probe() -> ProbeAgent {
        ProbeAgent::from_config(&ReachConfig::default())
    }

    fn stand(level: &VoxelLevel, x: i32, floor_y: i32, z: i32) -> Vec3 {
        level.stand_point(x, floor_y, z, 0.9)
    }

    #[test]
    fn walks_across_open_floor() {
        let level = VoxelLevel::with_floor(16, 6, 16, 1.0);
        let mut probe = probe();
        let from = stand(&level, 2, 0, 2);
        let to = stand(&level, 10, 0, 7);
        assert!(probe.place_at(&level, from));
        let walk = probe.walk_to(&level, to);
        assert!(walk.reached);
        assert_eq!(walk.flags, ReachFlags::WALK);
        assert_eq!(walk.max_fall_speed, 0.0);
    }

    #[test]
    fn wall_blocks_walk() {
        let mut level = VoxelLevel::with_floor(16, 6, 16, 1.0);
        level.fill_box([6, 1, 0], [6, 5, 15], VoxelKind::Solid);
        let mut probe = probe();
        assert!(!probe.can_reach(&level, stand(&level, 2, 0, 4), stand(&level, 10, 0, 4)));
    }

    #[test]
    fn drops_off_ledge_but_cannot_climb_back() {
        let mut level = VoxelLevel::with_floor(16, 8, 16, 1.0);
        // Plateau three voxels high on the low-x side.
        level.fill_box([0, 1, 0], [5, 3, 15], VoxelKind::Solid);
        let high = stand(&level, 3, 3, 4);
        let low = stand(&level, 9, 0, 4);

        let mut probe = probe();
        assert!(probe.place_at(&level, high));
        let down = probe.walk_to(&level, low);
        assert!(down.reached);
        assert!(down.max_fall_speed > 7.0, "fall speed {}", down.max_fall_speed);

        assert!(!probe.can_reach(&level, low, high));
    }

    #[test]
    fn jumps_onto_low_wall() {
        let mut level = VoxelLevel::with_floor(16, 8, 16, 1.0);
        level.fill_box([6, 1, 0], [15, 1, 15], VoxelKind::Solid);
        let mut probe = probe();
        assert!(probe.place_at(&level, stand(&level, 3, 0, 4)));
        let walk = probe.walk_to(&level, stand(&level, 9, 1, 4));
        assert!(walk.reached);
        assert!(walk.flags.contains(ReachFlags::JUMP));

        probe.set_caps(ReachFlags::WALK);
        assert!(!probe.can_reach(&level, stand(&level, 3, 0, 4), stand(&level, 9, 1, 4)));
    }

    #[test]
    fn swims_through_water() {
        let mut level = VoxelLevel::with_floor(16, 8, 16, 1.0);
        // A flooded trench the walker must cross.
        level.fill_box([5, 0, 0], [8, 1, 15], VoxelKind::Water);
        let mut probe = probe();
        assert!(probe.place_at(&level, stand(&level, 2, 0, 4)));
        let walk = probe.walk_to(&level, stand(&level, 12, 0, 4));
        assert!(walk.reached);
        assert!(walk.flags.contains(ReachFlags::SWIM));

        probe.set_caps(ReachFlags::WALK | ReachFlags::JUMP);
        assert!(!probe.can_reach(&level, stand(&level, 2, 0, 4), stand(&level, 12, 0, 4)));
    }

    #[test]
    fn falling_out_of_the_level_fails() {
        let level = VoxelLevel::with_floor(8, 6, 8, 1.0);
        let mut probe = probe();
        assert!(probe.place_at(&level, stand(&level, 6, 0, 4)));
        let walk = probe.walk_to(&level, Vec3::new(20.5, 1.9, 4.5));
        assert!(!walk.reached);
    }
}
