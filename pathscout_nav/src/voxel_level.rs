// Dense voxel level: the in-tree `LevelGeometry` implementation.
//
// The level is stored as a flat `Vec<VoxelKind>` indexed by
// `x + z * size_x + y * size_x * size_z`, giving O(1) read/write access.
// Out-of-bounds reads return `Air`, so a body that walks off the edge of the
// grid falls forever and the probe reports it as unreachable.
//
// Each voxel is a cube of `cell_size` world units; cell `(i, j, k)` covers
// `[i, i + 1) * cell_size` on every axis. Capsules are approximated by their
// bounding boxes. Sweeps march in quarter-cell increments and bisect the
// first contact; floor probes are exact (they scan voxel rows under the
// capsule footprint). `line_check` is a 3D DDA (Amanatides & Woo) traversal.
//
// `Door` voxels block only while movers are blocking. The builder turns that
// off while it evaluates edges so that doorways connect.
//
// Voxels serialize run-length encoded; a level is mostly long runs of air
// and solid. Decoding stops at the first run that overshoots the declared
// grid, before anything is expanded.
//
// See also: `geometry.rs` for the trait, `level.rs` which saves a
// `VoxelLevel` alongside the entity list, `probe.rs` for the main consumer.

use crate::error::NavError;
use crate::geometry::{FloorHit, LevelGeometry, LineMode, Medium, MoveResult, SweepHit};
use crate::types::{Capsule, Vec3, flatten};
use serde::{Deserialize, Serialize};

/// Tolerance used to keep touching boxes from counting as overlapping.
const EPS: f32 = 1e-4;

/// Material of a single voxel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoxelKind {
    #[default]
    Air,
    Solid,
    Water,
    /// Damaging liquid; passable.
    Lava,
    /// Climbable, passable.
    Ladder,
    /// Solid while movers block.
    Door,
}

/// Dense 3D voxel level.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "VoxelLevelRecord")]
pub struct VoxelLevel {
    #[serde(serialize_with = "rle::serialize")]
    voxels: Vec<VoxelKind>,
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    pub cell_size: f32,
    #[serde(skip)]
    movers_blocking: bool,
}

/// `VoxelLevel` as written on disk, voxels still run-length encoded.
#[derive(Deserialize)]
struct VoxelLevelRecord {
    voxels: Vec<(VoxelKind, u32)>,
    size_x: u32,
    size_y: u32,
    size_z: u32,
    cell_size: f32,
}

impl TryFrom<VoxelLevelRecord> for VoxelLevel {
    type Error = NavError;

    fn try_from(record: VoxelLevelRecord) -> Result<Self, NavError> {
        let total = u128::from(record.size_x) * u128::from(record.size_y) * u128::from(record.size_z);
        let voxels = rle::decode(record.voxels, total).ok_or_else(|| NavError::InvalidLevel {
            reason: format!(
                "voxel runs overrun {}x{}x{} grid",
                record.size_x, record.size_y, record.size_z
            ),
        })?;
        Ok(Self {
            voxels,
            size_x: record.size_x,
            size_y: record.size_y,
            size_z: record.size_z,
            cell_size: record.cell_size,
            movers_blocking: true,
        })
    }
}

impl Default for VoxelLevel {
    fn default() -> Self {
        Self::new(0, 0, 0, 1.0)
    }
}

impl VoxelLevel {
    /// Create a level filled with `Air`.
    pub fn new(size_x: u32, size_y: u32, size_z: u32, cell_size: f32) -> Self {
        let total = (size_x as usize) * (size_y as usize) * (size_z as usize);
        Self {
            voxels: vec![VoxelKind::Air; total],
            size_x,
            size_y,
            size_z,
            cell_size,
            movers_blocking: true,
        }
    }

    /// Create a level with a solid floor one voxel thick at `y = 0`.
    pub fn with_floor(size_x: u32, size_y: u32, size_z: u32, cell_size: f32) -> Self {
        let mut level = Self::new(size_x, size_y, size_z, cell_size);
        level.fill_box(
            [0, 0, 0],
            [size_x as i32 - 1, 0, size_z as i32 - 1],
            VoxelKind::Solid,
        );
        level
    }

    /// True if the voxel count matches the declared dimensions. A level read
    /// from disk must pass this before it is queried.
    pub fn is_consistent(&self) -> bool {
        self.voxels.len() == (self.size_x as usize) * (self.size_y as usize) * (self.size_z as usize)
            && self.cell_size > 0.0
    }

    pub fn in_bounds(&self, x: i32, y: i32, z: i32) -> bool {
        x >= 0
            && y >= 0
            && z >= 0
            && (x as u32) < self.size_x
            && (y as u32) < self.size_y
            && (z as u32) < self.size_z
    }

    fn index(&self, x: i32, y: i32, z: i32) -> Option<usize> {
        if self.in_bounds(x, y, z) {
            let sx = self.size_x as usize;
            let sz = self.size_z as usize;
            Some(x as usize + z as usize * sx + y as usize * sx * sz)
        } else {
            None
        }
    }

    /// Read a voxel. Returns `Air` out of bounds.
    pub fn get(&self, x: i32, y: i32, z: i32) -> VoxelKind {
        self.index(x, y, z)
            .map(|i| self.voxels[i])
            .unwrap_or(VoxelKind::Air)
    }

    /// Write a voxel. No-op out of bounds.
    pub fn set(&mut self, x: i32, y: i32, z: i32, kind: VoxelKind) {
        if let Some(i) = self.index(x, y, z) {
            self.voxels[i] = kind;
        }
    }

    /// Fill the inclusive box `min..=max` with `kind`.
    pub fn fill_box(&mut self, min: [i32; 3], max: [i32; 3], kind: VoxelKind) {
        for y in min[1]..=max[1] {
            for z in min[2]..=max[2] {
                for x in min[0]..=max[0] {
                    self.set(x, y, z, kind);
                }
            }
        }
    }

    /// Cell containing a world point.
    pub fn cell_of(&self, p: Vec3) -> [i32; 3] {
        [
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
            (p.z / self.cell_size).floor() as i32,
        ]
    }

    /// Capsule center for a body of half-height `height` standing on top of
    /// voxel row `floor_y`, centered over column `(x, z)`.
    pub fn stand_point(&self, x: i32, floor_y: i32, z: i32, height: f32) -> Vec3 {
        let cs = self.cell_size;
        Vec3::new(
            (x as f32 + 0.5) * cs,
            (floor_y + 1) as f32 * cs + height,
            (z as f32 + 0.5) * cs,
        )
    }

    pub fn movers_blocking(&self) -> bool {
        self.movers_blocking
    }

    fn blocks(&self, kind: VoxelKind) -> bool {
        match kind {
            VoxelKind::Solid => true,
            VoxelKind::Door => self.movers_blocking,
            VoxelKind::Air | VoxelKind::Water | VoxelKind::Lava | VoxelKind::Ladder => false,
        }
    }

    fn is_blocking(&self, x: i32, y: i32, z: i32) -> bool {
        self.blocks(self.get(x, y, z))
    }

    /// True if any blocking voxel intersects the open box `(min, max)`.
    fn box_blocked(&self, min: Vec3, max: Vec3) -> bool {
        let lo = self.cell_of(min + Vec3::splat(EPS));
        let hi = self.cell_of(max - Vec3::splat(EPS));
        for y in lo[1]..=hi[1] {
            for z in lo[2]..=hi[2] {
                for x in lo[0]..=hi[0] {
                    if self.is_blocking(x, y, z) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Estimate the contact normal between a free and a blocked position by
    /// testing each axis of the motion separately.
    fn contact_normal(&self, free: Vec3, blocked: Vec3, capsule: Capsule) -> Vec3 {
        let d = blocked - free;
        let mut normal = Vec3::ZERO;
        for axis in 0..3 {
            if d[axis].abs() <= f32::EPSILON {
                continue;
            }
            let mut probe = free;
            probe[axis] = blocked[axis];
            if self.encroaches(probe, capsule) {
                normal[axis] = -d[axis].signum();
            }
        }
        let normal = normal.normalize_or_zero();
        if normal == Vec3::ZERO {
            -d.normalize_or_zero()
        } else {
            normal
        }
    }

    /// After a level move, drop back onto a floor within `step_height`.
    fn step_down(&self, position: Vec3, capsule: Capsule, step_height: f32, delta: Vec3) -> Vec3 {
        if step_height <= 0.0 || delta.y.abs() > EPS {
            return position;
        }
        self.probe_floor(position, capsule, step_height)
            .map_or(position, |floor| floor.location)
    }
}

impl LevelGeometry for VoxelLevel {
    fn sweep_capsule(&self, from: Vec3, to: Vec3, capsule: Capsule) -> Option<SweepHit> {
        let delta = to - from;
        if self.encroaches(from, capsule) {
            return Some(SweepHit {
                time: 0.0,
                location: from,
                normal: -delta.normalize_or_zero(),
            });
        }
        let len = delta.length();
        if len < EPS {
            return None;
        }
        let increment = (self.cell_size * 0.25).min(capsule.radius.max(0.05));
        let steps = ((len / increment).ceil() as u32).max(1);
        let mut prev_t = 0.0;
        for i in 1..=steps {
            let t = i as f32 / steps as f32;
            if self.encroaches(from + delta * t, capsule) {
                let (mut lo, mut hi) = (prev_t, t);
                for _ in 0..8 {
                    let mid = (lo + hi) * 0.5;
                    if self.encroaches(from + delta * mid, capsule) {
                        hi = mid;
                    } else {
                        lo = mid;
                    }
                }
                let location = from + delta * lo;
                return Some(SweepHit {
                    time: lo,
                    location,
                    normal: self.contact_normal(location, from + delta * hi, capsule),
                });
            }
            prev_t = t;
        }
        None
    }

    /// The destination voxel itself is not tested, so a point resting on a
    /// surface does not occlude itself.
    fn line_check(&self, from: Vec3, to: Vec3, mode: LineMode) -> Option<Vec3> {
        let cs = self.cell_size;
        let a = from / cs;
        let b = to / cs;
        let dir = b - a;

        let mut voxel = [a.x.floor() as i32, a.y.floor() as i32, a.z.floor() as i32];
        let end_voxel = [b.x.floor() as i32, b.y.floor() as i32, b.z.floor() as i32];

        let mut step = [0i32; 3];
        let mut t_max = [f32::INFINITY; 3];
        let mut t_delta = [f32::INFINITY; 3];
        for axis in 0..3 {
            if dir[axis] > 0.0 {
                step[axis] = 1;
                t_delta[axis] = 1.0 / dir[axis];
                t_max[axis] = ((voxel[axis] as f32 + 1.0) - a[axis]) / dir[axis];
            } else if dir[axis] < 0.0 {
                step[axis] = -1;
                t_delta[axis] = 1.0 / (-dir[axis]);
                t_max[axis] = (a[axis] - voxel[axis] as f32) / (-dir[axis]);
            }
        }

        let mut t_entry = 0.0f32;
        loop {
            if voxel == end_voxel {
                return None;
            }
            if self.is_blocking(voxel[0], voxel[1], voxel[2]) {
                return Some(match mode {
                    LineMode::AnyHit => from,
                    LineMode::FirstHit => from + (to - from) * t_entry,
                });
            }

            let min_axis = if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
                0
            } else if t_max[1] <= t_max[2] {
                1
            } else {
                2
            };
            if t_max[min_axis] > 1.0 {
                return None;
            }
            t_entry = t_max[min_axis];
            voxel[min_axis] += step[min_axis];
            t_max[min_axis] += t_delta[min_axis];
        }
    }

    fn move_agent(
        &self,
        position: Vec3,
        delta: Vec3,
        capsule: Capsule,
        step_height: f32,
    ) -> MoveResult {
        let target = position + delta;
        let Some(hit) = self.sweep_capsule(position, target, capsule) else {
            return MoveResult {
                position: self.step_down(target, capsule, step_height, delta),
                blocked: false,
                hit_normal: None,
            };
        };

        let horizontal = flatten(delta);
        if step_height > 0.0 && horizontal.length_squared() > EPS * EPS {
            let raised = position + Vec3::Y * step_height;
            let over = raised + horizontal;
            if self.sweep_capsule(position, raised, capsule).is_none()
                && self.sweep_capsule(raised, over, capsule).is_none()
            {
                let landed = self
                    .probe_floor(over, capsule, step_height * 2.0)
                    .map_or(over, |floor| floor.location);
                return MoveResult {
                    position: landed,
                    blocked: false,
                    hit_normal: Some(hit.normal),
                };
            }
        }

        let remaining = delta * (1.0 - hit.time);
        let slide = remaining - hit.normal * remaining.dot(hit.normal);
        let mut end = hit.location;
        if slide.length_squared() > EPS * EPS {
            let slide_target = hit.location + slide;
            end = self
                .sweep_capsule(hit.location, slide_target, capsule)
                .map_or(slide_target, |h| h.location);
        }
        MoveResult {
            position: self.step_down(end, capsule, step_height, delta),
            blocked: true,
            hit_normal: Some(hit.normal),
        }
    }

    fn probe_floor(&self, position: Vec3, capsule: Capsule, max_depth: f32) -> Option<FloorHit> {
        if self.encroaches(position, capsule) {
            return None;
        }
        let cs = self.cell_size;
        let half = capsule.half_extents();
        let lo = self.cell_of(position - half + Vec3::splat(EPS));
        let hi = self.cell_of(position + half - Vec3::splat(EPS));
        let bottom = position.y - capsule.height;
        let start_row = ((bottom - EPS) / cs).floor() as i32;
        let end_row = (((bottom - max_depth - EPS) / cs).floor() as i32).max(-1);

        let mut row = start_row;
        while row >= end_row {
            let solid_row =
                (lo[2]..=hi[2]).any(|z| (lo[0]..=hi[0]).any(|x| self.is_blocking(x, row, z)));
            if solid_row {
                let top = (row + 1) as f32 * cs;
                let drop = bottom - top;
                if drop > max_depth + EPS {
                    return None;
                }
                return Some(FloorHit {
                    location: Vec3::new(position.x, top + capsule.height, position.z),
                    distance: drop.max(0.0),
                    normal: Vec3::Y,
                });
            }
            row -= 1;
        }
        None
    }

    fn medium_at(&self, point: Vec3) -> Medium {
        let [x, y, z] = self.cell_of(point);
        match self.get(x, y, z) {
            VoxelKind::Water => Medium::Water,
            VoxelKind::Lava => Medium::Hazard,
            VoxelKind::Ladder => Medium::Ladder,
            VoxelKind::Air | VoxelKind::Solid | VoxelKind::Door => Medium::Air,
        }
    }

    fn encroaches(&self, position: Vec3, capsule: Capsule) -> bool {
        let half = capsule.half_extents();
        self.box_blocked(position - half, position + half)
    }

    fn set_movers_blocking(&mut self, blocking: bool) {
        self.movers_blocking = blocking;
    }
}

/// Run-length encoding for the voxel array.
mod rle {
    use super::VoxelKind;
    use serde::{Serialize, Serializer};

    pub fn serialize<S: Serializer>(voxels: &[VoxelKind], serializer: S) -> Result<S::Ok, S::Error> {
        let mut runs: Vec<(VoxelKind, u32)> = Vec::new();
        for &v in voxels {
            match runs.last_mut() {
                Some((kind, n)) if *kind == v => *n += 1,
                _ => runs.push((v, 1)),
            }
        }
        runs.serialize(serializer)
    }

    /// Expand `runs`, or `None` if they add up to more than `limit` voxels.
    /// A shortfall is left for `VoxelLevel::is_consistent` to report.
    pub fn decode(runs: Vec<(VoxelKind, u32)>, limit: u128) -> Option<Vec<VoxelKind>> {
        let mut count = 0u128;
        for &(_, n) in &runs {
            count += u128::from(n);
            if count > limit {
                return None;
            }
        }
        let mut voxels = Vec::with_capacity(usize::try_from(count).ok()?);
        for (kind, n) in runs {
            voxels.extend(std::iter::repeat_n(kind, n as usize));
        }
        Some(voxels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUMAN: Capsule = Capsule::new(0.35, 0.9);

    fn floor_level() -> VoxelLevel {
        VoxelLevel::with_floor(16, 8, 16, 1.0)
    }

    #[test]
    fn new_level_is_all_air() {
        let level = VoxelLevel::new(4, 4, 4, 1.0);
        for y in 0..4 {
            for z in 0..4 {
                for x in 0..4 {
                    assert_eq!(level.get(x, y, z), VoxelKind::Air);
                }
            }
        }
        assert!(level.is_consistent());
    }

    #[test]
    fn out_of_bounds_reads_air_and_writes_nothing() {
        let mut level = VoxelLevel::new(2, 2, 2, 1.0);
        level.set(5, 0, 0, VoxelKind::Solid);
        assert_eq!(level.get(5, 0, 0), VoxelKind::Air);
        assert_eq!(level.get(-1, 0, 0), VoxelKind::Air);
    }

    #[test]
    fn floor_probe_settles_on_floor() {
        let level = floor_level();
        let hit = level
            .probe_floor(Vec3::new(4.5, 3.0, 4.5), HUMAN, 5.0)
            .unwrap();
        assert!((hit.location.y - 1.9).abs() < 1e-4);
        assert!((hit.distance - 1.1).abs() < 1e-4);
    }

    #[test]
    fn floor_probe_respects_depth() {
        let level = floor_level();
        assert!(level.probe_floor(Vec3::new(4.5, 6.0, 4.5), HUMAN, 1.0).is_none());
    }

    #[test]
    fn resting_body_has_zero_floor_distance() {
        let level = floor_level();
        let stand = level.stand_point(4, 0, 4, HUMAN.height);
        let hit = level.probe_floor(stand, HUMAN, 0.5).unwrap();
        assert_eq!(hit.distance, 0.0);
        assert!(!level.encroaches(stand, HUMAN));
    }

    #[test]
    fn line_check_hits_wall() {
        let mut level = floor_level();
        level.fill_box([8, 1, 0], [8, 4, 15], VoxelKind::Solid);
        let a = Vec3::new(2.5, 2.0, 4.5);
        let b = Vec3::new(12.5, 2.0, 4.5);
        let hit = level.line_check(a, b, LineMode::FirstHit).unwrap();
        assert!((hit.x - 8.0).abs() < 1e-3);
        assert_eq!(level.line_check(a, b, LineMode::AnyHit), Some(a));
    }

    #[test]
    fn line_check_clear_over_open_floor() {
        let level = floor_level();
        let a = Vec3::new(2.5, 1.9, 2.5);
        let b = Vec3::new(12.5, 1.9, 9.5);
        assert!(level.line_check(a, b, LineMode::FirstHit).is_none());
    }

    #[test]
    fn line_check_skips_destination_voxel() {
        let mut level = floor_level();
        level.set(6, 2, 2, VoxelKind::Solid);
        let a = Vec3::new(2.5, 2.5, 2.5);
        let b = Vec3::new(6.5, 2.5, 2.5);
        assert!(level.line_check(a, b, LineMode::AnyHit).is_none());
    }

    #[test]
    fn move_agent_walks_freely() {
        let level = floor_level();
        let start = level.stand_point(2, 0, 2, HUMAN.height);
        let moved = level.move_agent(start, Vec3::new(0.5, 0.0, 0.0), HUMAN, 0.55);
        assert!(!moved.blocked);
        assert!((moved.position - (start + Vec3::new(0.5, 0.0, 0.0))).length() < 1e-4);
    }

    #[test]
    fn move_agent_steps_up_low_ledge() {
        let mut level = VoxelLevel::with_floor(16, 8, 16, 0.5);
        // One half-meter step.
        level.fill_box([8, 1, 0], [15, 1, 15], VoxelKind::Solid);
        let mut pos = level.stand_point(5, 0, 4, HUMAN.height);
        for _ in 0..8 {
            pos = level.move_agent(pos, Vec3::new(0.5, 0.0, 0.0), HUMAN, 0.55).position;
        }
        assert!(pos.x > 4.5);
        assert!((pos.y - (1.0 + HUMAN.height)).abs() < 1e-3, "y = {}", pos.y);
    }

    #[test]
    fn move_agent_blocked_by_wall_slides() {
        let mut level = floor_level();
        level.fill_box([6, 1, 0], [6, 6, 15], VoxelKind::Solid);
        let start = level.stand_point(4, 0, 4, HUMAN.height);
        let moved = level.move_agent(start, Vec3::new(2.0, 0.0, 1.0), HUMAN, 0.55);
        assert!(moved.blocked);
        assert!(moved.position.x <= 6.0 - HUMAN.radius + 1e-3);
        assert!(moved.position.z > start.z, "slid along the wall");
        assert_eq!(moved.hit_normal, Some(Vec3::new(-1.0, 0.0, 0.0)));
    }

    #[test]
    fn doors_block_only_while_movers_block() {
        let mut level = floor_level();
        level.fill_box([6, 1, 0], [6, 6, 15], VoxelKind::Door);
        let a = level.stand_point(4, 0, 4, HUMAN.height);
        let b = level.stand_point(9, 0, 4, HUMAN.height);
        assert!(level.sweep_capsule(a, b, HUMAN).is_some());
        level.set_movers_blocking(false);
        assert!(level.sweep_capsule(a, b, HUMAN).is_none());
    }

    #[test]
    fn medium_lookup() {
        let mut level = floor_level();
        level.set(3, 1, 3, VoxelKind::Water);
        level.set(4, 1, 3, VoxelKind::Lava);
        level.set(5, 1, 3, VoxelKind::Ladder);
        assert_eq!(level.medium_at(Vec3::new(3.5, 1.5, 3.5)), Medium::Water);
        assert_eq!(level.medium_at(Vec3::new(4.5, 1.5, 3.5)), Medium::Hazard);
        assert_eq!(level.medium_at(Vec3::new(5.5, 1.5, 3.5)), Medium::Ladder);
        assert_eq!(level.medium_at(Vec3::new(6.5, 1.5, 3.5)), Medium::Air);
    }

    #[test]
    fn teleport_settles_onto_floor() {
        let level = floor_level();
        let placed = level
            .teleport_agent(Vec3::new(4.5, 2.4, 4.5), HUMAN)
            .unwrap();
        assert!((placed.y - 1.9).abs() < 1e-4);
    }

    #[test]
    fn serialization_is_run_length_encoded() {
        let level = floor_level();
        let json = serde_json::to_string(&level).unwrap();
        assert!(json.len() < 200, "json too large: {}", json.len());
        let restored: VoxelLevel = serde_json::from_str(&json).unwrap();
        assert!(restored.is_consistent());
        assert_eq!(restored.get(3, 0, 3), VoxelKind::Solid);
        assert_eq!(restored.get(3, 1, 3), VoxelKind::Air);
        assert!(restored.movers_blocking());
    }

    #[test]
    fn oversized_runs_are_rejected_before_expanding() {
        let json = r#"{"voxels":[["Solid",16],["Air",4000000000]],"size_x":4,"size_y":4,"size_z":4,"cell_size":1.0}"#;
        let err = serde_json::from_str::<VoxelLevel>(json).unwrap_err();
        assert!(err.to_string().contains("overrun"), "{err}");
    }

    #[test]
    fn short_runs_decode_but_are_inconsistent() {
        let json = r#"{"voxels":[["Solid",16]],"size_x":4,"size_y":4,"size_z":4,"cell_size":1.0}"#;
        let level: VoxelLevel = serde_json::from_str(json).unwrap();
        assert!(!level.is_consistent());
    }
}
