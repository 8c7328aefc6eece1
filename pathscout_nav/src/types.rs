// Core types shared across the navigation library.
//
// Defines world-space vectors (re-exported `glam::Vec3`), generation-checked
// node handles, entity identifiers, the capsule shape used by probes and
// travelers, and the two flag sets that qualify the graph: `ReachFlags` (what
// an edge requires / what a traveler can do) and `NodeFlags` (designer
// categories on a node). All types derive `Serialize`/`Deserialize` so they
// can ride along in saved levels.
//
// Conventions: Y is up. A capsule's `height` is its *half*-height, so a body
// standing on a floor at `y = f` has its center at `f + height`. Node
// positions are capsule centers at rest, never floor points.
//
// See also: `graph.rs` for the arena the handles index into, `reach.rs` for
// how `ReachFlags` are accumulated, `search.rs` for `Traveler` filtering.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use glam::Vec3;

// ---------------------------------------------------------------------------
// Handles and identifiers
// ---------------------------------------------------------------------------

/// Generation-checked handle to a node in a `PathGraph`.
///
/// The index addresses an arena slot; the generation is bumped whenever the
/// slot's node is removed, so a handle held across a removal is detected as
/// stale in O(1) instead of dangling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeHandle {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot index. Stable for the lifetime of the node.
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}v{}", self.index, self.generation)
    }
}

/// Identifier of an entity in the level's entity list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Who created a node. Designer nodes survive every rebuild; auto-built
/// nodes are eligible for merge and removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeOrigin {
    Designer,
    AutoBuilt,
}

// ---------------------------------------------------------------------------
// Flag sets
// ---------------------------------------------------------------------------

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident: $repr:ty {
            $( $(#[$fmeta:meta])* $flag:ident = $bit:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            pub const NONE: Self = Self(0);
            $( $(#[$fmeta])* pub const $flag: Self = Self(1 << $bit); )*

            /// True if every bit of `other` is set in `self`.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            pub const fn intersection(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            pub const fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// True if `self` has no bit outside `other`.
            pub const fn is_subset_of(self, other: Self) -> bool {
                self.0 & !other.0 == 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.insert(rhs);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut names = Vec::new();
                $( if self.contains(Self::$flag) { names.push(stringify!($flag)); } )*
                write!(f, "{}({})", stringify!($name), names.join("|"))
            }
        }
    };
}

flag_set! {
    /// Traversal requirements of an edge, or the matching capabilities of a
    /// traveler. `FORCED`, `PROSCRIBED` and `PLAYER_ONLY` are qualifiers, not
    /// movement modes, and are excluded from the requirement-subset test.
    ReachFlags: u16 {
        WALK = 0;
        FLY = 1;
        SWIM = 2;
        JUMP = 3;
        /// Passes through a door; the traveler must be able to open doors.
        DOOR = 4;
        LADDER = 5;
        /// Lift or teleporter.
        SPECIAL = 6;
        /// Designer-mandated; never pruned, never evaluated.
        FORCED = 7;
        /// Designer-forbidden; kept as a zero-traversal edge for tooling.
        PROSCRIBED = 8;
        PLAYER_ONLY = 9;
    }
}

impl ReachFlags {
    /// Movement modes a traveler needs matching capabilities for.
    pub const MOVEMENT: Self = Self(
        Self::WALK.0
            | Self::FLY.0
            | Self::SWIM.0
            | Self::JUMP.0
            | Self::DOOR.0
            | Self::LADDER.0
            | Self::SPECIAL.0,
    );

    /// The movement-mode subset of these flags.
    pub const fn requirements(self) -> Self {
        self.intersection(Self::MOVEMENT)
    }
}

flag_set! {
    /// Designer categories attached to a node.
    NodeFlags: u8 {
        /// Only player-controlled travelers may route through this node.
        PLAYER_ONLY = 0;
        /// Auto edges must leave and enter along the node's facing.
        ONE_WAY = 1;
        /// Review reports an error if nothing can reach this node.
        MUST_BE_REACHABLE = 2;
        /// Only forced and special edges touch this node.
        NO_AUTO_CONNECT = 3;
    }
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Vertical capsule. `height` is the half-height (center to foot).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    pub radius: f32,
    pub height: f32,
}

impl Capsule {
    pub const fn new(radius: f32, height: f32) -> Self {
        Self { radius, height }
    }

    /// Half extents of the capsule's bounding box.
    pub fn half_extents(self) -> Vec3 {
        Vec3::new(self.radius, self.height, self.radius)
    }
}

/// The body and abilities of an agent asking for a route.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Traveler {
    pub radius: f32,
    pub height: f32,
    /// Movement modes this traveler can perform.
    pub caps: ReachFlags,
    /// Highest landing speed the traveler survives.
    pub max_landing_speed: f32,
    pub is_player: bool,
}

impl Traveler {
    pub fn capsule(&self) -> Capsule {
        Capsule::new(self.radius, self.height)
    }

    /// A standing human that can walk, jump, swim, climb, open doors and
    /// ride lifts.
    pub fn human() -> Self {
        Self {
            radius: 0.35,
            height: 0.9,
            caps: ReachFlags::WALK
                | ReachFlags::JUMP
                | ReachFlags::SWIM
                | ReachFlags::DOOR
                | ReachFlags::LADDER
                | ReachFlags::SPECIAL,
            max_landing_speed: 11.0,
            is_player: false,
        }
    }
}

impl Default for Traveler {
    fn default() -> Self {
        Self::human()
    }
}

/// Drop the vertical component.
pub fn flatten(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}
