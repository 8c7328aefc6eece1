// Entity registry: the level's list of world objects.
//
// The navigation core sees entities only through `EntityRegistry`
// (enumerate, spawn, destroy, look up). `EntityList` is the in-memory
// implementation and doubles as the level's saved entity list: nav points
// are persisted as ordinary entities of kind `NavPoint`, so there is no
// separate graph file.
//
// Entity kinds that want a waypoint (pickups, lifts and their exits, doors,
// teleporters, ladders, player starts, scripted markers) map to a `NodeKind`
// through `EntityKind::waypoint_kind`; the builder's MARK phase spawns one
// node per such entity.
//
// See also: `level.rs` for `NavPointRecord` and graph persistence,
// `builder.rs` for the MARK phase.

use crate::graph::NodeKind;
use crate::level::NavPointRecord;
use crate::types::{EntityId, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A persisted navigation node.
    NavPoint(Box<NavPointRecord>),
    Pickup { item: String },
    /// A lift platform, identified by `tag`.
    Lift { tag: String },
    /// A place to board or leave the lift tagged `lift`.
    LiftExit { lift: String },
    Door,
    /// Sends travelers to the teleporter tagged `destination`.
    Teleporter { tag: String, destination: String },
    /// One rung position of the ladder tagged `ladder`.
    Ladder { ladder: String },
    PlayerStart,
    ScriptedMarker { name: String },
    /// Anything navigation does not care about.
    Scenery,
}

impl EntityKind {
    /// The node kind this entity asks the builder to place, if any.
    pub fn waypoint_kind(&self) -> Option<NodeKind> {
        match self {
            EntityKind::Pickup { item } => Some(NodeKind::Pickup { item: item.clone() }),
            EntityKind::Lift { tag } => Some(NodeKind::LiftCenter { lift: tag.clone() }),
            EntityKind::LiftExit { lift } => Some(NodeKind::LiftExit { lift: lift.clone() }),
            EntityKind::Door => Some(NodeKind::Door),
            EntityKind::Teleporter { tag, destination } => Some(NodeKind::Teleporter {
                tag: tag.clone(),
                destination: destination.clone(),
            }),
            EntityKind::Ladder { ladder } => Some(NodeKind::Ladder {
                ladder: ladder.clone(),
            }),
            EntityKind::PlayerStart => Some(NodeKind::PlayerStart),
            EntityKind::ScriptedMarker { name } => Some(NodeKind::Marker { name: name.clone() }),
            EntityKind::NavPoint(_) | EntityKind::Scenery => None,
        }
    }

    pub fn is_nav_point(&self) -> bool {
        matches!(self, EntityKind::NavPoint(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3,
}

/// Enumerate, spawn and destroy world objects.
pub trait EntityRegistry {
    fn entities(&self) -> Vec<LevelEntity>;
    fn spawn(&mut self, kind: EntityKind, position: Vec3) -> EntityId;
    /// Returns false if no entity had that id.
    fn destroy(&mut self, id: EntityId) -> bool;
    fn get(&self, id: EntityId) -> Option<&LevelEntity>;
}

/// Ordered, serializable entity list. Ids are never reused.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityList {
    next_id: u32,
    entities: Vec<LevelEntity>,
}

impl EntityList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LevelEntity> {
        self.entities.iter()
    }

    /// Persisted nav point records, in list order.
    pub fn nav_points(&self) -> impl Iterator<Item = (EntityId, &NavPointRecord)> {
        self.entities.iter().filter_map(|e| match &e.kind {
            EntityKind::NavPoint(record) => Some((e.id, record.as_ref())),
            _ => None,
        })
    }

    /// Destroy every nav point entity. Returns how many were removed.
    pub fn clear_nav_points(&mut self) -> usize {
        let before = self.entities.len();
        self.entities.retain(|e| !e.kind.is_nav_point());
        before - self.entities.len()
    }
}

impl EntityRegistry for EntityList {
    fn entities(&self) -> Vec<LevelEntity> {
        self.entities.clone()
    }

    fn spawn(&mut self, kind: EntityKind, position: Vec3) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities.push(LevelEntity { id, kind, position });
        id
    }

    fn destroy(&mut self, id: EntityId) -> bool {
        match self.entities.iter().position(|e| e.id == id) {
            Some(i) => {
                self.entities.remove(i);
                true
            }
            None => false,
        }
    }

    fn get(&self, id: EntityId) -> Option<&LevelEntity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_assigns_fresh_ids() {
        let mut list = EntityList::new();
        let a = list.spawn(EntityKind::Door, Vec3::ZERO);
        let b = list.spawn(EntityKind::PlayerStart, Vec3::ONE);
        assert_ne!(a, b);
        assert!(list.destroy(a));
        let c = list.spawn(EntityKind::Scenery, Vec3::ZERO);
        assert_ne!(a, c, "ids are not reused");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn destroy_unknown_is_false() {
        let mut list = EntityList::new();
        assert!(!list.destroy(EntityId(42)));
    }

    #[test]
    fn waypoint_kinds() {
        assert_eq!(
            EntityKind::Lift { tag: "east".into() }.waypoint_kind(),
            Some(NodeKind::LiftCenter { lift: "east".into() })
        );
        assert_eq!(EntityKind::Scenery.waypoint_kind(), None);
        assert!(EntityKind::PlayerStart.waypoint_kind().is_some());
    }
}
