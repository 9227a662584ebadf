use crate::block::BlockState;
use crate::SECTIONS_PER_CHUNK;
use regolith_common::BlockPos;
use regolith_nbt::Tag;
use std::collections::HashMap;
use uuid::Uuid;

/// A live entity, materialized from its stored payload. The payload is kept
/// alongside the parsed fields so type-specific data survives a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub type_name: String,
    pub uuid: Uuid,
    pub pos: [f64; 3],
    pub data: Tag,
    pub persistent: bool,
}

impl Entity {
    /// Parses the fields every entity carries. Entities missing an id are
    /// not materializable; a missing UUID gets a fresh one.
    pub fn from_tag(tag: &Tag) -> Option<Entity> {
        let type_name = tag.get_string("id")?.to_string();
        let pos = match tag.get_list("Pos") {
            Some([x, y, z]) => [
                x.as_f64().unwrap_or(0.0),
                y.as_f64().unwrap_or(0.0),
                z.as_f64().unwrap_or(0.0),
            ],
            _ => [0.0; 3],
        };
        let uuid = match (tag.get_long("UUIDMost"), tag.get_long("UUIDLeast")) {
            (Some(most), Some(least)) => Uuid::from_u64_pair(most as u64, least as u64),
            _ => Uuid::new_v4(),
        };
        Some(Entity {
            type_name,
            uuid,
            pos,
            data: tag.clone(),
            persistent: true,
        })
    }

    pub fn save_to_tag(&self) -> Tag {
        let mut tag = if matches!(self.data, Tag::Compound(_)) {
            self.data.clone()
        } else {
            Tag::Compound(HashMap::new())
        };
        tag.insert("id", Tag::String(self.type_name.clone()));
        tag.insert(
            "Pos",
            Tag::List(vec![
                Tag::Double(self.pos[0]),
                Tag::Double(self.pos[1]),
                Tag::Double(self.pos[2]),
            ]),
        );
        let (most, least) = self.uuid.as_u64_pair();
        tag.insert("UUIDMost", Tag::Long(most as i64));
        tag.insert("UUIDLeast", Tag::Long(least as i64));
        tag
    }

    /// Entity-storage section this entity falls into, clamped to the column.
    pub fn section_index(&self) -> usize {
        ((self.pos[1] as i32) >> 4).clamp(0, SECTIONS_PER_CHUNK as i32 - 1) as usize
    }
}

pub type EntityFactory = fn(&Tag) -> Option<Entity>;

/// Name -> factory table for entity types, passed into deserialization.
#[derive(Default)]
pub struct EntityFactories {
    factories: HashMap<String, EntityFactory>,
}

impl EntityFactories {
    pub fn new() -> Self {
        EntityFactories::default()
    }

    pub fn register(&mut self, name: &str, factory: EntityFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str, tag: &Tag) -> Option<Entity> {
        self.factories.get(name).and_then(|factory| factory(tag))
    }
}

/// A realized block entity at a fixed position.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEntity {
    pub id: String,
    pub pos: BlockPos,
    pub data: Tag,
}

impl BlockEntity {
    pub fn save_to_tag(&self) -> Tag {
        let mut tag = if matches!(self.data, Tag::Compound(_)) {
            self.data.clone()
        } else {
            Tag::Compound(HashMap::new())
        };
        tag.insert("id", Tag::String(self.id.clone()));
        tag.insert("x", Tag::Int(self.pos.x));
        tag.insert("y", Tag::Int(self.pos.y));
        tag.insert("z", Tag::Int(self.pos.z));
        tag
    }

    /// The position a stored block-entity payload claims.
    pub fn pos_from_tag(tag: &Tag) -> Option<BlockPos> {
        Some(BlockPos::new(
            tag.get_int("x")?,
            tag.get_int("y")?,
            tag.get_int("z")?,
        ))
    }
}

pub type BlockEntityFactory = fn(&Tag, BlockState) -> Option<BlockEntity>;

/// Name -> factory table for block-entity types. Factories receive the
/// block state currently at the stored position.
#[derive(Default)]
pub struct BlockEntityFactories {
    factories: HashMap<String, BlockEntityFactory>,
}

impl BlockEntityFactories {
    pub fn new() -> Self {
        BlockEntityFactories::default()
    }

    pub fn register(&mut self, name: &str, factory: BlockEntityFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str, tag: &Tag, state: BlockState) -> Option<BlockEntity> {
        self.factories
            .get(name)
            .and_then(|factory| factory(tag, state))
    }
}

/// Factory that accepts any payload with the generic fields intact. Useful
/// as a default registration for types without special parsing.
pub fn generic_entity(tag: &Tag) -> Option<Entity> {
    Entity::from_tag(tag)
}

/// Block-entity counterpart of [`generic_entity`].
pub fn generic_block_entity(tag: &Tag, _state: BlockState) -> Option<BlockEntity> {
    Some(BlockEntity {
        id: tag.get_string("id")?.to_string(),
        pos: BlockEntity::pos_from_tag(tag)?,
        data: tag.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_tag_round_trip() {
        let mut data = Tag::Compound(HashMap::new());
        data.insert("Health", Tag::Float(18.0));
        let entity = Entity {
            type_name: "walker".to_string(),
            uuid: Uuid::from_u64_pair(0xDEAD, 0xBEEF),
            pos: [12.5, 66.0, -3.25],
            data,
            persistent: true,
        };

        let tag = entity.save_to_tag();
        let restored = Entity::from_tag(&tag).unwrap();
        assert_eq!(restored.type_name, "walker");
        assert_eq!(restored.uuid, entity.uuid);
        assert_eq!(restored.pos, entity.pos);
        assert_eq!(
            restored.data.get("Health"),
            Some(&Tag::Float(18.0)),
            "type-specific payload must survive"
        );
    }

    #[test]
    fn test_entity_without_id_does_not_materialize() {
        let tag = Tag::Compound(HashMap::new());
        assert!(Entity::from_tag(&tag).is_none());
    }

    #[test]
    fn test_entity_section_index_is_clamped() {
        let mut entity = Entity::from_tag(&{
            let mut tag = Tag::Compound(HashMap::new());
            tag.insert("id", Tag::String("walker".to_string()));
            tag
        })
        .unwrap();
        entity.pos = [0.0, -10.0, 0.0];
        assert_eq!(entity.section_index(), 0);
        entity.pos = [0.0, 300.0, 0.0];
        assert_eq!(entity.section_index(), SECTIONS_PER_CHUNK - 1);
        entity.pos = [0.0, 37.0, 0.0];
        assert_eq!(entity.section_index(), 2);
    }

    #[test]
    fn test_block_entity_tag_round_trip() {
        let mut data = Tag::Compound(HashMap::new());
        data.insert("Items", Tag::List(vec![]));
        let chest = BlockEntity {
            id: "chest".to_string(),
            pos: BlockPos::new(5, 64, -9),
            data,
        };
        let tag = chest.save_to_tag();
        assert_eq!(BlockEntity::pos_from_tag(&tag), Some(chest.pos));
        let restored = generic_block_entity(&tag, BlockState::AIR).unwrap();
        assert_eq!(restored.id, "chest");
        assert_eq!(restored.pos, chest.pos);
        assert!(restored.data.contains("Items"));
    }

    #[test]
    fn test_factories_dispatch_by_name() {
        let mut factories = EntityFactories::new();
        factories.register("walker", generic_entity);
        assert!(factories.contains("walker"));
        assert!(!factories.contains("flyer"));

        let mut tag = Tag::Compound(HashMap::new());
        tag.insert("id", Tag::String("walker".to_string()));
        assert!(factories.create("walker", &tag).is_some());
        assert!(factories.create("flyer", &tag).is_none());
    }
}
