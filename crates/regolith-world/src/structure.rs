use regolith_common::ChunkPos;
use regolith_nbt::Tag;
use std::collections::HashMap;

/// Inclusive axis-aligned block bounds of a structure or piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x0: i32,
    pub y0: i32,
    pub z0: i32,
    pub x1: i32,
    pub y1: i32,
    pub z1: i32,
}

impl BoundingBox {
    pub fn new(x0: i32, y0: i32, z0: i32, x1: i32, y1: i32, z1: i32) -> Self {
        BoundingBox {
            x0,
            y0,
            z0,
            x1,
            y1,
            z1,
        }
    }

    pub fn from_int_array(values: &[i32]) -> Option<Self> {
        if values.len() != 6 {
            return None;
        }
        Some(BoundingBox::new(
            values[0], values[1], values[2], values[3], values[4], values[5],
        ))
    }

    pub fn to_int_array(&self) -> Vec<i32> {
        vec![self.x0, self.y0, self.z0, self.x1, self.y1, self.z1]
    }
}

/// One placed piece of a structure. Everything beyond the type name and
/// bounds is piece-specific and carried through as an opaque compound.
#[derive(Debug, Clone, PartialEq)]
pub struct StructurePiece {
    pub kind: String,
    pub bounding_box: BoundingBox,
    pub data: Tag,
}

impl StructurePiece {
    pub fn to_tag(&self) -> Tag {
        let mut tag = if matches!(self.data, Tag::Compound(_)) {
            self.data.clone()
        } else {
            Tag::Compound(HashMap::new())
        };
        tag.insert("id", Tag::String(self.kind.clone()));
        tag.insert("BB", Tag::IntArray(self.bounding_box.to_int_array()));
        tag
    }

    pub fn from_tag(tag: &Tag) -> Option<Self> {
        let kind = tag.get_string("id")?.to_string();
        let bounding_box = BoundingBox::from_int_array(tag.get_int_array("BB")?)?;
        Some(StructurePiece {
            kind,
            bounding_box,
            data: tag.clone(),
        })
    }
}

/// A structure's placement record in the chunk that anchors it: bounds, a
/// back-reference count, and the pieces to place.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureStart {
    pub name: String,
    pub chunk: ChunkPos,
    pub bounding_box: BoundingBox,
    pub references: i32,
    pub pieces: Vec<StructurePiece>,
}

impl StructureStart {
    /// A start with no pieces serializes as the `INVALID` marker.
    pub fn to_tag(&self) -> Tag {
        let mut tag = Tag::Compound(HashMap::new());
        if self.pieces.is_empty() {
            tag.insert("id", Tag::String("INVALID".to_string()));
            return tag;
        }
        tag.insert("id", Tag::String(self.name.clone()));
        tag.insert("ChunkX", Tag::Int(self.chunk.x));
        tag.insert("ChunkZ", Tag::Int(self.chunk.z));
        tag.insert("references", Tag::Int(self.references));
        tag.insert("BB", Tag::IntArray(self.bounding_box.to_int_array()));
        tag.insert(
            "Children",
            Tag::List(self.pieces.iter().map(StructurePiece::to_tag).collect()),
        );
        tag
    }

    /// `None` for the `INVALID` marker or a record too damaged to carry a
    /// name and bounds.
    pub fn from_tag(tag: &Tag) -> Option<Self> {
        let name = tag.get_string("id")?.to_string();
        if name == "INVALID" {
            return None;
        }
        let bounding_box = BoundingBox::from_int_array(tag.get_int_array("BB")?)?;
        let chunk = ChunkPos::new(
            tag.get_int("ChunkX").unwrap_or(0),
            tag.get_int("ChunkZ").unwrap_or(0),
        );
        let pieces = tag
            .get_list("Children")
            .map(|children| {
                children
                    .iter()
                    .filter_map(StructurePiece::from_tag)
                    .collect()
            })
            .unwrap_or_default();
        Some(StructureStart {
            name,
            chunk,
            bounding_box,
            references: tag.get_int("references").unwrap_or(0),
            pieces,
        })
    }
}
