use regolith_common::ChunkPos;

/// Entries in a chunk's biome array.
pub const BIOME_ARRAY_SIZE: usize = 1024;

/// Flat per-sub-volume biome indices, stored as the raw ints the tag format
/// carries.
#[derive(Debug, Clone, PartialEq)]
pub struct BiomeArray {
    data: Vec<i32>,
}

impl BiomeArray {
    pub fn filled(biome: i32) -> Self {
        BiomeArray {
            data: vec![biome; BIOME_ARRAY_SIZE],
        }
    }

    /// `None` if the slice is not exactly [`BIOME_ARRAY_SIZE`] entries.
    pub fn from_slice(data: &[i32]) -> Option<Self> {
        if data.len() == BIOME_ARRAY_SIZE {
            Some(BiomeArray {
                data: data.to_vec(),
            })
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> i32 {
        self.data[index]
    }

    pub fn set(&mut self, index: usize, biome: i32) {
        self.data[index] = biome;
    }

    pub fn as_slice(&self) -> &[i32] {
        &self.data
    }
}

/// Resolves biomes for chunks whose storage carried no biome array.
pub trait BiomeSource {
    fn generate(&self, pos: ChunkPos) -> BiomeArray;
}

/// Single-biome source, enough for tests and flat worlds.
pub struct FixedBiomeSource(pub i32);

impl BiomeSource for FixedBiomeSource {
    fn generate(&self, _pos: ChunkPos) -> BiomeArray {
        BiomeArray::filled(self.0)
    }
}
