use crate::bits::BitStorage;
use crate::block::BlockState;
use regolith_common::{RegolithError, Result};
use std::collections::HashMap;

/// Entries in one section's block-state array.
pub const SECTION_VOLUME: usize = 4096;

const MIN_BITS: usize = 4;

fn bits_for(palette_len: usize) -> usize {
    let needed = usize::BITS as usize - (palette_len.max(2) - 1).leading_zeros() as usize;
    needed.max(MIN_BITS)
}

/// Palette-compressed block-state array for one section. Indices are stored
/// in a packed [`BitStorage`] whose width grows with the palette; the
/// palette itself is a local list of states, serialized by name.
#[derive(Debug, Clone, PartialEq)]
pub struct PalettedContainer {
    palette: Vec<BlockState>,
    index_of: HashMap<BlockState, u32>,
    storage: BitStorage,
}

impl PalettedContainer {
    /// All-air container at the minimum bit width.
    pub fn new() -> Self {
        let mut index_of = HashMap::new();
        index_of.insert(BlockState::AIR, 0);
        PalettedContainer {
            palette: vec![BlockState::AIR],
            index_of,
            storage: BitStorage::new(MIN_BITS, SECTION_VOLUME),
        }
    }

    /// Rebuilds a container from a stored palette and packed index data,
    /// validating word count and that every index resolves.
    pub fn from_parts(palette: Vec<BlockState>, data: Vec<u64>) -> Result<Self> {
        if palette.is_empty() {
            return Err(RegolithError::CorruptData(
                "section palette is empty".to_string(),
            ));
        }
        let bits = bits_for(palette.len());
        let storage = BitStorage::from_raw(bits, SECTION_VOLUME, data)?;
        for index in 0..SECTION_VOLUME {
            if storage.get(index) as usize >= palette.len() {
                return Err(RegolithError::CorruptData(format!(
                    "block index {} out of palette range {}",
                    storage.get(index),
                    palette.len()
                )));
            }
        }
        let mut index_of = HashMap::new();
        for (i, &state) in palette.iter().enumerate() {
            index_of.entry(state).or_insert(i as u32);
        }
        Ok(PalettedContainer {
            palette,
            index_of,
            storage,
        })
    }

    pub fn get(&self, index: usize) -> BlockState {
        self.palette[self.storage.get(index) as usize]
    }

    pub fn set(&mut self, index: usize, state: BlockState) {
        let id = self.id_for(state);
        self.storage.set(index, id as u64);
    }

    fn id_for(&mut self, state: BlockState) -> u32 {
        if let Some(&id) = self.index_of.get(&state) {
            return id;
        }
        if self.palette.len() == 1 << self.storage.bits() {
            self.grow();
        }
        let id = self.palette.len() as u32;
        self.palette.push(state);
        self.index_of.insert(state, id);
        id
    }

    fn grow(&mut self) {
        let mut wider = BitStorage::new(self.storage.bits() + 1, SECTION_VOLUME);
        for index in 0..SECTION_VOLUME {
            wider.set(index, self.storage.get(index));
        }
        self.storage = wider;
    }

    pub fn palette(&self) -> &[BlockState] {
        &self.palette
    }

    pub fn raw_data(&self) -> &[u64] {
        &self.storage.raw()[..]
    }

    pub fn count_matching(&self, mut predicate: impl FnMut(BlockState) -> bool) -> usize {
        // Count per palette id, then weigh by occupancy.
        let mut per_id = vec![0usize; self.palette.len()];
        for index in 0..SECTION_VOLUME {
            per_id[self.storage.get(index) as usize] += 1;
        }
        per_id
            .iter()
            .enumerate()
            .filter(|(id, _)| predicate(self.palette[*id]))
            .map(|(_, count)| count)
            .sum()
    }
}

impl Default for PalettedContainer {
    fn default() -> Self {
        Self::new()
    }
}
