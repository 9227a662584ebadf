use crate::block::BlockState;
use crate::palette::PalettedContainer;
use regolith_common::Result;

/// One 16x16x16 slab of a chunk column.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSection {
    y: i32,
    block_count: u16,
    states: PalettedContainer,
}

impl ChunkSection {
    pub fn new(y: i32) -> Self {
        ChunkSection {
            y,
            block_count: 0,
            states: PalettedContainer::new(),
        }
    }

    /// Rebuilds a section from stored palette data, recounting non-air
    /// blocks rather than trusting the file.
    pub fn from_parts(y: i32, palette: Vec<BlockState>, data: Vec<u64>) -> Result<Self> {
        let states = PalettedContainer::from_parts(palette, data)?;
        let block_count = states.count_matching(|state| !state.is_air()) as u16;
        Ok(ChunkSection {
            y,
            block_count,
            states,
        })
    }

    fn index(x: usize, y: usize, z: usize) -> usize {
        (y << 8) | (z << 4) | x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn block_count(&self) -> u16 {
        self.block_count
    }

    /// True when the section holds no non-air blocks.
    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockState {
        self.states.get(Self::index(x, y, z))
    }

    /// Sets a block, returning the previous state.
    pub fn set(&mut self, x: usize, y: usize, z: usize, state: BlockState) -> BlockState {
        let index = Self::index(x, y, z);
        let old = self.states.get(index);
        if old == state {
            return old;
        }
        self.states.set(index, state);
        if old.is_air() && !state.is_air() {
            self.block_count += 1;
        } else if !old.is_air() && state.is_air() {
            self.block_count -= 1;
        }
        old
    }

    pub fn states(&self) -> &PalettedContainer {
        &self.states
    }
}
