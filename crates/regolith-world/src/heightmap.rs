use crate::bits::BitStorage;
use crate::block::{BlockRegistry, BlockState};
use regolith_common::Result;

/// The tracked heightmap kinds. `*_WG` kinds are maintained while a chunk is
/// still generating; the others once it is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeightmapKind {
    WorldSurfaceWg,
    WorldSurface,
    OceanFloorWg,
    OceanFloor,
    MotionBlocking,
    MotionBlockingNoLeaves,
}

pub const ALL_KINDS: [HeightmapKind; 6] = [
    HeightmapKind::WorldSurfaceWg,
    HeightmapKind::WorldSurface,
    HeightmapKind::OceanFloorWg,
    HeightmapKind::OceanFloor,
    HeightmapKind::MotionBlocking,
    HeightmapKind::MotionBlockingNoLeaves,
];

impl HeightmapKind {
    pub fn name(self) -> &'static str {
        match self {
            HeightmapKind::WorldSurfaceWg => "WORLD_SURFACE_WG",
            HeightmapKind::WorldSurface => "WORLD_SURFACE",
            HeightmapKind::OceanFloorWg => "OCEAN_FLOOR_WG",
            HeightmapKind::OceanFloor => "OCEAN_FLOOR",
            HeightmapKind::MotionBlocking => "MOTION_BLOCKING",
            HeightmapKind::MotionBlockingNoLeaves => "MOTION_BLOCKING_NO_LEAVES",
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        ALL_KINDS.iter().copied().find(|kind| kind.name() == name)
    }

    /// Whether a block counts toward this kind's height.
    pub fn test(self, registry: &BlockRegistry, state: BlockState) -> bool {
        match self {
            HeightmapKind::WorldSurfaceWg | HeightmapKind::WorldSurface => !state.is_air(),
            HeightmapKind::OceanFloorWg | HeightmapKind::OceanFloor => {
                registry.blocks_motion(state)
            }
            HeightmapKind::MotionBlocking => {
                registry.blocks_motion(state) || registry.is_fluid(state)
            }
            HeightmapKind::MotionBlockingNoLeaves => {
                (registry.blocks_motion(state) || registry.is_fluid(state))
                    && !registry.is_leaves(state)
            }
        }
    }
}

const COLUMNS: usize = 256;
const HEIGHT_BITS: usize = 9;

/// Cached per-column "height of the first free block above the topmost
/// qualifying block". 0 means no block in the column qualifies. Backed by a
/// packed 9-bit array exposed as flat longs for tag serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Heightmap {
    kind: HeightmapKind,
    storage: BitStorage,
}

impl Heightmap {
    pub fn new(kind: HeightmapKind) -> Self {
        Heightmap {
            kind,
            storage: BitStorage::new(HEIGHT_BITS, COLUMNS),
        }
    }

    pub fn kind(&self) -> HeightmapKind {
        self.kind
    }

    fn column(x: usize, z: usize) -> usize {
        x + z * 16
    }

    pub fn first_available(&self, x: usize, z: usize) -> i32 {
        self.storage.get(Self::column(x, z)) as i32
    }

    pub fn set_height(&mut self, x: usize, z: usize, height: i32) {
        self.storage.set(Self::column(x, z), height as u64);
    }

    pub fn raw(&self) -> Vec<i64> {
        self.storage.raw().iter().map(|&word| word as i64).collect()
    }

    pub fn set_raw(&mut self, data: &[i64]) -> Result<()> {
        self.storage = BitStorage::from_raw(
            HEIGHT_BITS,
            COLUMNS,
            data.iter().map(|&word| word as u64).collect(),
        )?;
        Ok(())
    }

    /// Folds one block change into the cached height for its column.
    /// `get_block` resolves other blocks in the same column when a downward
    /// rescan is needed. Returns whether the cached value changed.
    pub fn update(
        &mut self,
        x: usize,
        y: i32,
        z: usize,
        state: BlockState,
        registry: &BlockRegistry,
        get_block: impl Fn(usize, i32, usize) -> BlockState,
    ) -> bool {
        let first = self.first_available(x, z);
        if y <= first - 2 {
            return false;
        }
        if self.kind.test(registry, state) {
            if y >= first {
                self.set_height(x, z, y + 1);
                return true;
            }
        } else if first - 1 == y {
            // The top qualifying block stopped qualifying; rescan downward.
            for below in (0..y).rev() {
                if self.kind.test(registry, get_block(x, below, z)) {
                    self.set_height(x, z, below + 1);
                    return true;
                }
            }
            self.set_height(x, z, 0);
            return true;
        }
        false
    }
}
