use crate::bits::pack_section_rel;
use crate::block::{BlockRegistry, BlockState, FluidId};
use crate::biome::BiomeArray;
use crate::carving::{CarverKind, CarvingMask};
use crate::context::WorldContext;
use crate::entity::{BlockEntity, Entity};
use crate::heightmap::{Heightmap, HeightmapKind};
use crate::section::ChunkSection;
use crate::structure::StructureStart;
use crate::ticks::{ProtoTickList, ScheduledTick, TickKind, TickPriority, TickStore};
use crate::{CHUNK_HEIGHT, SECTIONS_PER_CHUNK};
use regolith_common::{BlockPos, ChunkPos};
use regolith_logger::{log, LogSeverity};
use regolith_nbt::Tag;
use std::collections::HashMap;

/// Generation ladder. Variant order is the progression order, so `Ord`
/// compares progress directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChunkStatus {
    Empty,
    StructureStarts,
    StructureReferences,
    Biomes,
    Noise,
    Surface,
    Carvers,
    LiquidCarvers,
    Features,
    Light,
    Spawn,
    Heightmaps,
    Full,
}

/// Which of the two lifecycle regimes a status maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Proto,
    Full,
}

const STATUS_NAMES: [(ChunkStatus, &str); 13] = [
    (ChunkStatus::Empty, "empty"),
    (ChunkStatus::StructureStarts, "structure_starts"),
    (ChunkStatus::StructureReferences, "structure_references"),
    (ChunkStatus::Biomes, "biomes"),
    (ChunkStatus::Noise, "noise"),
    (ChunkStatus::Surface, "surface"),
    (ChunkStatus::Carvers, "carvers"),
    (ChunkStatus::LiquidCarvers, "liquid_carvers"),
    (ChunkStatus::Features, "features"),
    (ChunkStatus::Light, "light"),
    (ChunkStatus::Spawn, "spawn"),
    (ChunkStatus::Heightmaps, "heightmaps"),
    (ChunkStatus::Full, "full"),
];

const LIVE_HEIGHTMAPS: [HeightmapKind; 4] = [
    HeightmapKind::MotionBlocking,
    HeightmapKind::MotionBlockingNoLeaves,
    HeightmapKind::OceanFloor,
    HeightmapKind::WorldSurface,
];

const WORLDGEN_HEIGHTMAPS: [HeightmapKind; 2] = [
    HeightmapKind::OceanFloorWg,
    HeightmapKind::WorldSurfaceWg,
];

impl ChunkStatus {
    pub fn name(self) -> &'static str {
        STATUS_NAMES
            .iter()
            .find(|(status, _)| *status == self)
            .map(|(_, name)| *name)
            .unwrap_or("empty")
    }

    /// Unknown names read as `Empty`, the safe floor of the ladder.
    pub fn by_name(name: &str) -> Self {
        STATUS_NAMES
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(status, _)| *status)
            .unwrap_or(ChunkStatus::Empty)
    }

    pub fn chunk_type(self) -> ChunkType {
        if self == ChunkStatus::Full {
            ChunkType::Full
        } else {
            ChunkType::Proto
        }
    }

    pub fn is_or_after(self, other: ChunkStatus) -> bool {
        self >= other
    }

    /// Heightmap kinds a chunk at this status is expected to carry.
    pub fn required_heightmaps(self) -> &'static [HeightmapKind] {
        match self.chunk_type() {
            ChunkType::Full => &LIVE_HEIGHTMAPS,
            ChunkType::Proto => {
                if self.is_or_after(ChunkStatus::Noise) {
                    &WORLDGEN_HEIGHTMAPS
                } else {
                    &[]
                }
            }
        }
    }
}

fn column_block(
    sections: &[Option<ChunkSection>; SECTIONS_PER_CHUNK],
    x: usize,
    y: i32,
    z: usize,
) -> BlockState {
    if !(0..CHUNK_HEIGHT).contains(&y) {
        return BlockState::AIR;
    }
    match &sections[(y >> 4) as usize] {
        Some(section) => section.get(x, (y & 15) as usize, z),
        None => BlockState::AIR,
    }
}

/// State shared by both chunk regimes: block sections, biomes, heightmaps,
/// structure bookkeeping, deferred work queues and lifecycle metadata.
#[derive(Debug, Clone)]
pub struct ChunkColumn {
    pub pos: ChunkPos,
    pub sections: [Option<ChunkSection>; SECTIONS_PER_CHUNK],
    pub biomes: Option<BiomeArray>,
    pub heightmaps: HashMap<HeightmapKind, Heightmap>,
    pub structure_starts: HashMap<String, StructureStart>,
    pub structure_references: HashMap<String, Vec<i64>>,
    pub post_processing: [Vec<u16>; SECTIONS_PER_CHUNK],
    pub pending_block_entities: HashMap<BlockPos, Tag>,
    pub block_entities: HashMap<BlockPos, BlockEntity>,
    pub upgrade_data: Option<Tag>,
    pub status: ChunkStatus,
    pub last_update: i64,
    pub inhabited_time: i64,
    pub is_light_on: bool,
    pub unsaved: bool,
}

impl ChunkColumn {
    pub fn new(pos: ChunkPos) -> Self {
        ChunkColumn {
            pos,
            sections: Default::default(),
            biomes: None,
            heightmaps: HashMap::new(),
            structure_starts: HashMap::new(),
            structure_references: HashMap::new(),
            post_processing: Default::default(),
            pending_block_entities: HashMap::new(),
            block_entities: HashMap::new(),
            upgrade_data: None,
            status: ChunkStatus::Empty,
            last_update: 0,
            inhabited_time: 0,
            is_light_on: false,
            unsaved: false,
        }
    }

    pub fn block_state(&self, pos: BlockPos) -> BlockState {
        column_block(
            &self.sections,
            (pos.x & 15) as usize,
            pos.y,
            (pos.z & 15) as usize,
        )
    }

    /// Sets a block and folds the change into every tracked heightmap.
    /// Returns the previous state.
    pub fn set_block_state(
        &mut self,
        pos: BlockPos,
        state: BlockState,
        registry: &BlockRegistry,
    ) -> BlockState {
        if !(0..CHUNK_HEIGHT).contains(&pos.y) {
            return BlockState::AIR;
        }
        let (x, z) = ((pos.x & 15) as usize, (pos.z & 15) as usize);
        let section_index = (pos.y >> 4) as usize;
        if self.sections[section_index].is_none() {
            if state.is_air() {
                return BlockState::AIR;
            }
            self.sections[section_index] = Some(ChunkSection::new(section_index as i32));
        }
        let old = self.sections[section_index]
            .as_mut()
            .map(|section| section.set(x, (pos.y & 15) as usize, z, state))
            .unwrap_or(BlockState::AIR);
        if old != state {
            self.unsaved = true;
            let mut heightmaps = std::mem::take(&mut self.heightmaps);
            for heightmap in heightmaps.values_mut() {
                heightmap.update(x, pos.y, z, state, registry, |bx, by, bz| {
                    column_block(&self.sections, bx, by, bz)
                });
            }
            self.heightmaps = heightmaps;
        }
        old
    }

    /// Builds the requested heightmap kinds in one top-down pass per column,
    /// stopping early once every kind has found its surface.
    pub fn prime_heightmaps(&mut self, registry: &BlockRegistry, kinds: &[HeightmapKind]) {
        if kinds.is_empty() {
            return;
        }
        let mut heightmaps = std::mem::take(&mut self.heightmaps);
        for &kind in kinds {
            heightmaps.entry(kind).or_insert_with(|| Heightmap::new(kind));
        }
        let top_section = self
            .sections
            .iter()
            .rposition(|section| section.as_ref().map_or(false, |s| !s.is_empty()));

        for x in 0..16usize {
            for z in 0..16usize {
                for &kind in kinds {
                    if let Some(heightmap) = heightmaps.get_mut(&kind) {
                        heightmap.set_height(x, z, 0);
                    }
                }
                let Some(top_section) = top_section else {
                    continue;
                };
                let mut pending: Vec<HeightmapKind> = kinds.to_vec();
                let mut y = (top_section as i32) * 16 + 15;
                while y >= 0 && !pending.is_empty() {
                    let state = column_block(&self.sections, x, y, z);
                    if !state.is_air() {
                        let mut i = 0;
                        while i < pending.len() {
                            let kind = pending[i];
                            if kind.test(registry, state) {
                                if let Some(heightmap) = heightmaps.get_mut(&kind) {
                                    heightmap.set_height(x, z, y + 1);
                                }
                                pending.swap_remove(i);
                            } else {
                                i += 1;
                            }
                        }
                    }
                    y -= 1;
                }
            }
        }
        self.heightmaps = heightmaps;
    }

    /// Queues a position for the deferred second pass applied after load.
    pub fn defer_post_process(&mut self, pos: BlockPos) {
        let section = pos.y >> 4;
        if (0..SECTIONS_PER_CHUNK as i32).contains(&section) {
            self.post_processing[section as usize].push(pack_section_rel(pos));
        }
    }
}

/// A chunk still being generated. Tick schedules stay chunk-relative,
/// carving masks are live, and entities are raw payloads.
#[derive(Debug, Clone)]
pub struct ProtoChunk {
    pub core: ChunkColumn,
    pub block_ticks: ProtoTickList,
    pub fluid_ticks: ProtoTickList,
    pub carving_masks: HashMap<CarverKind, CarvingMask>,
    pub entities: Vec<Tag>,
    pub lights: [Vec<u16>; SECTIONS_PER_CHUNK],
}

impl ProtoChunk {
    pub fn new(pos: ChunkPos) -> Self {
        ProtoChunk {
            core: ChunkColumn::new(pos),
            block_ticks: ProtoTickList::new(),
            fluid_ticks: ProtoTickList::new(),
            carving_masks: HashMap::new(),
            entities: Vec::new(),
            lights: Default::default(),
        }
    }

    pub fn add_entity(&mut self, payload: Tag) {
        if payload.as_compound().is_some() {
            self.entities.push(payload);
        }
    }

    /// Records a light-emitting block position for the lighting pass.
    pub fn add_light(&mut self, pos: BlockPos) {
        let section = pos.y >> 4;
        if (0..SECTIONS_PER_CHUNK as i32).contains(&section) {
            self.lights[section as usize].push(pack_section_rel(pos));
        }
    }

    pub fn carving_mask_mut(&mut self, kind: CarverKind) -> &mut CarvingMask {
        self.carving_masks.entry(kind).or_default()
    }

    /// Rebuilds the deferred light-source lists by scanning every stored
    /// block for nonzero emission. Recovery path for chunks saved after the
    /// light stage without trusted light data.
    pub fn scan_light_sources(&mut self, registry: &BlockRegistry) {
        self.lights = Default::default();
        for (section_index, slot) in self.core.sections.iter().enumerate() {
            let Some(section) = slot.as_ref().filter(|s| !s.is_empty()) else {
                continue;
            };
            for y in 0..16usize {
                for z in 0..16usize {
                    for x in 0..16usize {
                        let state = section.get(x, y, z);
                        if registry.light_emission(state) > 0 {
                            self.lights[section_index].push(pack_section_rel(BlockPos::new(
                                x as i32,
                                y as i32,
                                z as i32,
                            )));
                        }
                    }
                }
            }
        }
    }
}

/// A fully generated, live chunk. Entities are materialized objects and
/// tick schedules promote into the world scheduler.
#[derive(Debug)]
pub struct LevelChunk {
    pub core: ChunkColumn,
    pub block_ticks: TickStore<BlockState>,
    pub fluid_ticks: TickStore<FluidId>,
    pub entity_sections: [Vec<Entity>; SECTIONS_PER_CHUNK],
    pub pending_entities: Vec<Tag>,
    /// False until the chunk is formally promoted into the live world;
    /// loaded-but-unpromoted chunks should be treated as read-mostly.
    pub loaded: bool,
}

impl LevelChunk {
    pub fn new(pos: ChunkPos) -> Self {
        let mut core = ChunkColumn::new(pos);
        core.status = ChunkStatus::Full;
        LevelChunk {
            core,
            block_ticks: TickStore::Retained(Vec::new()),
            fluid_ticks: TickStore::Retained(Vec::new()),
            entity_sections: Default::default(),
            pending_entities: Vec::new(),
            loaded: false,
        }
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entity_sections[entity.section_index()].push(entity);
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entity_sections.iter().flatten()
    }

    /// Realizes pending entity and block-entity payloads through the
    /// context's factories. Drains in snapshots so payloads queued while a
    /// batch is processed are picked up by the next round rather than
    /// mutating a list mid-iteration.
    pub fn materialize(&mut self, ctx: &mut WorldContext) {
        loop {
            let batch = std::mem::take(&mut self.pending_entities);
            if batch.is_empty() {
                break;
            }
            for payload in batch {
                let Some(type_name) = payload.get_string("id").map(str::to_owned) else {
                    log(
                        "skipping entity payload with no id".to_string(),
                        LogSeverity::Warning,
                    );
                    continue;
                };
                match ctx.entities.create(&type_name, &payload) {
                    Some(entity) => self.add_entity(entity),
                    None => log(
                        format!("skipping entity of unknown type {}", type_name),
                        LogSeverity::Warning,
                    ),
                }
            }
        }

        let pending = std::mem::take(&mut self.core.pending_block_entities);
        for (pos, payload) in pending {
            if payload.get_bool("keepPacked") {
                self.core.pending_block_entities.insert(pos, payload);
                continue;
            }
            let Some(id) = payload.get_string("id").map(str::to_owned) else {
                log(
                    format!("skipping block entity at {} with no id", pos),
                    LogSeverity::Warning,
                );
                continue;
            };
            let state = self.core.block_state(pos);
            match ctx.block_entities.create(&id, &payload, state) {
                Some(block_entity) => {
                    self.core.block_entities.insert(pos, block_entity);
                }
                None => log(
                    format!("skipping block entity of unknown type {} at {}", id, pos),
                    LogSeverity::Warning,
                ),
            }
        }
    }

    /// Hands any retained or chunk-relative tick entries to the world
    /// scheduler. One-way: afterwards both stores are `Active` and the
    /// chunk counts as promoted.
    pub fn promote_ticks(&mut self, ctx: &mut WorldContext) {
        let chunk_pos = self.core.pos;

        let block_entries: Vec<ScheduledTick<String>> =
            match std::mem::replace(&mut self.block_ticks, TickStore::Active) {
                TickStore::ChunkRelative(list) => list
                    .positions(chunk_pos)
                    .into_iter()
                    .filter_map(|pos| {
                        let state = self.core.block_state(pos);
                        if state.is_air() {
                            return None;
                        }
                        Some(ScheduledTick {
                            pos,
                            target: ctx.blocks.name(state)?.to_string(),
                            delay: 0,
                            priority: TickPriority::Normal,
                        })
                    })
                    .collect(),
                TickStore::Retained(ticks) => ticks
                    .into_iter()
                    .filter_map(|tick| {
                        Some(ScheduledTick {
                            pos: tick.pos,
                            target: ctx.blocks.name(tick.target)?.to_string(),
                            delay: tick.delay,
                            priority: tick.priority,
                        })
                    })
                    .collect(),
                TickStore::Active => Vec::new(),
            };
        if !block_entries.is_empty() {
            ctx.scheduler.schedule_all(TickKind::Block, block_entries);
        }

        let fluid_entries: Vec<ScheduledTick<String>> =
            match std::mem::replace(&mut self.fluid_ticks, TickStore::Active) {
                TickStore::ChunkRelative(list) => list
                    .positions(chunk_pos)
                    .into_iter()
                    .filter_map(|pos| {
                        let state = self.core.block_state(pos);
                        let name = ctx.blocks.name(state)?;
                        if ctx.fluids.contains(name) {
                            Some(ScheduledTick {
                                pos,
                                target: name.to_string(),
                                delay: 0,
                                priority: TickPriority::Normal,
                            })
                        } else {
                            None
                        }
                    })
                    .collect(),
                TickStore::Retained(ticks) => ticks
                    .into_iter()
                    .filter_map(|tick| {
                        Some(ScheduledTick {
                            pos: tick.pos,
                            target: ctx.fluids.name(tick.target.0)?.to_string(),
                            delay: tick.delay,
                            priority: tick.priority,
                        })
                    })
                    .collect(),
                TickStore::Active => Vec::new(),
            };
        if !fluid_entries.is_empty() {
            ctx.scheduler.schedule_all(TickKind::Fluid, fluid_entries);
        }

        self.loaded = true;
    }
}

/// A chunk in one of its two lifecycle regimes. The regime decides the
/// on-disk shape of tick schedules, carving masks and entities, and must
/// survive a save/load round trip.
#[derive(Debug)]
pub enum Chunk {
    Proto(ProtoChunk),
    Full(LevelChunk),
}

impl Chunk {
    pub fn core(&self) -> &ChunkColumn {
        match self {
            Chunk::Proto(proto) => &proto.core,
            Chunk::Full(level) => &level.core,
        }
    }

    pub fn core_mut(&mut self) -> &mut ChunkColumn {
        match self {
            Chunk::Proto(proto) => &mut proto.core,
            Chunk::Full(level) => &mut level.core,
        }
    }

    pub fn pos(&self) -> ChunkPos {
        self.core().pos
    }

    pub fn status(&self) -> ChunkStatus {
        self.core().status
    }

    pub fn is_proto(&self) -> bool {
        matches!(self, Chunk::Proto(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockDef;
    use crate::heightmap::ALL_KINDS;

    fn test_registry() -> (BlockRegistry, BlockState, BlockState, BlockState) {
        let mut registry = BlockRegistry::new();
        let stone = registry.register(BlockDef::new("stone").solid());
        let water = registry.register(BlockDef::new("water").fluid());
        let leaves = registry.register(BlockDef::new("oak_leaves").solid().leaves());
        (registry, stone, water, leaves)
    }

    #[test]
    fn test_status_names_round_trip() {
        for (status, name) in STATUS_NAMES {
            assert_eq!(ChunkStatus::by_name(name), status);
            assert_eq!(status.name(), name);
        }
        assert_eq!(ChunkStatus::by_name("???"), ChunkStatus::Empty);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(ChunkStatus::Full.chunk_type(), ChunkType::Full);
        assert_eq!(ChunkStatus::Features.chunk_type(), ChunkType::Proto);
        assert!(ChunkStatus::Light.is_or_after(ChunkStatus::Noise));
        assert!(!ChunkStatus::Biomes.is_or_after(ChunkStatus::Noise));
        assert!(ChunkStatus::Biomes.required_heightmaps().is_empty());
        assert_eq!(ChunkStatus::Surface.required_heightmaps().len(), 2);
        assert_eq!(ChunkStatus::Full.required_heightmaps().len(), 4);
    }

    #[test]
    fn test_block_get_set_across_sections() {
        let (registry, stone, _, _) = test_registry();
        let mut column = ChunkColumn::new(ChunkPos::new(2, 3));

        let low = BlockPos::new(33, 5, 49);
        let high = BlockPos::new(35, 200, 50);
        assert_eq!(column.set_block_state(low, stone, &registry), BlockState::AIR);
        assert_eq!(column.set_block_state(high, stone, &registry), BlockState::AIR);

        assert_eq!(column.block_state(low), stone);
        assert_eq!(column.block_state(high), stone);
        assert_eq!(column.block_state(BlockPos::new(33, 6, 49)), BlockState::AIR);
        // Out of the vertical range everything is air.
        assert_eq!(column.block_state(BlockPos::new(33, -1, 49)), BlockState::AIR);
        assert_eq!(column.block_state(BlockPos::new(33, 400, 49)), BlockState::AIR);
        assert!(column.unsaved);

        // Setting air where no section exists does not create one.
        let mut fresh = ChunkColumn::new(ChunkPos::new(0, 0));
        fresh.set_block_state(BlockPos::new(1, 100, 1), BlockState::AIR, &registry);
        assert!(fresh.sections.iter().all(Option::is_none));
    }

    #[test]
    fn test_prime_heightmaps_multi_kind_single_pass() {
        let (registry, stone, water, leaves) = test_registry();
        let mut column = ChunkColumn::new(ChunkPos::new(0, 0));
        // Column (0,0): stone at 10, water at 20, leaves at 30.
        column.set_block_state(BlockPos::new(0, 10, 0), stone, &registry);
        column.set_block_state(BlockPos::new(0, 20, 0), water, &registry);
        column.set_block_state(BlockPos::new(0, 30, 0), leaves, &registry);

        column.prime_heightmaps(&registry, &ALL_KINDS);
        let get = |kind: HeightmapKind| column.heightmaps[&kind].first_available(0, 0);
        assert_eq!(get(HeightmapKind::WorldSurface), 31);
        assert_eq!(get(HeightmapKind::MotionBlocking), 31); // leaves block motion
        assert_eq!(get(HeightmapKind::MotionBlockingNoLeaves), 21); // water
        assert_eq!(get(HeightmapKind::OceanFloor), 11); // stone only

        // An untouched column reads 0 everywhere.
        assert_eq!(column.heightmaps[&HeightmapKind::WorldSurface].first_available(5, 5), 0);
    }

    #[test]
    fn test_incremental_updates_match_bulk_recompute() {
        let (registry, stone, water, leaves) = test_registry();
        let palette = [BlockState::AIR, stone, water, leaves];
        let mut column = ChunkColumn::new(ChunkPos::new(0, 0));
        column.prime_heightmaps(&registry, &ALL_KINDS);

        // Deterministic scatter of placements and removals, one at a time,
        // each folded into the heightmaps incrementally.
        let mut seed: u64 = 0x9E3779B97F4A7C15;
        for _ in 0..2000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = (seed >> 8) as usize % 16;
            let z = (seed >> 16) as usize % 16;
            let y = ((seed >> 24) % 128) as i32;
            let state = palette[(seed >> 40) as usize % palette.len()];
            column.set_block_state(BlockPos::new(x as i32, y, z as i32), state, &registry);
        }

        let mut fresh = column.clone();
        fresh.heightmaps.clear();
        fresh.prime_heightmaps(&registry, &ALL_KINDS);
        for kind in ALL_KINDS {
            assert_eq!(
                column.heightmaps[&kind].raw(),
                fresh.heightmaps[&kind].raw(),
                "incremental and bulk heightmaps diverged for {:?}",
                kind
            );
        }
    }

    #[test]
    fn test_proto_light_scan_finds_emitters() {
        let mut registry = BlockRegistry::new();
        let torch = registry.register(BlockDef::new("torch").light(14));
        let stone = registry.register(BlockDef::new("stone").solid());

        let mut proto = ProtoChunk::new(ChunkPos::new(0, 0));
        proto.core.set_block_state(BlockPos::new(3, 40, 9), torch, &registry);
        proto.core.set_block_state(BlockPos::new(4, 41, 9), stone, &registry);
        proto.scan_light_sources(&registry);

        assert_eq!(proto.lights[2], vec![pack_section_rel(BlockPos::new(3, 40, 9))]);
        assert!(proto.lights[0].is_empty());
    }

    #[test]
    fn test_defer_post_process_groups_by_section() {
        let mut column = ChunkColumn::new(ChunkPos::new(0, 0));
        column.defer_post_process(BlockPos::new(1, 17, 2));
        column.defer_post_process(BlockPos::new(3, 30, 4));
        column.defer_post_process(BlockPos::new(0, 0, 0));
        assert_eq!(column.post_processing[1].len(), 2);
        assert_eq!(column.post_processing[0].len(), 1);
    }
}
