//! Bidirectional mapping between a chunk and its tag tree.
//!
//! The on-disk record is a compound with a `DataVersion` int and a `Level`
//! compound holding everything else. Key names and sub-schemas are a
//! compatibility contract with existing save data; change nothing here
//! without a migration step.

use regolith_common::{ChunkPos, RegolithError, Result, SectionPos};
use regolith_logger::{log, LogSeverity};
use regolith_nbt::Tag;
use regolith_world::biome::BiomeArray;
use regolith_world::bits::NibbleArray;
use regolith_world::block::{BlockState, FluidId};
use regolith_world::carving::{CarverKind, CarvingMask};
use regolith_world::chunk::{Chunk, ChunkColumn, ChunkStatus, ChunkType, LevelChunk, ProtoChunk};
use regolith_world::entity::BlockEntity;
use regolith_world::heightmap::{Heightmap, HeightmapKind};
use regolith_world::light::LightLayer;
use regolith_world::section::ChunkSection;
use regolith_world::structure::StructureStart;
use regolith_world::ticks::{
    packed_sections_from_tag, packed_sections_to_tag, saved_ticks_from_tag, saved_ticks_to_tag,
    ProtoTickList, TickKind, TickStore,
};
use regolith_world::{WorldContext, SECTIONS_PER_CHUNK};
use std::collections::{BTreeMap, HashMap};

/// Schema version stamped on every record this pipeline writes.
pub const DATA_VERSION: i32 = 1976;

/// Structure references farther than this many chunks from their owner are
/// treated as corrupt pointers and dropped.
pub const STRUCTURE_REFERENCE_RANGE: i32 = 8;

/// Renders a chunk to its on-disk tag tree. Clears the full-regime chunk's
/// unsaved flag once the entity walk has been captured.
pub fn serialize_chunk(chunk: &mut Chunk, ctx: &mut WorldContext) -> Tag {
    let pos = chunk.pos();
    let mut level = Tag::Compound(HashMap::new());

    {
        let core = chunk.core();
        level.insert("xPos", Tag::Int(pos.x));
        level.insert("zPos", Tag::Int(pos.z));
        level.insert("LastUpdate", Tag::Long(core.last_update));
        level.insert("InhabitedTime", Tag::Long(core.inhabited_time));
        level.insert("Status", Tag::String(core.status.name().to_string()));
        if let Some(upgrade) = &core.upgrade_data {
            level.insert("UpgradeData", upgrade.clone());
        }

        // One record per vertical index that has block data or light data.
        // The range runs one section past each end of the column for the
        // light-only boundary sections.
        let mut section_records = Vec::new();
        for y in -1..=SECTIONS_PER_CHUNK as i32 {
            let section = if (0..SECTIONS_PER_CHUNK as i32).contains(&y) {
                core.sections[y as usize]
                    .as_ref()
                    .filter(|section| !section.is_empty())
            } else {
                None
            };
            let section_pos = SectionPos::of_chunk(pos, y);
            let block_light = ctx.lighting.section_data(LightLayer::Block, section_pos);
            let sky_light = if ctx.has_sky_light {
                ctx.lighting.section_data(LightLayer::Sky, section_pos)
            } else {
                None
            };
            if section.is_none() && block_light.is_none() && sky_light.is_none() {
                continue;
            }

            let mut record = Tag::Compound(HashMap::new());
            record.insert("Y", Tag::Byte(y as i8));
            if let Some(section) = section {
                record.insert("Palette", palette_to_tag(section.states().palette(), ctx));
                record.insert(
                    "BlockStates",
                    Tag::LongArray(
                        section
                            .states()
                            .raw_data()
                            .iter()
                            .map(|&word| word as i64)
                            .collect(),
                    ),
                );
            }
            if let Some(light) = block_light {
                record.insert("BlockLight", nibble_to_tag(light));
            }
            if let Some(light) = sky_light {
                record.insert("SkyLight", nibble_to_tag(light));
            }
            section_records.push(record);
        }
        level.insert("Sections", Tag::List(section_records));

        if core.is_light_on {
            level.insert("isLightOn", Tag::Byte(1));
        }
        if let Some(biomes) = &core.biomes {
            level.insert("Biomes", Tag::IntArray(biomes.as_slice().to_vec()));
        }

        let mut tiles = Vec::new();
        for block_entity in core.block_entities.values() {
            tiles.push(block_entity.save_to_tag());
        }
        for payload in core.pending_block_entities.values() {
            tiles.push(payload.clone());
        }
        level.insert("TileEntities", Tag::List(tiles));

        level.insert("PostProcessing", packed_sections_to_tag(&core.post_processing));

        let mut heightmaps = Tag::Compound(HashMap::new());
        for (kind, heightmap) in &core.heightmaps {
            heightmaps.insert(kind.name(), Tag::LongArray(heightmap.raw()));
        }
        level.insert("Heightmaps", heightmaps);

        level.insert("Structures", structures_to_tag(core));
    }

    match chunk {
        Chunk::Full(level_chunk) => {
            let mut entities = Vec::new();
            for entity in level_chunk.entities() {
                if entity.persistent {
                    entities.push(entity.save_to_tag());
                }
            }
            level.insert("Entities", Tag::List(entities));

            match &level_chunk.block_ticks {
                TickStore::ChunkRelative(list) => {
                    level.insert("ToBeTicked", list.to_tag());
                }
                TickStore::Retained(ticks) => {
                    level.insert(
                        "TileTicks",
                        saved_ticks_to_tag(ticks, |state| {
                            ctx.blocks.name(*state).map(str::to_owned)
                        }),
                    );
                }
                TickStore::Active => {
                    let pending = ctx.scheduler.pending_in(TickKind::Block, pos);
                    level.insert(
                        "TileTicks",
                        saved_ticks_to_tag(&pending, |name| Some(name.clone())),
                    );
                }
            }
            match &level_chunk.fluid_ticks {
                TickStore::ChunkRelative(list) => {
                    level.insert("LiquidsToBeTicked", list.to_tag());
                }
                TickStore::Retained(ticks) => {
                    level.insert(
                        "LiquidTicks",
                        saved_ticks_to_tag(ticks, |fluid| {
                            ctx.fluids.name(fluid.0).map(str::to_owned)
                        }),
                    );
                }
                TickStore::Active => {
                    let pending = ctx.scheduler.pending_in(TickKind::Fluid, pos);
                    level.insert(
                        "LiquidTicks",
                        saved_ticks_to_tag(&pending, |name| Some(name.clone())),
                    );
                }
            }

            level_chunk.core.unsaved = false;
        }
        Chunk::Proto(proto) => {
            level.insert("Entities", Tag::List(proto.entities.clone()));
            level.insert("Lights", packed_sections_to_tag(&proto.lights));
            if !proto.carving_masks.is_empty() {
                let mut masks = Tag::Compound(HashMap::new());
                for (kind, mask) in &proto.carving_masks {
                    masks.insert(kind.name(), Tag::ByteArray(mask.to_byte_array()));
                }
                level.insert("CarvingMasks", masks);
            }
            level.insert("ToBeTicked", proto.block_ticks.to_tag());
            level.insert("LiquidsToBeTicked", proto.fluid_ticks.to_tag());
        }
    }

    let mut root = Tag::Compound(HashMap::new());
    root.insert("DataVersion", Tag::Int(DATA_VERSION));
    root.insert("Level", level);
    root
}

fn nibble_to_tag(light: &NibbleArray) -> Tag {
    Tag::ByteArray(light.bytes().iter().map(|&byte| byte as i8).collect())
}

fn palette_to_tag(palette: &[BlockState], ctx: &WorldContext) -> Tag {
    let mut entries = Vec::with_capacity(palette.len());
    for &state in palette {
        let mut entry = Tag::Compound(HashMap::new());
        match ctx.blocks.def(state) {
            Some(def) => {
                entry.insert("Name", Tag::String(def.name.clone()));
                if !def.properties.is_empty() {
                    let mut properties = Tag::Compound(HashMap::new());
                    for (key, value) in &def.properties {
                        properties.insert(key.clone(), Tag::String(value.clone()));
                    }
                    entry.insert("Properties", properties);
                }
            }
            None => {
                log(
                    format!("palette state {:?} missing from registry, saving as air", state),
                    LogSeverity::Warning,
                );
                entry.insert("Name", Tag::String("air".to_string()));
            }
        }
        entries.push(entry);
    }
    Tag::List(entries)
}

fn structures_to_tag(core: &ChunkColumn) -> Tag {
    let mut starts = Tag::Compound(HashMap::new());
    for (name, start) in &core.structure_starts {
        starts.insert(name.clone(), start.to_tag());
    }
    let mut references = Tag::Compound(HashMap::new());
    for (name, refs) in &core.structure_references {
        references.insert(name.clone(), Tag::LongArray(refs.clone()));
    }
    let mut tag = Tag::Compound(HashMap::new());
    tag.insert("Starts", starts);
    tag.insert("References", references);
    tag
}

/// Rebuilds a chunk from its tag tree. `expected` is where the caller wants
/// the chunk; a differing stored coordinate is logged and overridden, not
/// fatal, to tolerate relocated chunk files.
pub fn deserialize_chunk(
    expected: ChunkPos,
    root: &Tag,
    ctx: &mut WorldContext,
) -> Result<Chunk> {
    let level = root.get_compound("Level").ok_or_else(|| {
        RegolithError::CorruptData("chunk record has no Level compound".to_string())
    })?;

    let stored = ChunkPos::new(
        level.get_int("xPos").unwrap_or(expected.x),
        level.get_int("zPos").unwrap_or(expected.z),
    );
    if stored != expected {
        log(
            format!(
                "{}",
                RegolithError::PositionMismatch {
                    expected,
                    actual: stored,
                }
            ),
            LogSeverity::Warning,
        );
    }

    let status = ChunkStatus::by_name(level.get_string("Status").unwrap_or("empty"));
    let is_light_on = level.get_bool("isLightOn");

    let mut core = ChunkColumn::new(expected);
    core.status = status;
    core.last_update = level.get_long("LastUpdate").unwrap_or(0);
    core.inhabited_time = level.get_long("InhabitedTime").unwrap_or(0);
    core.is_light_on = is_light_on;
    core.upgrade_data = level
        .get_compound("UpgradeData")
        .filter(|tag| tag.as_compound().map_or(false, |map| !map.is_empty()))
        .cloned();
    core.biomes = level.get_int_array("Biomes").and_then(BiomeArray::from_slice);

    if let Some(section_records) = level.get_list("Sections") {
        for record in section_records {
            let y = record.get_byte("Y").unwrap_or(0) as i32;

            if (0..SECTIONS_PER_CHUNK as i32).contains(&y) {
                if let (Some(palette), Some(data)) = (
                    record.get_list("Palette"),
                    record.get_long_array("BlockStates"),
                ) {
                    let section = read_section(y, palette, data, ctx)?;
                    // A section that decodes to all air stays structurally
                    // absent; block queries read air either way.
                    if !section.is_empty() {
                        core.sections[y as usize] = Some(section);
                    }
                }
            }

            // Stored light is only meaningful if lighting had completed
            // when the chunk was saved.
            if is_light_on {
                let section_pos = SectionPos::of_chunk(expected, y);
                if let Some(bytes) = record.get_byte_array("BlockLight") {
                    enqueue_light(ctx, LightLayer::Block, section_pos, bytes);
                }
                if ctx.has_sky_light {
                    if let Some(bytes) = record.get_byte_array("SkyLight") {
                        enqueue_light(ctx, LightLayer::Sky, section_pos, bytes);
                    }
                }
            }
        }
    }

    if let Some(stored_heightmaps) = level
        .get_compound("Heightmaps")
        .and_then(|tag| tag.as_compound())
    {
        for (name, value) in stored_heightmaps {
            let Some(kind) = HeightmapKind::by_name(name) else {
                continue;
            };
            let Some(data) = value.as_long_array() else {
                continue;
            };
            let mut heightmap = Heightmap::new(kind);
            if heightmap.set_raw(data).is_ok() {
                core.heightmaps.insert(kind, heightmap);
            } else {
                log(
                    format!("discarding malformed heightmap {} for chunk {}", name, expected),
                    LogSeverity::Warning,
                );
            }
        }
    }

    if let Some(structures) = level.get_compound("Structures") {
        read_structure_starts(structures.get_compound("Starts"), &mut core, ctx);
        read_structure_references(structures.get_compound("References"), &mut core, ctx);
    }

    if let Some(queues) = level.get("PostProcessing") {
        core.post_processing = packed_sections_from_tag(queues);
    }

    if let Some(tiles) = level.get_list("TileEntities") {
        for payload in tiles {
            match BlockEntity::pos_from_tag(payload) {
                Some(pos) => {
                    core.pending_block_entities.insert(pos, payload.clone());
                }
                None => log(
                    "discarding block entity payload with no position".to_string(),
                    LogSeverity::Warning,
                ),
            }
        }
    }

    let mut chunk = match status.chunk_type() {
        ChunkType::Full => {
            // Prefer the world-absolute tick encoding, fall back to the
            // chunk-relative shorts form.
            let block_ticks = if let Some(ticks) = level.get("TileTicks") {
                TickStore::Retained(saved_ticks_from_tag(ticks, |name| {
                    ctx.blocks.default_state(name)
                }))
            } else if let Some(shorts) = level.get("ToBeTicked") {
                TickStore::ChunkRelative(ProtoTickList::from_tag(shorts))
            } else {
                TickStore::Retained(Vec::new())
            };
            let fluid_ticks = if let Some(ticks) = level.get("LiquidTicks") {
                TickStore::Retained(saved_ticks_from_tag(ticks, |name| {
                    ctx.fluids.id(name).map(FluidId)
                }))
            } else if let Some(shorts) = level.get("LiquidsToBeTicked") {
                TickStore::ChunkRelative(ProtoTickList::from_tag(shorts))
            } else {
                TickStore::Retained(Vec::new())
            };

            let mut level_chunk = LevelChunk::new(expected);
            level_chunk.core = core;
            level_chunk.block_ticks = block_ticks;
            level_chunk.fluid_ticks = fluid_ticks;
            if level_chunk.core.biomes.is_none() {
                level_chunk.core.biomes = Some(ctx.biome_source.generate(expected));
            }
            if let Some(entities) = level.get_list("Entities") {
                level_chunk.pending_entities = entities.to_vec();
            }
            // Materialization is deferred to this point because the
            // factories need the chunk (for block states) to exist.
            level_chunk.materialize(ctx);
            Chunk::Full(level_chunk)
        }
        ChunkType::Proto => {
            let mut proto = ProtoChunk::new(expected);
            proto.core = core;
            if let Some(shorts) = level.get("ToBeTicked") {
                proto.block_ticks = ProtoTickList::from_tag(shorts);
            }
            if let Some(shorts) = level.get("LiquidsToBeTicked") {
                proto.fluid_ticks = ProtoTickList::from_tag(shorts);
            }
            if let Some(entities) = level.get_list("Entities") {
                for payload in entities {
                    proto.add_entity(payload.clone());
                }
            }
            if let Some(lights) = level.get("Lights") {
                proto.lights = packed_sections_from_tag(lights);
            }
            if let Some(masks) = level
                .get_compound("CarvingMasks")
                .and_then(|tag| tag.as_compound())
            {
                for (name, value) in masks {
                    let Some(kind) = CarverKind::by_name(name) else {
                        log(
                            format!("skipping carving mask for unknown carver {}", name),
                            LogSeverity::Warning,
                        );
                        continue;
                    };
                    if let Some(bytes) = value.as_byte_array() {
                        proto
                            .carving_masks
                            .insert(kind, CarvingMask::from_byte_array(bytes));
                    }
                }
            }
            // A chunk saved after its light stage but without trusted light
            // data needs its emissive positions rediscovered.
            if proto.core.status.is_or_after(ChunkStatus::Light) && !is_light_on {
                proto.scan_light_sources(ctx.blocks);
            }
            Chunk::Proto(proto)
        }
    };

    // Heightmap kinds the status requires but storage lacked are rebuilt
    // rather than failing the load.
    let missing: Vec<HeightmapKind> = chunk
        .status()
        .required_heightmaps()
        .iter()
        .copied()
        .filter(|kind| !chunk.core().heightmaps.contains_key(kind))
        .collect();
    if !missing.is_empty() {
        chunk.core_mut().prime_heightmaps(ctx.blocks, &missing);
    }

    Ok(chunk)
}

fn enqueue_light(ctx: &mut WorldContext, layer: LightLayer, pos: SectionPos, bytes: &[i8]) {
    let raw: Vec<u8> = bytes.iter().map(|&byte| byte as u8).collect();
    match NibbleArray::from_bytes(&raw) {
        Ok(array) => ctx.lighting.enqueue_section_data(layer, pos, Some(array), true),
        Err(err) => log(
            format!("discarding light data for section {}: {}", pos, err),
            LogSeverity::Warning,
        ),
    }
}

fn read_section(y: i32, palette_tag: &[Tag], data: &[i64], ctx: &WorldContext) -> Result<ChunkSection> {
    let mut palette = Vec::with_capacity(palette_tag.len());
    for entry in palette_tag {
        palette.push(palette_entry_state(entry, ctx));
    }
    ChunkSection::from_parts(
        y,
        palette,
        data.iter().map(|&word| word as u64).collect(),
    )
}

fn palette_entry_state(entry: &Tag, ctx: &WorldContext) -> BlockState {
    let Some(name) = entry.get_string("Name") else {
        log(
            "palette entry with no Name, using air".to_string(),
            LogSeverity::Warning,
        );
        return BlockState::AIR;
    };
    let mut properties = BTreeMap::new();
    if let Some(props) = entry
        .get_compound("Properties")
        .and_then(|tag| tag.as_compound())
    {
        for (key, value) in props {
            if let Some(value) = value.as_string() {
                properties.insert(key.clone(), value.to_string());
            }
        }
    }
    if let Some(state) = ctx.blocks.state_for(name, &properties) {
        return state;
    }
    if let Some(state) = ctx.blocks.default_state(name) {
        log(
            format!("unknown properties for block {}, using its default state", name),
            LogSeverity::Warning,
        );
        return state;
    }
    log(
        format!("unknown block {} in palette, using air", name),
        LogSeverity::Warning,
    );
    BlockState::AIR
}

fn read_structure_starts(tag: Option<&Tag>, core: &mut ChunkColumn, ctx: &WorldContext) {
    let Some(map) = tag.and_then(|tag| tag.as_compound()) else {
        return;
    };
    for (name, start_tag) in map {
        if !ctx.structures.contains(name) {
            log(
                format!("skipping start for unknown structure {}", name),
                LogSeverity::Warning,
            );
            continue;
        }
        if let Some(start) = StructureStart::from_tag(start_tag) {
            core.structure_starts.insert(name.clone(), start);
        }
    }
}

fn read_structure_references(tag: Option<&Tag>, core: &mut ChunkColumn, ctx: &WorldContext) {
    let Some(map) = tag.and_then(|tag| tag.as_compound()) else {
        return;
    };
    for (name, value) in map {
        if !ctx.structures.contains(name) {
            log(
                format!("skipping references for unknown structure {}", name),
                LogSeverity::Warning,
            );
            continue;
        }
        let Some(refs) = value.as_long_array() else {
            continue;
        };
        let mut kept = Vec::new();
        for &packed in refs {
            let other = ChunkPos::from_long(packed);
            if core.pos.distance_to(other) > STRUCTURE_REFERENCE_RANGE {
                log(
                    format!(
                        "dropping reference to structure {} at {}, too far from {}",
                        name, other, core.pos
                    ),
                    LogSeverity::Warning,
                );
            } else {
                kept.push(packed);
            }
        }
        if !kept.is_empty() {
            core.structure_references.insert(name.clone(), kept);
        }
    }
}
