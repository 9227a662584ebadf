//! End-to-end save/load coverage for the chunk pipeline: full and proto
//! regimes, recovery paths, and the file-backed record container.

use assert_matches::assert_matches;
use regolith_common::{BlockPos, ChunkPos, RegolithError, SectionPos};
use regolith_nbt::Tag;
use regolith_storage::chunk_serializer::{deserialize_chunk, serialize_chunk, DATA_VERSION};
use regolith_storage::record::{
    read_chunk_record, read_chunk_record_with_budget, write_chunk_record,
};
use regolith_world::biome::{BiomeArray, FixedBiomeSource};
use regolith_world::bits::{pack_section_rel, NibbleArray};
use regolith_world::block::{BlockDef, BlockRegistry, BlockState};
use regolith_world::carving::CarverKind;
use regolith_world::chunk::{Chunk, ChunkStatus, LevelChunk, ProtoChunk};
use regolith_world::entity::{
    generic_block_entity, generic_entity, BlockEntity, BlockEntityFactories, Entity,
    EntityFactories,
};
use regolith_world::heightmap::HeightmapKind;
use regolith_world::light::{LightLayer, LightingProvider, StoredLighting};
use regolith_world::registry::Registry;
use regolith_world::structure::{BoundingBox, StructurePiece, StructureStart};
use regolith_world::ticks::{
    CollectingScheduler, ScheduledTick, TickKind, TickPriority, TickStore, WorldScheduler,
};
use regolith_world::WorldContext;
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

struct TestWorld {
    blocks: BlockRegistry,
    fluids: Registry,
    structures: Registry,
    entities: EntityFactories,
    block_entities: BlockEntityFactories,
    biomes: FixedBiomeSource,
    lighting: StoredLighting,
    scheduler: CollectingScheduler,
}

impl TestWorld {
    fn new() -> Self {
        let mut blocks = BlockRegistry::new();
        blocks.register(BlockDef::new("stone").solid());
        blocks.register(BlockDef::new("water").fluid());
        blocks.register(BlockDef::new("torch").light(14));

        let mut fluids = Registry::new();
        fluids.register("water");
        fluids.register("lava");

        let mut structures = Registry::new();
        structures.register("ruin");

        let mut entities = EntityFactories::new();
        entities.register("walker", generic_entity);

        let mut block_entities = BlockEntityFactories::new();
        block_entities.register("chest", generic_block_entity);

        TestWorld {
            blocks,
            fluids,
            structures,
            entities,
            block_entities,
            biomes: FixedBiomeSource(7),
            lighting: StoredLighting::new(),
            scheduler: CollectingScheduler::new(),
        }
    }

    fn ctx(&mut self) -> WorldContext<'_> {
        WorldContext {
            blocks: &self.blocks,
            fluids: &self.fluids,
            structures: &self.structures,
            entities: &self.entities,
            block_entities: &self.block_entities,
            biome_source: &self.biomes,
            lighting: &mut self.lighting,
            scheduler: &mut self.scheduler,
            has_sky_light: true,
        }
    }

    fn stone(&self) -> BlockState {
        self.blocks.default_state("stone").unwrap()
    }
}

fn chest_payload(pos: BlockPos) -> Tag {
    let mut data = Tag::Compound(HashMap::new());
    data.insert("Items", Tag::List(vec![]));
    BlockEntity {
        id: "chest".to_string(),
        pos,
        data,
    }
    .save_to_tag()
}

/// A full-regime chunk with one populated section, a scheduled block tick,
/// a structure start plus reference, a block entity and an entity.
fn full_chunk(world: &TestWorld, pos: ChunkPos) -> LevelChunk {
    let stone = world.stone();
    let mut chunk = LevelChunk::new(pos);

    for x in 0..16 {
        for z in 0..16 {
            chunk.core.set_block_state(
                BlockPos::new(pos.min_block_x() + x, 60, pos.min_block_z() + z),
                stone,
                &world.blocks,
            );
        }
    }
    let tick_pos = BlockPos::new(pos.min_block_x() + 4, 60, pos.min_block_z() + 9);
    chunk.block_ticks = TickStore::Retained(vec![ScheduledTick {
        pos: tick_pos,
        target: stone,
        delay: 3,
        priority: TickPriority::High,
    }]);

    chunk.core.structure_starts.insert(
        "ruin".to_string(),
        StructureStart {
            name: "ruin".to_string(),
            chunk: pos,
            bounding_box: BoundingBox::new(0, 60, 0, 24, 75, 24),
            references: 1,
            pieces: vec![StructurePiece {
                kind: "ruin_hall".to_string(),
                bounding_box: BoundingBox::new(0, 60, 0, 10, 70, 10),
                data: Tag::Compound(HashMap::new()),
            }],
        },
    );
    chunk.core.structure_references.insert(
        "ruin".to_string(),
        vec![ChunkPos::new(pos.x + 1, pos.z).to_long()],
    );

    let chest_pos = BlockPos::new(pos.min_block_x() + 2, 60, pos.min_block_z() + 3);
    chunk.core.pending_block_entities.insert(chest_pos, chest_payload(chest_pos));

    let mut walker_data = Tag::Compound(HashMap::new());
    walker_data.insert("Health", Tag::Float(20.0));
    chunk.add_entity(Entity {
        type_name: "walker".to_string(),
        uuid: Uuid::from_u64_pair(11, 42),
        pos: [
            pos.min_block_x() as f64 + 8.5,
            61.0,
            pos.min_block_z() as f64 + 8.5,
        ],
        data: walker_data,
        persistent: true,
    });

    chunk.core.biomes = Some(BiomeArray::filled(7));
    chunk.core.is_light_on = true;
    chunk.core.unsaved = true;
    chunk
        .core
        .prime_heightmaps(&world.blocks, ChunkStatus::Full.required_heightmaps());
    chunk
}

fn scratch_file(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("regolith-test-{}-{}", std::process::id(), name));
    path
}

#[test]
fn test_full_chunk_round_trip() {
    let pos = ChunkPos::new(3, -2);
    let mut save_world = TestWorld::new();
    let mut chunk = Chunk::Full(full_chunk(&save_world, pos));

    // Stored light for the populated section.
    let mut light = NibbleArray::new();
    light.set(4, 12, 9, 13);
    save_world.lighting.enqueue_section_data(
        LightLayer::Block,
        SectionPos::of_chunk(pos, 3),
        Some(light.clone()),
        false,
    );

    let tag = serialize_chunk(&mut chunk, &mut save_world.ctx());
    assert_eq!(tag.get_int("DataVersion"), Some(DATA_VERSION));
    assert!(!chunk.core().unsaved, "a captured entity walk marks the chunk saved");

    let mut load_world = TestWorld::new();
    let loaded = deserialize_chunk(pos, &tag, &mut load_world.ctx()).unwrap();
    let Chunk::Full(loaded) = loaded else {
        panic!("full chunk came back as proto");
    };

    // Block states at every position.
    let stone = save_world.stone();
    for x in 0..16 {
        for z in 0..16 {
            for y in [59, 60, 61] {
                let probe = BlockPos::new(pos.min_block_x() + x, y, pos.min_block_z() + z);
                let expected = if y == 60 { stone } else { BlockState::AIR };
                assert_eq!(loaded.core.block_state(probe), expected, "at {}", probe);
            }
        }
    }

    // Scheduled tick (position, payload) pair survives.
    let tick_pos = BlockPos::new(pos.min_block_x() + 4, 60, pos.min_block_z() + 9);
    assert_eq!(
        loaded.block_ticks,
        TickStore::Retained(vec![ScheduledTick {
            pos: tick_pos,
            target: stone,
            delay: 3,
            priority: TickPriority::High,
        }])
    );

    // Structure start bounding box and the in-range reference.
    let start = &loaded.core.structure_starts["ruin"];
    assert_eq!(start.bounding_box, BoundingBox::new(0, 60, 0, 24, 75, 24));
    assert_eq!(start.pieces.len(), 1);
    assert_eq!(
        loaded.core.structure_references["ruin"],
        vec![ChunkPos::new(pos.x + 1, pos.z).to_long()]
    );

    // Block entity materialized at its position with its payload.
    let chest_pos = BlockPos::new(pos.min_block_x() + 2, 60, pos.min_block_z() + 3);
    let chest = &loaded.core.block_entities[&chest_pos];
    assert_eq!(chest.id, "chest");
    assert!(chest.data.contains("Items"));
    assert!(loaded.core.pending_block_entities.is_empty());

    // Entity materialized with identity and type payload intact.
    let walker: Vec<&Entity> = loaded.entities().collect();
    assert_eq!(walker.len(), 1);
    assert_eq!(walker[0].uuid, Uuid::from_u64_pair(11, 42));
    assert_eq!(walker[0].data.get("Health"), Some(&Tag::Float(20.0)));

    // Trusted light was handed to the load-side lighting provider.
    assert_eq!(
        load_world
            .lighting
            .section_data(LightLayer::Block, SectionPos::of_chunk(pos, 3)),
        Some(&light)
    );

    // Heightmaps and biomes came from storage, not recomputation.
    assert_eq!(
        loaded.core.heightmaps[&HeightmapKind::MotionBlocking].first_available(0, 0),
        61
    );
    assert_eq!(loaded.core.biomes.as_ref().unwrap().get(0), 7);
    assert!(!loaded.loaded, "a loaded chunk is read-mostly until promoted");
}

#[test]
fn test_proto_regime_preserved() {
    let pos = ChunkPos::new(-5, 11);
    let mut world = TestWorld::new();
    let stone = world.stone();

    let mut proto = ProtoChunk::new(pos);
    proto.core.status = ChunkStatus::Features;
    proto.core.set_block_state(
        BlockPos::new(pos.min_block_x() + 1, 33, pos.min_block_z() + 1),
        stone,
        &world.blocks,
    );
    proto
        .block_ticks
        .schedule(BlockPos::new(pos.min_block_x() + 1, 33, pos.min_block_z() + 1));
    proto
        .fluid_ticks
        .schedule(BlockPos::new(pos.min_block_x() + 2, 50, pos.min_block_z() + 2));
    proto.carving_mask_mut(CarverKind::Air).set(3, 40, 5);
    proto.add_light(BlockPos::new(pos.min_block_x() + 6, 70, pos.min_block_z() + 6));
    let mut payload = Tag::Compound(HashMap::new());
    payload.insert("id", Tag::String("walker".to_string()));
    proto.add_entity(payload.clone());
    proto
        .core
        .defer_post_process(BlockPos::new(pos.min_block_x() + 9, 17, pos.min_block_z()));

    let original = proto.clone();
    let tag = serialize_chunk(&mut Chunk::Proto(proto), &mut world.ctx());
    let loaded = deserialize_chunk(pos, &tag, &mut world.ctx()).unwrap();
    let Chunk::Proto(loaded) = loaded else {
        panic!("proto chunk was silently promoted to full");
    };

    assert_eq!(loaded.core.status, ChunkStatus::Features);
    assert_eq!(loaded.block_ticks, original.block_ticks);
    assert_eq!(loaded.fluid_ticks, original.fluid_ticks);
    assert_eq!(loaded.carving_masks, original.carving_masks);
    assert_eq!(loaded.lights, original.lights);
    assert_eq!(loaded.entities, original.entities);
    assert_eq!(loaded.core.post_processing, original.core.post_processing);
}

#[test]
fn test_far_structure_reference_dropped() {
    let pos = ChunkPos::new(0, 0);
    let mut world = TestWorld::new();
    let mut chunk = Chunk::Full(full_chunk(&world, pos));

    let near = ChunkPos::new(8, 0).to_long();
    let far = ChunkPos::new(9, 0).to_long();
    chunk
        .core_mut()
        .structure_references
        .insert("ruin".to_string(), vec![near, far]);

    let tag = serialize_chunk(&mut chunk, &mut world.ctx());
    let loaded = deserialize_chunk(pos, &tag, &mut world.ctx()).unwrap();

    assert_eq!(
        loaded.core().structure_references["ruin"],
        vec![near],
        "references beyond the sanity range are corrupt pointers"
    );
    // The rest of the chunk still loaded.
    assert!(loaded.core().structure_starts.contains_key("ruin"));
}

#[test]
fn test_unknown_structure_name_skipped() {
    let pos = ChunkPos::new(1, 1);
    let mut world = TestWorld::new();
    let mut chunk = Chunk::Full(full_chunk(&world, pos));
    chunk.core_mut().structure_starts.insert(
        "ghost".to_string(),
        StructureStart {
            name: "ghost".to_string(),
            chunk: pos,
            bounding_box: BoundingBox::new(0, 0, 0, 1, 1, 1),
            references: 0,
            pieces: vec![StructurePiece {
                kind: "ghost_room".to_string(),
                bounding_box: BoundingBox::new(0, 0, 0, 1, 1, 1),
                data: Tag::Compound(HashMap::new()),
            }],
        },
    );

    let tag = serialize_chunk(&mut chunk, &mut world.ctx());
    let loaded = deserialize_chunk(pos, &tag, &mut world.ctx()).unwrap();

    assert!(!loaded.core().structure_starts.contains_key("ghost"));
    assert!(loaded.core().structure_starts.contains_key("ruin"));
}

#[test]
fn test_position_mismatch_is_recoverable() {
    let stored_pos = ChunkPos::new(3, 4);
    let mut world = TestWorld::new();
    let mut chunk = Chunk::Full(full_chunk(&world, stored_pos));
    let tag = serialize_chunk(&mut chunk, &mut world.ctx());

    let expected = ChunkPos::new(5, 6);
    let loaded = deserialize_chunk(expected, &tag, &mut world.ctx()).unwrap();
    assert_eq!(loaded.pos(), expected, "the caller's coordinate wins");
}

#[test]
fn test_stored_light_distrusted_without_flag() {
    let pos = ChunkPos::new(2, 2);
    let mut save_world = TestWorld::new();
    let mut chunk = Chunk::Full(full_chunk(&save_world, pos));
    chunk.core_mut().is_light_on = false;

    let mut light = NibbleArray::new();
    light.set(0, 0, 0, 9);
    save_world.lighting.enqueue_section_data(
        LightLayer::Block,
        SectionPos::of_chunk(pos, 3),
        Some(light),
        false,
    );

    let tag = serialize_chunk(&mut chunk, &mut save_world.ctx());
    let mut load_world = TestWorld::new();
    deserialize_chunk(pos, &tag, &mut load_world.ctx()).unwrap();

    assert_eq!(
        load_world
            .lighting
            .section_data(LightLayer::Block, SectionPos::of_chunk(pos, 3)),
        None,
        "unlit chunks must not feed stale light into the lighting subsystem"
    );
}

#[test]
fn test_proto_light_sources_recovered_when_unlit() {
    let pos = ChunkPos::new(0, 3);
    let mut world = TestWorld::new();
    let torch = world.blocks.default_state("torch").unwrap();

    let mut proto = ProtoChunk::new(pos);
    proto.core.status = ChunkStatus::Light;
    proto.core.is_light_on = false;
    let torch_pos = BlockPos::new(pos.min_block_x() + 5, 39, pos.min_block_z() + 8);
    proto.core.set_block_state(torch_pos, torch, &world.blocks);

    let tag = serialize_chunk(&mut Chunk::Proto(proto), &mut world.ctx());
    let loaded = deserialize_chunk(pos, &tag, &mut world.ctx()).unwrap();
    let Chunk::Proto(loaded) = loaded else {
        panic!("expected proto chunk");
    };
    assert_eq!(loaded.lights[2], vec![pack_section_rel(torch_pos)]);
}

#[test]
fn test_missing_heightmaps_are_recomputed() {
    let pos = ChunkPos::new(6, 6);
    let mut world = TestWorld::new();
    let mut chunk = Chunk::Full(full_chunk(&world, pos));
    let expected_height =
        chunk.core().heightmaps[&HeightmapKind::MotionBlocking].first_available(3, 3);

    let mut tag = serialize_chunk(&mut chunk, &mut world.ctx());
    tag.get_mut("Level").unwrap().remove("Heightmaps");

    let loaded = deserialize_chunk(pos, &tag, &mut world.ctx()).unwrap();
    for kind in ChunkStatus::Full.required_heightmaps() {
        assert!(
            loaded.core().heightmaps.contains_key(kind),
            "missing {:?} after regeneration",
            kind
        );
    }
    assert_eq!(
        loaded.core().heightmaps[&HeightmapKind::MotionBlocking].first_available(3, 3),
        expected_height
    );
}

#[test]
fn test_tick_promotion_then_save_pulls_from_scheduler() {
    let pos = ChunkPos::new(4, 4);
    let mut world = TestWorld::new();
    let mut level = full_chunk(&world, pos);
    level.promote_ticks(&mut world.ctx());
    assert!(level.loaded);
    assert_eq!(level.block_ticks, TickStore::Active);

    let pending = world.scheduler.pending_in(TickKind::Block, pos);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].target, "stone");
    assert_eq!(pending[0].delay, 3);

    // Saving an active chunk extracts its entries from the scheduler.
    let mut chunk = Chunk::Full(level);
    let tag = serialize_chunk(&mut chunk, &mut world.ctx());
    let loaded = deserialize_chunk(pos, &tag, &mut world.ctx()).unwrap();
    let Chunk::Full(loaded) = loaded else {
        panic!("expected full chunk");
    };
    let stone = world.stone();
    assert_matches!(
        &loaded.block_ticks,
        TickStore::Retained(ticks) if ticks.len() == 1 && ticks[0].target == stone
    );
}

#[test]
fn test_chunk_record_file_round_trip() {
    let pos = ChunkPos::new(7, -7);
    let path = scratch_file("chunk.dat");
    let mut world = TestWorld::new();
    let mut chunk = Chunk::Full(full_chunk(&world, pos));

    write_chunk_record(&path, &mut chunk, &mut world.ctx()).unwrap();
    let loaded = read_chunk_record(&path, pos, &mut world.ctx()).unwrap();
    assert_eq!(loaded.pos(), pos);
    assert_eq!(loaded.status(), ChunkStatus::Full);

    let stone = world.stone();
    assert_eq!(
        loaded
            .core()
            .block_state(BlockPos::new(pos.min_block_x(), 60, pos.min_block_z())),
        stone
    );

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_chunk_record_honors_decode_budget() {
    let pos = ChunkPos::new(9, 9);
    let path = scratch_file("budget.dat");
    let mut world = TestWorld::new();
    let mut chunk = Chunk::Full(full_chunk(&world, pos));

    write_chunk_record(&path, &mut chunk, &mut world.ctx()).unwrap();
    let result = read_chunk_record_with_budget(&path, pos, &mut world.ctx(), 512);
    assert_matches!(result, Err(RegolithError::BudgetExceeded { .. }));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_corrupt_record_fails_without_panic() {
    let mut world = TestWorld::new();
    // No Level compound at all.
    let empty = Tag::Compound(HashMap::new());
    assert_matches!(
        deserialize_chunk(ChunkPos::new(0, 0), &empty, &mut world.ctx()),
        Err(RegolithError::CorruptData(_))
    );
}
